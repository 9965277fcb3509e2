//! The anomaly frame and completed OODA iteration records.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::hypothesis::{HypothesisCategory, HypothesisStatus};
use super::phase::{OodaStep, Phase};

/// Impact severity of the anomaly.
#[derive(
    Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Confidence-scored statement of what is wrong.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnomalyFrame {
    pub statement: String,
    pub affected_components: Vec<String>,
    pub scope: Option<String>,
    /// When the problem started, as reported (free text or RFC 3339).
    pub started_at: Option<String>,
    pub severity: Severity,
    /// Confidence in the frame, in [0, 1].
    pub confidence: f64,
    /// Number of times the frame has been revised since it was created.
    pub revision: u32,
    /// The user has confirmed the frame.
    pub acknowledged: bool,
}

impl AnomalyFrame {
    pub fn new(statement: impl Into<String>, severity: Severity) -> Self {
        Self {
            statement: statement.into(),
            affected_components: Vec::new(),
            scope: None,
            started_at: None,
            severity,
            confidence: 0.0,
            revision: 0,
            acknowledged: false,
        }
    }

    /// Short subject phrase used by hypothesis templates.
    pub fn subject(&self) -> String {
        match (&self.scope, self.affected_components.first()) {
            (Some(scope), Some(component)) => format!("{component} failures for {scope}"),
            (None, Some(component)) => format!("{component} failures"),
            (Some(scope), None) => format!("the failures affecting {scope}"),
            (None, None) => "the reported failures".to_string(),
        }
    }
}

/// Outcome of testing one hypothesis in the Act step.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Supported,
    Refuted,
    Inconclusive,
}

/// A test or action executed in the Act step.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActionRecord {
    /// Hypothesis under test, `None` for solution-phase actions.
    pub hypothesis_id: Option<String>,
    pub evidence_id: Option<String>,
    pub description: String,
    pub outcome: TestOutcome,
}

/// How one hypothesis moved during an iteration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HypothesisDelta {
    pub hypothesis_id: String,
    pub before: f64,
    pub after: f64,
    pub status: HypothesisStatus,
}

/// A completed tactical reasoning cycle.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OodaIteration {
    pub id: String,
    pub number: u32,
    pub phase: Phase,
    pub start_turn: u32,
    pub end_turn: u32,
    pub steps_completed: Vec<OodaStep>,
    pub steps_skipped: Vec<OodaStep>,
    pub new_evidence: u32,
    pub new_hypotheses: u32,
    pub tests_performed: u32,
    pub hypotheses_retired: u32,
    /// Change in the maximum hypothesis likelihood since the previous iteration.
    pub confidence_delta: f64,
    pub insights: Vec<String>,
    pub made_progress: bool,
    pub stall_reason: Option<String>,
    /// Hypotheses generated, tested, or retired in this iteration.
    pub touched_hypotheses: Vec<String>,
    /// Categories of the hypotheses tested in this iteration.
    pub tested_categories: Vec<HypothesisCategory>,
    pub actions: Vec<ActionRecord>,
    #[serde(default)]
    pub hypothesis_deltas: Vec<HypothesisDelta>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_by_impact() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High >= Severity::High);
        assert!(Severity::Low < Severity::Medium);
    }

    #[test]
    fn subject_uses_scope_and_component() {
        let mut frame = AnomalyFrame::new("API 500 errors", Severity::High);
        assert_eq!(frame.subject(), "the reported failures");
        frame.scope = Some("EU users".into());
        frame.affected_components.push("API".into());
        assert_eq!(frame.subject(), "API failures for EU users");
    }
}
