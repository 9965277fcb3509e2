//! Evidence requests, supplied evidence, and the per-investigation ledger.
//!
//! The operations on [`EvidenceTracker`] live in
//! [`crate::investigation::evidence`]; this module only defines the data.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::phase::OodaStep;

/// What kind of information a request asks for.
#[derive(
    Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceCategory {
    Symptoms,
    Timeline,
    Changes,
    Configuration,
    Scope,
    Metrics,
    Environment,
}

impl EvidenceCategory {
    pub const ALL: [EvidenceCategory; 7] = [
        EvidenceCategory::Symptoms,
        EvidenceCategory::Timeline,
        EvidenceCategory::Changes,
        EvidenceCategory::Configuration,
        EvidenceCategory::Scope,
        EvidenceCategory::Metrics,
        EvidenceCategory::Environment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EvidenceCategory::Symptoms => "symptoms",
            EvidenceCategory::Timeline => "timeline",
            EvidenceCategory::Changes => "changes",
            EvidenceCategory::Configuration => "configuration",
            EvidenceCategory::Scope => "scope",
            EvidenceCategory::Metrics => "metrics",
            EvidenceCategory::Environment => "environment",
        }
    }
}

impl fmt::Display for EvidenceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fulfilment status of an evidence request.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    Pending,
    Partial,
    Complete,
    Blocked,
    Obsolete,
}

impl EvidenceStatus {
    /// Still waiting on the user.
    pub fn is_open(self) -> bool {
        matches!(self, EvidenceStatus::Pending | EvidenceStatus::Partial)
    }
}

/// Request priority. Only `Critical` requests count toward coverage.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    Important,
    Optional,
}

impl Priority {
    /// Numeric rank, 1 = critical … 3 = optional.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 1,
            Priority::Important => 2,
            Priority::Optional => 3,
        }
    }
}

/// A piece of information the engine has asked the user for.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EvidenceRequest {
    pub id: String,
    pub label: String,
    pub description: String,
    pub category: EvidenceCategory,
    /// Free-text instructions on how to obtain the evidence.
    pub guidance: String,
    pub status: EvidenceStatus,
    /// Fraction of the request satisfied so far, in [0, 1].
    pub completeness: f64,
    pub priority: Priority,
    pub originating_step: OodaStep,
    pub hypothesis_id: Option<String>,
    pub created_turn: u32,
    /// Why the request is blocked, when it is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

/// How a piece of evidence bears on a hypothesis.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Bearing {
    Supports,
    Refutes,
}

/// A bearing judgement attached to a supplied evidence record.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct EvidenceBearing {
    pub hypothesis_id: String,
    pub bearing: Bearing,
}

/// Already-classified content delivered by the evidence supply channel.
///
/// The engine never sees raw file bytes, only this shape.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct EvidenceSubmission {
    /// Request this content answers, if the pipeline matched one.
    pub request_id: Option<String>,
    pub content: String,
    /// How much of the request this content satisfies, in (0, 1].
    pub completeness: f64,
    /// Category assigned by the classification pipeline.
    pub category: Option<EvidenceCategory>,
    /// Bearings already judged upstream.
    #[serde(default)]
    pub bearings: Vec<EvidenceBearing>,
    /// Name of the artifact the content was extracted from.
    pub source: Option<String>,
}

impl EvidenceSubmission {
    /// Content that fully answers a request.
    pub fn answering(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            content: content.into(),
            completeness: 1.0,
            ..Default::default()
        }
    }

    /// Content that partially answers a request.
    pub fn partial(request_id: impl Into<String>, content: impl Into<String>, completeness: f64) -> Self {
        Self {
            request_id: Some(request_id.into()),
            content: content.into(),
            completeness,
            ..Default::default()
        }
    }

    /// Unsolicited content not tied to any request.
    pub fn unsolicited(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            completeness: 1.0,
            ..Default::default()
        }
    }

    pub fn with_bearing(mut self, hypothesis_id: impl Into<String>, bearing: Bearing) -> Self {
        self.bearings.push(EvidenceBearing {
            hypothesis_id: hypothesis_id.into(),
            bearing,
        });
        self
    }

    pub fn with_category(mut self, category: EvidenceCategory) -> Self {
        self.category = Some(category);
        self
    }
}

/// A recorded piece of supplied evidence.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EvidenceProvided {
    pub id: String,
    pub request_id: Option<String>,
    pub content: String,
    pub category: Option<EvidenceCategory>,
    pub completeness: f64,
    pub received_turn: u32,
    #[serde(default)]
    pub bearings: Vec<EvidenceBearing>,
    pub source: Option<String>,
}

/// The evidence layer of one investigation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct EvidenceTracker {
    pub requests: Vec<EvidenceRequest>,
    pub provided: Vec<EvidenceProvided>,
    /// Cached result of the last coverage computation, in [0, 1].
    pub coverage: f64,
    pub(crate) next_request: u32,
    pub(crate) next_provided: u32,
}

impl EvidenceTracker {
    pub fn request(&self, id: &str) -> Option<&EvidenceRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    pub fn request_mut(&mut self, id: &str) -> Option<&mut EvidenceRequest> {
        self.requests.iter_mut().find(|r| r.id == id)
    }

    /// Requests still waiting on the user, most important first.
    pub fn open_requests(&self) -> Vec<&EvidenceRequest> {
        let mut open: Vec<&EvidenceRequest> =
            self.requests.iter().filter(|r| r.status.is_open()).collect();
        open.sort_by_key(|r| (r.priority, r.created_turn));
        open
    }

    pub fn blocked_requests(&self) -> impl Iterator<Item = &EvidenceRequest> {
        self.requests
            .iter()
            .filter(|r| r.status == EvidenceStatus::Blocked)
    }

    /// Evidence records received on the given turn.
    pub fn received_on(&self, turn: u32) -> impl Iterator<Item = &EvidenceProvided> {
        self.provided.iter().filter(move |p| p.received_turn == turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rank_and_ordering() {
        assert_eq!(Priority::Critical.rank(), 1);
        assert_eq!(Priority::Optional.rank(), 3);
        assert!(Priority::Critical < Priority::Important);
    }

    #[test]
    fn submission_builders() {
        let s = EvidenceSubmission::answering("E1", "logs attached")
            .with_bearing("H1", Bearing::Supports)
            .with_category(EvidenceCategory::Metrics);
        assert_eq!(s.request_id.as_deref(), Some("E1"));
        assert_eq!(s.completeness, 1.0);
        assert_eq!(s.bearings.len(), 1);
        assert_eq!(s.category, Some(EvidenceCategory::Metrics));
        assert!(EvidenceSubmission::unsolicited("x").request_id.is_none());
    }

    #[test]
    fn open_status() {
        assert!(EvidenceStatus::Partial.is_open());
        assert!(!EvidenceStatus::Blocked.is_open());
        assert!(!EvidenceStatus::Complete.is_open());
    }
}
