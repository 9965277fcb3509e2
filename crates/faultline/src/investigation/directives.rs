//! What a turn hands back to the presentation layer.
//!
//! [`ResponseDirectives`] is the structured result of one turn;
//! [`ProgressSummary`] is the read-only projection for UI and telemetry;
//! [`InvestigationReport`] is the Document-phase synthesis. None of them
//! carry natural-language phrasing beyond short labels and reasons.

use serde::Serialize;

use crate::memory::TierUsage;
use crate::model::{
    AnomalyFrame, ConfidencePoint, EngagementMode, EvidenceCategory, EvidenceRequest,
    EvidenceStatus, Hypothesis, HypothesisCategory, HypothesisStatus, InvestigationState,
    InvestigationStatus, Phase, PhaseTransition, Priority, SignalStrength, Strategy, Urgency,
};

use super::evidence::alternative_suggestions;
use super::hypotheses::{AnchoringReason, stalled_streak};

// ── Views ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HypothesisView {
    pub id: String,
    pub statement: String,
    pub category: HypothesisCategory,
    pub likelihood: f64,
    pub status: HypothesisStatus,
    pub tests_run: u32,
}

impl From<&Hypothesis> for HypothesisView {
    fn from(h: &Hypothesis) -> Self {
        Self {
            id: h.id.clone(),
            statement: h.statement.clone(),
            category: h.category,
            likelihood: h.likelihood,
            status: h.status,
            tests_run: h.tests_run,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceRequestView {
    pub id: String,
    pub label: String,
    pub description: String,
    pub category: EvidenceCategory,
    pub guidance: String,
    pub priority: Priority,
    pub status: EvidenceStatus,
    pub completeness: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypothesis_id: Option<String>,
}

impl From<&EvidenceRequest> for EvidenceRequestView {
    fn from(r: &EvidenceRequest) -> Self {
        Self {
            id: r.id.clone(),
            label: r.label.clone(),
            description: r.description.clone(),
            category: r.category,
            guidance: r.guidance.clone(),
            priority: r.priority,
            status: r.status,
            completeness: r.completeness,
            hypothesis_id: r.hypothesis_id.clone(),
        }
    }
}

/// A blocked request with other ways to get the same information.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockedEvidence {
    pub request_id: String,
    pub label: String,
    pub reason: Option<String>,
    pub critical: bool,
    pub alternatives: Vec<String>,
}

impl From<&EvidenceRequest> for BlockedEvidence {
    fn from(r: &EvidenceRequest) -> Self {
        Self {
            request_id: r.id.clone(),
            label: r.label.clone(),
            reason: r.blocked_reason.clone(),
            critical: r.priority == Priority::Critical,
            alternatives: alternative_suggestions(r),
        }
    }
}

/// An investigation offer awaiting the user's answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsentPrompt {
    pub signal: SignalStrength,
    pub urgency: Urgency,
    pub strategy: Strategy,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchoringNotice {
    pub reason: AnchoringReason,
    pub description: String,
    /// Categories the next hypotheses are drawn from.
    pub forced_categories: Vec<HypothesisCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StallNotice {
    pub iterations: usize,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectionNotice {
    pub from: Phase,
    pub to: Phase,
    pub reason: String,
}

/// A capability that ran in a reduced form this turn: a reasoning call that
/// fell back to its deterministic path, or turn input that was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradedCapability {
    pub capability: String,
    pub error: String,
}

// ── Directives ────────────────────────────────────────────────────

/// Structured result of one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseDirectives {
    pub investigation_id: String,
    pub case_id: String,
    pub turn: u32,
    pub mode: EngagementMode,
    pub status: InvestigationStatus,
    pub phase: Phase,
    pub phase_goal: String,
    /// Consultant record this turn's investigation replaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent: Option<ConsentPrompt>,
    pub active_hypotheses: Vec<HypothesisView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<HypothesisView>,
    pub pending_evidence: Vec<EvidenceRequestView>,
    pub blocked_evidence: Vec<BlockedEvidence>,
    pub coverage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchoring: Option<AnchoringNotice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stall: Option<StallNotice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectionNotice>,
    pub degraded: Vec<DegradedCapability>,
    /// Transitions taken during this turn.
    pub transitions: Vec<PhaseTransition>,
    /// A transition the engine recommends but will not take on its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_transition: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<InvestigationReport>,
}

impl ResponseDirectives {
    /// Directives describing `state` as it stands, with no turn-specific
    /// notices.
    pub fn for_state(state: &InvestigationState) -> Self {
        let mut active: Vec<HypothesisView> =
            state.ooda.active_hypotheses().map(HypothesisView::from).collect();
        active.sort_by(|a, b| b.likelihood.total_cmp(&a.likelihood));
        Self {
            investigation_id: state.id.clone(),
            case_id: state.case_id.clone(),
            turn: state.turn,
            mode: state.mode,
            status: state.status,
            phase: state.phase,
            phase_goal: state.phase.definition().goal.to_string(),
            superseded_id: None,
            consent: None,
            active_hypotheses: active,
            validated: validated_hypothesis(state).map(HypothesisView::from),
            pending_evidence: state
                .evidence
                .open_requests()
                .into_iter()
                .map(EvidenceRequestView::from)
                .collect(),
            blocked_evidence: state
                .evidence
                .blocked_requests()
                .map(BlockedEvidence::from)
                .collect(),
            coverage: state.evidence.coverage_score(),
            anchoring: None,
            stall: None,
            rejection: None,
            degraded: Vec::new(),
            transitions: Vec::new(),
            suggested_transition: None,
            report: None,
        }
    }

    /// Anchoring, a stall, or blocked critical evidence needs the user.
    pub fn needs_attention(&self) -> bool {
        self.anchoring.is_some()
            || self.stall.is_some()
            || self.blocked_evidence.iter().any(|b| b.critical)
    }
}

fn validated_hypothesis(state: &InvestigationState) -> Option<&Hypothesis> {
    state
        .ooda
        .hypotheses
        .iter()
        .filter(|h| h.status == HypothesisStatus::Validated)
        .max_by(|a, b| a.likelihood.total_cmp(&b.likelihood))
}

// ── Progress view ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HypothesisCounts {
    pub pending: usize,
    pub testing: usize,
    pub validated: usize,
    pub refuted: usize,
    pub retired: usize,
}

/// Read-only projection of an investigation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSummary {
    pub investigation_id: String,
    pub case_id: String,
    pub mode: EngagementMode,
    pub status: InvestigationStatus,
    pub phase: Phase,
    pub phase_ordinal: u8,
    pub phase_count: usize,
    pub entry_phase: Phase,
    pub urgency: Urgency,
    pub strategy: Strategy,
    pub turn: u32,
    pub iterations: u32,
    pub phase_iterations: u32,
    pub hypotheses: HypothesisCounts,
    pub top_hypothesis: Option<HypothesisView>,
    pub anomaly: Option<AnomalyFrame>,
    pub coverage: f64,
    pub open_requests: usize,
    pub blocked_requests: usize,
    pub anchoring_detected: bool,
    pub stalled_iterations: usize,
    pub memory: TierUsage,
    pub compressions: u32,
    /// Most recent end-of-turn maximum likelihoods.
    pub confidence_trend: Vec<ConfidencePoint>,
}

const TREND_POINTS: usize = 5;

/// Build the progress view. Pure: the same state always yields the same
/// summary.
pub fn progress_view(state: &InvestigationState, chars_per_token: f64) -> ProgressSummary {
    let mut counts = HypothesisCounts::default();
    for h in &state.ooda.hypotheses {
        match h.status {
            HypothesisStatus::Pending => counts.pending += 1,
            HypothesisStatus::Testing => counts.testing += 1,
            HypothesisStatus::Validated => counts.validated += 1,
            HypothesisStatus::Refuted => counts.refuted += 1,
            HypothesisStatus::Retired => counts.retired += 1,
        }
    }
    let top = validated_hypothesis(state).or_else(|| {
        state
            .ooda
            .active_hypotheses()
            .max_by(|a, b| a.likelihood.total_cmp(&b.likelihood))
    });
    let trend = &state.ooda.confidence_by_turn;
    ProgressSummary {
        investigation_id: state.id.clone(),
        case_id: state.case_id.clone(),
        mode: state.mode,
        status: state.status,
        phase: state.phase,
        phase_ordinal: state.phase.ordinal(),
        phase_count: Phase::ALL.len(),
        entry_phase: state.entry_phase,
        urgency: state.urgency,
        strategy: state.strategy,
        turn: state.turn,
        iterations: state.ooda.iteration,
        phase_iterations: state.ooda.phase_iterations,
        hypotheses: counts,
        top_hypothesis: top.map(HypothesisView::from),
        anomaly: state.ooda.anomaly.clone(),
        coverage: state.evidence.coverage_score(),
        open_requests: state.evidence.open_requests().len(),
        blocked_requests: state.evidence.blocked_requests().count(),
        anchoring_detected: state.ooda.anchoring_detected,
        stalled_iterations: stalled_streak(&state.ooda),
        memory: state.memory.usage(chars_per_token),
        compressions: state.memory.compressions,
        confidence_trend: trend[trend.len().saturating_sub(TREND_POINTS)..].to_vec(),
    }
}

// ── Report ────────────────────────────────────────────────────────

/// Document-phase synthesis of a finished investigation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvestigationReport {
    pub investigation_id: String,
    pub case_id: String,
    pub anomaly: Option<AnomalyFrame>,
    pub root_cause: Option<HypothesisView>,
    pub root_cause_confirmed: bool,
    /// Set when the investigation closed without a validated root cause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unconfirmed: Option<String>,
    pub fix: Option<String>,
    pub fix_verified: bool,
    pub insights: Vec<String>,
    pub coverage: f64,
    pub transitions: Vec<PhaseTransition>,
    pub ruled_out: Vec<HypothesisView>,
    /// Optional reasoning-service write-up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    pub turns: u32,
}

/// Build the report from the durable parts of the state.
pub fn build_report(state: &InvestigationState) -> InvestigationReport {
    let validated = validated_hypothesis(state);
    let root_cause = validated.or_else(|| {
        state
            .ooda
            .hypotheses
            .iter()
            .filter(|h| h.status.is_active())
            .max_by(|a, b| a.likelihood.total_cmp(&b.likelihood))
    });
    let unconfirmed = match (validated, state.solution.entered_via_skip) {
        (Some(_), _) => None,
        (None, true) => Some("mitigated before diagnosis; root cause not validated".to_string()),
        (None, false) => Some("no hypothesis reached validation".to_string()),
    };
    InvestigationReport {
        investigation_id: state.id.clone(),
        case_id: state.case_id.clone(),
        anomaly: state.ooda.anomaly.clone(),
        root_cause: root_cause.map(HypothesisView::from),
        root_cause_confirmed: validated.is_some(),
        unconfirmed,
        fix: state.solution.fix_description.clone(),
        fix_verified: state.solution.verified,
        insights: state
            .memory
            .persistent
            .iter()
            .map(|i| i.text.clone())
            .collect(),
        coverage: state.evidence.coverage_score(),
        transitions: state.transitions.clone(),
        ruled_out: state
            .ooda
            .hypotheses
            .iter()
            .filter(|h| matches!(h.status, HypothesisStatus::Refuted | HypothesisStatus::Retired))
            .map(HypothesisView::from)
            .collect(),
        narrative: None,
        turns: state.turn,
    }
}

impl InvestigationReport {
    /// Plain-text rendering used as reasoning-service input and by the CLI.
    pub fn render(&self) -> String {
        let mut out = format!("Investigation {} (case {})\n", self.investigation_id, self.case_id);
        if let Some(frame) = &self.anomaly {
            out.push_str(&format!(
                "Problem: {} [severity {}]\n",
                frame.statement, frame.severity
            ));
            if let Some(scope) = &frame.scope {
                out.push_str(&format!("Scope: {scope}\n"));
            }
            if let Some(start) = &frame.started_at {
                out.push_str(&format!("Started: {start}\n"));
            }
        }
        match (&self.root_cause, &self.unconfirmed) {
            (Some(rc), None) => out.push_str(&format!(
                "Root cause ({}): {} at {:.2}\n",
                rc.category, rc.statement, rc.likelihood
            )),
            (Some(rc), Some(note)) => out.push_str(&format!(
                "Leading hypothesis ({}): {} at {:.2} [unconfirmed: {note}]\n",
                rc.category, rc.statement, rc.likelihood
            )),
            (None, Some(note)) => out.push_str(&format!("Root cause unconfirmed: {note}\n")),
            (None, None) => {}
        }
        if let Some(fix) = &self.fix {
            let verified = if self.fix_verified { "verified" } else { "not verified" };
            out.push_str(&format!("Fix: {fix} ({verified})\n"));
        }
        for h in &self.ruled_out {
            out.push_str(&format!("Ruled out {}: {}\n", h.id, h.statement));
        }
        for insight in &self.insights {
            out.push_str(&format!("- {insight}\n"));
        }
        out.push_str(&format!("Evidence coverage: {:.0}%\n", self.coverage * 100.0));
        out
    }
}
