//! State model: the canonical in-memory representation of one investigation.
//!
//! [`InvestigationState`] is the root aggregate and the only thing persisted
//! between turns. It is exclusively owned: the engine takes a state, works on
//! a private copy, and hands back the updated value. Nothing in it refers to
//! another investigation.
//!
//! - [`phase`]: engagement modes, phases, OODA steps, static phase table.
//! - [`hypothesis`]: hypothesis records and the category taxonomy.
//! - [`evidence`]: evidence requests, supplied evidence, the ledger.
//! - [`iteration`]: anomaly frame and completed OODA iteration records.
//! - [`validate`]: invariant checks run on every load.

pub mod evidence;
pub mod hypothesis;
pub mod iteration;
pub mod phase;
pub mod validate;

pub use evidence::{
    Bearing, EvidenceBearing, EvidenceCategory, EvidenceProvided, EvidenceRequest, EvidenceStatus,
    EvidenceSubmission, EvidenceTracker, Priority,
};
pub use hypothesis::{ConfidencePoint, Hypothesis, HypothesisCategory, HypothesisStatus};
pub use iteration::{
    ActionRecord, AnomalyFrame, HypothesisDelta, OodaIteration, Severity, TestOutcome,
};
pub use phase::{
    EngagementMode, Intensity, OodaStep, PHASE_DEFINITIONS, Phase, PhaseDefinition,
    PhaseTransition, PhaseTransitionRequest, Strategy, TransitionKind, Urgency,
};

use crate::api::ids::generate_investigation_id;
use crate::memory::HierarchicalMemory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the persisted layout. Bumped on incompatible changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Lifecycle of the investigation record itself.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    Active,
    /// Document phase finished; the record is archived, never deleted.
    Closed,
    /// A consultant record replaced by a fresh investigation on engagement.
    Superseded,
}

/// How strongly a user message indicates a problem worth investigating.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    None,
    Weak,
    Strong,
}

/// Consultant-mode bookkeeping for the consent handshake.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ConsentState {
    /// An investigation has been offered and awaits an answer.
    pub offered: bool,
    pub offered_turn: Option<u32>,
    pub signal: Option<SignalStrength>,
    /// The problem report that triggered the offer.
    pub problem_report: Option<String>,
    pub urgency: Option<Urgency>,
    pub strategy: Option<Strategy>,
}

/// Post-fix verification bookkeeping for the Solution phase.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SolutionTracking {
    pub fix_description: Option<String>,
    pub fix_applied_turn: Option<u32>,
    pub regressions: u32,
    pub verified: bool,
    /// Solution was entered by a critical-urgency skip, so the root cause
    /// may still be unconfirmed.
    pub entered_via_skip: bool,
}

/// The OODA layer of an investigation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OodaState {
    pub active: bool,
    pub step: OodaStep,
    /// Number of the most recent iteration (0 before the first).
    pub iteration: u32,
    pub anomaly: Option<AnomalyFrame>,
    pub hypotheses: Vec<Hypothesis>,
    /// Iterations not yet aged into the cold tier, oldest first.
    pub iterations: Vec<OodaIteration>,
    pub anchoring_detected: bool,
    /// Categories the next Decide step must draw a hypothesis from.
    pub forced_categories: Vec<HypothesisCategory>,
    /// Maximum hypothesis likelihood recorded at the end of each turn.
    pub confidence_by_turn: Vec<ConfidencePoint>,
    /// Hypothesis tests run so far, by category.
    pub category_tests: BTreeMap<HypothesisCategory, u32>,
    /// Iterations executed in the current phase.
    pub phase_iterations: u32,
    pub(crate) next_hypothesis: u32,
}

impl Default for OodaState {
    fn default() -> Self {
        Self {
            active: false,
            step: OodaStep::Observe,
            iteration: 0,
            anomaly: None,
            hypotheses: Vec::new(),
            iterations: Vec::new(),
            anchoring_detected: false,
            forced_categories: Vec::new(),
            confidence_by_turn: Vec::new(),
            category_tests: BTreeMap::new(),
            phase_iterations: 0,
            next_hypothesis: 0,
        }
    }
}

impl OodaState {
    pub fn hypothesis(&self, id: &str) -> Option<&Hypothesis> {
        self.hypotheses.iter().find(|h| h.id == id)
    }

    pub fn hypothesis_mut(&mut self, id: &str) -> Option<&mut Hypothesis> {
        self.hypotheses.iter_mut().find(|h| h.id == id)
    }

    pub fn active_hypotheses(&self) -> impl Iterator<Item = &Hypothesis> {
        self.hypotheses.iter().filter(|h| h.status.is_active())
    }

    /// Highest likelihood among hypotheses that are not refuted or retired.
    pub fn max_likelihood(&self) -> f64 {
        self.hypotheses
            .iter()
            .filter(|h| h.status.is_active() || h.status == HypothesisStatus::Validated)
            .map(|h| h.likelihood)
            .fold(0.0, f64::max)
    }

    /// Reserve the next hypothesis id.
    pub fn next_hypothesis_id(&mut self) -> String {
        self.next_hypothesis += 1;
        format!("H{}", self.next_hypothesis)
    }

    pub fn last_iteration(&self) -> Option<&OodaIteration> {
        self.iterations.last()
    }
}

/// Root aggregate: one investigation of one case.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InvestigationState {
    pub schema_version: u32,
    pub id: String,
    pub case_id: String,
    /// Number of completed turns.
    pub turn: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: InvestigationStatus,
    pub mode: EngagementMode,
    pub phase: Phase,
    pub entry_phase: Phase,
    pub urgency: Urgency,
    pub strategy: Strategy,
    pub transitions: Vec<PhaseTransition>,
    pub ooda: OodaState,
    pub evidence: EvidenceTracker,
    pub memory: HierarchicalMemory,
    pub consent: ConsentState,
    pub solution: SolutionTracking,
}

impl InvestigationState {
    /// A consultant-mode record for a case that has not engaged yet.
    pub fn consultant(case_id: impl Into<String>) -> Self {
        Self::with_mode(case_id, EngagementMode::Consultant, Urgency::Low, Strategy::ActiveIncident)
    }

    /// A fresh lead-investigator record. Always a new id; never derived from
    /// another investigation's state.
    pub fn begin(case_id: impl Into<String>, urgency: Urgency, strategy: Strategy) -> Self {
        let mut state =
            Self::with_mode(case_id, EngagementMode::LeadInvestigator, urgency, strategy);
        state.ooda.active = true;
        state
    }

    fn with_mode(
        case_id: impl Into<String>,
        mode: EngagementMode,
        urgency: Urgency,
        strategy: Strategy,
    ) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            id: generate_investigation_id(),
            case_id: case_id.into(),
            turn: 0,
            created_at: now,
            updated_at: now,
            status: InvestigationStatus::Active,
            mode,
            phase: Phase::Intake,
            entry_phase: Phase::Intake,
            urgency,
            strategy,
            transitions: Vec::new(),
            ooda: OodaState::default(),
            evidence: EvidenceTracker::default(),
            memory: HierarchicalMemory::default(),
            consent: ConsentState::default(),
            solution: SolutionTracking::default(),
        }
    }

    pub fn is_lead(&self) -> bool {
        self.mode == EngagementMode::LeadInvestigator
    }

    pub fn is_closed(&self) -> bool {
        self.status != InvestigationStatus::Active
    }

    /// Record a phase change and reset per-phase counters.
    pub fn enter_phase(&mut self, to: Phase, kind: TransitionKind, reason: impl Into<String>) {
        let transition = PhaseTransition {
            from: self.phase,
            to,
            turn: self.turn,
            kind,
            reason: reason.into(),
        };
        self.transitions.push(transition);
        self.phase = to;
        self.ooda.phase_iterations = 0;
        self.ooda.step = to
            .definition()
            .steps
            .first()
            .copied()
            .unwrap_or(OodaStep::Observe);
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consultant_state_starts_at_intake_without_ooda() {
        let state = InvestigationState::consultant("case-1");
        assert_eq!(state.mode, EngagementMode::Consultant);
        assert_eq!(state.phase, Phase::Intake);
        assert!(!state.ooda.active);
        assert_eq!(state.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn begin_always_allocates_a_new_id() {
        let a = InvestigationState::begin("case-1", Urgency::High, Strategy::ActiveIncident);
        let b = InvestigationState::begin("case-1", Urgency::High, Strategy::ActiveIncident);
        assert_ne!(a.id, b.id);
        assert!(a.ooda.active);
    }

    #[test]
    fn enter_phase_records_transition() {
        let mut state = InvestigationState::begin("c", Urgency::Medium, Strategy::ActiveIncident);
        state.ooda.phase_iterations = 3;
        state.enter_phase(Phase::BlastRadius, TransitionKind::Advance, "engaged");
        assert_eq!(state.phase, Phase::BlastRadius);
        assert_eq!(state.transitions.len(), 1);
        assert_eq!(state.transitions[0].from, Phase::Intake);
        assert_eq!(state.ooda.phase_iterations, 0);
    }

    #[test]
    fn max_likelihood_ignores_refuted() {
        let mut ooda = OodaState::default();
        let mut refuted = Hypothesis::new("H1", "a", HypothesisCategory::Code, 0.9, 0);
        refuted.status = HypothesisStatus::Refuted;
        ooda.hypotheses.push(refuted);
        ooda.hypotheses
            .push(Hypothesis::new("H2", "b", HypothesisCategory::Data, 0.4, 0));
        assert_eq!(ooda.max_likelihood(), 0.4);
    }

    #[test]
    fn state_json_round_trips() {
        let mut state = InvestigationState::begin("c", Urgency::High, Strategy::ActiveIncident);
        state.ooda.category_tests.insert(HypothesisCategory::Network, 2);
        let json = serde_json::to_string(&state).unwrap();
        let back: InvestigationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
