//! Phase/Mode Controller.
//!
//! Two engagement modes gate everything. Consultant mode stays at Intake and
//! runs no OODA; lead mode walks BlastRadius through Document. Transitions
//! are forward-only along the phase ordinals except for two named cases:
//!
//! | From | To | Kind | Allowed when |
//! |------|----|------|--------------|
//! | any | next ordinal | `Advance` | always (lead mode) |
//! | Hypothesis | Solution | `Skip` | urgency is critical |
//! | Intake | Validation | `ReEntry` | post-mortem strategy |

use tracing::info;

use crate::error::InvestigationError;
use crate::model::{
    EvidenceCategory, HypothesisStatus, InvestigationState, InvestigationStatus, Phase,
    PhaseTransitionRequest, Strategy, TransitionKind, Urgency,
};

use super::config::ControllerConfig;
use super::signals::ProblemSignal;

/// Decides phase transitions and completion.
pub struct PhaseController<'c> {
    config: &'c ControllerConfig,
}

impl<'c> PhaseController<'c> {
    pub fn new(config: &'c ControllerConfig) -> Self {
        Self { config }
    }

    /// Check a requested transition without applying it.
    pub fn validate_transition(
        &self,
        state: &InvestigationState,
        to: Phase,
    ) -> Result<TransitionKind, InvestigationError> {
        let request = PhaseTransitionRequest {
            from: state.phase,
            to,
        };
        let from = state.phase;
        if state.is_closed() {
            return Err(InvestigationError::rejected(
                &request,
                "the investigation is closed",
            ));
        }
        if !state.is_lead() {
            return Err(InvestigationError::rejected(
                &request,
                "consultant mode stays at intake until an investigation is consented to",
            ));
        }
        if to == from {
            return Err(InvestigationError::rejected(&request, "already in this phase"));
        }
        if to < from {
            return Err(InvestigationError::rejected(
                &request,
                "phases only move forward",
            ));
        }
        if from.next() == Some(to) {
            return Ok(TransitionKind::Advance);
        }
        match (from, to) {
            (Phase::Hypothesis, Phase::Solution) if state.urgency == Urgency::Critical => {
                Ok(TransitionKind::Skip)
            }
            (Phase::Hypothesis, Phase::Solution) => Err(InvestigationError::rejected(
                &request,
                "skipping to solution requires critical urgency",
            )),
            (Phase::Intake, Phase::Validation) if state.strategy == Strategy::PostMortem => {
                Ok(TransitionKind::ReEntry)
            }
            _ => Err(InvestigationError::rejected(
                &request,
                format!("cannot jump from {from} to {to}"),
            )),
        }
    }

    /// Apply a transition that has already been validated.
    pub fn apply(
        &self,
        state: &mut InvestigationState,
        to: Phase,
        kind: TransitionKind,
        reason: &str,
    ) {
        info!(
            "[{}] {} -> {to} ({kind:?}): {reason}",
            state.id, state.phase
        );
        if kind == TransitionKind::Skip {
            state.solution.entered_via_skip = true;
        }
        state.enter_phase(to, kind, reason);
    }

    /// Whether the current phase's completion predicate holds.
    pub fn is_phase_complete(&self, state: &InvestigationState) -> bool {
        match state.phase {
            Phase::Intake => false,
            Phase::BlastRadius => state.ooda.anomaly.as_ref().is_some_and(|frame| {
                frame.acknowledged && frame.confidence >= self.config.frame_confirmation
            }),
            Phase::Timeline => {
                state
                    .ooda
                    .anomaly
                    .as_ref()
                    .is_some_and(|frame| frame.started_at.is_some())
                    && state
                        .evidence
                        .has_provided(&[EvidenceCategory::Timeline, EvidenceCategory::Changes])
            }
            Phase::Hypothesis => state.ooda.active_hypotheses().count() >= 2,
            Phase::Validation => state
                .ooda
                .hypotheses
                .iter()
                .any(|h| h.status == HypothesisStatus::Validated),
            Phase::Solution => self.fix_verified(state),
            Phase::Document => state.status == InvestigationStatus::Closed,
        }
    }

    /// A fix was applied and the verification window passed without a
    /// regression report.
    pub fn fix_verified(&self, state: &InvestigationState) -> bool {
        state
            .solution
            .fix_applied_turn
            .is_some_and(|applied| state.turn >= applied + self.config.verification_window)
    }

    /// The forward transition to take now that the phase is complete.
    pub fn completion_transition(&self, state: &InvestigationState) -> Option<(Phase, String)> {
        if !state.is_lead() || state.is_closed() || !self.is_phase_complete(state) {
            return None;
        }
        let next = state.phase.next()?;
        let reason = match state.phase {
            Phase::Intake => "investigation engaged",
            Phase::BlastRadius => "anomaly frame confirmed",
            Phase::Timeline => "start time and surrounding changes established",
            Phase::Hypothesis => "candidate root causes formulated",
            Phase::Validation => "a hypothesis was validated",
            Phase::Solution => "fix verified without regression",
            Phase::Document => return None,
        };
        Some((next, reason.to_string()))
    }

    /// Build the fresh lead-investigator state for a consultant record that
    /// just engaged. The consultant record itself is left untouched.
    pub fn engage(
        &self,
        consultant: &InvestigationState,
        signal: &ProblemSignal,
    ) -> InvestigationState {
        let urgency = consultant
            .consent
            .urgency
            .unwrap_or(signal.urgency)
            .max(signal.urgency);
        let strategy = consultant.consent.strategy.unwrap_or(signal.strategy);
        let mut fresh = InvestigationState::begin(consultant.case_id.clone(), urgency, strategy);
        fresh.turn = 1;
        let (to, kind, reason) = match strategy {
            Strategy::PostMortem => (
                Phase::Validation,
                TransitionKind::ReEntry,
                "post-mortem: symptom already known",
            ),
            Strategy::ActiveIncident => (
                Phase::BlastRadius,
                TransitionKind::Advance,
                "investigation engaged",
            ),
        };
        fresh.entry_phase = to;
        self.apply(&mut fresh, to, kind, reason);
        fresh
    }

    /// Mark the investigation closed.
    pub fn close(&self, state: &mut InvestigationState) {
        state.status = InvestigationStatus::Closed;
        state.ooda.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::investigation::signals::detect_signal;
    use crate::model::{AnomalyFrame, EngagementMode, EvidenceSubmission, Hypothesis, HypothesisCategory, Severity};

    fn lead(phase: Phase, urgency: Urgency) -> InvestigationState {
        let mut state = InvestigationState::begin("case", urgency, Strategy::ActiveIncident);
        state.enter_phase(phase, TransitionKind::Advance, "test");
        state
    }

    #[test]
    fn forward_advance_is_allowed_and_backward_is_not() {
        let config = ControllerConfig::default();
        let controller = PhaseController::new(&config);
        let state = lead(Phase::Timeline, Urgency::High);
        assert_eq!(
            controller.validate_transition(&state, Phase::Hypothesis).unwrap(),
            TransitionKind::Advance
        );
        let err = controller
            .validate_transition(&state, Phase::BlastRadius)
            .unwrap_err();
        assert!(matches!(err, InvestigationError::InvalidStateTransition { .. }));
        assert!(controller.validate_transition(&state, Phase::Solution).is_err());
    }

    #[test]
    fn skip_requires_critical_urgency() {
        let config = ControllerConfig::default();
        let controller = PhaseController::new(&config);
        let high = lead(Phase::Hypothesis, Urgency::High);
        assert!(controller.validate_transition(&high, Phase::Solution).is_err());
        let critical = lead(Phase::Hypothesis, Urgency::Critical);
        assert_eq!(
            controller.validate_transition(&critical, Phase::Solution).unwrap(),
            TransitionKind::Skip
        );
    }

    #[test]
    fn consultant_cannot_transition() {
        let config = ControllerConfig::default();
        let controller = PhaseController::new(&config);
        let state = InvestigationState::consultant("case");
        assert!(controller.validate_transition(&state, Phase::BlastRadius).is_err());
    }

    #[test]
    fn engage_creates_a_fresh_state() {
        let config = ControllerConfig::default();
        let controller = PhaseController::new(&config);
        let consultant = InvestigationState::consultant("case-7");
        let signal = detect_signal("API 500 errors, all EU users", false);
        let fresh = controller.engage(&consultant, &signal);
        assert_ne!(fresh.id, consultant.id);
        assert_eq!(fresh.case_id, "case-7");
        assert_eq!(fresh.mode, EngagementMode::LeadInvestigator);
        assert_eq!(fresh.phase, Phase::BlastRadius);
        assert_eq!(fresh.entry_phase, Phase::BlastRadius);
        assert_eq!(fresh.urgency, Urgency::High);

        let signal = detect_signal("postmortem for yesterday's checkout errors", false);
        let fresh = controller.engage(&consultant, &signal);
        assert_eq!(fresh.phase, Phase::Validation);
        assert_eq!(fresh.transitions[0].kind, TransitionKind::ReEntry);
    }

    #[test]
    fn completion_predicates() {
        let config = ControllerConfig::default();
        let controller = PhaseController::new(&config);

        let mut state = lead(Phase::BlastRadius, Urgency::High);
        let mut frame = AnomalyFrame::new("API errors", Severity::High);
        frame.confidence = 0.8;
        state.ooda.anomaly = Some(frame);
        assert!(!controller.is_phase_complete(&state));
        if let Some(frame) = state.ooda.anomaly.as_mut() {
            frame.acknowledged = true;
        }
        assert_eq!(
            controller.completion_transition(&state).map(|(p, _)| p),
            Some(Phase::Timeline)
        );

        let mut state = lead(Phase::Timeline, Urgency::High);
        let mut frame = AnomalyFrame::new("API errors", Severity::High);
        frame.started_at = Some("14:02".into());
        state.ooda.anomaly = Some(frame);
        assert!(!controller.is_phase_complete(&state));
        state
            .evidence
            .record_provided(
                EvidenceSubmission::unsolicited("deploy at 14:00")
                    .with_category(EvidenceCategory::Changes),
                1,
            )
            .unwrap();
        assert!(controller.is_phase_complete(&state));

        let mut state = lead(Phase::Hypothesis, Urgency::High);
        state
            .ooda
            .hypotheses
            .push(Hypothesis::new("H1", "a", HypothesisCategory::Code, 0.4, 1));
        assert!(!controller.is_phase_complete(&state));
        state
            .ooda
            .hypotheses
            .push(Hypothesis::new("H2", "b", HypothesisCategory::Data, 0.3, 1));
        assert!(controller.is_phase_complete(&state));

        let mut state = lead(Phase::Solution, Urgency::High);
        state.turn = 5;
        state.solution.fix_applied_turn = Some(4);
        assert!(!controller.is_phase_complete(&state));
        state.turn = 6;
        assert!(controller.is_phase_complete(&state));
    }
}
