//! Invariant checks for persisted investigations.
//!
//! Every load and every turn runs these checks. A failure means the record
//! cannot be trusted, so it maps to
//! [`InvestigationError::CorruptPersistedState`] and the engine refuses to
//! continue rather than guess.

use std::collections::HashSet;

use crate::error::InvestigationError;

use super::{
    EngagementMode, EvidenceStatus, HypothesisStatus, InvestigationState, InvestigationStatus,
    Phase, SCHEMA_VERSION,
};

/// Default thresholds, matching `HypothesisConfig::default()`.
const RETIREMENT_THRESHOLD: f64 = 0.3;
const VALIDATION_THRESHOLD: f64 = 0.7;

/// Validate with the default thresholds.
pub fn validate(state: &InvestigationState) -> Result<(), InvestigationError> {
    validate_with(state, RETIREMENT_THRESHOLD, VALIDATION_THRESHOLD)
}

/// Validate with explicit retirement and validation thresholds.
pub fn validate_with(
    state: &InvestigationState,
    retirement_threshold: f64,
    validation_threshold: f64,
) -> Result<(), InvestigationError> {
    let fail = |reason: String| -> Result<(), InvestigationError> {
        Err(InvestigationError::corrupt(&state.id, reason))
    };

    if state.schema_version != SCHEMA_VERSION {
        return fail(format!(
            "schema version {} (expected {SCHEMA_VERSION})",
            state.schema_version
        ));
    }
    if state.id.trim().is_empty() {
        return fail("empty investigation id".into());
    }

    // ── Mode and phase ──
    match state.mode {
        EngagementMode::Consultant => {
            if state.phase != Phase::Intake {
                return fail(format!("consultant record in phase {}", state.phase));
            }
            if state.ooda.active {
                return fail("consultant record with an active OODA loop".into());
            }
        }
        EngagementMode::LeadInvestigator => {
            if state.phase == Phase::Intake {
                return fail("lead investigation still at intake".into());
            }
            if state.status == InvestigationStatus::Superseded {
                return fail("lead investigation marked superseded".into());
            }
        }
    }
    if state.status == InvestigationStatus::Closed && state.phase != Phase::Document {
        return fail(format!("closed investigation in phase {}", state.phase));
    }
    if let Some(last) = state.transitions.last()
        && last.to != state.phase
    {
        return fail(format!(
            "last transition enters {} but phase is {}",
            last.to, state.phase
        ));
    }

    // ── Hypotheses ──
    let mut ids = HashSet::new();
    for h in &state.ooda.hypotheses {
        if !ids.insert(h.id.as_str()) {
            return fail(format!("duplicate hypothesis id {}", h.id));
        }
        if !h.likelihood.is_finite() || !(0.0..=1.0).contains(&h.likelihood) {
            return fail(format!("{} likelihood {} outside [0, 1]", h.id, h.likelihood));
        }
        match h.status {
            HypothesisStatus::Retired
                if h.likelihood >= retirement_threshold && !h.is_explicitly_refuted() =>
            {
                return fail(format!(
                    "{} retired at {:.2} without refutation",
                    h.id, h.likelihood
                ));
            }
            HypothesisStatus::Validated
                if h.likelihood < validation_threshold || h.supporting_evidence.is_empty() =>
            {
                return fail(format!(
                    "{} validated at {:.2} with {} supporting items",
                    h.id,
                    h.likelihood,
                    h.supporting_evidence.len()
                ));
            }
            _ => {}
        }
    }

    // ── Evidence ──
    let mut ids = HashSet::new();
    for r in &state.evidence.requests {
        if !ids.insert(r.id.as_str()) {
            return fail(format!("duplicate evidence request id {}", r.id));
        }
        if !r.completeness.is_finite() || !(0.0..=1.0).contains(&r.completeness) {
            return fail(format!("{} completeness {} outside [0, 1]", r.id, r.completeness));
        }
        if r.status == EvidenceStatus::Complete && r.completeness < 1.0 - 1e-9 {
            return fail(format!("{} complete at {:.2}", r.id, r.completeness));
        }
    }
    let mut ids = HashSet::new();
    for p in &state.evidence.provided {
        if !ids.insert(p.id.as_str()) {
            return fail(format!("duplicate provided evidence id {}", p.id));
        }
    }
    let coverage = state.evidence.coverage;
    if !coverage.is_finite() || !(0.0..=1.0).contains(&coverage) {
        return fail(format!("coverage {coverage} outside [0, 1]"));
    }

    // ── Iterations ──
    let mut previous = 0;
    for it in &state.ooda.iterations {
        if it.number <= previous {
            return fail(format!("iteration {} out of order", it.id));
        }
        if it.number > state.ooda.iteration {
            return fail(format!(
                "iteration {} beyond counter {}",
                it.id, state.ooda.iteration
            ));
        }
        previous = it.number;
    }

    if let Some(frame) = &state.ooda.anomaly
        && !(0.0..=1.0).contains(&frame.confidence)
    {
        return fail(format!("frame confidence {} outside [0, 1]", frame.confidence));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        EvidenceSubmission, Hypothesis, HypothesisCategory, Strategy, TransitionKind, Urgency,
    };

    fn lead() -> InvestigationState {
        let mut state = InvestigationState::begin("case", Urgency::High, Strategy::ActiveIncident);
        state.enter_phase(Phase::Validation, TransitionKind::ReEntry, "test");
        state
    }

    fn reason(err: InvestigationError) -> String {
        match err {
            InvestigationError::CorruptPersistedState { reason, .. } => reason,
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn fresh_records_are_valid() {
        validate(&InvestigationState::consultant("case")).unwrap();
        validate(&lead()).unwrap();
    }

    #[test]
    fn consultant_outside_intake_is_corrupt() {
        let mut state = InvestigationState::consultant("case");
        state.phase = Phase::Timeline;
        let err = validate(&state).unwrap_err();
        assert!(err.requires_recovery());
        assert!(reason(err).contains("consultant"));
    }

    #[test]
    fn retired_above_threshold_needs_refutation() {
        let mut state = lead();
        let mut h = Hypothesis::new("H1", "x", HypothesisCategory::Code, 0.5, 1);
        h.status = HypothesisStatus::Retired;
        state.ooda.hypotheses.push(h);
        assert!(reason(validate(&state).unwrap_err()).contains("retired"));

        state.ooda.hypotheses[0].refuting_evidence.push("P1".into());
        validate(&state).unwrap();
    }

    #[test]
    fn validated_needs_support_and_threshold() {
        let mut state = lead();
        let mut h = Hypothesis::new("H1", "x", HypothesisCategory::Code, 0.8, 1);
        h.status = HypothesisStatus::Validated;
        state.ooda.hypotheses.push(h);
        assert!(validate(&state).is_err());
        state.ooda.hypotheses[0].supporting_evidence.push("P1".into());
        validate(&state).unwrap();
    }

    #[test]
    fn duplicate_ids_and_bad_numbers_are_rejected() {
        let mut state = lead();
        state
            .ooda
            .hypotheses
            .push(Hypothesis::new("H1", "a", HypothesisCategory::Code, 0.4, 1));
        state
            .ooda
            .hypotheses
            .push(Hypothesis::new("H1", "b", HypothesisCategory::Data, 0.4, 1));
        assert!(reason(validate(&state).unwrap_err()).contains("duplicate"));

        let mut state = lead();
        state.evidence.coverage = 1.5;
        assert!(validate(&state).is_err());

        let mut state = lead();
        state
            .evidence
            .record_provided(EvidenceSubmission::unsolicited("x"), 1)
            .unwrap();
        state.ooda.hypotheses.push(Hypothesis::new(
            "H1",
            "a",
            HypothesisCategory::Code,
            f64::NAN,
            1,
        ));
        assert!(validate(&state).is_err());
    }

    #[test]
    fn phase_must_match_last_transition() {
        let mut state = lead();
        state.phase = Phase::Solution;
        assert!(reason(validate(&state).unwrap_err()).contains("last transition"));
    }
}
