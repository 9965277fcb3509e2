//! Error taxonomy for the investigation engine.
//!
//! Only conditions that stop or reject work are errors. Upstream reasoning
//! failures are recovered by deterministic fallbacks and surface as
//! degraded-capability notes; blocked evidence and anchoring are ordinary
//! directive data.

use crate::model::{Phase, PhaseTransitionRequest};

/// Errors produced by the engine, the trackers and the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum InvestigationError {
    /// A persisted investigation failed schema or invariant validation.
    /// Fatal for that investigation only: the engine refuses to proceed.
    #[error("investigation {id} has corrupt persisted state: {reason}")]
    CorruptPersistedState { id: String, reason: String },

    /// A requested phase transition is not permitted from the current state.
    #[error("transition {from} -> {to} rejected: {reason}")]
    InvalidStateTransition {
        from: Phase,
        to: Phase,
        reason: String,
    },

    #[error("unknown hypothesis {0}")]
    UnknownHypothesis(String),

    #[error("unknown evidence request {0}")]
    UnknownEvidenceRequest(String),

    /// An evidence request cannot move to the requested status.
    #[error("evidence request {id}: {reason}")]
    InvalidEvidenceTransition { id: String, reason: String },

    #[error("investigation {0} not found")]
    NotFound(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl InvestigationError {
    /// Build the rejection for a transition request.
    pub fn rejected(request: &PhaseTransitionRequest, reason: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: request.from,
            to: request.to,
            reason: reason.into(),
        }
    }

    /// Whether the caller must run an out-of-band recovery before the
    /// investigation can continue.
    pub fn requires_recovery(&self) -> bool {
        matches!(self, Self::CorruptPersistedState { .. })
    }

    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptPersistedState {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for InvestigationError {
    fn from(e: std::io::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_corrupt_state_requires_recovery() {
        assert!(InvestigationError::corrupt("inv-1", "bad json").requires_recovery());
        assert!(!InvestigationError::NotFound("inv-1".into()).requires_recovery());
        assert!(!InvestigationError::UnknownHypothesis("H9".into()).requires_recovery());
    }

    #[test]
    fn rejection_message_names_both_phases() {
        let request = PhaseTransitionRequest {
            from: Phase::Hypothesis,
            to: Phase::Solution,
        };
        let err = InvestigationError::rejected(&request, "urgency is not critical");
        let msg = err.to_string();
        assert!(msg.contains("hypothesis"));
        assert!(msg.contains("solution"));
        assert!(msg.contains("urgency is not critical"));
    }
}
