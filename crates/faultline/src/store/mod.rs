//! Persistence for investigation records.
//!
//! Every investigation is addressed by its id and stored as one unit: a
//! save either lands the whole [`InvestigationState`] or nothing. Loads run
//! the invariant checks, so a record that parses but breaks an invariant is
//! reported as [`InvestigationError::CorruptPersistedState`] just like a
//! record that fails to parse.
//!
//! | Store | Backing |
//! |-------|---------|
//! | [`InMemoryStore`] | JSON strings in a mutex-guarded map |
//! | [`FileStore`] | one directory per investigation, atomic renames |

mod file;
mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvestigationError;
use crate::model::validate::validate;
use crate::model::{EngagementMode, InvestigationState, InvestigationStatus, Phase};

// ── RetentionHints ─────────────────────────────────────────────────

/// Expiry hints for the summarised memory tiers, in seconds after the
/// investigation was last updated.
///
/// Only closed investigations are pruned. The durable record, the
/// iteration log and persistent insights are never expired.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionHints {
    pub hot_secs: u64,
    pub warm_secs: u64,
    pub cold_secs: u64,
}

impl Default for RetentionHints {
    fn default() -> Self {
        Self {
            hot_secs: 24 * 3600,
            warm_secs: 7 * 24 * 3600,
            cold_secs: 30 * 24 * 3600,
        }
    }
}

impl RetentionHints {
    fn expired(secs: u64, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let secs = i64::try_from(secs).unwrap_or(i64::MAX);
        Duration::try_seconds(secs).is_some_and(|ttl| updated_at + ttl <= now)
    }

    /// Drop the tiers of a closed investigation whose hints have elapsed.
    /// Returns whether anything was removed.
    pub fn prune(&self, state: &mut InvestigationState, now: DateTime<Utc>) -> bool {
        if state.status != InvestigationStatus::Closed {
            return false;
        }
        let memory = &mut state.memory;
        let mut pruned = false;
        if Self::expired(self.hot_secs, state.updated_at, now) && !memory.hot.is_empty() {
            memory.hot.clear();
            pruned = true;
        }
        if Self::expired(self.warm_secs, state.updated_at, now) && !memory.warm.is_empty() {
            memory.warm.clear();
            pruned = true;
        }
        if Self::expired(self.cold_secs, state.updated_at, now) && !memory.cold.is_empty() {
            memory.cold.clear();
            pruned = true;
        }
        pruned
    }
}

// ── InvestigationManifest ──────────────────────────────────────────

/// Lightweight summary of a stored investigation, used for listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InvestigationManifest {
    pub id: String,
    pub case_id: String,
    pub phase: Phase,
    pub mode: EngagementMode,
    pub status: InvestigationStatus,
    pub turn: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retention: RetentionHints,
}

impl InvestigationManifest {
    pub fn of(state: &InvestigationState, retention: RetentionHints) -> Self {
        Self {
            id: state.id.clone(),
            case_id: state.case_id.clone(),
            phase: state.phase,
            mode: state.mode,
            status: state.status,
            turn: state.turn,
            created_at: state.created_at,
            updated_at: state.updated_at,
            retention,
        }
    }
}

// ── InvestigationStore ─────────────────────────────────────────────

/// Storage capability consumed by the service.
///
/// Implementations must make `save` atomic per investigation and must not
/// share records between ids.
pub trait InvestigationStore: Send + Sync {
    /// Load and validate a record. `Ok(None)` when the id is unknown.
    fn load(&self, id: &str) -> Result<Option<InvestigationState>, InvestigationError>;

    /// Replace the record stored under `state.id`.
    fn save(
        &self,
        state: &InvestigationState,
        retention: &RetentionHints,
    ) -> Result<(), InvestigationError>;

    /// Manifests of every stored record, newest update first.
    fn list(&self) -> Result<Vec<InvestigationManifest>, InvestigationError>;

    /// Expire hot/warm/cold tiers of closed records. Returns how many
    /// records changed.
    fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, InvestigationError>;
}

/// Parse and validate a serialized record.
pub(crate) fn decode(id: &str, json: &str) -> Result<InvestigationState, InvestigationError> {
    let state: InvestigationState = serde_json::from_str(json)
        .map_err(|e| InvestigationError::corrupt(id, format!("unreadable record: {e}")))?;
    if state.id != id {
        return Err(InvestigationError::corrupt(
            id,
            format!("record is stored under {id} but claims {}", state.id),
        ));
    }
    validate(&state)?;
    Ok(state)
}

/// Validate and serialize a record for writing.
pub(crate) fn encode(state: &InvestigationState) -> Result<String, InvestigationError> {
    validate(state)?;
    serde_json::to_string_pretty(state)
        .map_err(|e| InvestigationError::Persistence(format!("failed to serialize: {e}")))
}

pub(crate) fn sort_manifests(manifests: &mut [InvestigationManifest]) {
    manifests.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ColdEntry, HotEntry};
    use crate::model::{Strategy, TransitionKind, Urgency};

    fn closed_with_tiers() -> InvestigationState {
        let mut state =
            InvestigationState::begin("case", Urgency::Medium, Strategy::PostMortem);
        state.enter_phase(Phase::Document, TransitionKind::Advance, "done");
        state.status = InvestigationStatus::Closed;
        state.memory.hot.push(HotEntry {
            iteration_id: "I1".into(),
            number: 1,
            record: "observed errors".into(),
        });
        state.memory.cold.push(ColdEntry {
            iteration_id: "I0".into(),
            number: 0,
            facts: vec!["old".into()],
        });
        state.memory.add_insight("pool exhaustion", 1, 40, 3.5);
        state
    }

    #[test]
    fn prune_respects_each_tier_hint() {
        let hints = RetentionHints::default();
        let mut state = closed_with_tiers();
        let two_days = state.updated_at + Duration::days(2);

        assert!(hints.prune(&mut state, two_days));
        assert!(state.memory.hot.is_empty());
        assert_eq!(state.memory.cold.len(), 1);
        assert_eq!(state.memory.persistent.len(), 1);

        let later = state.updated_at + Duration::days(31);
        assert!(hints.prune(&mut state, later));
        assert!(state.memory.cold.is_empty());
        assert_eq!(state.memory.persistent.len(), 1);
        assert!(!hints.prune(&mut state, later));
    }

    #[test]
    fn active_records_are_never_pruned() {
        let mut state = closed_with_tiers();
        state.status = InvestigationStatus::Active;
        let far = state.updated_at + Duration::days(365);
        assert!(!RetentionHints::default().prune(&mut state, far));
        assert_eq!(state.memory.hot.len(), 1);
    }

    #[test]
    fn decode_rejects_mismatched_and_malformed_records() {
        let state = closed_with_tiers();
        let json = encode(&state).unwrap();
        assert!(decode(&state.id, &json).is_ok());

        let err = decode("inv-other", &json).unwrap_err();
        assert!(err.requires_recovery());

        let err = decode(&state.id, "{\"id\": 3").unwrap_err();
        assert!(err.requires_recovery());
    }
}
