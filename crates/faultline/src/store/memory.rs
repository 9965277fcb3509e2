//! In-process store for tests and embedding.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{
    InvestigationManifest, InvestigationStore, RetentionHints, decode, encode, sort_manifests,
};
use crate::error::InvestigationError;
use crate::model::InvestigationState;

struct Slot {
    json: String,
    manifest: InvestigationManifest,
}

/// Keeps serialized records in memory. Storing JSON rather than the value
/// means every load is a fresh, independent copy.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<String, Slot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the raw payload for an id. Used to simulate damaged storage.
    pub fn put_raw(&self, id: &str, json: impl Into<String>) -> Result<(), InvestigationError> {
        let mut records = self.lock()?;
        match records.get_mut(id) {
            Some(slot) => slot.json = json.into(),
            None => return Err(InvestigationError::NotFound(id.to_string())),
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Slot>>, InvestigationError> {
        self.records
            .lock()
            .map_err(|_| InvestigationError::Persistence("store lock poisoned".into()))
    }
}

impl InvestigationStore for InMemoryStore {
    fn load(&self, id: &str) -> Result<Option<InvestigationState>, InvestigationError> {
        let records = self.lock()?;
        records.get(id).map(|slot| decode(id, &slot.json)).transpose()
    }

    fn save(
        &self,
        state: &InvestigationState,
        retention: &RetentionHints,
    ) -> Result<(), InvestigationError> {
        let json = encode(state)?;
        let manifest = InvestigationManifest::of(state, *retention);
        self.lock()?
            .insert(state.id.clone(), Slot { json, manifest });
        Ok(())
    }

    fn list(&self) -> Result<Vec<InvestigationManifest>, InvestigationError> {
        let mut manifests: Vec<_> = self.lock()?.values().map(|s| s.manifest.clone()).collect();
        sort_manifests(&mut manifests);
        Ok(manifests)
    }

    fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, InvestigationError> {
        let mut records = self.lock()?;
        let mut count = 0;
        for (id, slot) in records.iter_mut() {
            let mut state = decode(id, &slot.json)?;
            if slot.manifest.retention.prune(&mut state, now) {
                slot.json = encode(&state)?;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Strategy, Urgency};

    #[test]
    fn loads_are_independent_copies() {
        let store = InMemoryStore::new();
        let state = InvestigationState::begin("case", Urgency::High, Strategy::ActiveIncident);
        store.save(&state, &RetentionHints::default()).unwrap();

        let mut a = store.load(&state.id).unwrap().unwrap();
        a.turn = 9;
        let b = store.load(&state.id).unwrap().unwrap();
        assert_eq!(b.turn, state.turn);
    }

    #[test]
    fn unknown_id_is_none() {
        assert!(InMemoryStore::new().load("inv-missing").unwrap().is_none());
    }

    #[test]
    fn damaged_payload_is_corrupt() {
        let store = InMemoryStore::new();
        let state = InvestigationState::consultant("case");
        store.save(&state, &RetentionHints::default()).unwrap();
        store.put_raw(&state.id, "not json").unwrap();
        let err = store.load(&state.id).unwrap_err();
        assert!(err.requires_recovery());
    }

    #[test]
    fn invalid_state_is_never_written() {
        let store = InMemoryStore::new();
        let mut state = InvestigationState::consultant("case");
        store.save(&state, &RetentionHints::default()).unwrap();
        state.evidence.coverage = 2.0;
        assert!(store.save(&state, &RetentionHints::default()).is_err());
        assert_eq!(store.load(&state.id).unwrap().unwrap().evidence.coverage, 0.0);
    }

    #[test]
    fn list_reports_every_record() {
        let store = InMemoryStore::new();
        let a = InvestigationState::consultant("a");
        let b = InvestigationState::consultant("b");
        store.save(&a, &RetentionHints::default()).unwrap();
        store.save(&b, &RetentionHints::default()).unwrap();
        let ids: Vec<_> = store.list().unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a.id) && ids.contains(&b.id));
    }
}
