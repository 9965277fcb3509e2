//! Directory-per-investigation file store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::{
    InvestigationManifest, InvestigationStore, RetentionHints, decode, encode, sort_manifests,
};
use crate::error::InvestigationError;
use crate::model::InvestigationState;

const STATE_FILE: &str = "state.json";
const MANIFEST_FILE: &str = "manifest.json";

/// Stores each investigation in its own directory.
///
/// Directory layout:
/// ```text
/// root/
///   inv-3f2a9c-1/
///     state.json
///     manifest.json
/// ```
///
/// Both files are written to a dot-prefixed temp file and renamed into
/// place, so a crash leaves either the previous record or the new one.
/// `state.json` is renamed first; it is the source of truth and the
/// manifest is only a listing cache.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store, ensuring the root directory exists.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, InvestigationError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn dir(&self) -> &Path {
        &self.root
    }

    fn investigation_dir(&self, id: &str) -> Result<PathBuf, InvestigationError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(InvestigationError::Persistence(format!(
                "invalid investigation id {id:?}"
            )));
        }
        Ok(self.root.join(id))
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    fn write_atomic(dir: &Path, name: &str, contents: &str) -> Result<(), InvestigationError> {
        let final_path = dir.join(name);
        let tmp_path = dir.join(format!(".{name}.tmp"));
        std::fs::write(&tmp_path, contents).map_err(|e| {
            InvestigationError::Persistence(format!("failed to write {}: {e}", tmp_path.display()))
        })?;
        std::fs::rename(&tmp_path, &final_path).map_err(|e| {
            InvestigationError::Persistence(format!("failed to rename {}: {e}", final_path.display()))
        })
    }

    fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), InvestigationError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| InvestigationError::Persistence(format!("failed to serialize {name}: {e}")))?;
        Self::write_atomic(dir, name, &json)
    }

    fn read_manifest(path: &Path) -> Option<InvestigationManifest> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                warn!("Skipping unreadable manifest at {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str(&json) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("Skipping malformed manifest at {}: {e}", path.display());
                None
            }
        }
    }

    /// Remove an investigation directory entirely.
    pub fn delete(&self, id: &str) -> Result<(), InvestigationError> {
        let dir = self.investigation_dir(id)?;
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

impl InvestigationStore for FileStore {
    fn load(&self, id: &str) -> Result<Option<InvestigationState>, InvestigationError> {
        let path = self.investigation_dir(id)?.join(STATE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)
            .map_err(|e| InvestigationError::corrupt(id, format!("unreadable record: {e}")))?;
        decode(id, &json).map(Some)
    }

    fn save(
        &self,
        state: &InvestigationState,
        retention: &RetentionHints,
    ) -> Result<(), InvestigationError> {
        let json = encode(state)?;
        let dir = self.investigation_dir(&state.id)?;
        std::fs::create_dir_all(&dir)?;
        Self::write_atomic(&dir, STATE_FILE, &json)?;
        Self::write_json(&dir, MANIFEST_FILE, &InvestigationManifest::of(state, *retention))?;
        debug!(id = %state.id, turn = state.turn, phase = %state.phase, "investigation saved");
        Ok(())
    }

    fn list(&self) -> Result<Vec<InvestigationManifest>, InvestigationError> {
        let mut manifests = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type().is_ok_and(|ft| ft.is_dir()) {
                continue;
            }
            let path = entry.path().join(MANIFEST_FILE);
            if path.exists()
                && let Some(m) = Self::read_manifest(&path)
            {
                manifests.push(m);
            }
        }
        sort_manifests(&mut manifests);
        Ok(manifests)
    }

    fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, InvestigationError> {
        let mut count = 0;
        for manifest in self.list()? {
            let Some(mut state) = self.load(&manifest.id)? else {
                continue;
            };
            if manifest.retention.prune(&mut state, now) {
                let dir = self.investigation_dir(&state.id)?;
                Self::write_atomic(&dir, STATE_FILE, &encode(&state)?)?;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HotEntry;
    use crate::model::{InvestigationStatus, Phase, Strategy, TransitionKind, Urgency};

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn save_load_roundtrip() {
        let (_dir, store) = store();
        let state = InvestigationState::begin("case-7", Urgency::High, Strategy::ActiveIncident);
        store.save(&state, &RetentionHints::default()).unwrap();

        let loaded = store.load(&state.id).unwrap().unwrap();
        assert_eq!(loaded.id, state.id);
        assert_eq!(loaded.turn, state.turn);
        assert_eq!(loaded.transitions.len(), state.transitions.len());
        let manifests = store.list().unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].case_id, "case-7");
        assert_eq!(manifests[0].phase, state.phase);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let (_dir, store) = store();
        let state = InvestigationState::consultant("case");
        store.save(&state, &RetentionHints::default()).unwrap();
        let dir = store.dir().join(&state.id);
        assert!(!dir.join(".state.json.tmp").exists());
        assert!(!dir.join(".manifest.json.tmp").exists());
    }

    #[test]
    fn truncated_state_is_corrupt() {
        let (_dir, store) = store();
        let state = InvestigationState::consultant("case");
        store.save(&state, &RetentionHints::default()).unwrap();
        std::fs::write(store.dir().join(&state.id).join(STATE_FILE), "{\"schema_").unwrap();

        let err = store.load(&state.id).unwrap_err();
        assert!(err.requires_recovery());
    }

    #[test]
    fn missing_and_invalid_ids() {
        let (_dir, store) = store();
        assert!(store.load("inv-none").unwrap().is_none());
        assert!(store.load("../escape").is_err());
    }

    #[test]
    fn malformed_manifest_is_skipped() {
        let (_dir, store) = store();
        let state = InvestigationState::consultant("case");
        store.save(&state, &RetentionHints::default()).unwrap();
        std::fs::create_dir_all(store.dir().join("inv-broken")).unwrap();
        std::fs::write(store.dir().join("inv-broken").join(MANIFEST_FILE), "[]").unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn prune_clears_hot_tier_of_closed_records() {
        let (_dir, store) = store();
        let mut state = InvestigationState::begin("case", Urgency::Low, Strategy::PostMortem);
        state.enter_phase(Phase::Document, TransitionKind::Advance, "done");
        state.status = InvestigationStatus::Closed;
        state.memory.hot.push(HotEntry {
            iteration_id: "I1".into(),
            number: 1,
            record: "r".into(),
        });
        let hints = RetentionHints {
            hot_secs: 0,
            ..RetentionHints::default()
        };
        store.save(&state, &hints).unwrap();

        assert_eq!(store.prune_expired(Utc::now()).unwrap(), 1);
        let loaded = store.load(&state.id).unwrap().unwrap();
        assert!(loaded.memory.hot.is_empty());
        assert_eq!(loaded.phase, Phase::Document);
    }

    #[test]
    fn delete_removes_directory() {
        let (_dir, store) = store();
        let state = InvestigationState::consultant("case");
        store.save(&state, &RetentionHints::default()).unwrap();
        store.delete(&state.id).unwrap();
        assert!(store.load(&state.id).unwrap().is_none());
    }
}
