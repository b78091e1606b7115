//! JSON file backed [`SessionStore`].
//!
//! The state file is shared with the workspace layer, which keeps projects
//! and features in the same document. Only `sessions` is interpreted here;
//! every other top-level key is written back untouched.

use panemux_core::{MuxError, MuxResult, SessionRecord, SessionStore, StoredSession};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

#[derive(Debug, Default, Serialize)]
struct State {
    sessions: Vec<SessionRecord>,
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct StoredState {
    #[serde(default)]
    sessions: Vec<StoredSession>,
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

pub struct JsonFileStore {
    path: PathBuf,
    state: RwLock<State>,
}

impl JsonFileStore {
    /// Load `path`, treating a missing file as empty. Legacy records are
    /// migrated and written back.
    pub fn open(path: impl Into<PathBuf>) -> MuxResult<Self> {
        let path = path.into();
        let (state, migrated) = match std::fs::read(&path) {
            Ok(bytes) => Self::decode(&bytes)
                .map_err(|e| MuxError::Store(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (State::default(), false),
            Err(e) => return Err(MuxError::Store(format!("{}: {e}", path.display()))),
        };
        debug!(path = %path.display(), sessions = state.sessions.len(), "state loaded");

        let store = Self {
            path,
            state: RwLock::new(state),
        };
        if migrated {
            info!(path = %store.path.display(), "migrated legacy session layouts");
            store.save(&store.read())?;
        }
        Ok(store)
    }

    fn decode(bytes: &[u8]) -> Result<(State, bool), serde_json::Error> {
        let stored: StoredState = serde_json::from_slice(bytes)?;
        let mut migrated = false;
        let sessions = stored
            .sessions
            .into_iter()
            .map(|s| {
                let (record, changed) = s.migrate();
                migrated |= changed;
                record
            })
            .collect();
        Ok((
            State {
                sessions,
                other: stored.other,
            },
            migrated,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the whole document to a sibling temp file, then rename it
    /// over the original.
    fn save(&self, state: &State) -> MuxResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(state)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Apply `f` and persist. The in-memory state is left untouched if the
    /// write fails.
    fn mutate<T>(&self, f: impl FnOnce(&mut Vec<SessionRecord>) -> MuxResult<T>) -> MuxResult<T> {
        let mut state = self.write();
        let previous = state.sessions.clone();
        let out = f(&mut state.sessions)?;
        if let Err(e) = self.save(&state) {
            state.sessions = previous;
            return Err(MuxError::Store(e.to_string()));
        }
        Ok(out)
    }
}

impl SessionStore for JsonFileStore {
    fn all_sessions(&self) -> Vec<SessionRecord> {
        self.read().sessions.clone()
    }

    fn get_session(&self, id: &str) -> Option<SessionRecord> {
        self.read().sessions.iter().find(|s| s.id == id).cloned()
    }

    fn add_session(&self, record: SessionRecord) -> MuxResult<()> {
        self.mutate(|sessions| {
            if sessions.iter().any(|s| s.id == record.id) {
                return Err(MuxError::AlreadyExists(record.id.clone()));
            }
            sessions.push(record);
            Ok(())
        })
    }

    fn update_session(&self, record: &SessionRecord) -> MuxResult<()> {
        self.mutate(|sessions| {
            let slot = sessions
                .iter_mut()
                .find(|s| s.id == record.id)
                .ok_or_else(|| MuxError::NotFound(record.id.clone()))?;
            *slot = record.clone();
            Ok(())
        })
    }

    fn delete_session(&self, id: &str) -> MuxResult<()> {
        self.mutate(|sessions| {
            let idx = sessions
                .iter()
                .position(|s| s.id == id)
                .ok_or_else(|| MuxError::NotFound(id.to_string()))?;
            sessions.remove(idx);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panemux_core::PaneRole;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json")).unwrap();
        assert!(store.all_sessions().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = JsonFileStore::open(&path).unwrap();

        let mut record = SessionRecord::new("proj", "/tmp", PaneRole::Agent);
        store.add_session(record.clone()).unwrap();
        assert!(matches!(
            store.add_session(record.clone()),
            Err(MuxError::AlreadyExists(_))
        ));

        record.name = "renamed".into();
        store.update_session(&record).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get_session(&record.id), Some(record.clone()));

        reopened.delete_session(&record.id).unwrap();
        assert!(matches!(
            reopened.delete_session(&record.id),
            Err(MuxError::NotFound(_))
        ));
        let missing = SessionRecord::new("proj", "/tmp", PaneRole::Shell);
        assert!(matches!(
            reopened.update_session(&missing),
            Err(MuxError::NotFound(_))
        ));
        assert!(JsonFileStore::open(&path).unwrap().all_sessions().is_empty());
    }

    #[test]
    fn legacy_layout_is_migrated_and_other_keys_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"projects":[{"id":"proj","name":"demo"}],
                "sessions":[{"id":"old","project_id":"proj","work_dir":"/tmp"}],
                "features":[]}"#,
        )
        .unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        let record = store.get_session("old").unwrap();
        assert_eq!(record.layout.collect_leaves(), vec!["old"]);

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk["projects"][0]["name"], "demo");
        assert!(on_disk["features"].as_array().unwrap().is_empty());
        assert_eq!(on_disk["sessions"][0]["layout"]["type"], "leaf");
        assert_eq!(on_disk["sessions"][0]["layout"]["pane_id"], "old");
        assert_eq!(on_disk["sessions"][0]["layout"]["tmux_name"], "panemux-old");
    }

    #[test]
    fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(JsonFileStore::open(&path), Err(MuxError::Store(_))));
    }
}
