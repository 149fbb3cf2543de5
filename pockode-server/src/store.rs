//! Durable session metadata and history, one store per worktree
//!
//! Layout under the worktree's data root:
//!
//! ```text
//! sessions/
//!   index.json              # {"sessions": [SessionMeta, ...]}
//!   <session-id>/history.jsonl
//! ```
//!
//! The index is held in memory behind an RwLock and rewritten atomically
//! (write temp + rename) on every mutation. History is append-only JSONL.
//! Listeners receive a broadcast event on every create/update/delete.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

/// Broadcast channel capacity for store listeners
const STORE_EVENT_CAPACITY: usize = 256;

const DEFAULT_TITLE: &str = "New Chat";

/// Persisted session metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub title: String,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub activated: bool,
}

/// Serialized shape of `index.json`
#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    sessions: Vec<SessionMeta>,
}

/// What changed in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    Created,
    Updated,
    Deleted,
}

impl StoreEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreEventKind::Created => "created",
            StoreEventKind::Updated => "updated",
            StoreEventKind::Deleted => "deleted",
        }
    }
}

/// Event emitted to store listeners
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub kind: StoreEventKind,
    pub session_id: String,
}

/// Per-worktree session store
pub struct SessionStore {
    sessions_dir: PathBuf,
    index: RwLock<Vec<SessionMeta>>,
    events: broadcast::Sender<StoreEvent>,
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

impl SessionStore {
    /// Open the store rooted at a worktree data directory. A missing index is
    /// an empty store; an unparseable one is a fatal error for this worktree.
    pub fn open(data_root: &Path) -> Result<Self, StoreError> {
        let sessions_dir = data_root.join("sessions");
        if !sessions_dir.exists() {
            std::fs::create_dir_all(&sessions_dir).map_err(|e| StoreError::CreateDir {
                path: sessions_dir.clone(),
                source: e,
            })?;
        }

        let index_path = sessions_dir.join("index.json");
        let sessions = if index_path.exists() {
            let content =
                std::fs::read_to_string(&index_path).map_err(|e| StoreError::ReadFile {
                    path: index_path.clone(),
                    source: e,
                })?;
            let index: Index = serde_json::from_str(&content).map_err(|e| {
                StoreError::CorruptIndex {
                    path: index_path.clone(),
                    source: e,
                }
            })?;
            index.sessions
        } else {
            Vec::new()
        };

        let (events, _) = broadcast::channel(STORE_EVENT_CAPACITY);
        Ok(Self {
            sessions_dir,
            index: RwLock::new(sessions),
            events,
        })
    }

    /// Listen for index mutations
    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, kind: StoreEventKind, session_id: &str) {
        // No subscribers is fine
        let _ = self.events.send(StoreEvent {
            kind,
            session_id: session_id.to_string(),
        });
    }

    /// All sessions, newest first by `updated_at`
    pub fn list(&self) -> Vec<SessionMeta> {
        let mut sessions = self.index.read().unwrap().clone();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    pub fn get(&self, id: &str) -> Option<SessionMeta> {
        self.index
            .read()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    /// Create a session with the default title. Fails if the id is taken.
    pub fn create(&self, id: &str) -> Result<SessionMeta, StoreError> {
        let mut index = self.index.write().unwrap();
        if index.iter().any(|s| s.id == id) {
            return Err(StoreError::SessionExists(id.to_string()));
        }
        let now = now_millis();
        let meta = SessionMeta {
            id: id.to_string(),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            activated: false,
        };
        index.insert(0, meta.clone());
        self.persist(&index)?;
        drop(index);
        self.emit(StoreEventKind::Created, id);
        Ok(meta)
    }

    /// Remove a session and its history. Unknown id is a silent success.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut index = self.index.write().unwrap();
        let before = index.len();
        index.retain(|s| s.id != id);
        if index.len() == before {
            return Ok(());
        }
        self.persist(&index)?;
        drop(index);

        let dir = self.session_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| StoreError::RemoveDir {
                path: dir.clone(),
                source: e,
            })?;
        }
        self.emit(StoreEventKind::Deleted, id);
        Ok(())
    }

    /// Set the title and bump `updated_at`
    pub fn update_title(&self, id: &str, title: &str) -> Result<SessionMeta, StoreError> {
        let meta = self.mutate(id, |s| {
            s.title = title.to_string();
        })?;
        self.emit(StoreEventKind::Updated, id);
        Ok(meta)
    }

    /// Mark the session activated (first message sent)
    pub fn activate(&self, id: &str) -> Result<(), StoreError> {
        self.mutate(id, |s| {
            s.activated = true;
        })?;
        self.emit(StoreEventKind::Updated, id);
        Ok(())
    }

    /// Append one record to the session's history log and bump `updated_at`
    pub fn append_history(&self, id: &str, record: &Value) -> Result<(), StoreError> {
        // Bump first so a listener that refetches sees the new ordering.
        self.mutate(id, |_| {})?;

        let dir = self.session_dir(id);
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| StoreError::CreateDir {
                path: dir.clone(),
                source: e,
            })?;
        }
        let path = dir.join("history.jsonl");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        let mut line = serde_json::to_string(record).expect("history record serializes");
        line.push('\n');
        file.write_all(line.as_bytes())
            .map_err(|e| StoreError::WriteFile {
                path: path.clone(),
                source: e,
            })?;

        self.emit(StoreEventKind::Updated, id);
        Ok(())
    }

    /// All history records in append order. Unparseable lines are skipped.
    pub fn history(&self, id: &str) -> Result<Vec<Value>, StoreError> {
        if self.get(id).is_none() {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        let path = self.session_dir(id).join("history.jsonl");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path).map_err(|e| StoreError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| StoreError::ReadFile {
                path: path.clone(),
                source: e,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(v) => records.push(v),
                Err(e) => warn!(session_id = id, error = %e, "skipping corrupt history line"),
            }
        }
        Ok(records)
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(id)
    }

    fn mutate(
        &self,
        id: &str,
        f: impl FnOnce(&mut SessionMeta),
    ) -> Result<SessionMeta, StoreError> {
        let mut index = self.index.write().unwrap();
        let meta = index
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        f(meta);
        meta.updated_at = meta.updated_at.max(now_millis());
        let updated = meta.clone();
        self.persist(&index)?;
        Ok(updated)
    }

    /// Write the index atomically: temp file in the same directory, then rename.
    fn persist(&self, sessions: &[SessionMeta]) -> Result<(), StoreError> {
        let path = self.sessions_dir.join("index.json");
        let tmp = self.sessions_dir.join("index.json.tmp");
        let content = serde_json::to_string_pretty(&Index {
            sessions: sessions.to_vec(),
        })
        .expect("session index serializes");
        std::fs::write(&tmp, content).map_err(|e| StoreError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| StoreError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_and_get() {
        let (_dir, store) = open_store();
        let meta = store.create("s1").unwrap();
        assert_eq!(meta.title, "New Chat");
        assert!(!meta.activated);
        assert_eq!(store.get("s1").unwrap().id, "s1");
    }

    #[test]
    fn test_create_duplicate_fails() {
        let (_dir, store) = open_store();
        store.create("s1").unwrap();
        assert!(matches!(
            store.create("s1"),
            Err(StoreError::SessionExists(_))
        ));
    }

    #[test]
    fn test_new_session_has_empty_history() {
        let (_dir, store) = open_store();
        store.create("s1").unwrap();
        assert!(store.history("s1").unwrap().is_empty());
    }

    #[test]
    fn test_history_round_trip_preserves_order() {
        let (_dir, store) = open_store();
        store.create("s1").unwrap();
        store
            .append_history("s1", &json!({"type": "text", "text": "hello"}))
            .unwrap();
        store.append_history("s1", &json!({"type": "done"})).unwrap();
        let records = store.history("s1").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["type"], "text");
        assert_eq!(records[1]["type"], "done");
    }

    #[test]
    fn test_history_of_unknown_session_is_not_found() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.history("nope"),
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_delete_unknown_is_silent() {
        let (_dir, store) = open_store();
        store.delete("missing").unwrap();
    }

    #[test]
    fn test_delete_removes_history() {
        let (dir, store) = open_store();
        store.create("s1").unwrap();
        store.append_history("s1", &json!({"type": "text"})).unwrap();
        assert!(dir.path().join("sessions/s1/history.jsonl").exists());
        store.delete("s1").unwrap();
        assert!(store.get("s1").is_none());
        assert!(!dir.path().join("sessions/s1").exists());
    }

    #[test]
    fn test_update_title_unknown_fails() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.update_title("nope", "t"),
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_updated_at_is_monotonic() {
        let (_dir, store) = open_store();
        let created = store.create("s1").unwrap();
        let updated = store.update_title("s1", "renamed").unwrap();
        assert!(updated.updated_at >= created.updated_at);
        store.activate("s1").unwrap();
        assert!(store.get("s1").unwrap().updated_at >= updated.updated_at);
        assert!(store.get("s1").unwrap().activated);
    }

    #[test]
    fn test_list_orders_newest_first() {
        let (_dir, store) = open_store();
        store.create("old").unwrap();
        store.create("new").unwrap();
        store.update_title("old", "touched").unwrap();
        // "old" was updated last; with equal timestamps the sort is stable.
        let list = store.list();
        assert_eq!(list.len(), 2);
        assert!(list[0].updated_at >= list[1].updated_at);
    }

    #[test]
    fn test_reopen_preserves_index() {
        let dir = TempDir::new().unwrap();
        {
            let store = SessionStore::open(dir.path()).unwrap();
            store.create("s1").unwrap();
        }
        let store = SessionStore::open(dir.path()).unwrap();
        assert!(store.get("s1").is_some());
    }

    #[test]
    fn test_corrupt_index_is_fatal() {
        let dir = TempDir::new().unwrap();
        let sessions = dir.path().join("sessions");
        std::fs::create_dir_all(&sessions).unwrap();
        std::fs::write(sessions.join("index.json"), "{not json").unwrap();
        assert!(matches!(
            SessionStore::open(dir.path()),
            Err(StoreError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn test_store_events_fire_on_mutations() {
        let (_dir, store) = open_store();
        let mut rx = store.subscribe_events();
        store.create("s1").unwrap();
        store.update_title("s1", "t").unwrap();
        store.delete("s1").unwrap();
        assert_eq!(rx.try_recv().unwrap().kind, StoreEventKind::Created);
        assert_eq!(rx.try_recv().unwrap().kind, StoreEventKind::Updated);
        assert_eq!(rx.try_recv().unwrap().kind, StoreEventKind::Deleted);
    }
}
