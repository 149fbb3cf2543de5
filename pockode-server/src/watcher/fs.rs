//! Recursive filesystem watching over subscriber-chosen subtrees
//!
//! One debounced watcher per worktree scope. Subscriptions carry a relative
//! path; the watched surface grows when the first subscriber for a subtree
//! arrives and shrinks when the last one leaves. A burst of events inside
//! the debounce window produces at most one `fs.changed` per subscription.

use crate::connection::{ConnId, ConnectionHandle};
use crate::error::WatchError;
use crate::watcher::{SubId, SubscriberSet};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, FileIdMap};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error};

/// Debounce window for filesystem change notifications
const FS_DEBOUNCE: Duration = Duration::from_millis(100);

pub struct FsWatcher {
    root: PathBuf,
    subs: Arc<SubscriberSet<PathBuf>>,
    debouncer: Mutex<Option<Debouncer<RecommendedWatcher, FileIdMap>>>,
    // relative path -> number of subscriptions watching it
    watched: Mutex<HashMap<PathBuf, usize>>,
}

/// Paths that never produce notifications: git internals, editor droppings
fn is_ignored(path: &Path) -> bool {
    let path_str = path.to_string_lossy();
    path_str.contains("/.git/")
        || path_str.ends_with("/.git")
        || path_str.ends_with('~')
        || path_str.ends_with(".swp")
        || path_str.ends_with(".swx")
        || path_str.ends_with(".tmp")
        || path_str.ends_with(".DS_Store")
        || path_str.contains("/.idea/")
        || path_str.contains("/.vscode/")
}

impl FsWatcher {
    pub fn new(root: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            root,
            subs: Arc::new(SubscriberSet::new()),
            debouncer: Mutex::new(None),
            watched: Mutex::new(HashMap::new()),
        })
    }

    pub fn start(&self) -> Result<(), WatchError> {
        let subs = self.subs.clone();
        let root = self.root.clone();
        let debouncer = new_debouncer(
            FS_DEBOUNCE,
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => {
                    let changed: Vec<PathBuf> = events
                        .iter()
                        .flat_map(|e| e.paths.iter())
                        .filter(|p| !is_ignored(p))
                        .cloned()
                        .collect();
                    if changed.is_empty() {
                        return;
                    }
                    for (_, sub) in subs.snapshot() {
                        let base = root.join(&sub.target);
                        if changed.iter().any(|p| p.starts_with(&base)) {
                            sub.conn.notify(
                                "fs.changed",
                                json!({"path": sub.target.to_string_lossy()}),
                            );
                        }
                    }
                }
                Err(errors) => error!(?errors, "fs watcher errors"),
            },
        )?;
        *self.debouncer.lock().unwrap() = Some(debouncer);
        Ok(())
    }

    pub fn stop(&self) {
        *self.debouncer.lock().unwrap() = None;
        self.watched.lock().unwrap().clear();
    }

    /// Watch the subtree at `rel` (relative to the scope's work dir) for
    /// this connection. The path must already be validated.
    pub fn subscribe(
        &self,
        conn: ConnectionHandle,
        rel: PathBuf,
    ) -> Result<SubId, WatchError> {
        // Idempotent: a repeat subscribe must not double-count the watch.
        if let Some((id, _)) = self
            .subs
            .snapshot()
            .into_iter()
            .find(|(_, sub)| sub.conn.id() == conn.id() && sub.target == rel)
        {
            return Ok(id);
        }
        {
            let mut guard = self.debouncer.lock().unwrap();
            let debouncer = guard.as_mut().ok_or(WatchError::NotStarted)?;
            let mut watched = self.watched.lock().unwrap();
            let count = watched.entry(rel.clone()).or_insert(0);
            if *count == 0 {
                let abs = self.root.join(&rel);
                debouncer.watcher().watch(&abs, RecursiveMode::Recursive)?;
                debug!(path = %abs.display(), "fs watch added");
            }
            *count += 1;
        }
        Ok(self.subs.subscribe(conn, rel))
    }

    /// Idempotent; silent if the id is unknown
    pub fn unsubscribe(&self, id: &str) {
        if let Some(sub) = self.subs.unsubscribe(id) {
            self.release_target(&sub.target);
        }
    }

    pub fn cleanup_connection(&self, conn_id: ConnId) {
        for (_, sub) in self.subs.cleanup_connection(conn_id) {
            self.release_target(&sub.target);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }

    fn release_target(&self, rel: &Path) {
        let mut guard = self.debouncer.lock().unwrap();
        let mut watched = self.watched.lock().unwrap();
        if let Some(count) = watched.get_mut(rel) {
            *count -= 1;
            if *count == 0 {
                watched.remove(rel);
                if let Some(debouncer) = guard.as_mut() {
                    let abs = self.root.join(rel);
                    if let Err(e) = debouncer.watcher().unwatch(&abs) {
                        debug!(path = %abs.display(), error = %e, "fs unwatch failed");
                    }
                }
            }
        }
    }
}
