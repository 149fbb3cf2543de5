//! Git status watching
//!
//! Watches the metadata files whose mtime changes whenever `git status`
//! output could change: the index, HEAD, and up to a handful of submodule
//! indexes. Linked worktrees keep their metadata behind a `.git` file
//! indirection, which is resolved before watching.

use crate::connection::{ConnId, ConnectionHandle};
use crate::error::WatchError;
use crate::watcher::{SubId, SubscriberSet};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, FileIdMap};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error};

/// Debounce window for git status notifications
const GIT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Upper bound on watched submodule indexes
const MAX_SUBMODULE_WATCHES: usize = 10;

pub struct GitWatcher {
    work_dir: PathBuf,
    subs: Arc<SubscriberSet<()>>,
    debouncer: Mutex<Option<Debouncer<RecommendedWatcher, FileIdMap>>>,
}

/// Resolve the real git directory for a working copy. `.git` is a directory
/// in the main worktree and a `gitdir: <path>` file in linked worktrees.
fn resolve_git_dir(work_dir: &Path) -> Option<PathBuf> {
    let dot_git = work_dir.join(".git");
    if dot_git.is_dir() {
        return Some(dot_git);
    }
    if dot_git.is_file() {
        let content = std::fs::read_to_string(&dot_git).ok()?;
        let target = content.strip_prefix("gitdir:")?.trim();
        let path = PathBuf::from(target);
        let resolved = if path.is_absolute() {
            path
        } else {
            work_dir.join(path)
        };
        return Some(resolved);
    }
    None
}

impl GitWatcher {
    pub fn new(work_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            work_dir,
            subs: Arc::new(SubscriberSet::new()),
            debouncer: Mutex::new(None),
        })
    }

    pub fn start(&self) -> Result<(), WatchError> {
        let subs = self.subs.clone();
        let mut debouncer = new_debouncer(
            GIT_DEBOUNCE,
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => {
                    if events.is_empty() {
                        return;
                    }
                    for (_, sub) in subs.snapshot() {
                        sub.conn.notify("git.status_changed", json!({}));
                    }
                }
                Err(errors) => error!(?errors, "git watcher errors"),
            },
        )?;

        let Some(git_dir) = resolve_git_dir(&self.work_dir) else {
            // Not a git working copy; the watcher idles with no watches.
            debug!(work_dir = %self.work_dir.display(), "no git dir, git watcher idle");
            *self.debouncer.lock().unwrap() = Some(debouncer);
            return Ok(());
        };

        for name in ["index", "HEAD"] {
            let path = git_dir.join(name);
            if path.exists() {
                debouncer.watcher().watch(&path, RecursiveMode::NonRecursive)?;
            }
        }

        // Submodule indexes live under .git/modules/<name>/index
        let modules = git_dir.join("modules");
        if modules.is_dir() {
            if let Ok(entries) = std::fs::read_dir(&modules) {
                for entry in entries.flatten().take(MAX_SUBMODULE_WATCHES) {
                    let index = entry.path().join("index");
                    if index.exists() {
                        debouncer
                            .watcher()
                            .watch(&index, RecursiveMode::NonRecursive)?;
                    }
                }
            }
        }

        debug!(git_dir = %git_dir.display(), "git watcher started");
        *self.debouncer.lock().unwrap() = Some(debouncer);
        Ok(())
    }

    pub fn stop(&self) {
        *self.debouncer.lock().unwrap() = None;
    }

    pub fn subscribe(&self, conn: ConnectionHandle) -> SubId {
        self.subs.subscribe(conn, ())
    }

    pub fn unsubscribe(&self, id: &str) {
        self.subs.unsubscribe(id);
    }

    pub fn cleanup_connection(&self, conn_id: ConnId) {
        self.subs.cleanup_connection(conn_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::next_conn_id;
    use serde_json::Value;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_git_dir_for_main_worktree() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        assert_eq!(
            resolve_git_dir(dir.path()).unwrap(),
            dir.path().join(".git")
        );
    }

    #[test]
    fn test_resolve_git_dir_follows_gitdir_file() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("repo/.git/worktrees/feat");
        std::fs::create_dir_all(&real).unwrap();
        let wt = dir.path().join("feat");
        std::fs::create_dir(&wt).unwrap();
        std::fs::write(wt.join(".git"), format!("gitdir: {}\n", real.display())).unwrap();
        assert_eq!(resolve_git_dir(&wt).unwrap(), real);
    }

    #[test]
    fn test_resolve_git_dir_missing() {
        let dir = TempDir::new().unwrap();
        assert!(resolve_git_dir(dir.path()).is_none());
    }

    #[tokio::test]
    async fn test_index_change_notifies_subscriber() {
        let dir = TempDir::new().unwrap();
        let git_dir = dir.path().join(".git");
        std::fs::create_dir(&git_dir).unwrap();
        std::fs::write(git_dir.join("index"), "stub").unwrap();
        std::fs::write(git_dir.join("HEAD"), "ref: refs/heads/main\n").unwrap();

        let watcher = GitWatcher::new(dir.path().to_path_buf());
        watcher.start().unwrap();
        let (conn, mut rx) = ConnectionHandle::new(next_conn_id());
        watcher.subscribe(conn);

        std::fs::write(git_dir.join("index"), "changed").unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("notification")
            .unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["method"], "git.status_changed");
        watcher.stop();
    }

    #[tokio::test]
    async fn test_non_git_dir_starts_idle() {
        let dir = TempDir::new().unwrap();
        let watcher = GitWatcher::new(dir.path().to_path_buf());
        watcher.start().unwrap();
        assert_eq!(watcher.subscriber_count(), 0);
        watcher.stop();
    }
}
