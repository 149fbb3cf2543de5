//! Worktree list watching
//!
//! Detects sibling worktree creation and removal two ways: a filesystem
//! watch on the parent of the main worktree (and the worktrees directory
//! once it exists), and a poll aligned with the registry cache TTL that
//! catches anything the watch missed.

use crate::connection::{ConnId, ConnectionHandle};
use crate::error::WatchError;
use crate::registry::{WorktreeRegistry, CACHE_TTL};
use crate::watcher::{SubId, SubscriberSet};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, FileIdMap};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

const WORKTREE_DEBOUNCE: Duration = Duration::from_millis(300);

pub struct WorktreeWatcher {
    registry: Arc<WorktreeRegistry>,
    subs: Arc<SubscriberSet<()>>,
    debouncer: Arc<Mutex<Option<Debouncer<RecommendedWatcher, FileIdMap>>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl WorktreeWatcher {
    pub fn new(registry: Arc<WorktreeRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            subs: Arc::new(SubscriberSet::new()),
            debouncer: Arc::new(Mutex::new(None)),
            poll_task: Mutex::new(None),
        })
    }

    pub fn start(&self) -> Result<(), WatchError> {
        let registry = self.registry.clone();
        let subs = self.subs.clone();
        let mut debouncer = new_debouncer(
            WORKTREE_DEBOUNCE,
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => {
                    if events.is_empty() {
                        return;
                    }
                    registry.invalidate();
                    broadcast(&subs);
                }
                Err(errors) => error!(?errors, "worktree watcher errors"),
            },
        )?;

        if let Some(parent) = self.registry.main_dir().parent() {
            debouncer.watcher().watch(parent, RecursiveMode::NonRecursive)?;
        }
        let worktrees_dir = self.registry.worktrees_dir().to_path_buf();
        let mut dir_watched = false;
        if worktrees_dir.is_dir() {
            debouncer
                .watcher()
                .watch(&worktrees_dir, RecursiveMode::NonRecursive)?;
            dir_watched = true;
        }
        *self.debouncer.lock().unwrap() = Some(debouncer);

        // TTL-aligned poll: refreshes the cache, reports list drift the
        // filesystem watch did not catch (e.g. git plumbing run elsewhere),
        // and picks up the watch on the worktrees dir once it exists.
        let registry = self.registry.clone();
        let subs = self.subs.clone();
        let debouncer_slot = self.debouncer.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(CACHE_TTL);
            let mut last_names: Option<Vec<String>> = None;
            loop {
                interval.tick().await;
                if !dir_watched && worktrees_dir.is_dir() {
                    let mut guard = debouncer_slot.lock().unwrap();
                    if let Some(debouncer) = guard.as_mut() {
                        match debouncer
                            .watcher()
                            .watch(&worktrees_dir, RecursiveMode::NonRecursive)
                        {
                            Ok(()) => dir_watched = true,
                            Err(e) => debug!(error = %e, "worktrees dir watch failed"),
                        }
                    }
                }
                let names = match registry.list() {
                    Ok(list) => list.into_iter().map(|wt| wt.name).collect::<Vec<_>>(),
                    Err(e) => {
                        debug!(error = %e, "worktree poll failed");
                        continue;
                    }
                };
                if let Some(prev) = &last_names {
                    if *prev != names {
                        broadcast(&subs);
                    }
                }
                last_names = Some(names);
            }
        });
        *self.poll_task.lock().unwrap() = Some(task);
        Ok(())
    }

    pub fn stop(&self) {
        *self.debouncer.lock().unwrap() = None;
        if let Some(task) = self.poll_task.lock().unwrap().take() {
            task.abort();
        }
    }

    /// Tell every subscriber the worktree list changed. Also called by the
    /// worktree handlers so create/delete are reported without waiting for
    /// the debounce window.
    pub fn broadcast_changed(&self) {
        broadcast(&self.subs);
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

fn broadcast(subs: &SubscriberSet<()>) {
    for (_, sub) in subs.snapshot() {
        sub.conn.notify("worktree.list.changed", json!({}));
    }
}
