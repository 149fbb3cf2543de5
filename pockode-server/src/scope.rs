//! Worktree scope: everything one working directory owns
//!
//! A passive aggregate wiring a session store, a process manager, and the
//! per-worktree watchers, plus the set of connections subscribed to
//! worktree-scoped notifications. Reference counting lives in the
//! [`WorktreeManager`](crate::manager::WorktreeManager), not here, so count
//! updates and scope-map updates share one lock.

use crate::connection::{ConnId, ConnectionHandle};
use crate::error::Result;
use crate::process_manager::ProcessManager;
use crate::store::SessionStore;
use crate::watcher::{FsWatcher, GitWatcher, SessionListWatcher};
use pockode_config::AgentKind;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

pub struct WorktreeScope {
    name: String,
    work_dir: PathBuf,
    store: Arc<SessionStore>,
    processes: Arc<ProcessManager>,
    fs_watcher: Arc<FsWatcher>,
    git_watcher: Arc<GitWatcher>,
    session_watcher: Arc<SessionListWatcher>,
    subscribers: Mutex<HashMap<ConnId, ConnectionHandle>>,
}

impl WorktreeScope {
    pub fn new(
        name: String,
        work_dir: PathBuf,
        data_root: &Path,
        agent: AgentKind,
        idle_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let store = Arc::new(SessionStore::open(data_root)?);
        let processes =
            ProcessManager::new(work_dir.clone(), agent, store.clone(), idle_timeout);
        let fs_watcher = FsWatcher::new(work_dir.clone());
        let git_watcher = GitWatcher::new(work_dir.clone());
        let session_watcher = SessionListWatcher::new(store.clone());
        Ok(Arc::new(Self {
            name,
            work_dir,
            store,
            processes,
            fs_watcher,
            git_watcher,
            session_watcher,
            subscribers: Mutex::new(HashMap::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn processes(&self) -> &Arc<ProcessManager> {
        &self.processes
    }

    pub fn fs_watcher(&self) -> &Arc<FsWatcher> {
        &self.fs_watcher
    }

    pub fn git_watcher(&self) -> &Arc<GitWatcher> {
        &self.git_watcher
    }

    pub fn session_watcher(&self) -> &Arc<SessionListWatcher> {
        &self.session_watcher
    }

    /// Start every watcher, rolling the already-started ones back if a later
    /// one fails. No orphan workers survive a failed start.
    pub fn start(&self) -> Result<()> {
        self.session_watcher.start()?;
        if let Err(e) = self.fs_watcher.start() {
            self.session_watcher.stop();
            return Err(e.into());
        }
        if let Err(e) = self.git_watcher.start() {
            self.fs_watcher.stop();
            self.session_watcher.stop();
            return Err(e.into());
        }
        debug!(worktree = %self.name, "scope started");
        Ok(())
    }

    /// Stop every watcher and shut the process manager down
    pub async fn stop(&self) {
        self.git_watcher.stop();
        self.fs_watcher.stop();
        self.session_watcher.stop();
        self.processes.shutdown().await;
        debug!(worktree = %self.name, "scope stopped");
    }

    /// Add a connection to the worktree-scoped subscriber set
    pub fn subscribe(&self, conn: &ConnectionHandle) {
        self.subscribers
            .lock()
            .unwrap()
            .insert(conn.id(), conn.clone());
    }

    pub fn unsubscribe(&self, conn_id: ConnId) {
        self.subscribers.lock().unwrap().remove(&conn_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Notify every scope subscriber. The snapshot is taken before sending
    /// so no lock is held across the queue pushes.
    pub fn notify_all(&self, method: &str, params: Value) {
        let targets: Vec<ConnectionHandle> =
            self.subscribers.lock().unwrap().values().cloned().collect();
        for conn in targets {
            conn.notify(method, params.clone());
        }
    }

    /// Release everything this connection holds in the scope: process
    /// subscriptions, watcher subscriptions, then scope membership.
    pub fn unsubscribe_connection(&self, conn_id: ConnId) {
        self.processes.unsubscribe_conn(conn_id);
        self.fs_watcher.cleanup_connection(conn_id);
        self.git_watcher.cleanup_connection(conn_id);
        self.session_watcher.cleanup_connection(conn_id);
        self.unsubscribe(conn_id);
    }
}
