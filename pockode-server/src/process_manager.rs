//! Process management for one worktree
//!
//! At most one agent subprocess runs per session. Each process gets a
//! dedicated pump task that consumes its stdout event stream: every event is
//! appended to session history first, then fanned out to the connections
//! subscribed to that session. History failures are logged and do not stop
//! the live broadcast. An idle reaper closes processes that have seen no
//! activity for the configured timeout.

use crate::agent::{agent_cli, AgentCli, AgentEvent, SpawnSpec};
use crate::connection::{ConnId, ConnectionHandle};
use crate::error::ProcessError;
use crate::process::AgentProcess;
use crate::store::SessionStore;
use pockode_config::AgentKind;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Called after a process ends and is removed, with the session id
pub type ProcessEndHook = Arc<dyn Fn(&str) + Send + Sync>;

type ProcessMap = Arc<Mutex<HashMap<String, Arc<AgentProcess>>>>;
type SubscriberMap = Arc<StdMutex<HashMap<String, Vec<ConnectionHandle>>>>;

pub struct ProcessManager {
    work_dir: PathBuf,
    agent: Box<dyn AgentCli>,
    store: Arc<SessionStore>,
    idle_timeout: Duration,
    processes: ProcessMap,
    subscribers: SubscriberMap,
    cancel: CancellationToken,
    on_process_end: Arc<StdMutex<Option<ProcessEndHook>>>,
}

impl ProcessManager {
    pub fn new(
        work_dir: PathBuf,
        agent: AgentKind,
        store: Arc<SessionStore>,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            work_dir,
            agent: agent_cli(agent),
            store,
            idle_timeout,
            processes: Arc::new(Mutex::new(HashMap::new())),
            subscribers: Arc::new(StdMutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            on_process_end: Arc::new(StdMutex::new(None)),
        });
        debug!(
            work_dir = %manager.work_dir.display(),
            agent = %manager.agent.kind(),
            "process manager ready"
        );
        manager.spawn_reaper();
        manager
    }

    /// Install the hook invoked after a process ends and is removed
    pub fn set_on_process_end(&self, hook: ProcessEndHook) {
        *self.on_process_end.lock().unwrap() = Some(hook);
    }

    pub fn agent(&self) -> &dyn AgentCli {
        self.agent.as_ref()
    }

    /// Return the running process for the session, spawning one if needed.
    /// The lock is held across the check-and-insert so a session never gets
    /// two children. The child's lifetime is bound to this manager, not to
    /// the request that triggered the spawn.
    pub async fn get_or_create(
        &self,
        session_id: &str,
        resume: bool,
    ) -> Result<(Arc<AgentProcess>, bool), ProcessError> {
        let mut processes = self.processes.lock().await;
        if let Some(process) = processes.get(session_id) {
            process.touch();
            return Ok((process.clone(), false));
        }

        let spec = SpawnSpec {
            work_dir: self.work_dir.clone(),
            session_id: session_id.to_string(),
            resume,
        };
        let (process, stdout) = AgentProcess::spawn(self.agent.as_ref(), &spec)?;
        let process = Arc::new(process);
        processes.insert(session_id.to_string(), process.clone());
        info!(session_id, resume, "agent process started");
        self.spawn_pump(process.clone(), stdout);
        Ok((process, true))
    }

    pub async fn has_process(&self, session_id: &str) -> bool {
        self.processes.lock().await.contains_key(session_id)
    }

    pub async fn get_process(&self, session_id: &str) -> Option<Arc<AgentProcess>> {
        self.processes.lock().await.get(session_id).cloned()
    }

    pub async fn process_count(&self) -> usize {
        self.processes.lock().await.len()
    }

    /// Bump the session's idle clock
    pub async fn touch(&self, session_id: &str) {
        if let Some(process) = self.get_process(session_id).await {
            process.touch();
        }
    }

    /// Register a connection for this session's notifications. Idempotent:
    /// returns false if it was already subscribed.
    pub fn subscribe_rpc(&self, session_id: &str, conn: &ConnectionHandle) -> bool {
        let mut subs = self.subscribers.lock().unwrap();
        let entry = subs.entry(session_id.to_string()).or_default();
        if entry.iter().any(|c| c.id() == conn.id()) {
            return false;
        }
        entry.push(conn.clone());
        true
    }

    /// Idempotent; silent if not subscribed
    pub fn unsubscribe_rpc(&self, session_id: &str, conn_id: ConnId) {
        let mut subs = self.subscribers.lock().unwrap();
        if let Some(entry) = subs.get_mut(session_id) {
            entry.retain(|c| c.id() != conn_id);
            if entry.is_empty() {
                subs.remove(session_id);
            }
        }
    }

    /// Remove the connection from every per-session subscriber list
    pub fn unsubscribe_conn(&self, conn_id: ConnId) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|_, entry| {
            entry.retain(|c| c.id() != conn_id);
            !entry.is_empty()
        });
    }

    /// Fan out a notification to the session's current subscribers.
    /// Individual send failures are dropped by the connection queue.
    pub fn notify(&self, session_id: &str, method: &str, params: &Value) {
        notify_subscribers(&self.subscribers, session_id, method, params);
    }

    /// Terminate the session's process. Returns false if none was running.
    /// The pump observes the exit and finishes teardown.
    pub async fn close(&self, session_id: &str) -> bool {
        let process = self.processes.lock().await.remove(session_id);
        match process {
            Some(process) => {
                info!(session_id, "closing agent process");
                process.kill().await;
                true
            }
            None => false,
        }
    }

    /// Cancel the manager context, close every process, clear subscribers
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let processes: Vec<Arc<AgentProcess>> =
            self.processes.lock().await.drain().map(|(_, p)| p).collect();
        for process in &processes {
            process.kill().await;
        }
        for process in &processes {
            process.wait_exit_code().await;
        }
        self.subscribers.lock().unwrap().clear();
    }

    fn spawn_pump(&self, process: Arc<AgentProcess>, stdout: ChildStdout) {
        let store = self.store.clone();
        let subscribers = self.subscribers.clone();
        let processes = self.processes.clone();
        let on_process_end = self.on_process_end.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let session_id = process.session_id().to_string();
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        process.kill().await;
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let event = AgentEvent::classify(&line);
                            handle_event(&store, &subscribers, &session_id, &event);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(session_id = %session_id, error = %e, "agent stdout read failed");
                            break;
                        }
                    }
                }
            }

            let exit_code = process.wait_exit_code().await;
            debug!(session_id = %session_id, exit_code, "agent process ended");
            let ended = AgentEvent::process_ended(exit_code);
            handle_event(&store, &subscribers, &session_id, &ended);
            processes.lock().await.remove(&session_id);

            let hook = on_process_end.lock().unwrap().clone();
            if let Some(hook) = hook {
                hook(&session_id);
            }
        });
    }

    fn spawn_reaper(&self) {
        let processes = self.processes.clone();
        let cancel = self.cancel.clone();
        let idle_timeout = self.idle_timeout;
        let period = (idle_timeout / 4).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let expired: Vec<Arc<AgentProcess>> = {
                            let mut map = processes.lock().await;
                            let ids: Vec<String> = map
                                .iter()
                                .filter(|(_, p)| p.idle_for() > idle_timeout)
                                .map(|(id, _)| id.clone())
                                .collect();
                            ids.iter().filter_map(|id| map.remove(id)).collect()
                        };
                        for process in expired {
                            info!(session_id = %process.session_id(), "closing idle agent process");
                            process.kill().await;
                        }
                    }
                }
            }
        });
    }
}

/// Append to history, then fan out. Order matters: replay-then-live must see
/// every event at least once.
fn handle_event(
    store: &SessionStore,
    subscribers: &SubscriberMap,
    session_id: &str,
    event: &AgentEvent,
) {
    let record = event.history_record();
    if let Err(e) = store.append_history(session_id, &record) {
        warn!(session_id, error = %e, "history append failed, broadcasting anyway");
    }
    let params = event.notification_params(session_id);
    notify_subscribers(subscribers, session_id, &event.notification_method(), &params);
}

fn notify_subscribers(
    subscribers: &SubscriberMap,
    session_id: &str,
    method: &str,
    params: &Value,
) {
    let targets: Vec<ConnectionHandle> = {
        let subs = subscribers.lock().unwrap();
        subs.get(session_id).cloned().unwrap_or_default()
    };
    for conn in targets {
        conn.notify(method, params.clone());
    }
}
