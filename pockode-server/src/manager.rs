//! Worktree scope lifecycle
//!
//! Scopes are built lazily on the first `get` for a worktree and reference
//! counted per bound connection. When the count drops to zero the scope is
//! not torn down immediately: a grace period absorbs quick reconnects (a
//! browser refresh must not kill a running agent). Cleanup proceeds only if,
//! at check time, the count is still zero, no process is running, and the
//! map still points at the same scope instance.

use crate::error::Result;
use crate::registry::{WorktreeInfo, WorktreeRegistry};
use crate::scope::WorktreeScope;
use crate::watcher::WorktreeWatcher;
use pockode_config::Settings;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// How long a zero-ref scope survives before cleanup is attempted
const CLEANUP_GRACE: Duration = Duration::from_secs(30);

struct ScopeEntry {
    scope: Arc<WorktreeScope>,
    refs: usize,
}

type ScopeMap = Arc<Mutex<HashMap<String, ScopeEntry>>>;

pub struct WorktreeManager {
    settings: Arc<Settings>,
    registry: Arc<WorktreeRegistry>,
    worktree_watcher: Arc<WorktreeWatcher>,
    scopes: ScopeMap,
    grace: Duration,
}

impl WorktreeManager {
    pub fn new(
        settings: Arc<Settings>,
        registry: Arc<WorktreeRegistry>,
        worktree_watcher: Arc<WorktreeWatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            registry,
            worktree_watcher,
            scopes: Arc::new(Mutex::new(HashMap::new())),
            grace: CLEANUP_GRACE,
        })
    }

    pub fn registry(&self) -> &Arc<WorktreeRegistry> {
        &self.registry
    }

    pub fn worktree_watcher(&self) -> &Arc<WorktreeWatcher> {
        &self.worktree_watcher
    }

    fn scope_data_root(&self, info: &WorktreeInfo) -> PathBuf {
        if info.is_main {
            self.settings.data_dir.clone()
        } else {
            self.settings.data_dir.join("worktrees").join(&info.name)
        }
    }

    /// Resolve the name and return its scope, building one if needed. The
    /// build happens outside the map lock; if another task raced us and
    /// installed first, the freshly built scope is disposed and the winner
    /// returned.
    pub async fn get(&self, name: &str) -> Result<Arc<WorktreeScope>> {
        let info = self.registry.resolve(name)?;
        {
            let mut scopes = self.scopes.lock().unwrap();
            if let Some(entry) = scopes.get_mut(&info.name) {
                entry.refs += 1;
                return Ok(entry.scope.clone());
            }
        }

        let data_root = self.scope_data_root(&info);
        let scope = WorktreeScope::new(
            info.name.clone(),
            info.path.clone(),
            &data_root,
            self.settings.agent,
            self.settings.idle_timeout,
        )?;
        if let Err(e) = scope.start() {
            scope.stop().await;
            return Err(e);
        }
        self.install_process_end_hook(&scope);

        let raced_winner = {
            let mut scopes = self.scopes.lock().unwrap();
            match scopes.get_mut(&info.name) {
                Some(entry) => {
                    entry.refs += 1;
                    Some(entry.scope.clone())
                }
                None => {
                    scopes.insert(
                        info.name.clone(),
                        ScopeEntry {
                            scope: scope.clone(),
                            refs: 1,
                        },
                    );
                    None
                }
            }
        };

        match raced_winner {
            Some(winner) => {
                scope.stop().await;
                Ok(winner)
            }
            None => {
                info!(worktree = %info.name, "scope created");
                Ok(scope)
            }
        }
    }

    /// Drop one reference. Reaching zero schedules a delayed cleanup check.
    pub fn release(&self, scope: &Arc<WorktreeScope>) {
        let reached_zero = {
            let mut scopes = self.scopes.lock().unwrap();
            match scopes.get_mut(scope.name()) {
                Some(entry) if Arc::ptr_eq(&entry.scope, scope) => {
                    entry.refs = entry.refs.saturating_sub(1);
                    entry.refs == 0
                }
                _ => false,
            }
        };
        if reached_zero {
            spawn_delayed_cleanup(
                self.scopes.clone(),
                self.grace,
                scope.name().to_string(),
                scope.clone(),
            );
        }
    }

    /// When an agent process ends, an idle zero-ref scope may now be
    /// collectable; re-arm the delayed check.
    fn install_process_end_hook(&self, scope: &Arc<WorktreeScope>) {
        let scopes = self.scopes.clone();
        let grace = self.grace;
        let scope_weak = Arc::downgrade(scope);
        let name = scope.name().to_string();
        scope
            .processes()
            .set_on_process_end(Arc::new(move |_session_id| {
                let Some(scope) = scope_weak.upgrade() else {
                    return;
                };
                let zero_refs = {
                    let map = scopes.lock().unwrap();
                    matches!(
                        map.get(&name),
                        Some(entry) if entry.refs == 0 && Arc::ptr_eq(&entry.scope, &scope)
                    )
                };
                if zero_refs {
                    spawn_delayed_cleanup(scopes.clone(), grace, name.clone(), scope);
                }
            }));
    }

    /// Tear a scope down immediately (worktree deletion): notify its
    /// subscribers, stop it, and drop its persisted state.
    pub async fn force_shutdown(&self, name: &str) {
        let entry = self.scopes.lock().unwrap().remove(name);
        if let Some(entry) = entry {
            entry
                .scope
                .notify_all("worktree.deleted", json!({"name": name}));
            entry.scope.stop().await;
        }
        if !name.is_empty() {
            let data_dir = self.settings.data_dir.join("worktrees").join(name);
            if data_dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&data_dir) {
                    warn!(worktree = %name, error = %e, "failed to remove worktree data");
                }
            }
        }
    }

    /// Stop the worktree watcher, then every scope
    pub async fn shutdown(&self) {
        self.worktree_watcher.stop();
        let entries: Vec<ScopeEntry> = {
            let mut scopes = self.scopes.lock().unwrap();
            scopes.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.scope.stop().await;
        }
    }

    #[cfg(test)]
    fn ref_count(&self, name: &str) -> Option<usize> {
        self.scopes.lock().unwrap().get(name).map(|e| e.refs)
    }

    #[cfg(test)]
    fn contains(&self, name: &str) -> bool {
        self.scopes.lock().unwrap().contains_key(name)
    }
}

fn spawn_delayed_cleanup(
    scopes: ScopeMap,
    grace: Duration,
    name: String,
    scope: Arc<WorktreeScope>,
) {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        try_cleanup(&scopes, &name, &scope).await;
    });
}

async fn try_cleanup(scopes: &ScopeMap, name: &str, scope: &Arc<WorktreeScope>) {
    {
        let map = scopes.lock().unwrap();
        match map.get(name) {
            Some(entry) if entry.refs == 0 && Arc::ptr_eq(&entry.scope, scope) => {}
            _ => return,
        }
    }
    // A process can only appear through a connection holding a reference,
    // so with refs still at zero this count is stable.
    if scope.processes().process_count().await > 0 {
        return;
    }
    let removed = {
        let mut map = scopes.lock().unwrap();
        match map.get(name) {
            Some(entry) if entry.refs == 0 && Arc::ptr_eq(&entry.scope, scope) => {
                map.remove(name);
                true
            }
            _ => false,
        }
    };
    if removed {
        info!(worktree = %name, "disposing idle scope");
        scope.stop().await;
    }
}
