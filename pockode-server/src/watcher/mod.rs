//! Watcher family: debounced change notifications with per-connection
//! subscriptions
//!
//! Every watcher has the same surface: subscribe a connection (optionally
//! with a target), unsubscribe by id, drop everything a closing connection
//! held, start, stop. Fan-out rides the connections' bounded outbound
//! queues, so a stalled subscriber only ever loses its own notifications.

mod fs;
mod git;
mod session_list;
mod worktree;

pub use fs::FsWatcher;
pub use git::GitWatcher;
pub use session_list::SessionListWatcher;
pub use worktree::WorktreeWatcher;

use crate::connection::{ConnId, ConnectionHandle};
use std::collections::HashMap;
use std::sync::Mutex;

pub type SubId = String;

/// One live subscription
#[derive(Clone)]
pub struct Subscription<T> {
    pub conn: ConnectionHandle,
    pub target: T,
}

/// Shared subscription bookkeeping for the watcher family
pub struct SubscriberSet<T> {
    inner: Mutex<HashMap<SubId, Subscription<T>>>,
}

impl<T: Clone + PartialEq> SubscriberSet<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent: subscribing the same connection to the same target again
    /// returns the existing id.
    pub fn subscribe(&self, conn: ConnectionHandle, target: T) -> SubId {
        let mut inner = self.inner.lock().unwrap();
        if let Some((id, _)) = inner
            .iter()
            .find(|(_, sub)| sub.conn.id() == conn.id() && sub.target == target)
        {
            return id.clone();
        }
        let id = uuid::Uuid::new_v4().to_string();
        inner.insert(id.clone(), Subscription { conn, target });
        id
    }

    pub fn unsubscribe(&self, id: &str) -> Option<Subscription<T>> {
        self.inner.lock().unwrap().remove(id)
    }

    /// Drop every subscription held by a connection; returns what was removed
    pub fn cleanup_connection(&self, conn_id: ConnId) -> Vec<(SubId, Subscription<T>)> {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<SubId> = inner
            .iter()
            .filter(|(_, sub)| sub.conn.id() == conn_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| inner.remove(&id).map(|sub| (id, sub)))
            .collect()
    }

    /// Snapshot for fan-out outside any other lock
    pub fn snapshot(&self) -> Vec<(SubId, Subscription<T>)> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|(id, sub)| (id.clone(), sub.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + PartialEq> Default for SubscriberSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
