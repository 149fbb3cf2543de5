//! Session list change notifications
//!
//! Registers as a listener on the scope's session store and forwards every
//! index mutation to subscribed connections as `session.list.changed`.

use crate::connection::{ConnId, ConnectionHandle};
use crate::error::WatchError;
use crate::store::SessionStore;
use crate::watcher::{SubId, SubscriberSet};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

pub struct SessionListWatcher {
    store: Arc<SessionStore>,
    subs: Arc<SubscriberSet<()>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionListWatcher {
    pub fn new(store: Arc<SessionStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            subs: Arc::new(SubscriberSet::new()),
            task: Mutex::new(None),
        })
    }

    pub fn start(&self) -> Result<(), WatchError> {
        let mut rx = self.store.subscribe_events();
        let subs = self.subs.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        for (_, sub) in subs.snapshot() {
                            sub.conn.notify(
                                "session.list.changed",
                                json!({
                                    "reason": event.kind.as_str(),
                                    "sessionId": event.session_id,
                                }),
                            );
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "session list watcher lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        *self.task.lock().unwrap() = Some(task);
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
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
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_mutations_reach_subscribers() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SessionStore::open(dir.path()).unwrap());
        let watcher = SessionListWatcher::new(store.clone());
        watcher.start().unwrap();

        let (conn, mut rx) = ConnectionHandle::new(next_conn_id());
        watcher.subscribe(conn);

        store.create("s1").unwrap();
        store.update_title("s1", "renamed").unwrap();
        store.delete("s1").unwrap();

        let mut reasons = Vec::new();
        for _ in 0..3 {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("notification")
                .unwrap();
            let v: Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(v["method"], "session.list.changed");
            assert_eq!(v["params"]["sessionId"], "s1");
            reasons.push(v["params"]["reason"].as_str().unwrap().to_string());
        }
        assert_eq!(reasons, vec!["created", "updated", "deleted"]);
        watcher.stop();
    }

    #[tokio::test]
    async fn test_unsubscribed_connection_is_silent() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SessionStore::open(dir.path()).unwrap());
        let watcher = SessionListWatcher::new(store.clone());
        watcher.start().unwrap();

        let (conn, mut rx) = ConnectionHandle::new(next_conn_id());
        let id = watcher.subscribe(conn);
        watcher.unsubscribe(&id);

        store.create("s1").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        watcher.stop();
    }
}
