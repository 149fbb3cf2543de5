//! Per-connection outbound queue
//!
//! Every accepted WebSocket gets one bounded queue. The dispatch loop sends
//! responses through it awaiting capacity; notification fan-out from process
//! pumps and watchers uses `try_send` and drops the single message for that
//! subscriber when the queue is full, so a slow browser never stalls an
//! event loop.

use crate::rpc;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound queue depth per connection
pub const OUTBOUND_CAPACITY: usize = 256;

pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Cloneable handle used by watchers and the process manager to reach a
/// connection. Holding a handle does not keep the connection alive; sends to
/// a closed connection are silently dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    tx: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(id: ConnId) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Queue a response frame. Awaits queue capacity: responses are part of
    /// the request/response contract and must not be dropped.
    pub async fn respond(&self, frame: String) {
        let _ = self.tx.send(frame).await;
    }

    /// Queue a notification, best-effort. Never blocks.
    pub fn notify(&self, method: &str, params: Value) {
        let frame = rpc::notification(method, params);
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(conn_id = self.id, method, "outbound queue full, dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_notify_delivers_frame() {
        let (handle, mut rx) = ConnectionHandle::new(next_conn_id());
        handle.notify("git.status_changed", json!({}));
        let frame = rx.recv().await.unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["method"], "git.status_changed");
    }

    #[tokio::test]
    async fn test_notify_drops_when_full() {
        let (handle, mut rx) = ConnectionHandle::new(next_conn_id());
        for _ in 0..OUTBOUND_CAPACITY + 10 {
            handle.notify("fs.changed", json!({"path": "x"}));
        }
        // The queue holds exactly OUTBOUND_CAPACITY frames; the rest were dropped.
        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, OUTBOUND_CAPACITY);
    }

    #[test]
    fn test_conn_ids_are_unique() {
        assert_ne!(next_conn_id(), next_conn_id());
    }
}
