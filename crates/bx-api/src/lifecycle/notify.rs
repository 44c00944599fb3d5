//! Live status fanout to connected operators.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const PUBLIC_CHANNEL: &str = "public-channel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeStatus {
    Success,
    Error,
}

/// Human-readable message for a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "message")]
pub struct Notice {
    pub message: String,
    pub status: NoticeStatus,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: NoticeStatus::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: NoticeStatus::Error,
        }
    }
}

/// Named domain event broadcast to every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainEvent {
    pub channel: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: BTreeMap<&'static str, String>,
}

impl DomainEvent {
    pub fn new(kind: &'static str) -> Self {
        Self {
            channel: PUBLIC_CHANNEL,
            kind,
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &'static str, value: impl ToString) -> Self {
        self.data.insert(key, value.to_string());
        self
    }
}

/// Where lifecycle tasks report progress. Delivery is best-effort.
pub trait NotificationSink: Send + Sync + 'static {
    /// Deliver to `user_id`'s live connection, or drop if there is none.
    fn send(&self, user_id: Uuid, notice: &Notice);

    fn broadcast(&self, event: &DomainEvent);
}

struct Connection {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// One live websocket per user. A newer connection for the same user
/// replaces the older one.
#[derive(Default)]
pub struct ConnectionHub {
    next_id: AtomicU64,
    conns: Mutex<HashMap<Uuid, Connection>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `user_id`'s connection. Returns the connection ID to pass to
    /// [`unregister`](Self::unregister) and the stream of serialized frames.
    pub fn register(&self, user_id: Uuid) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let replaced = self
            .conns
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(user_id, Connection { id, tx });
        if replaced.is_some() {
            tracing::debug!(%user_id, "replaced existing live connection");
        }
        (id, rx)
    }

    /// Drop `user_id`'s connection if it is still `conn_id`.
    pub fn unregister(&self, user_id: Uuid, conn_id: u64) {
        let mut conns = self.conns.lock().unwrap_or_else(|p| p.into_inner());
        if conns.get(&user_id).is_some_and(|c| c.id == conn_id) {
            conns.remove(&user_id);
        }
    }

    pub fn connected(&self) -> usize {
        self.conns.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    fn encode<T: Serialize>(value: &T) -> Option<String> {
        match serde_json::to_string(value) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode notification");
                None
            }
        }
    }
}

impl NotificationSink for ConnectionHub {
    fn send(&self, user_id: Uuid, notice: &Notice) {
        let Some(frame) = Self::encode(notice) else { return };
        let conns = self.conns.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(conn) = conns.get(&user_id) {
            if conn.tx.send(frame).is_err() {
                tracing::warn!(%user_id, "live connection closed, message dropped");
            }
        }
    }

    fn broadcast(&self, event: &DomainEvent) {
        let Some(frame) = Self::encode(event) else { return };
        let conns = self.conns.lock().unwrap_or_else(|p| p.into_inner());
        for (user_id, conn) in conns.iter() {
            if conn.tx.send(frame.clone()).is_err() {
                tracing::warn!(%user_id, kind = event.kind, "broadcast to closed connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn notice_wire_shape() {
        let frame = serde_json::to_value(Notice::error("boom")).unwrap();
        assert_eq!(frame, json!({"type": "message", "message": "boom", "status": "error"}));
    }

    #[test]
    fn broadcast_reaches_every_connection() {
        let hub = ConnectionHub::new();
        let (_, mut a) = hub.register(Uuid::new_v4());
        let (_, mut b) = hub.register(Uuid::new_v4());

        hub.broadcast(&DomainEvent::new("redirector-changed").with("status", "Ready"));

        let expected = json!({
            "channel": "public-channel",
            "type": "redirector-changed",
            "data": {"status": "Ready"},
        });
        assert_eq!(next(&mut a), expected);
        assert_eq!(next(&mut b), expected);
    }

    #[test]
    fn closed_connection_does_not_block_others() {
        let hub = ConnectionHub::new();
        let (_, dead) = hub.register(Uuid::new_v4());
        let (_, mut live) = hub.register(Uuid::new_v4());
        drop(dead);

        hub.broadcast(&DomainEvent::new("server-changed"));

        assert_eq!(next(&mut live)["type"], "server-changed");
    }

    #[test]
    fn send_to_unknown_user_is_a_no_op() {
        let hub = ConnectionHub::new();
        let (_, mut rx) = hub.register(Uuid::new_v4());

        hub.send(Uuid::new_v4(), &Notice::success("hello"));

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn second_connection_replaces_first() {
        let hub = ConnectionHub::new();
        let user = Uuid::new_v4();
        let (first_id, mut first) = hub.register(user);
        let (_, mut second) = hub.register(user);

        hub.send(user, &Notice::success("hi"));
        assert_eq!(next(&mut second)["message"], "hi");
        assert!(first.try_recv().is_err());

        // The stale connection closing must not evict its replacement.
        hub.unregister(user, first_id);
        assert_eq!(hub.connected(), 1);
    }
}
