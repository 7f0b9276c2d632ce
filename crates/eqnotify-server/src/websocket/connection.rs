//! WebSocket client connection state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use eqnotify_auth::Identity;
use tokio::sync::mpsc;

use super::protocol::OutboundMessage;

/// Send half of a connection's outbound queue. Payloads are pre-serialized
/// JSON shared between all recipients of a fan-out.
pub type OutboundSender = mpsc::Sender<Arc<String>>;

/// Opaque handle of one live transport.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Fresh, time-ordered id (`conn_<uuid v7>`).
    pub fn new() -> Self {
        Self(format!("conn_{}", uuid::Uuid::now_v7()))
    }

    /// Borrow the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authentication state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    /// Accepted, no successful `auth` frame yet.
    Unauthenticated,
    /// Identity established; never changes again.
    Authenticated,
}

/// A connected WebSocket client as seen by the registry.
pub struct Connection {
    id: ConnectionId,
    tx: OutboundSender,
    identity: OnceLock<Identity>,
    connected_at: DateTime<Utc>,
    started: Instant,
    closed: AtomicBool,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create an unauthenticated connection around its outbound queue.
    pub fn new(id: ConnectionId, tx: OutboundSender) -> Self {
        Self {
            id,
            tx,
            identity: OnceLock::new(),
            connected_at: Utc::now(),
            started: Instant::now(),
            closed: AtomicBool::new(false),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Connection handle.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Identity, present only once authenticated.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    /// Current authentication state.
    pub fn auth_state(&self) -> AuthState {
        if self.identity.get().is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        }
    }

    /// Shorthand for `auth_state() == Authenticated`.
    pub fn is_authenticated(&self) -> bool {
        self.auth_state() == AuthState::Authenticated
    }

    /// Store the identity. Fails (returning it back) if one is already set.
    pub(crate) fn set_identity(&self, identity: Identity) -> Result<(), Identity> {
        self.identity.set(identity)
    }

    /// Wall-clock time the transport was accepted.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the transport still accepts outbound frames.
    ///
    /// Becomes `false` once the writer task has gone away or the session
    /// marked the connection closed.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Mark the transport as no longer open.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Queue a pre-serialized frame without waiting.
    ///
    /// Returns `false` if the queue is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.is_open() && self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue a single outbound message.
    pub fn send_message(&self, message: &OutboundMessage) -> bool {
        match message.encode() {
            Ok(json) => self.send(json),
            Err(e) => {
                tracing::warn!(conn_id = %self.id, error = %e, "failed to serialize frame");
                false
            }
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity.get())
            .field("connected_at", &self.connected_at)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
