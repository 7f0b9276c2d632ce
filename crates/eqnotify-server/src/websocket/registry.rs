//! Live connection registry.

use std::collections::HashMap;
use std::sync::Arc;

use eqnotify_auth::Identity;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use super::connection::{Connection, ConnectionId, OutboundSender};

/// Registry failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No live connection with this id.
    #[error("connection not found: {0}")]
    NotFound(ConnectionId),
    /// The connection already carries an identity.
    #[error("connection already authenticated: {0}")]
    AlreadyAuthenticated(ConnectionId),
}

/// Every live connection, keyed by id.
///
/// Readers take a snapshot and release the lock before sending, so fan-out
/// never blocks admission or removal.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a freshly accepted transport as unauthenticated.
    pub fn admit(&self, tx: OutboundSender) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(ConnectionId::new(), tx));
        let _ = self
            .connections
            .write()
            .insert(conn.id().clone(), conn.clone());
        debug!(conn_id = %conn.id(), "connection admitted");
        conn
    }

    /// Attach an identity to a live connection. The identity is set at most once.
    pub fn authenticate(
        &self,
        id: &ConnectionId,
        identity: Identity,
    ) -> Result<Arc<Connection>, RegistryError> {
        let conn = self
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        conn.set_identity(identity)
            .map_err(|_| RegistryError::AlreadyAuthenticated(id.clone()))?;
        Ok(conn)
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.write().remove(id);
        if let Some(conn) = &removed {
            conn.mark_closed();
            debug!(conn_id = %id, "connection removed");
        }
        removed.is_some()
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Point-in-time copy of every registered connection.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Number of registered connections carrying an identity.
    pub fn authenticated_count(&self) -> usize {
        self.connections
            .read()
            .values()
            .filter(|c| c.is_authenticated())
            .count()
    }

    /// Remove every connection, returning them.
    pub fn clear(&self) -> Vec<Arc<Connection>> {
        let drained: Vec<_> = self.connections.write().drain().map(|(_, c)| c).collect();
        for conn in &drained {
            conn.mark_closed();
        }
        drained
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
