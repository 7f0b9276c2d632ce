//! Fan-out of outbound messages to live connections.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use super::connection::{Connection, ConnectionId};
use super::protocol::OutboundMessage;
use super::registry::ConnectionRegistry;
use crate::metrics::WS_DELIVERY_DROPS_TOTAL;

/// Result of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Open connections that matched the selector.
    pub matched: usize,
    /// Frames accepted by their outbound queue.
    pub delivered: usize,
    /// Frames dropped because the queue was full or had just closed.
    pub dropped: usize,
}

/// Delivery engine over the shared registry.
///
/// Each call serializes the message once and sends the shared payload to
/// every matching connection. Connections that are no longer open are
/// skipped silently; a failed send never aborts the fan-out.
#[derive(Clone)]
pub struct Delivery {
    registry: Arc<ConnectionRegistry>,
}

impl Delivery {
    /// Create a delivery engine over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Send to every open connection except `exclude`.
    pub fn broadcast(
        &self,
        message: &OutboundMessage,
        exclude: Option<&ConnectionId>,
    ) -> DeliveryReport {
        self.fan_out(message, "all", |c| Some(c.id()) != exclude)
    }

    /// Send to every open connection authenticated as `user_id`.
    pub fn send_to_user(&self, user_id: &str, message: &OutboundMessage) -> DeliveryReport {
        self.fan_out(message, "user", |c| {
            c.identity().is_some_and(|i| i.user_id == user_id)
        })
    }

    /// Send to every open connection authenticated with `role`.
    pub fn send_to_role(&self, role: &str, message: &OutboundMessage) -> DeliveryReport {
        self.fan_out(message, "role", |c| {
            c.identity().is_some_and(|i| i.role == role)
        })
    }

    fn fan_out(
        &self,
        message: &OutboundMessage,
        target: &'static str,
        selector: impl Fn(&Connection) -> bool,
    ) -> DeliveryReport {
        let json = match message.encode() {
            Ok(j) => j,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to serialize message");
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport::default();
        for conn in self.registry.snapshot() {
            if !conn.is_open() || !selector(&conn) {
                continue;
            }
            report.matched += 1;
            if conn.send(json.clone()) {
                report.delivered += 1;
            } else {
                report.dropped += 1;
                counter!(WS_DELIVERY_DROPS_TOTAL).increment(1);
                warn!(conn_id = %conn.id(), kind = message.kind(), "failed to send to client");
            }
        }
        debug!(
            kind = message.kind(),
            target,
            matched = report.matched,
            delivered = report.delivered,
            "fan-out complete"
        );
        report
    }
}
