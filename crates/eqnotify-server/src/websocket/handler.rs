//! Per-frame dispatch: interprets one inbound text frame for a connection and
//! drives the registry and delivery engine.

use std::sync::Arc;

use eqnotify_auth::{Identity, TokenVerifier};
use metrics::counter;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::delivery::{Delivery, DeliveryReport};
use super::protocol::{InboundFrame, OutboundMessage, Route, parse_frame};
use super::registry::{ConnectionRegistry, RegistryError};
use crate::metrics::{NOTIFICATIONS_RELAYED_TOTAL, WS_AUTH_TOTAL};

/// Reply sent for every rejected token. Failure reasons stay in the logs.
pub const AUTH_FAILED_MESSAGE: &str = "authentication failed";

/// Reply sent when an authenticated connection tries to authenticate again.
pub const ALREADY_AUTHENTICATED_MESSAGE: &str = "already authenticated";

/// Shared state every session dispatches against.
#[derive(Clone)]
pub struct NotifyContext {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out over `registry`.
    pub delivery: Delivery,
    /// Token verification collaborator.
    pub verifier: Arc<dyn TokenVerifier>,
}

impl NotifyContext {
    /// Build a context with a fresh registry.
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            delivery: Delivery::new(registry.clone()),
            registry,
            verifier,
        }
    }
}

/// What handling a frame did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Identity established.
    Authenticated(Identity),
    /// Token rejected, or the connection was already authenticated.
    AuthRejected,
    /// Answered a ping.
    Pong,
    /// Notification fanned out.
    Relayed {
        /// `all`, `role` or `user`.
        target: &'static str,
        /// Fan-out result.
        report: DeliveryReport,
    },
    /// Malformed or unsupported frame; an `error` frame was sent.
    Rejected,
}

/// Handle one inbound text frame from `conn`.
///
/// Replies go straight onto the connection's outbound queue. Nothing here
/// closes the connection.
pub fn handle_frame(text: &str, conn: &Arc<Connection>, ctx: &NotifyContext) -> FrameOutcome {
    let frame = match parse_frame(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(conn_id = %conn.id(), error = %e, "rejected frame");
            let _ = conn.send_message(&OutboundMessage::error(e.to_string()));
            return FrameOutcome::Rejected;
        }
    };

    match frame {
        InboundFrame::Auth { token } => handle_auth(token.as_deref(), conn, ctx),
        InboundFrame::Ping => {
            let _ = conn.send_message(&OutboundMessage::pong());
            FrameOutcome::Pong
        }
        InboundFrame::Notification { route, data } => {
            let from = conn.identity().map(|i| i.username.clone());
            let message = OutboundMessage::notification(data, from);
            let report = match &route {
                Route::All => ctx.delivery.broadcast(&message, Some(conn.id())),
                Route::Role(role) => ctx.delivery.send_to_role(role, &message),
                Route::User(user_id) => ctx.delivery.send_to_user(user_id, &message),
            };
            let target = route.target();
            counter!(NOTIFICATIONS_RELAYED_TOTAL, "target" => target).increment(1);
            debug!(
                conn_id = %conn.id(),
                target,
                authenticated = conn.is_authenticated(),
                delivered = report.delivered,
                "notification relayed"
            );
            FrameOutcome::Relayed { target, report }
        }
    }
}

fn handle_auth(token: Option<&str>, conn: &Arc<Connection>, ctx: &NotifyContext) -> FrameOutcome {
    if conn.is_authenticated() {
        counter!(WS_AUTH_TOTAL, "outcome" => "already_authenticated").increment(1);
        warn!(conn_id = %conn.id(), "re-authentication rejected");
        let _ = conn.send_message(&OutboundMessage::auth_error(ALREADY_AUTHENTICATED_MESSAGE));
        return FrameOutcome::AuthRejected;
    }

    let identity = match ctx.verifier.verify(token.unwrap_or_default()) {
        Ok(identity) => identity,
        Err(e) => {
            counter!(WS_AUTH_TOTAL, "outcome" => e.kind()).increment(1);
            info!(conn_id = %conn.id(), reason = %e, "authentication failed");
            let _ = conn.send_message(&OutboundMessage::auth_error(AUTH_FAILED_MESSAGE));
            return FrameOutcome::AuthRejected;
        }
    };

    match ctx.registry.authenticate(conn.id(), identity.clone()) {
        Ok(_) => {
            counter!(WS_AUTH_TOTAL, "outcome" => "success").increment(1);
            info!(
                conn_id = %conn.id(),
                user_id = %identity.user_id,
                role = %identity.role,
                "connection authenticated"
            );
            let _ = conn.send_message(&OutboundMessage::auth_success(identity.clone()));
            FrameOutcome::Authenticated(identity)
        }
        Err(RegistryError::AlreadyAuthenticated(_)) => {
            counter!(WS_AUTH_TOTAL, "outcome" => "already_authenticated").increment(1);
            let _ = conn.send_message(&OutboundMessage::auth_error(ALREADY_AUTHENTICATED_MESSAGE));
            FrameOutcome::AuthRejected
        }
        Err(e @ RegistryError::NotFound(_)) => {
            // The session is already tearing down.
            debug!(conn_id = %conn.id(), error = %e, "auth on departed connection");
            FrameOutcome::AuthRejected
        }
    }
}
