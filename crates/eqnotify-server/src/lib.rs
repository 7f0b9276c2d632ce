//! # eqnotify-server
//!
//! Real-time notification gateway for the equipment admin application.
//!
//! - `WebSocket` endpoint with out-of-band authentication (first `auth` frame)
//! - Connection registry keyed by connection, classified by user and role
//! - Delivery engine: broadcast, send-to-role, send-to-user
//! - Process-wide heartbeat that probes and prunes connections
//! - HTTP endpoints: health check, Prometheus metrics
//! - Graceful shutdown via `CancellationToken` + `TaskTracker`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod simulator;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::NotifyServer;
pub use websocket::delivery::{Delivery, DeliveryReport};
pub use websocket::protocol::OutboundMessage;
