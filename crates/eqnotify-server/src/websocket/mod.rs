//! WebSocket connection registry, delivery, frame dispatch and heartbeat.

pub mod connection;
pub mod delivery;
pub mod handler;
pub mod heartbeat;
pub mod protocol;
pub mod registry;
pub mod session;
