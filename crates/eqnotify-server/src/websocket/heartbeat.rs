//! Periodic liveness sweep over every registered connection.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::protocol::OutboundMessage;
use super::registry::ConnectionRegistry;
use crate::metrics::HEARTBEAT_PRUNED_TOTAL;

/// Result of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Open connections a heartbeat was queued for.
    pub probed: usize,
    /// Connections found closed and removed.
    pub pruned: usize,
}

/// Send a `heartbeat` to every open connection and prune the rest.
///
/// A probe that fails because the queue is full does not prune: the
/// connection is still open, just slow.
pub fn sweep(registry: &ConnectionRegistry) -> SweepReport {
    let mut report = SweepReport::default();
    let json = match OutboundMessage::heartbeat().encode() {
        Ok(j) => j,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize heartbeat");
            return report;
        }
    };

    for conn in registry.snapshot() {
        if conn.is_open() {
            let _ = conn.send(json.clone());
            report.probed += 1;
        } else if registry.remove(conn.id()) {
            report.pruned += 1;
            debug!(conn_id = %conn.id(), "pruned dead connection");
        }
    }
    if report.pruned > 0 {
        counter!(HEARTBEAT_PRUNED_TOTAL).increment(report.pruned as u64);
    }
    report
}

/// Sweep every `interval` until `cancel` fires.
///
/// The first sweep happens one full interval after start.
pub async fn run_heartbeat(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    info!(interval_secs = interval.as_secs(), "heartbeat started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = sweep(&registry);
                debug!(probed = report.probed, pruned = report.pruned, "heartbeat sweep");
            }
        }
    }
    info!("heartbeat stopped");
}
