//! Development-only simulated system notifications.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rand::seq::IndexedRandom;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::websocket::delivery::Delivery;
use crate::websocket::protocol::OutboundMessage;

/// Urgency of a simulated alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Routine.
    Medium,
    /// Needs attention soon.
    High,
    /// Needs attention now.
    Critical,
}

/// One canned alert.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Template {
    /// Alert category (`system`, `equipment`, `fault`).
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Short headline.
    pub title: &'static str,
    /// Body text.
    pub message: &'static str,
    /// Urgency.
    pub priority: Priority,
}

/// The canned alerts the simulator picks from.
pub const TEMPLATES: [Template; 3] = [
    Template {
        kind: "system",
        title: "System maintenance",
        message: "Routine system maintenance is scheduled for midnight tonight",
        priority: Priority::Medium,
    },
    Template {
        kind: "equipment",
        title: "Equipment status",
        message: "Equipment EQ-001 is due for scheduled maintenance",
        priority: Priority::High,
    },
    Template {
        kind: "fault",
        title: "Fault alarm",
        message: "Production line A reported a fault, please respond",
        priority: Priority::Critical,
    },
];

/// Build the `data` payload for a template, stamped with an id and ISO time.
pub fn payload(template: &Template) -> Value {
    let now = Utc::now();
    let mut data = serde_json::to_value(template).unwrap_or_else(|_| json!({}));
    if let Some(obj) = data.as_object_mut() {
        let _ = obj.insert("id".into(), json!(now.timestamp_millis().to_string()));
        let _ = obj.insert(
            "timestamp".into(),
            json!(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    data
}

/// Pick a random template.
pub fn random_payload() -> Value {
    let mut rng = rand::rng();
    TEMPLATES
        .choose(&mut rng)
        .map_or_else(|| json!({}), payload)
}

/// Broadcast a random alert to every connection each `interval` until
/// `cancel` fires.
pub async fn run_simulator(delivery: Delivery, interval: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ticker.tick().await;

    info!(interval_secs = interval.as_secs(), "notification simulator started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let message = OutboundMessage::system_notification(random_payload());
                let report = delivery.broadcast(&message, None);
                debug!(delivered = report.delivered, "simulated notification sent");
            }
        }
    }
    info!("notification simulator stopped");
}
