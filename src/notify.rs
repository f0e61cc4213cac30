// Outbound circle notifications
//
// Delivery is fire-and-forget: `publish` never blocks and never reports failure
// back to the settlement path that produced the event.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CircleEvent {
    PayoutSubmitted {
        circle_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
        transfer_id: String,
    },
    PayoutFailed {
        circle_id: Uuid,
        user_id: Uuid,
        reason: String,
    },
    RotationAdvanced {
        circle_id: Uuid,
        next_user_id: Uuid,
        cycle: i32,
    },
    CircleCompleted {
        circle_id: Uuid,
    },
    ContributionSubmitted {
        schedule_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
        transfer_id: String,
    },
    ContributionFailed {
        schedule_id: Uuid,
        user_id: Uuid,
        reason: String,
    },
}

pub trait Notifier: Send + Sync {
    fn publish(&self, event: CircleEvent);
}

/// Writes events to the log only
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn publish(&self, event: CircleEvent) {
        info!(?event, "circle event");
    }
}

/// POSTs events as JSON to an external collaborator
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { url, client }
    }
}

impl Notifier for WebhookNotifier {
    fn publish(&self, event: CircleEvent) {
        let client = self.client.clone();
        let url = self.url.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&event).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => warn!("Notification rejected ({}): {:?}", response.status(), event),
                Err(e) => warn!("Notification delivery failed: {}", e),
            }
        });
    }
}

pub fn notifier_from_url(url: Option<String>) -> Arc<dyn Notifier> {
    match url {
        Some(url) if !url.is_empty() => Arc::new(WebhookNotifier::new(url)),
        _ => Arc::new(LogNotifier),
    }
}
