// Settlement: batch payout scanning, recurring contributions and webhook reconciliation
pub mod contributions;
pub mod payouts;
pub mod reconciler;
pub mod scheduler;

use serde::Serialize;
use uuid::Uuid;

pub use contributions::ContributionProcessor;
pub use payouts::PayoutScanner;
pub use reconciler::{ReconcileOutcome, TransferEvent, WebhookReconciler};
pub use scheduler::BatchScheduler;

/// Knobs shared by both batch jobs
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Items processed in parallel within one run
    pub concurrency: usize,
    /// How long a claimed circle/schedule stays claimed if the run dies
    pub lease_ttl: chrono::Duration,
    /// Upper bound on every rail call
    pub rail_deadline: std::time::Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            lease_ttl: chrono::Duration::minutes(5),
            rail_deadline: std::time::Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Processed,
    Skipped,
    Failed,
}

/// Outcome for one circle or schedule in a batch run
#[derive(Debug, Clone, Serialize)]
pub struct ItemResult {
    pub id: Uuid,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ItemResult {
    pub fn processed(id: Uuid, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ItemStatus::Processed,
            message: Some(message.into()),
        }
    }

    pub fn skipped(id: Uuid, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ItemStatus::Skipped,
            message: Some(message.into()),
        }
    }

    pub fn failed(id: Uuid, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ItemStatus::Failed,
            message: Some(message.into()),
        }
    }
}

/// Aggregate of one batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub checked: usize,
    pub processed: usize,
    pub errors: usize,
    pub results: Vec<ItemResult>,
}

impl BatchReport {
    pub fn from_results(results: Vec<ItemResult>) -> Self {
        let count = |status: ItemStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            checked: results.len(),
            processed: count(ItemStatus::Processed),
            errors: count(ItemStatus::Failed),
            results,
        }
    }
}
