// Webhook Reconciler
//
// Applies at-least-once, possibly out-of-order transfer status events from the
// rail to the matching transaction row. Events are keyed by transfer id; there
// is no sequence number, so ordering is enforced by the forward-only status rules.
//
// Never advances rotation. The payout scanner picks up settled funds on its next run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::ledger::models::{CircleTransaction, SettlementStatus, TransactionStatus};
use crate::ledger::store::CircleStore;

const MAX_ATTEMPTS: usize = 8;

/// One inbound transfer status event
#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub transfer_id: String,
    pub external_status: String,
    pub failure_reason: Option<String>,
    pub event_type: Option<String>,
    /// Raw webhook body, stored for audit
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    UnknownTransfer,
    UnknownStatus,
    Applied {
        status: TransactionStatus,
        settlement_status: SettlementStatus,
    },
    /// Same state as before; only delivery bookkeeping moved
    Redelivered,
    /// Would move the row backwards; only delivery bookkeeping moved
    Rejected {
        current: TransactionStatus,
        requested: TransactionStatus,
    },
}

/// Rail status -> (submission status, settlement status to set)
pub fn map_external_status(status: &str) -> Option<(TransactionStatus, Option<SettlementStatus>)> {
    match status.to_ascii_lowercase().as_str() {
        "pending" => Some((TransactionStatus::Processing, None)),
        "posted" | "settled" => Some((TransactionStatus::Completed, Some(SettlementStatus::Settled))),
        "cancelled" | "canceled" => Some((TransactionStatus::Cancelled, None)),
        "returned" => Some((TransactionStatus::Failed, Some(SettlementStatus::Reversed))),
        "failed" => Some((TransactionStatus::Failed, None)),
        _ => None,
    }
}

pub struct WebhookReconciler {
    store: Arc<dyn CircleStore>,
}

impl WebhookReconciler {
    pub fn new(store: Arc<dyn CircleStore>) -> Self {
        Self { store }
    }

    pub async fn reconcile(&self, event: &TransferEvent, now: DateTime<Utc>) -> AppResult<ReconcileOutcome> {
        let Some((target_status, target_settlement)) = map_external_status(&event.external_status) else {
            warn!(
                "⚠️ Ignoring transfer {} with unknown status '{}'",
                event.transfer_id, event.external_status
            );
            return Ok(ReconcileOutcome::UnknownStatus);
        };

        for attempt in 1..=MAX_ATTEMPTS {
            let Some(current) = self.store.get_transaction_by_transfer_id(&event.transfer_id).await? else {
                info!("Ignoring event for unknown transfer {}", event.transfer_id);
                return Ok(ReconcileOutcome::UnknownTransfer);
            };

            let settlement = target_settlement.unwrap_or(current.settlement_status);
            let unchanged = current.status == target_status && current.settlement_status == settlement;
            let allowed = current.status.can_transition_to(target_status)
                && current.settlement_status.can_transition_to(settlement);

            let mut updated = current.clone();
            record_delivery(&mut updated.metadata, event, now, allowed && !unchanged);
            updated.updated_at = now;

            let outcome = if unchanged {
                ReconcileOutcome::Redelivered
            } else if !allowed {
                ReconcileOutcome::Rejected {
                    current: current.status,
                    requested: target_status,
                }
            } else {
                updated.status = target_status;
                updated.settlement_status = settlement;
                if target_status == TransactionStatus::Failed {
                    updated.failure_reason = event
                        .failure_reason
                        .clone()
                        .or_else(|| Some(event.external_status.clone()));
                }
                ReconcileOutcome::Applied {
                    status: target_status,
                    settlement_status: settlement,
                }
            };

            if self
                .store
                .update_transaction(&updated, current.status, current.settlement_status)
                .await?
            {
                log_outcome(&current, &outcome);
                return Ok(outcome);
            }

            warn!(
                "Concurrent update on transfer {} (attempt {}/{}), retrying",
                event.transfer_id, attempt, MAX_ATTEMPTS
            );
        }

        Err(AppError::Internal(format!(
            "transfer {} kept changing during reconciliation",
            event.transfer_id
        )))
    }
}

fn log_outcome(tx: &CircleTransaction, outcome: &ReconcileOutcome) {
    match outcome {
        ReconcileOutcome::Applied {
            status,
            settlement_status,
        } => info!(
            "✓ Transaction {} {} -> {} ({:?})",
            tx.id, tx.status, status, settlement_status
        ),
        ReconcileOutcome::Rejected { current, requested } => warn!(
            "⚠️ Rejected backward transition for transaction {}: {} -> {}",
            tx.id, current, requested
        ),
        _ => {}
    }
}

/// Event audit trail kept under `metadata.settlement`
fn record_delivery(metadata: &mut Value, event: &TransferEvent, now: DateTime<Utc>, applied: bool) {
    if !metadata.is_object() {
        *metadata = json!({});
    }
    let Some(root) = metadata.as_object_mut() else {
        return;
    };

    let entry = root
        .entry("settlement")
        .or_insert_with(|| json!({}));
    if !entry.is_object() {
        *entry = json!({});
    }
    let Some(settlement) = entry.as_object_mut() else {
        return;
    };

    let count = settlement
        .get("delivery_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    settlement.insert("delivery_count".into(), json!(count + 1));
    settlement.insert("last_seen_at".into(), json!(now.to_rfc3339()));

    if applied {
        settlement.insert("external_status".into(), json!(event.external_status));
        settlement.insert("event_type".into(), json!(event.event_type));
        settlement.insert("last_event".into(), event.raw.clone());
    }
}
