// Batch Payout Scanner
//
// Per active circle: claim lease -> circle lock -> evaluate -> keyed payout row
// -> authorize + transfer -> mark completed -> advance rotation.
//
// The payout key `payout:{circle}:{member}:{cycle}` is unique among live rows, so
// an overlapping run that slips past the lease still cannot pay the same cycle twice.
//
// A transient rail failure releases the cycle for the next scan. A denied
// authorization holds the cycle until an admin calls `retry_denied`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::eligibility::{self, PayoutPolicy};
use crate::error::{AppError, AppResult, RailError};
use crate::ledger::models::{
    Circle, CircleMember, CircleStatus, CircleTransaction, InsertOutcome, SettlementStatus,
    TransactionStatus, TransactionType,
};
use crate::ledger::store::CircleStore;
use crate::notify::{CircleEvent, Notifier};
use crate::rail::{authorize_and_transfer, AuthorizationRequest, PaymentRail, TransferDirection};
use crate::rotation::{plan, RotationEngine};
use crate::settlement::{BatchReport, BatchSettings, ItemResult};

const DENIED_KIND: &str = "authorization_denied";

pub fn payout_key(circle_id: Uuid, member_id: Uuid, cycle: i32) -> String {
    format!("payout:{}:{}:{}", circle_id, member_id, cycle)
}

/// Denied payout that no admin has released for retry yet
fn is_held_denial(tx: &CircleTransaction) -> bool {
    tx.kind == TransactionType::Payout
        && tx.status == TransactionStatus::Failed
        && tx.metadata.get("failure_kind").and_then(Value::as_str) == Some(DENIED_KIND)
        && tx.metadata.get("retry_released_at").is_none()
}

#[derive(Debug)]
enum CircleOutcome {
    Paid {
        amount: Decimal,
        transfer_id: String,
        lap_completed: bool,
    },
    /// An earlier run paid this cycle but never advanced
    Recovered,
    Skipped(String),
    Failed(String),
}

pub struct PayoutScanner {
    store: Arc<dyn CircleStore>,
    rail: Arc<dyn PaymentRail>,
    rotation: Arc<RotationEngine>,
    notifier: Arc<dyn Notifier>,
    settings: BatchSettings,
    policy: PayoutPolicy,
    complete_after_lap: bool,
}

impl PayoutScanner {
    pub fn new(
        store: Arc<dyn CircleStore>,
        rail: Arc<dyn PaymentRail>,
        rotation: Arc<RotationEngine>,
        notifier: Arc<dyn Notifier>,
        settings: BatchSettings,
        policy: PayoutPolicy,
        complete_after_lap: bool,
    ) -> Self {
        Self {
            store,
            rail,
            rotation,
            notifier,
            settings,
            policy,
            complete_after_lap,
        }
    }

    /// Scan every active circle once
    #[instrument(skip(self))]
    pub async fn run(&self, now: DateTime<Utc>) -> AppResult<BatchReport> {
        let circles = self.store.list_active_circles().await?;
        let run_id = Uuid::new_v4();

        info!("💸 Payout scan {} over {} active circles", run_id, circles.len());

        let results: Vec<ItemResult> = stream::iter(circles)
            .map(|circle| self.process_claimed(circle, run_id, now))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let report = BatchReport::from_results(results);
        info!(
            "✓ Payout scan {} done: checked={} processed={} errors={}",
            run_id, report.checked, report.processed, report.errors
        );
        Ok(report)
    }

    async fn process_claimed(&self, circle: Circle, run_id: Uuid, now: DateTime<Utc>) -> ItemResult {
        let circle_id = circle.id;

        match self
            .store
            .try_claim_circle(circle_id, run_id, now, self.settings.lease_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => return ItemResult::skipped(circle_id, "claimed by another run"),
            Err(e) => return ItemResult::failed(circle_id, e.to_string()),
        }

        let outcome = self.process_circle(circle_id, now).await;

        if let Err(e) = self.store.release_circle(circle_id, run_id).await {
            warn!("Failed to release lease on circle {}: {}", circle_id, e);
        }

        match outcome {
            Ok(CircleOutcome::Paid {
                amount,
                transfer_id,
                lap_completed,
            }) => {
                let mut message = format!("paid {} via {}", amount, transfer_id);
                if lap_completed {
                    message.push_str("; lap completed");
                }
                ItemResult::processed(circle_id, message)
            }
            Ok(CircleOutcome::Recovered) => {
                ItemResult::processed(circle_id, "advanced rotation after earlier payout")
            }
            Ok(CircleOutcome::Skipped(reason)) => ItemResult::skipped(circle_id, reason),
            Ok(CircleOutcome::Failed(reason)) => ItemResult::failed(circle_id, reason),
            Err(e) => {
                error!("❌ Payout processing failed for circle {}: {}", circle_id, e);
                ItemResult::failed(circle_id, e.to_string())
            }
        }
    }

    async fn process_circle(&self, circle_id: Uuid, now: DateTime<Utc>) -> AppResult<CircleOutcome> {
        let _guard = self.rotation.lock_circle(circle_id).await;

        // Re-read under the lock; the cycle may have moved since listing
        let circle = self
            .store
            .get_circle(circle_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Circle {} not found", circle_id)))?;
        if !circle.is_active() {
            return Ok(CircleOutcome::Skipped(format!("circle is {:?}", circle.status)));
        }

        let members = self.store.list_members(circle_id).await?;
        let transactions = self.store.list_circle_transactions(circle_id).await?;

        let Some(head) = plan::positioned(&members)
            .into_iter()
            .find(|m| m.payout_position == Some(1))
            .cloned()
        else {
            return Ok(CircleOutcome::Skipped("rotation not initialized".to_string()));
        };

        let key = payout_key(circle_id, head.id, circle.current_cycle);
        let already_paid = transactions
            .iter()
            .any(|t| t.idempotency_key.as_deref() == Some(key.as_str()) && t.is_completed_payout());
        if already_paid {
            return self.recover(&circle, now).await;
        }

        let denied = transactions
            .iter()
            .find(|t| t.idempotency_key.as_deref() == Some(key.as_str()) && is_held_denial(t));
        if let Some(denied) = denied {
            return Ok(CircleOutcome::Skipped(format!(
                "payout {} was denied; waiting for an admin retry",
                denied.id
            )));
        }

        let eligibility = eligibility::evaluate(&circle, &members, &transactions, now, self.policy);
        if let Some(reason) = eligibility.reason {
            return Ok(CircleOutcome::Skipped(format!("not eligible: {:?}", reason)));
        }

        let pending = CircleTransaction::pending(
            TransactionType::Payout,
            Some(circle_id),
            head.user_id,
            eligibility.payout_amount,
            key,
            now,
        );

        let tx = match self.store.insert_transaction(pending).await? {
            InsertOutcome::Inserted(tx) => tx,
            InsertOutcome::Duplicate(existing) if existing.status == TransactionStatus::Completed => {
                return self.recover(&circle, now).await;
            }
            InsertOutcome::Duplicate(existing) => {
                return Ok(CircleOutcome::Skipped(format!(
                    "payout {} already {}",
                    existing.id, existing.status
                )));
            }
        };

        self.pay(&circle, &head, tx, now).await
    }

    async fn pay(
        &self,
        circle: &Circle,
        head: &CircleMember,
        mut tx: CircleTransaction,
        now: DateTime<Utc>,
    ) -> AppResult<CircleOutcome> {
        let Some(account) = self.store.linked_account(head.user_id).await? else {
            let reason = format!("no linked account for user {}", head.user_id);
            self.fail(tx, "no_linked_account", &reason, now).await?;
            return Ok(CircleOutcome::Failed(reason));
        };

        let key = tx.idempotency_key.clone().unwrap_or_default();
        let request = AuthorizationRequest::new(&account, tx.amount, TransferDirection::Credit, key);

        match authorize_and_transfer(self.rail.as_ref(), &request, self.settings.rail_deadline).await {
            Ok((authorization, receipt)) => {
                tx.external_authorization_id = Some(authorization.authorization_id.clone());
                tx.external_transfer_id = Some(receipt.transfer_id.clone());
                tx.metadata = json!({
                    "rail": self.rail.name(),
                    "submission": { "transfer_status": receipt.status, "submitted_at": now.to_rfc3339() },
                });
                tx.updated_at = now;
                tx.transition(TransactionStatus::Completed)?;

                if !self
                    .store
                    .update_transaction(&tx, TransactionStatus::Pending, SettlementStatus::Unsettled)
                    .await?
                {
                    warn!("Payout {} changed while submitting; keeping stored state", tx.id);
                }

                info!(
                    "✅ Paid {} to member {} in circle {} (transfer {})",
                    tx.amount, head.id, circle.id, receipt.transfer_id
                );
                self.notifier.publish(CircleEvent::PayoutSubmitted {
                    circle_id: circle.id,
                    user_id: head.user_id,
                    amount: tx.amount,
                    transfer_id: receipt.transfer_id.clone(),
                });

                let lap_completed = self.advance(circle, now).await?;
                Ok(CircleOutcome::Paid {
                    amount: tx.amount,
                    transfer_id: receipt.transfer_id,
                    lap_completed,
                })
            }
            Err((authorization, rail_error)) => {
                tx.external_authorization_id = authorization.map(|a| a.authorization_id);
                let reason = rail_error.to_string();
                self.fail(tx, rail_error.kind(), &reason, now).await?;

                self.notifier.publish(CircleEvent::PayoutFailed {
                    circle_id: circle.id,
                    user_id: head.user_id,
                    reason: reason.clone(),
                });
                log_rail_failure(circle.id, &rail_error);
                Ok(CircleOutcome::Failed(reason))
            }
        }
    }

    async fn fail(
        &self,
        mut tx: CircleTransaction,
        kind: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        tx.transition(TransactionStatus::Failed)?;
        tx.failure_reason = Some(reason.to_string());
        tx.metadata = json!({ "rail": self.rail.name(), "failure_kind": kind });
        tx.updated_at = now;
        if !self
            .store
            .update_transaction(&tx, TransactionStatus::Pending, SettlementStatus::Unsettled)
            .await?
        {
            warn!("Payout {} changed before it could be marked failed", tx.id);
        }
        Ok(())
    }

    /// Release a circle's denied payouts so the next scan authorizes them again.
    ///
    /// Returns how many rows were released.
    #[instrument(skip(self))]
    pub async fn retry_denied(
        &self,
        circle_id: Uuid,
        admin_user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<usize> {
        let _guard = self.rotation.lock_circle(circle_id).await;

        self.store
            .get_circle(circle_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Circle {} not found", circle_id)))?;
        let members = self.store.list_members(circle_id).await?;
        if !members.iter().any(|m| m.user_id == admin_user_id && m.is_admin) {
            return Err(AppError::Permission(format!(
                "user {} is not an admin of this circle",
                admin_user_id
            )));
        }

        let mut released = 0;
        let transactions = self.store.list_circle_transactions(circle_id).await?;
        for mut tx in transactions.into_iter().filter(is_held_denial) {
            let Some(metadata) = tx.metadata.as_object_mut() else {
                continue;
            };
            metadata.insert("retry_released_at".into(), json!(now.to_rfc3339()));
            metadata.insert("retry_released_by".into(), json!(admin_user_id));
            tx.updated_at = now;

            if self
                .store
                .update_transaction(&tx, tx.status, tx.settlement_status)
                .await?
            {
                released += 1;
            } else {
                warn!("Denied payout {} changed while releasing it", tx.id);
            }
        }

        info!("🔓 Released {} denied payout(s) in circle {} for retry", released, circle_id);
        Ok(released)
    }

    async fn recover(&self, circle: &Circle, now: DateTime<Utc>) -> AppResult<CircleOutcome> {
        info!("🔁 Circle {} was paid for cycle {} but not advanced", circle.id, circle.current_cycle);
        self.advance(circle, now).await?;
        Ok(CircleOutcome::Recovered)
    }

    /// Advance under the held circle lock; returns whether a lap completed
    async fn advance(&self, circle: &Circle, now: DateTime<Utc>) -> AppResult<bool> {
        let outcome = self.rotation.advance_locked(circle, now).await?;

        self.notifier.publish(CircleEvent::RotationAdvanced {
            circle_id: circle.id,
            next_user_id: outcome.new_head_user,
            cycle: outcome.current_cycle,
        });

        if outcome.lap_completed && self.complete_after_lap {
            self.store
                .update_circle_status(circle.id, CircleStatus::Completed)
                .await?;
            info!("🎉 Circle {} completed after {} payouts", circle.id, outcome.current_cycle);
            self.notifier.publish(CircleEvent::CircleCompleted { circle_id: circle.id });
        }

        Ok(outcome.lap_completed)
    }
}

fn log_rail_failure(circle_id: Uuid, error: &RailError) {
    if error.is_transient() {
        warn!("⚠️ Payout for circle {} hit a transient rail failure: {}", circle_id, error);
    } else {
        warn!("🚫 Payout for circle {} denied: {}", circle_id, error);
    }
}
