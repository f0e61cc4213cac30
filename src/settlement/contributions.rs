// Recurring Contribution Processor
//
// Polls schedules that are due and not debited by the rail itself, pulls one
// contribution per schedule and day, and moves next_contribution_date forward on
// success. A failed debit leaves the date alone so the next run retries it.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::ledger::models::{
    CircleTransaction, Frequency, InsertOutcome, RecurringContributionSchedule, SettlementStatus,
    TransactionStatus, TransactionType,
};
use crate::ledger::store::CircleStore;
use crate::notify::{CircleEvent, Notifier};
use crate::rail::{
    authorize_and_transfer, with_deadline, AuthorizationRequest, PaymentRail, RecurringTransferParams,
    TransferDirection,
};
use crate::schedule::{SameDayPolicy, ScheduleCalculator};
use crate::settlement::{BatchReport, BatchSettings, ItemResult};

pub fn contribution_key(schedule_id: Uuid, day: NaiveDate) -> String {
    format!("contribution:{}:{}", schedule_id, day.format("%Y-%m-%d"))
}

/// Enrollment request for a standing contribution
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub user_id: Uuid,
    pub circle_id: Option<Uuid>,
    pub goal_id: Option<Uuid>,
    pub amount: Decimal,
    pub frequency: Frequency,
    pub day_of_week: Option<u32>,
    pub day_of_month: Option<u32>,
    /// Let the rail debit on its own schedule instead of polling
    pub rail_managed: bool,
}

#[derive(Debug)]
enum ScheduleOutcome {
    Charged { amount: Decimal, transfer_id: String },
    /// Today's contribution was already recorded; only the date moved
    Recovered,
    Skipped(String),
    Failed(String),
}

pub struct ContributionProcessor {
    store: Arc<dyn CircleStore>,
    rail: Arc<dyn PaymentRail>,
    calculator: ScheduleCalculator,
    notifier: Arc<dyn Notifier>,
    settings: BatchSettings,
}

impl ContributionProcessor {
    pub fn new(
        store: Arc<dyn CircleStore>,
        rail: Arc<dyn PaymentRail>,
        calculator: ScheduleCalculator,
        notifier: Arc<dyn Notifier>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            store,
            rail,
            calculator,
            notifier,
            settings,
        }
    }

    /// Strictly future occurrence, even under the same-day policy
    fn next_date(&self, schedule: &RecurringContributionSchedule, now: DateTime<Utc>) -> DateTime<Utc> {
        let dow = schedule.day_of_week.and_then(|d| u32::try_from(d).ok());
        let dom = schedule.day_of_month.and_then(|d| u32::try_from(d).ok());

        let next = self.calculator.next_occurrence(schedule.frequency, dow, dom, now);
        if next > now {
            return next;
        }
        ScheduleCalculator::new(SameDayPolicy::NextPeriod).next_occurrence(schedule.frequency, dow, dom, now)
    }

    // ========== BATCH ==========

    #[instrument(skip(self))]
    pub async fn run(&self, now: DateTime<Utc>) -> AppResult<BatchReport> {
        let due = self.store.due_schedules(now).await?;
        let run_id = Uuid::new_v4();

        info!("🔁 Contribution run {} over {} due schedules", run_id, due.len());

        let results: Vec<ItemResult> = stream::iter(due)
            .map(|schedule| self.process_claimed(schedule.id, run_id, now))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let report = BatchReport::from_results(results);
        info!(
            "✓ Contribution run {} done: checked={} processed={} errors={}",
            run_id, report.checked, report.processed, report.errors
        );
        Ok(report)
    }

    async fn process_claimed(&self, schedule_id: Uuid, run_id: Uuid, now: DateTime<Utc>) -> ItemResult {
        match self
            .store
            .try_claim_schedule(schedule_id, run_id, now, self.settings.lease_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => return ItemResult::skipped(schedule_id, "claimed by another run"),
            Err(e) => return ItemResult::failed(schedule_id, e.to_string()),
        }

        let outcome = self.process_schedule(schedule_id, now).await;

        if let Err(e) = self.store.release_schedule(schedule_id, run_id).await {
            warn!("Failed to release lease on schedule {}: {}", schedule_id, e);
        }

        match outcome {
            Ok(ScheduleOutcome::Charged { amount, transfer_id }) => {
                ItemResult::processed(schedule_id, format!("debited {} via {}", amount, transfer_id))
            }
            Ok(ScheduleOutcome::Recovered) => {
                ItemResult::processed(schedule_id, "rescheduled after earlier contribution")
            }
            Ok(ScheduleOutcome::Skipped(reason)) => ItemResult::skipped(schedule_id, reason),
            Ok(ScheduleOutcome::Failed(reason)) => ItemResult::failed(schedule_id, reason),
            Err(e) => {
                error!("❌ Contribution failed for schedule {}: {}", schedule_id, e);
                ItemResult::failed(schedule_id, e.to_string())
            }
        }
    }

    async fn process_schedule(&self, schedule_id: Uuid, now: DateTime<Utc>) -> AppResult<ScheduleOutcome> {
        let schedule = self
            .store
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", schedule_id)))?;
        if !schedule.is_due(now) {
            return Ok(ScheduleOutcome::Skipped("no longer due".to_string()));
        }

        let Some(account) = self.store.linked_account(schedule.user_id).await? else {
            return Ok(ScheduleOutcome::Failed(format!(
                "no linked account for user {}",
                schedule.user_id
            )));
        };

        let key = contribution_key(schedule.id, now.date_naive());
        let pending = CircleTransaction::pending(
            TransactionType::Contribution,
            schedule.circle_id,
            schedule.user_id,
            schedule.amount,
            key.clone(),
            now,
        )
        .with_schedule(schedule.id);

        let mut tx = match self.store.insert_transaction(pending).await? {
            InsertOutcome::Inserted(tx) => tx,
            InsertOutcome::Duplicate(existing) if existing.status == TransactionStatus::Completed => {
                let next = self.next_date(&schedule, now);
                self.store.update_next_contribution_date(schedule.id, next).await?;
                return Ok(ScheduleOutcome::Recovered);
            }
            InsertOutcome::Duplicate(existing) => {
                return Ok(ScheduleOutcome::Skipped(format!(
                    "contribution {} already {} today",
                    existing.id, existing.status
                )));
            }
        };

        let request = AuthorizationRequest::new(&account, schedule.amount, TransferDirection::Debit, key);

        match authorize_and_transfer(self.rail.as_ref(), &request, self.settings.rail_deadline).await {
            Ok((authorization, receipt)) => {
                tx.external_authorization_id = Some(authorization.authorization_id);
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
                    warn!("Contribution {} changed while submitting; keeping stored state", tx.id);
                }

                let next = self.next_date(&schedule, now);
                self.store.update_next_contribution_date(schedule.id, next).await?;

                info!(
                    "✅ Debited {} from user {} for schedule {}, next on {}",
                    schedule.amount, schedule.user_id, schedule.id, next
                );
                self.notifier.publish(CircleEvent::ContributionSubmitted {
                    schedule_id: schedule.id,
                    user_id: schedule.user_id,
                    amount: schedule.amount,
                    transfer_id: receipt.transfer_id.clone(),
                });

                Ok(ScheduleOutcome::Charged {
                    amount: schedule.amount,
                    transfer_id: receipt.transfer_id,
                })
            }
            Err((authorization, rail_error)) => {
                tx.external_authorization_id = authorization.map(|a| a.authorization_id);
                tx.transition(TransactionStatus::Failed)?;
                tx.failure_reason = Some(rail_error.to_string());
                tx.metadata = json!({ "rail": self.rail.name(), "failure_kind": rail_error.kind() });
                tx.updated_at = now;
                if !self
                    .store
                    .update_transaction(&tx, TransactionStatus::Pending, SettlementStatus::Unsettled)
                    .await?
                {
                    warn!("Contribution {} changed before it could be marked failed", tx.id);
                }

                warn!(
                    "⚠️ Contribution for schedule {} failed ({}), retrying next run",
                    schedule.id,
                    rail_error.kind()
                );
                self.notifier.publish(CircleEvent::ContributionFailed {
                    schedule_id: schedule.id,
                    user_id: schedule.user_id,
                    reason: rail_error.to_string(),
                });

                Ok(ScheduleOutcome::Failed(rail_error.to_string()))
            }
        }
    }

    // ========== ENROLLMENT ==========

    /// Create a schedule, optionally registering a rail-managed recurring transfer
    pub async fn create_schedule(
        &self,
        new: NewSchedule,
        now: DateTime<Utc>,
    ) -> AppResult<RecurringContributionSchedule> {
        if new.amount <= Decimal::ZERO {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }
        if new.circle_id.is_some() == new.goal_id.is_some() {
            return Err(AppError::Validation(
                "exactly one of circle_id or goal_id is required".to_string(),
            ));
        }
        if new.day_of_week.is_some_and(|d| d > 6) {
            return Err(AppError::Validation("day_of_week must be 0-6".to_string()));
        }
        if new.day_of_month.is_some_and(|d| !(1..=31).contains(&d)) {
            return Err(AppError::Validation("day_of_month must be 1-31".to_string()));
        }

        if let Some(circle_id) = new.circle_id {
            self.store
                .get_circle(circle_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Circle {} not found", circle_id)))?;
            let members = self.store.list_members(circle_id).await?;
            if !members.iter().any(|m| m.user_id == new.user_id) {
                return Err(AppError::Permission(format!(
                    "user {} is not a member of circle {}",
                    new.user_id, circle_id
                )));
            }
        }

        let mut schedule = RecurringContributionSchedule {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            circle_id: new.circle_id,
            goal_id: new.goal_id,
            amount: new.amount,
            frequency: new.frequency,
            day_of_week: new.day_of_week.map(|d| d as i16),
            day_of_month: new.day_of_month.map(|d| d as i16),
            next_contribution_date: now,
            is_active: true,
            external_recurring_transfer_id: None,
            created_at: now,
        };
        schedule.next_contribution_date = self.next_date(&schedule, now);

        if new.rail_managed {
            let account = self.store.linked_account(new.user_id).await?.ok_or_else(|| {
                AppError::Validation(format!("user {} has no linked account", new.user_id))
            })?;
            let params = RecurringTransferParams {
                access_token: account.access_token,
                account_id: account.account_id,
                amount: new.amount,
                frequency: new.frequency,
                day_of_week: new.day_of_week,
                day_of_month: new.day_of_month,
                start_date: schedule.next_contribution_date.date_naive(),
                legal_name: account.legal_name,
                idempotency_key: format!("recurring:{}", schedule.id),
            };
            let recurring_id = with_deadline(
                self.settings.rail_deadline,
                self.rail.create_recurring_transfer(&params),
            )
            .await?;
            schedule.external_recurring_transfer_id = Some(recurring_id);
        }

        self.store.insert_schedule(schedule.clone()).await?;
        info!(
            "📅 Schedule {} created for user {} ({}), first contribution {}",
            schedule.id, schedule.user_id, schedule.frequency, schedule.next_contribution_date
        );
        Ok(schedule)
    }

    /// Deactivate a schedule, cancelling its rail recurring transfer first
    pub async fn cancel_schedule(
        &self,
        schedule_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<RecurringContributionSchedule> {
        let mut schedule = self
            .store
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", schedule_id)))?;

        if schedule.user_id != user_id {
            return Err(AppError::Permission(format!(
                "user {} does not own schedule {}",
                user_id, schedule_id
            )));
        }
        if !schedule.is_active {
            return Ok(schedule);
        }

        if let Some(recurring_id) = schedule.external_recurring_transfer_id.as_deref() {
            let cancelled = with_deadline(
                self.settings.rail_deadline,
                self.rail.cancel_recurring_transfer(recurring_id),
            )
            .await?;
            if !cancelled {
                warn!("Rail had no active recurring transfer {} to cancel", recurring_id);
            }
        }

        self.store.deactivate_schedule(schedule_id).await?;
        schedule.is_active = false;
        info!("🛑 Schedule {} cancelled", schedule_id);
        Ok(schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RailError;
    use crate::ledger::memory::InMemoryCircleStore;
    use crate::ledger::models::LinkedAccount;
    use crate::notify::testing::RecordingNotifier;
    use crate::rail::stub::StubRail;
    use chrono::{Datelike, Duration, TimeZone, Weekday};
    use rust_decimal_macros::dec;

    struct Harness {
        store: InMemoryCircleStore,
        rail: Arc<StubRail>,
        processor: ContributionProcessor,
        user_id: Uuid,
    }

    async fn harness() -> Harness {
        let store = InMemoryCircleStore::new();
        let rail = Arc::new(StubRail::new());
        let user_id = Uuid::new_v4();
        store
            .insert_linked_account(LinkedAccount {
                user_id,
                access_token: "access".to_string(),
                account_id: "acct".to_string(),
                legal_name: "Kofi".to_string(),
            })
            .await;

        let processor = ContributionProcessor::new(
            Arc::new(store.clone()),
            rail.clone(),
            ScheduleCalculator::default(),
            Arc::new(RecordingNotifier::default()),
            BatchSettings::default(),
        );
        Harness {
            store,
            rail,
            processor,
            user_id,
        }
    }

    fn due_schedule(user_id: Uuid, frequency: Frequency, due: DateTime<Utc>) -> RecurringContributionSchedule {
        RecurringContributionSchedule {
            id: Uuid::new_v4(),
            user_id,
            circle_id: None,
            goal_id: Some(Uuid::new_v4()),
            amount: dec!(25),
            frequency,
            day_of_week: None,
            day_of_month: None,
            next_contribution_date: due,
            is_active: true,
            external_recurring_transfer_id: None,
            created_at: due,
        }
    }

    async fn contributions(store: &InMemoryCircleStore) -> Vec<CircleTransaction> {
        store
            .all_transactions()
            .await
            .into_iter()
            .filter(|t| t.kind == TransactionType::Contribution)
            .collect()
    }

    #[tokio::test]
    async fn test_due_schedule_is_debited_and_rescheduled() {
        let h = harness().await;
        let now = Utc::now();
        let schedule = due_schedule(h.user_id, Frequency::Weekly, now - Duration::hours(1));
        h.store.insert_schedule(schedule.clone()).await.unwrap();

        let report = h.processor.run(now).await.unwrap();
        assert_eq!(report.processed, 1);

        let txs = contributions(&h.store).await;
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].status, TransactionStatus::Completed);
        assert_eq!(txs[0].schedule_id, Some(schedule.id));
        assert_eq!(txs[0].idempotency_key, Some(contribution_key(schedule.id, now.date_naive())));
        assert_eq!(h.rail.requests.lock()[0].direction, TransferDirection::Debit);

        let stored = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.next_contribution_date, now + Duration::days(7));

        let report = h.processor.run(now).await.unwrap();
        assert_eq!(report.checked, 0);
    }

    #[tokio::test]
    async fn test_lost_status_update_keeps_stored_row() {
        let h = harness().await;
        let now = Utc::now();
        let schedule = due_schedule(h.user_id, Frequency::Weekly, now - Duration::hours(1));
        h.store.insert_schedule(schedule.clone()).await.unwrap();
        h.store.miss_next_updates(1).await;

        let report = h.processor.run(now).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(h.rail.transfer_count(), 1);

        // Stored row is left as it was
        let txs = contributions(&h.store).await;
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].status, TransactionStatus::Pending);

        let stored = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.next_contribution_date, now + Duration::days(7));
    }

    #[tokio::test]
    async fn test_daily_dedupe_blocks_second_debit_same_day() {
        let h = harness().await;
        let now = Utc.with_ymd_and_hms(2024, 6, 5, 9, 0, 0).unwrap();
        let schedule = due_schedule(h.user_id, Frequency::Daily, now - Duration::minutes(1));
        h.store.insert_schedule(schedule.clone()).await.unwrap();

        h.processor.run(now).await.unwrap();

        // Date rolled back, e.g. by a crash between debit and reschedule
        h.store
            .update_next_contribution_date(schedule.id, now - Duration::minutes(1))
            .await
            .unwrap();
        let report = h.processor.run(now + Duration::minutes(5)).await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(h.rail.transfer_count(), 1);
        assert_eq!(contributions(&h.store).await.len(), 1);
        let stored = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert!(stored.next_contribution_date > now);
    }

    #[tokio::test]
    async fn test_denied_debit_keeps_date_for_retry() {
        let h = harness().await;
        let now = Utc::now();
        let due = now - Duration::hours(2);
        let schedule = due_schedule(h.user_id, Frequency::Monthly, due);
        h.store.insert_schedule(schedule.clone()).await.unwrap();
        h.rail.deny(h.user_id);

        let report = h.processor.run(now).await.unwrap();
        assert_eq!(report.errors, 1);

        let txs = contributions(&h.store).await;
        assert_eq!(txs[0].status, TransactionStatus::Failed);
        assert_eq!(txs[0].metadata["failure_kind"], "authorization_denied");
        let stored = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.next_contribution_date, due);

        h.rail.heal(h.user_id);
        let report = h.processor.run(now + Duration::minutes(10)).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(contributions(&h.store).await.len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_as_transient() {
        let h = harness().await;
        let now = Utc::now();
        h.store
            .insert_schedule(due_schedule(h.user_id, Frequency::Weekly, now))
            .await
            .unwrap();
        h.rail.fail(h.user_id, RailError::Timeout(std::time::Duration::from_secs(15)));

        h.processor.run(now).await.unwrap();
        let txs = contributions(&h.store).await;
        assert_eq!(txs[0].metadata["failure_kind"], "timeout");
    }

    #[tokio::test]
    async fn test_rail_managed_and_inactive_schedules_are_not_polled() {
        let h = harness().await;
        let now = Utc::now();

        let mut managed = due_schedule(h.user_id, Frequency::Weekly, now - Duration::days(1));
        managed.external_recurring_transfer_id = Some("rt_1".to_string());
        let mut inactive = due_schedule(h.user_id, Frequency::Weekly, now - Duration::days(1));
        inactive.is_active = false;
        h.store.insert_schedule(managed).await.unwrap();
        h.store.insert_schedule(inactive).await.unwrap();

        let report = h.processor.run(now).await.unwrap();
        assert_eq!(report.checked, 0);
        assert_eq!(h.rail.transfer_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_linked_account_fails_item() {
        let h = harness().await;
        let now = Utc::now();
        h.store
            .insert_schedule(due_schedule(Uuid::new_v4(), Frequency::Weekly, now))
            .await
            .unwrap();

        let report = h.processor.run(now).await.unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(h.rail.authorizations.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_weekly_schedule_lands_on_anchor() {
        let h = harness().await;
        // Monday
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();

        let schedule = h
            .processor
            .create_schedule(
                NewSchedule {
                    user_id: h.user_id,
                    circle_id: None,
                    goal_id: Some(Uuid::new_v4()),
                    amount: dec!(40),
                    frequency: Frequency::Weekly,
                    day_of_week: Some(3),
                    day_of_month: None,
                    rail_managed: false,
                },
                now,
            )
            .await
            .unwrap();

        assert_eq!(schedule.next_contribution_date.weekday(), Weekday::Wed);
        assert!(schedule.external_recurring_transfer_id.is_none());
        assert!(h.store.get_schedule(schedule.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_schedule_validates_owner_and_anchor() {
        let h = harness().await;
        let base = NewSchedule {
            user_id: h.user_id,
            circle_id: None,
            goal_id: Some(Uuid::new_v4()),
            amount: dec!(40),
            frequency: Frequency::Monthly,
            day_of_week: None,
            day_of_month: Some(32),
            rail_managed: false,
        };

        let err = h.processor.create_schedule(base.clone(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let both = NewSchedule {
            circle_id: Some(Uuid::new_v4()),
            day_of_month: Some(15),
            ..base.clone()
        };
        let err = h.processor.create_schedule(both, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let zero = NewSchedule {
            amount: Decimal::ZERO,
            day_of_month: Some(15),
            ..base
        };
        let err = h.processor.create_schedule(zero, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rail_managed_schedule_round_trip() {
        let h = harness().await;
        let schedule = h
            .processor
            .create_schedule(
                NewSchedule {
                    user_id: h.user_id,
                    circle_id: None,
                    goal_id: Some(Uuid::new_v4()),
                    amount: dec!(15),
                    frequency: Frequency::Biweekly,
                    day_of_week: Some(5),
                    day_of_month: None,
                    rail_managed: true,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let recurring_id = schedule.external_recurring_transfer_id.clone().unwrap();

        let err = h
            .processor
            .cancel_schedule(schedule.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Permission(_)));

        let cancelled = h.processor.cancel_schedule(schedule.id, h.user_id).await.unwrap();
        assert!(!cancelled.is_active);
        assert_eq!(*h.rail.cancelled.lock(), vec![recurring_id]);

        // Cancelling again is a no-op
        h.processor.cancel_schedule(schedule.id, h.user_id).await.unwrap();
        assert_eq!(h.rail.cancelled.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_same_day_policy_never_leaves_schedule_due() {
        let h = harness().await;
        let processor = ContributionProcessor::new(
            Arc::new(h.store.clone()),
            h.rail.clone(),
            ScheduleCalculator::new(SameDayPolicy::SameDay),
            Arc::new(RecordingNotifier::default()),
            BatchSettings::default(),
        );
        // Wednesday
        let now = Utc.with_ymd_and_hms(2024, 6, 5, 9, 0, 0).unwrap();
        let mut schedule = due_schedule(h.user_id, Frequency::Weekly, now);
        schedule.day_of_week = Some(3);
        h.store.insert_schedule(schedule.clone()).await.unwrap();

        processor.run(now).await.unwrap();
        let stored = h.store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.next_contribution_date, now + Duration::days(7));
    }
}
