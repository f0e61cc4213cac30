use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::models::*;

/// Datastore collaborator for circles, members, transactions and schedules.
///
/// Guarantees:
/// - `insert_transaction` never creates a second live row for the same idempotency key
/// - `update_transaction` is a compare-and-set on (status, settlement_status)
/// - `apply_rotation` writes every assignment and the cycle counter atomically, and only
///   when the stored cycle still equals `expected_cycle`
/// - `try_claim_*` succeed for at most one owner until the lease expires or is released
#[async_trait]
pub trait CircleStore: Send + Sync {
    // ========== CIRCLES ==========

    async fn get_circle(&self, circle_id: Uuid) -> AppResult<Option<Circle>>;

    async fn list_active_circles(&self) -> AppResult<Vec<Circle>>;

    async fn update_circle_status(&self, circle_id: Uuid, status: CircleStatus) -> AppResult<()>;

    async fn try_claim_circle(
        &self,
        circle_id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> AppResult<bool>;

    async fn release_circle(&self, circle_id: Uuid, owner: Uuid) -> AppResult<()>;

    // ========== MEMBERS ==========

    async fn list_members(&self, circle_id: Uuid) -> AppResult<Vec<CircleMember>>;

    /// Fails with `Conflict` when another writer moved the cycle first
    async fn apply_rotation(
        &self,
        circle_id: Uuid,
        assignments: &[PositionAssignment],
        expected_cycle: i32,
        current_cycle: i32,
    ) -> AppResult<()>;

    // ========== TRANSACTIONS ==========

    async fn insert_transaction(&self, tx: CircleTransaction) -> AppResult<InsertOutcome>;

    /// Returns false when the stored row no longer matches the expected state
    async fn update_transaction(
        &self,
        tx: &CircleTransaction,
        expected_status: TransactionStatus,
        expected_settlement: SettlementStatus,
    ) -> AppResult<bool>;

    async fn get_transaction_by_transfer_id(
        &self,
        transfer_id: &str,
    ) -> AppResult<Option<CircleTransaction>>;

    async fn list_circle_transactions(&self, circle_id: Uuid) -> AppResult<Vec<CircleTransaction>>;

    // ========== SCHEDULES ==========

    async fn insert_schedule(&self, schedule: RecurringContributionSchedule) -> AppResult<()>;

    async fn get_schedule(&self, schedule_id: Uuid) -> AppResult<Option<RecurringContributionSchedule>>;

    async fn due_schedules(&self, now: DateTime<Utc>) -> AppResult<Vec<RecurringContributionSchedule>>;

    async fn update_next_contribution_date(
        &self,
        schedule_id: Uuid,
        next: DateTime<Utc>,
    ) -> AppResult<()>;

    async fn deactivate_schedule(&self, schedule_id: Uuid) -> AppResult<()>;

    async fn try_claim_schedule(
        &self,
        schedule_id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> AppResult<bool>;

    async fn release_schedule(&self, schedule_id: Uuid, owner: Uuid) -> AppResult<()>;

    // ========== ACCOUNTS ==========

    async fn linked_account(&self, user_id: Uuid) -> AppResult<Option<LinkedAccount>>;
}

/// Read-side projection of member profiles
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn display_names(&self, user_ids: &[Uuid]) -> AppResult<HashMap<Uuid, String>>;
}
