use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::ledger::models::*;
use crate::ledger::store::{CircleStore, MemberDirectory};

#[derive(Debug, Clone, Copy)]
struct Lease {
    owner: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    circles: HashMap<Uuid, Circle>,
    members: HashMap<Uuid, CircleMember>,
    transactions: HashMap<Uuid, CircleTransaction>,
    schedules: HashMap<Uuid, RecurringContributionSchedule>,
    accounts: HashMap<Uuid, LinkedAccount>,
    profiles: HashMap<Uuid, String>,
    leases: HashMap<Uuid, Lease>,
    /// Compare-and-set updates to reject before honoring them
    #[cfg(test)]
    forced_update_misses: usize,
}

/// In-process store used when no database is configured, and by the tests.
///
/// A single `RwLock` guards all tables, so every trait method is atomic.
#[derive(Default, Clone)]
pub struct InMemoryCircleStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryCircleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_circle(&self, circle: Circle) {
        self.state.write().await.circles.insert(circle.id, circle);
    }

    pub async fn insert_member(&self, member: CircleMember) {
        self.state.write().await.members.insert(member.id, member);
    }

    pub async fn insert_linked_account(&self, account: LinkedAccount) {
        self.state.write().await.accounts.insert(account.user_id, account);
    }

    pub async fn insert_profile(&self, user_id: Uuid, display_name: impl Into<String>) {
        self.state.write().await.profiles.insert(user_id, display_name.into());
    }

    pub async fn all_transactions(&self) -> Vec<CircleTransaction> {
        let state = self.state.read().await;
        let mut txs: Vec<_> = state.transactions.values().cloned().collect();
        txs.sort_by_key(|t| t.transaction_date);
        txs
    }

    /// Make the next `n` transaction updates lose their compare-and-set
    #[cfg(test)]
    pub async fn miss_next_updates(&self, n: usize) {
        self.state.write().await.forced_update_misses = n;
    }

    /// Direct write for fixtures, bypassing the compare-and-set
    pub async fn put_transaction(&self, tx: CircleTransaction) {
        self.state.write().await.transactions.insert(tx.id, tx);
    }

    fn claim(state: &mut State, key: Uuid, owner: Uuid, now: DateTime<Utc>, ttl: Duration) -> bool {
        let held = state
            .leases
            .get(&key)
            .is_some_and(|lease| lease.owner != owner && lease.expires_at > now);
        if held {
            return false;
        }
        state.leases.insert(
            key,
            Lease {
                owner,
                expires_at: now + ttl,
            },
        );
        true
    }

    fn release(state: &mut State, key: Uuid, owner: Uuid) {
        if state.leases.get(&key).map(|l| l.owner) == Some(owner) {
            state.leases.remove(&key);
        }
    }
}

#[async_trait]
impl CircleStore for InMemoryCircleStore {
    async fn get_circle(&self, circle_id: Uuid) -> AppResult<Option<Circle>> {
        Ok(self.state.read().await.circles.get(&circle_id).cloned())
    }

    async fn list_active_circles(&self) -> AppResult<Vec<Circle>> {
        let state = self.state.read().await;
        let mut circles: Vec<_> = state
            .circles
            .values()
            .filter(|c| c.is_active())
            .cloned()
            .collect();
        circles.sort_by_key(|c| c.created_at);
        Ok(circles)
    }

    async fn update_circle_status(&self, circle_id: Uuid, status: CircleStatus) -> AppResult<()> {
        let mut state = self.state.write().await;
        let circle = state
            .circles
            .get_mut(&circle_id)
            .ok_or_else(|| AppError::NotFound(format!("Circle {} not found", circle_id)))?;
        circle.status = status;
        Ok(())
    }

    async fn try_claim_circle(
        &self,
        circle_id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> AppResult<bool> {
        let mut state = self.state.write().await;
        Ok(Self::claim(&mut state, circle_id, owner, now, ttl))
    }

    async fn release_circle(&self, circle_id: Uuid, owner: Uuid) -> AppResult<()> {
        let mut state = self.state.write().await;
        Self::release(&mut state, circle_id, owner);
        Ok(())
    }

    async fn list_members(&self, circle_id: Uuid) -> AppResult<Vec<CircleMember>> {
        let state = self.state.read().await;
        let mut members: Vec<_> = state
            .members
            .values()
            .filter(|m| m.circle_id == circle_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        Ok(members)
    }

    async fn apply_rotation(
        &self,
        circle_id: Uuid,
        assignments: &[PositionAssignment],
        expected_cycle: i32,
        current_cycle: i32,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;

        match state.circles.get(&circle_id) {
            None => return Err(AppError::NotFound(format!("Circle {} not found", circle_id))),
            Some(circle) if circle.current_cycle != expected_cycle => {
                return Err(AppError::Conflict(format!(
                    "circle {} moved to cycle {} (expected {})",
                    circle_id, circle.current_cycle, expected_cycle
                )))
            }
            Some(_) => {}
        }
        for assignment in assignments {
            match state.members.get(&assignment.member_id) {
                Some(m) if m.circle_id == circle_id => {}
                _ => {
                    return Err(AppError::NotFound(format!(
                        "Member {} not found in circle {}",
                        assignment.member_id, circle_id
                    )))
                }
            }
        }

        for assignment in assignments {
            if let Some(member) = state.members.get_mut(&assignment.member_id) {
                member.payout_position = assignment.payout_position;
                member.next_payout_date = assignment.next_payout_date;
            }
        }
        if let Some(circle) = state.circles.get_mut(&circle_id) {
            circle.current_cycle = current_cycle;
        }
        Ok(())
    }

    async fn insert_transaction(&self, tx: CircleTransaction) -> AppResult<InsertOutcome> {
        let mut state = self.state.write().await;

        if let Some(key) = tx.idempotency_key.as_deref() {
            let existing = state
                .transactions
                .values()
                .find(|t| t.idempotency_key.as_deref() == Some(key) && t.holds_idempotency_key());
            if let Some(existing) = existing {
                return Ok(InsertOutcome::Duplicate(existing.clone()));
            }
        }

        state.transactions.insert(tx.id, tx.clone());
        Ok(InsertOutcome::Inserted(tx))
    }

    async fn update_transaction(
        &self,
        tx: &CircleTransaction,
        expected_status: TransactionStatus,
        expected_settlement: SettlementStatus,
    ) -> AppResult<bool> {
        let mut state = self.state.write().await;
        #[cfg(test)]
        if state.forced_update_misses > 0 {
            state.forced_update_misses -= 1;
            return Ok(false);
        }
        let stored = state
            .transactions
            .get_mut(&tx.id)
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", tx.id)))?;

        if stored.status != expected_status || stored.settlement_status != expected_settlement {
            return Ok(false);
        }
        *stored = tx.clone();
        Ok(true)
    }

    async fn get_transaction_by_transfer_id(
        &self,
        transfer_id: &str,
    ) -> AppResult<Option<CircleTransaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .find(|t| t.external_transfer_id.as_deref() == Some(transfer_id))
            .cloned())
    }

    async fn list_circle_transactions(&self, circle_id: Uuid) -> AppResult<Vec<CircleTransaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| t.circle_id == Some(circle_id))
            .cloned()
            .collect())
    }

    async fn insert_schedule(&self, schedule: RecurringContributionSchedule) -> AppResult<()> {
        self.state.write().await.schedules.insert(schedule.id, schedule);
        Ok(())
    }

    async fn get_schedule(&self, schedule_id: Uuid) -> AppResult<Option<RecurringContributionSchedule>> {
        Ok(self.state.read().await.schedules.get(&schedule_id).cloned())
    }

    async fn due_schedules(&self, now: DateTime<Utc>) -> AppResult<Vec<RecurringContributionSchedule>> {
        let state = self.state.read().await;
        let mut due: Vec<_> = state
            .schedules
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_contribution_date);
        Ok(due)
    }

    async fn update_next_contribution_date(
        &self,
        schedule_id: Uuid,
        next: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        let schedule = state
            .schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", schedule_id)))?;
        schedule.next_contribution_date = next;
        Ok(())
    }

    async fn deactivate_schedule(&self, schedule_id: Uuid) -> AppResult<()> {
        let mut state = self.state.write().await;
        let schedule = state
            .schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", schedule_id)))?;
        schedule.is_active = false;
        Ok(())
    }

    async fn try_claim_schedule(
        &self,
        schedule_id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> AppResult<bool> {
        let mut state = self.state.write().await;
        Ok(Self::claim(&mut state, schedule_id, owner, now, ttl))
    }

    async fn release_schedule(&self, schedule_id: Uuid, owner: Uuid) -> AppResult<()> {
        let mut state = self.state.write().await;
        Self::release(&mut state, schedule_id, owner);
        Ok(())
    }

    async fn linked_account(&self, user_id: Uuid) -> AppResult<Option<LinkedAccount>> {
        Ok(self.state.read().await.accounts.get(&user_id).cloned())
    }
}

#[async_trait]
impl MemberDirectory for InMemoryCircleStore {
    async fn display_names(&self, user_ids: &[Uuid]) -> AppResult<HashMap<Uuid, String>> {
        let state = self.state.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| state.profiles.get(id).map(|name| (*id, name.clone())))
            .collect())
    }
}
