use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::models::*;
use super::store::{CircleStore, MemberDirectory};
use crate::error::{AppError, AppResult};

const CIRCLE_COLUMNS: &str =
    "id, name, contribution_amount, frequency, status, start_date, current_cycle, created_at";

const MEMBER_COLUMNS: &str =
    "id, circle_id, user_id, is_admin, payout_position, next_payout_date, joined_at";

const TRANSACTION_COLUMNS: &str = "id, circle_id, schedule_id, user_id, type, amount, status, \
     settlement_status, transaction_date, external_transfer_id, external_authorization_id, \
     idempotency_key, failure_reason, metadata, updated_at";

const SCHEDULE_COLUMNS: &str = "id, user_id, circle_id, goal_id, amount, frequency, day_of_week, \
     day_of_month, next_contribution_date, is_active, external_recurring_transfer_id, created_at";

/// Ledger repository - Postgres-backed source of truth for circle state
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    async fn claim(
        &self,
        table: &str,
        id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> AppResult<bool> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET lease_owner = $2, lease_expires_at = $3
            WHERE id = $1
              AND (lease_owner IS NULL OR lease_owner = $2 OR lease_expires_at <= $4)
            "#
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(owner)
            .bind(now + ttl)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, table: &str, id: Uuid, owner: Uuid) -> AppResult<()> {
        let sql = format!(
            "UPDATE {table} SET lease_owner = NULL, lease_expires_at = NULL \
             WHERE id = $1 AND lease_owner = $2"
        );
        sqlx::query(&sql).bind(id).bind(owner).execute(&self.pool).await?;
        Ok(())
    }

    async fn live_transaction_by_key(&self, key: &str) -> AppResult<Option<CircleTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM circle_transactions \
             WHERE idempotency_key = $1 AND status NOT IN ('failed', 'cancelled')"
        );
        Ok(sqlx::query_as::<_, CircleTransaction>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?)
    }
}

#[async_trait]
impl CircleStore for LedgerRepository {
    // ========== CIRCLES ==========

    async fn get_circle(&self, circle_id: Uuid) -> AppResult<Option<Circle>> {
        let sql = format!("SELECT {CIRCLE_COLUMNS} FROM circles WHERE id = $1");
        Ok(sqlx::query_as::<_, Circle>(&sql)
            .bind(circle_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_active_circles(&self) -> AppResult<Vec<Circle>> {
        let sql = format!(
            "SELECT {CIRCLE_COLUMNS} FROM circles WHERE status = 'active' ORDER BY created_at"
        );
        Ok(sqlx::query_as::<_, Circle>(&sql).fetch_all(&self.pool).await?)
    }

    async fn update_circle_status(&self, circle_id: Uuid, status: CircleStatus) -> AppResult<()> {
        let result = sqlx::query("UPDATE circles SET status = $2 WHERE id = $1")
            .bind(circle_id)
            .bind(status)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Circle {} not found", circle_id)));
        }
        info!("Circle {} status -> {:?}", circle_id, status);
        Ok(())
    }

    async fn try_claim_circle(
        &self,
        circle_id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> AppResult<bool> {
        self.claim("circles", circle_id, owner, now, ttl).await
    }

    async fn release_circle(&self, circle_id: Uuid, owner: Uuid) -> AppResult<()> {
        self.release("circles", circle_id, owner).await
    }

    // ========== MEMBERS ==========

    async fn list_members(&self, circle_id: Uuid) -> AppResult<Vec<CircleMember>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM circle_members WHERE circle_id = $1 ORDER BY joined_at, id"
        );
        Ok(sqlx::query_as::<_, CircleMember>(&sql)
            .bind(circle_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn apply_rotation(
        &self,
        circle_id: Uuid,
        assignments: &[PositionAssignment],
        expected_cycle: i32,
        current_cycle: i32,
    ) -> AppResult<()> {
        let mut tx = self.begin_tx().await?;

        // Row lock on the circle serializes writers across processes
        let locked: Option<(i32,)> =
            sqlx::query_as("SELECT current_cycle FROM circles WHERE id = $1 FOR UPDATE")
                .bind(circle_id)
                .fetch_optional(&mut *tx)
                .await?;
        match locked {
            None => return Err(AppError::NotFound(format!("Circle {} not found", circle_id))),
            Some((stored,)) if stored != expected_cycle => {
                return Err(AppError::Conflict(format!(
                    "circle {} moved to cycle {} (expected {})",
                    circle_id, stored, expected_cycle
                )))
            }
            Some(_) => {}
        }

        // (circle_id, payout_position) is unique DEFERRABLE, checked at commit
        for assignment in assignments {
            let result = sqlx::query(
                r#"
                UPDATE circle_members
                SET payout_position = $3, next_payout_date = $4
                WHERE id = $1 AND circle_id = $2
                "#,
            )
            .bind(assignment.member_id)
            .bind(circle_id)
            .bind(assignment.payout_position)
            .bind(assignment.next_payout_date)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(AppError::NotFound(format!(
                    "Member {} not found in circle {}",
                    assignment.member_id, circle_id
                )));
            }
        }

        let result =
            sqlx::query("UPDATE circles SET current_cycle = $2 WHERE id = $1 AND current_cycle = $3")
                .bind(circle_id)
                .bind(current_cycle)
                .bind(expected_cycle)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "circle {} cycle changed during rotation",
                circle_id
            )));
        }

        tx.commit().await?;
        debug!("Applied {} position assignments to circle {}", assignments.len(), circle_id);
        Ok(())
    }

    // ========== TRANSACTIONS ==========

    async fn insert_transaction(&self, tx: CircleTransaction) -> AppResult<InsertOutcome> {
        let sql = format!(
            r#"
            INSERT INTO circle_transactions ({TRANSACTION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (idempotency_key) WHERE status NOT IN ('failed', 'cancelled') DO NOTHING
            RETURNING {TRANSACTION_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, CircleTransaction>(&sql)
            .bind(tx.id)
            .bind(tx.circle_id)
            .bind(tx.schedule_id)
            .bind(tx.user_id)
            .bind(tx.kind)
            .bind(tx.amount)
            .bind(tx.status)
            .bind(tx.settlement_status)
            .bind(tx.transaction_date)
            .bind(&tx.external_transfer_id)
            .bind(&tx.external_authorization_id)
            .bind(&tx.idempotency_key)
            .bind(&tx.failure_reason)
            .bind(&tx.metadata)
            .bind(tx.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Inserted(row));
        }

        let key = tx.idempotency_key.as_deref().unwrap_or_default();
        match self.live_transaction_by_key(key).await? {
            Some(existing) => Ok(InsertOutcome::Duplicate(existing)),
            None => Err(AppError::Conflict(format!(
                "idempotency key {} conflicted but no live row was found",
                key
            ))),
        }
    }

    async fn update_transaction(
        &self,
        tx: &CircleTransaction,
        expected_status: TransactionStatus,
        expected_settlement: SettlementStatus,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE circle_transactions
            SET status = $2,
                settlement_status = $3,
                external_transfer_id = $4,
                external_authorization_id = $5,
                failure_reason = $6,
                metadata = $7,
                updated_at = $8
            WHERE id = $1 AND status = $9 AND settlement_status = $10
            "#,
        )
        .bind(tx.id)
        .bind(tx.status)
        .bind(tx.settlement_status)
        .bind(&tx.external_transfer_id)
        .bind(&tx.external_authorization_id)
        .bind(&tx.failure_reason)
        .bind(&tx.metadata)
        .bind(tx.updated_at)
        .bind(expected_status)
        .bind(expected_settlement)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_transaction_by_transfer_id(
        &self,
        transfer_id: &str,
    ) -> AppResult<Option<CircleTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM circle_transactions WHERE external_transfer_id = $1"
        );
        Ok(sqlx::query_as::<_, CircleTransaction>(&sql)
            .bind(transfer_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_circle_transactions(&self, circle_id: Uuid) -> AppResult<Vec<CircleTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM circle_transactions \
             WHERE circle_id = $1 ORDER BY transaction_date"
        );
        Ok(sqlx::query_as::<_, CircleTransaction>(&sql)
            .bind(circle_id)
            .fetch_all(&self.pool)
            .await?)
    }

    // ========== SCHEDULES ==========

    async fn insert_schedule(&self, schedule: RecurringContributionSchedule) -> AppResult<()> {
        let sql = format!(
            "INSERT INTO recurring_contribution_schedules ({SCHEDULE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        );
        sqlx::query(&sql)
            .bind(schedule.id)
            .bind(schedule.user_id)
            .bind(schedule.circle_id)
            .bind(schedule.goal_id)
            .bind(schedule.amount)
            .bind(schedule.frequency)
            .bind(schedule.day_of_week)
            .bind(schedule.day_of_month)
            .bind(schedule.next_contribution_date)
            .bind(schedule.is_active)
            .bind(&schedule.external_recurring_transfer_id)
            .bind(schedule.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_schedule(&self, schedule_id: Uuid) -> AppResult<Option<RecurringContributionSchedule>> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM recurring_contribution_schedules WHERE id = $1"
        );
        Ok(sqlx::query_as::<_, RecurringContributionSchedule>(&sql)
            .bind(schedule_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn due_schedules(&self, now: DateTime<Utc>) -> AppResult<Vec<RecurringContributionSchedule>> {
        let sql = format!(
            r#"
            SELECT {SCHEDULE_COLUMNS} FROM recurring_contribution_schedules
            WHERE is_active
              AND external_recurring_transfer_id IS NULL
              AND next_contribution_date <= $1
            ORDER BY next_contribution_date
            "#
        );
        Ok(sqlx::query_as::<_, RecurringContributionSchedule>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_next_contribution_date(
        &self,
        schedule_id: Uuid,
        next: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE recurring_contribution_schedules SET next_contribution_date = $2 WHERE id = $1",
        )
        .bind(schedule_id)
        .bind(next)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Schedule {} not found", schedule_id)));
        }
        Ok(())
    }

    async fn deactivate_schedule(&self, schedule_id: Uuid) -> AppResult<()> {
        let result =
            sqlx::query("UPDATE recurring_contribution_schedules SET is_active = FALSE WHERE id = $1")
                .bind(schedule_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Schedule {} not found", schedule_id)));
        }
        Ok(())
    }

    async fn try_claim_schedule(
        &self,
        schedule_id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> AppResult<bool> {
        self.claim("recurring_contribution_schedules", schedule_id, owner, now, ttl)
            .await
    }

    async fn release_schedule(&self, schedule_id: Uuid, owner: Uuid) -> AppResult<()> {
        self.release("recurring_contribution_schedules", schedule_id, owner)
            .await
    }

    // ========== ACCOUNTS ==========

    async fn linked_account(&self, user_id: Uuid) -> AppResult<Option<LinkedAccount>> {
        Ok(sqlx::query_as::<_, LinkedAccount>(
            r#"
            SELECT user_id, access_token, account_id, legal_name
            FROM linked_accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[async_trait]
impl MemberDirectory for LedgerRepository {
    async fn display_names(&self, user_ids: &[Uuid]) -> AppResult<HashMap<Uuid, String>> {
        let rows: Vec<(Uuid, String)> =
            sqlx::query_as("SELECT user_id, display_name FROM member_profiles WHERE user_id = ANY($1)")
                .bind(user_ids)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }
}
