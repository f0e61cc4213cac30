use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Circle lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "circle_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CircleStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

/// How often contributions (and therefore payouts) recur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "contribution_frequency", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Contribution,
    Payout,
}

/// Submission lifecycle of a transaction row.
///
/// Moves forward only; see [`TransactionStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    fn rank(&self) -> u8 {
        match self {
            TransactionStatus::Pending => 0,
            TransactionStatus::Processing => 1,
            TransactionStatus::Completed => 2,
            TransactionStatus::Failed | TransactionStatus::Cancelled => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Failed | TransactionStatus::Cancelled)
    }

    /// Forward-only transition check.
    ///
    /// Completed may still fall to failed/cancelled: a returned transfer reverses a
    /// submission that was optimistically completed. Failed and cancelled are final.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement axis, driven only by rail webhooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "settlement_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Unsettled,
    Settled,
    Reversed,
}

impl SettlementStatus {
    pub fn can_transition_to(&self, next: SettlementStatus) -> bool {
        match (self, next) {
            (a, b) if *a == b => true,
            (SettlementStatus::Unsettled, _) => true,
            (SettlementStatus::Settled, SettlementStatus::Reversed) => true,
            _ => false,
        }
    }
}

///Circle entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Circle {
    pub id: Uuid,
    pub name: String,
    pub contribution_amount: Decimal,
    pub frequency: Frequency,
    pub status: CircleStatus,
    pub start_date: DateTime<Utc>,
    /// Payouts advanced so far; part of the payout idempotency key
    pub current_cycle: i32,
    pub created_at: DateTime<Utc>,
}

impl Circle {
    pub fn is_active(&self) -> bool {
        self.status == CircleStatus::Active
    }
}

///Circle member entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CircleMember {
    pub id: Uuid,
    pub circle_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub payout_position: Option<i32>,
    pub next_payout_date: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

/// Contribution or payout audit row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CircleTransaction {
    pub id: Uuid,
    pub circle_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub user_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub settlement_status: SettlementStatus,
    pub transaction_date: DateTime<Utc>,
    pub external_transfer_id: Option<String>,
    pub external_authorization_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub failure_reason: Option<String>,
    pub metadata: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl CircleTransaction {
    pub fn pending(
        kind: TransactionType,
        circle_id: Option<Uuid>,
        user_id: Uuid,
        amount: Decimal,
        idempotency_key: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            circle_id,
            schedule_id: None,
            user_id,
            kind,
            amount,
            status: TransactionStatus::Pending,
            settlement_status: SettlementStatus::Unsettled,
            transaction_date: now,
            external_transfer_id: None,
            external_authorization_id: None,
            idempotency_key: Some(idempotency_key),
            failure_reason: None,
            metadata: serde_json::json!({}),
            updated_at: now,
        }
    }

    pub fn with_schedule(mut self, schedule_id: Uuid) -> Self {
        self.schedule_id = Some(schedule_id);
        self
    }

    /// Move the submission status forward, rejecting regressions
    pub fn transition(&mut self, next: TransactionStatus) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "transaction {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Counts toward the settled pool only once the rail confirmed the funds
    pub fn is_confirmed_contribution(&self) -> bool {
        self.kind == TransactionType::Contribution
            && self.status == TransactionStatus::Completed
            && self.settlement_status == SettlementStatus::Settled
    }

    pub fn is_completed_payout(&self) -> bool {
        self.kind == TransactionType::Payout && self.status == TransactionStatus::Completed
    }

    /// Rows that still hold their idempotency key
    pub fn holds_idempotency_key(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Standing instruction to debit a payer into a circle or a personal goal
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecurringContributionSchedule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub circle_id: Option<Uuid>,
    pub goal_id: Option<Uuid>,
    pub amount: Decimal,
    pub frequency: Frequency,
    pub day_of_week: Option<i16>,
    pub day_of_month: Option<i16>,
    pub next_contribution_date: DateTime<Utc>,
    pub is_active: bool,
    pub external_recurring_transfer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RecurringContributionSchedule {
    /// Rail-managed schedules are debited by the provider itself
    pub fn is_rail_managed(&self) -> bool {
        self.external_recurring_transfer_id.is_some()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_rail_managed() && self.next_contribution_date <= now
    }
}

/// Bank account a user linked with the payment rail
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LinkedAccount {
    pub user_id: Uuid,
    pub access_token: String,
    pub account_id: String,
    pub legal_name: String,
}

/// New position and payout date for one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionAssignment {
    pub member_id: Uuid,
    pub payout_position: Option<i32>,
    pub next_payout_date: Option<DateTime<Utc>>,
}

/// Result of inserting a keyed transaction
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(CircleTransaction),
    /// A live row already holds the idempotency key
    Duplicate(CircleTransaction),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_moves_forward_only() {
        use TransactionStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Completed));

        assert!(!Completed.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Failed));
    }

    #[test]
    fn test_settlement_never_unsettles() {
        use SettlementStatus::*;

        assert!(Unsettled.can_transition_to(Settled));
        assert!(Settled.can_transition_to(Reversed));
        assert!(!Settled.can_transition_to(Unsettled));
        assert!(!Reversed.can_transition_to(Settled));
    }

    #[test]
    fn test_transition_rejects_regression() {
        let mut tx = CircleTransaction::pending(
            TransactionType::Contribution,
            Some(Uuid::new_v4()),
            Uuid::new_v4(),
            dec!(100),
            "contribution:test".to_string(),
            Utc::now(),
        );

        tx.transition(TransactionStatus::Completed).unwrap();
        let err = tx.transition(TransactionStatus::Processing).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(tx.status, TransactionStatus::Completed);
    }

    #[test]
    fn test_only_settled_contributions_are_confirmed() {
        let mut tx = CircleTransaction::pending(
            TransactionType::Contribution,
            None,
            Uuid::new_v4(),
            dec!(50),
            "k".to_string(),
            Utc::now(),
        );
        tx.status = TransactionStatus::Completed;
        assert!(!tx.is_confirmed_contribution());

        tx.settlement_status = SettlementStatus::Settled;
        assert!(tx.is_confirmed_contribution());
    }
}
