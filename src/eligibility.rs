use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::models::{Circle, CircleMember, CircleTransaction};
use crate::rotation::plan;

/// How much of the settled pool one payout takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutPolicy {
    /// Pay exactly the contribution amount; any remainder stays pooled
    #[default]
    FixedContribution,
    WholePool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ineligibility {
    InsufficientPool,
    NoHead,
    NotDue,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutEligibility {
    pub confirmed_contributions: Decimal,
    pub completed_payouts: Decimal,
    pub available_pool: Decimal,
    pub payout_amount: Decimal,
    pub reason: Option<Ineligibility>,
}

impl PayoutEligibility {
    pub fn is_eligible(&self) -> bool {
        self.reason.is_none()
    }
}

/// Settled pool: confirmed contributions minus completed payouts
pub fn pool_totals(transactions: &[CircleTransaction]) -> (Decimal, Decimal) {
    let confirmed = transactions
        .iter()
        .filter(|t| t.is_confirmed_contribution())
        .map(|t| t.amount)
        .sum();
    let paid = transactions
        .iter()
        .filter(|t| t.is_completed_payout())
        .map(|t| t.amount)
        .sum();
    (confirmed, paid)
}

pub fn evaluate(
    circle: &Circle,
    members: &[CircleMember],
    transactions: &[CircleTransaction],
    now: DateTime<Utc>,
    policy: PayoutPolicy,
) -> PayoutEligibility {
    let (confirmed_contributions, completed_payouts) = pool_totals(transactions);
    let available_pool = confirmed_contributions - completed_payouts;

    let payout_amount = match policy {
        PayoutPolicy::FixedContribution => circle.contribution_amount,
        PayoutPolicy::WholePool => available_pool.max(Decimal::ZERO),
    };

    let head = plan::positioned(members)
        .into_iter()
        .find(|m| m.payout_position == Some(1));

    let reason = if available_pool < circle.contribution_amount {
        Some(Ineligibility::InsufficientPool)
    } else {
        match head {
            None => Some(Ineligibility::NoHead),
            Some(h) => match h.next_payout_date {
                Some(date) if date <= now => None,
                _ => Some(Ineligibility::NotDue),
            },
        }
    };

    PayoutEligibility {
        confirmed_contributions,
        completed_payouts,
        available_pool,
        payout_amount,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn circle() -> Circle {
        Circle {
            id: Uuid::new_v4(),
            name: "c".to_string(),
            contribution_amount: dec!(100),
            frequency: Frequency::Weekly,
            status: CircleStatus::Active,
            start_date: Utc::now(),
            current_cycle: 0,
            created_at: Utc::now(),
        }
    }

    fn head(circle: &Circle, due: DateTime<Utc>) -> CircleMember {
        CircleMember {
            id: Uuid::new_v4(),
            circle_id: circle.id,
            user_id: Uuid::new_v4(),
            is_admin: true,
            payout_position: Some(1),
            next_payout_date: Some(due),
            joined_at: Utc::now(),
        }
    }

    fn tx(
        kind: TransactionType,
        amount: Decimal,
        status: TransactionStatus,
        settlement: SettlementStatus,
    ) -> CircleTransaction {
        let mut tx = CircleTransaction::pending(
            kind,
            None,
            Uuid::new_v4(),
            amount,
            Uuid::new_v4().to_string(),
            Utc::now(),
        );
        tx.status = status;
        tx.settlement_status = settlement;
        tx
    }

    fn settled(amount: Decimal) -> CircleTransaction {
        tx(
            TransactionType::Contribution,
            amount,
            TransactionStatus::Completed,
            SettlementStatus::Settled,
        )
    }

    #[test]
    fn test_two_confirmed_contributions_are_eligible() {
        let circle = circle();
        let now = Utc::now();
        let members = vec![head(&circle, now - Duration::minutes(1))];
        let txs = vec![settled(dec!(100)), settled(dec!(100))];

        let result = evaluate(&circle, &members, &txs, now, PayoutPolicy::FixedContribution);
        assert!(result.is_eligible());
        assert_eq!(result.available_pool, dec!(200));
        assert_eq!(result.payout_amount, dec!(100));

        let whole = evaluate(&circle, &members, &txs, now, PayoutPolicy::WholePool);
        assert_eq!(whole.payout_amount, dec!(200));
    }

    #[test]
    fn test_locally_completed_contributions_do_not_count() {
        let circle = circle();
        let now = Utc::now();
        let members = vec![head(&circle, now)];
        let txs = vec![
            settled(dec!(60)),
            tx(
                TransactionType::Contribution,
                dec!(100),
                TransactionStatus::Completed,
                SettlementStatus::Unsettled,
            ),
            tx(
                TransactionType::Contribution,
                dec!(100),
                TransactionStatus::Failed,
                SettlementStatus::Reversed,
            ),
        ];

        let result = evaluate(&circle, &members, &txs, now, PayoutPolicy::FixedContribution);
        assert_eq!(result.confirmed_contributions, dec!(60));
        assert_eq!(result.reason, Some(Ineligibility::InsufficientPool));
    }

    #[test]
    fn test_pool_drops_only_for_completed_payouts() {
        let circle = circle();
        let now = Utc::now();
        let members = vec![head(&circle, now)];
        let mut txs = vec![settled(dec!(100)), settled(dec!(100)), settled(dec!(100))];

        let before = evaluate(&circle, &members, &txs, now, PayoutPolicy::FixedContribution);

        txs.push(tx(
            TransactionType::Payout,
            dec!(100),
            TransactionStatus::Failed,
            SettlementStatus::Unsettled,
        ));
        txs.push(tx(
            TransactionType::Payout,
            dec!(100),
            TransactionStatus::Pending,
            SettlementStatus::Unsettled,
        ));
        let unchanged = evaluate(&circle, &members, &txs, now, PayoutPolicy::FixedContribution);
        assert_eq!(unchanged.available_pool, before.available_pool);

        txs.push(tx(
            TransactionType::Payout,
            dec!(100),
            TransactionStatus::Completed,
            SettlementStatus::Unsettled,
        ));
        let after = evaluate(&circle, &members, &txs, now, PayoutPolicy::FixedContribution);
        assert_eq!(after.available_pool, dec!(200));
        assert_eq!(
            after.available_pool,
            after.confirmed_contributions - after.completed_payouts
        );
    }

    #[test]
    fn test_head_must_be_due() {
        let circle = circle();
        let now = Utc::now();
        let txs = vec![settled(dec!(100))];

        let later = vec![head(&circle, now + Duration::days(1))];
        let result = evaluate(&circle, &later, &txs, now, PayoutPolicy::FixedContribution);
        assert_eq!(result.reason, Some(Ineligibility::NotDue));

        let mut undated = head(&circle, now);
        undated.next_payout_date = None;
        let result = evaluate(&circle, &[undated], &txs, now, PayoutPolicy::FixedContribution);
        assert_eq!(result.reason, Some(Ineligibility::NotDue));

        let result = evaluate(&circle, &[], &txs, now, PayoutPolicy::FixedContribution);
        assert_eq!(result.reason, Some(Ineligibility::NoHead));
    }
}
