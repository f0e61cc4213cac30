// Payment rail adapter boundary
//
// Every method is a network call. Callers wrap them in `with_deadline` so a slow
// provider surfaces as `RailError::Timeout` instead of stalling a batch worker.

pub mod http;
#[cfg(test)]
pub mod stub;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RailError;
use crate::ledger::models::{Frequency, LinkedAccount};

pub use http::{HttpPaymentRail, RailConfig};

/// Direction of funds relative to the payer's linked account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Pull from the member's account (contribution)
    Debit,
    /// Push to the member's account (payout)
    Credit,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationRequest {
    pub access_token: String,
    pub account_id: String,
    pub amount: Decimal,
    pub direction: TransferDirection,
    pub legal_name: String,
    pub user_id: Uuid,
    /// Forwarded to the provider so retried calls are deduplicated there too
    pub idempotency_key: String,
}

impl AuthorizationRequest {
    pub fn new(
        account: &LinkedAccount,
        amount: Decimal,
        direction: TransferDirection,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            access_token: account.access_token.clone(),
            account_id: account.account_id.clone(),
            amount,
            direction,
            legal_name: account.legal_name.clone(),
            user_id: account.user_id,
            idempotency_key: idempotency_key.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationDecision {
    Approved,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAuthorization {
    pub authorization_id: String,
    pub decision: AuthorizationDecision,
    pub reason_code: Option<String>,
    pub access_token: String,
    pub account_id: String,
    pub amount: Decimal,
    pub direction: TransferDirection,
}

impl TransferAuthorization {
    pub fn is_approved(&self) -> bool {
        self.decision == AuthorizationDecision::Approved
    }

    /// Turn a denial into the matching error
    pub fn ensure_approved(&self) -> Result<(), RailError> {
        if self.is_approved() {
            return Ok(());
        }
        Err(RailError::Denied {
            reason_code: self
                .reason_code
                .clone()
                .unwrap_or_else(|| "UNSPECIFIED".to_string()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecurringTransferParams {
    pub access_token: String,
    pub account_id: String,
    pub amount: Decimal,
    pub frequency: Frequency,
    pub day_of_week: Option<u32>,
    pub day_of_month: Option<u32>,
    pub start_date: chrono::NaiveDate,
    pub legal_name: String,
    pub idempotency_key: String,
}

#[async_trait]
pub trait PaymentRail: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_transfer_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<TransferAuthorization, RailError>;

    async fn create_transfer(
        &self,
        authorization: &TransferAuthorization,
    ) -> Result<TransferReceipt, RailError>;

    async fn create_recurring_transfer(
        &self,
        params: &RecurringTransferParams,
    ) -> Result<String, RailError>;

    async fn cancel_recurring_transfer(&self, recurring_transfer_id: &str) -> Result<bool, RailError>;
}

/// Bound a rail call; elapsed deadline becomes a transient `Timeout`
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, RailError>
where
    F: Future<Output = Result<T, RailError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(RailError::Timeout(deadline)),
    }
}

/// Authorize then submit one transfer, stopping at a denial
pub async fn authorize_and_transfer(
    rail: &dyn PaymentRail,
    request: &AuthorizationRequest,
    deadline: Duration,
) -> Result<(TransferAuthorization, TransferReceipt), (Option<TransferAuthorization>, RailError)> {
    let authorization = with_deadline(deadline, rail.create_transfer_authorization(request))
        .await
        .map_err(|e| (None, e))?;

    if let Err(e) = authorization.ensure_approved() {
        return Err((Some(authorization), e));
    }

    match with_deadline(deadline, rail.create_transfer(&authorization)).await {
        Ok(receipt) => Ok((authorization, receipt)),
        Err(e) => Err((Some(authorization), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowRail;

    #[async_trait]
    impl PaymentRail for SlowRail {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn create_transfer_authorization(
            &self,
            _request: &AuthorizationRequest,
        ) -> Result<TransferAuthorization, RailError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(RailError::Transport("unreachable".to_string()))
        }

        async fn create_transfer(
            &self,
            _authorization: &TransferAuthorization,
        ) -> Result<TransferReceipt, RailError> {
            unreachable!()
        }

        async fn create_recurring_transfer(
            &self,
            _params: &RecurringTransferParams,
        ) -> Result<String, RailError> {
            unreachable!()
        }

        async fn cancel_recurring_transfer(&self, _id: &str) -> Result<bool, RailError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_deadline_maps_to_transient_timeout() {
        let account = LinkedAccount {
            user_id: Uuid::new_v4(),
            access_token: "token".to_string(),
            account_id: "acct".to_string(),
            legal_name: "Ada".to_string(),
        };
        let request = AuthorizationRequest::new(
            &account,
            Decimal::ONE_HUNDRED,
            TransferDirection::Debit,
            "key",
        );

        let (authorization, err) =
            authorize_and_transfer(&SlowRail, &request, Duration::from_millis(20))
                .await
                .unwrap_err();

        assert!(authorization.is_none());
        assert_eq!(err, RailError::Timeout(Duration::from_millis(20)));
        assert!(err.is_transient());
    }
}
