// HTTP payment rail client (ACH-style transfer API)
//
// Endpoints used:
// - POST /transfer/authorization/create
// - POST /transfer/create
// - POST /transfer/recurring/create
// - POST /transfer/recurring/cancel

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{
    AuthorizationDecision, AuthorizationRequest, PaymentRail, RecurringTransferParams,
    TransferAuthorization, TransferDirection, TransferReceipt,
};
use crate::error::RailError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RailConfig {
    pub base_url: String,
    pub client_id: String,
    pub secret: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RailConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.rail.local".to_string(),
            client_id: String::new(),
            secret: String::new(),
            timeout_ms: 10_000,
        }
    }
}

pub struct HttpPaymentRail {
    config: RailConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct AuthorizationBody<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    account_id: &'a str,
    #[serde(rename = "type")]
    direction: TransferDirection,
    network: &'static str,
    amount: String,
    ach_class: &'static str,
    user: UserBody<'a>,
    idempotency_key: &'a str,
}

#[derive(Debug, Serialize)]
struct UserBody<'a> {
    legal_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthorizationResponse {
    authorization: AuthorizationPayload,
}

#[derive(Debug, Deserialize)]
struct AuthorizationPayload {
    id: String,
    decision: String,
    decision_rationale: Option<DecisionRationale>,
}

#[derive(Debug, Deserialize)]
struct DecisionRationale {
    code: String,
}

#[derive(Debug, Serialize)]
struct TransferBody<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    account_id: &'a str,
    authorization_id: &'a str,
    amount: String,
    description: &'static str,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    transfer: TransferPayload,
}

#[derive(Debug, Deserialize)]
struct TransferPayload {
    id: String,
    status: String,
}

#[derive(Debug, Serialize)]
struct RecurringBody<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    account_id: &'a str,
    amount: String,
    network: &'static str,
    ach_class: &'static str,
    user: UserBody<'a>,
    schedule: RecurringScheduleBody,
    idempotency_key: &'a str,
    description: &'static str,
}

#[derive(Debug, Serialize)]
struct RecurringScheduleBody {
    interval_unit: &'static str,
    interval_count: u32,
    interval_execution_day: u32,
    start_date: String,
}

#[derive(Debug, Deserialize)]
struct RecurringResponse {
    recurring_transfer: RecurringPayload,
}

#[derive(Debug, Deserialize)]
struct RecurringPayload {
    recurring_transfer_id: String,
}

#[derive(Debug, Serialize)]
struct CancelBody<'a> {
    client_id: &'a str,
    secret: &'a str,
    recurring_transfer_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error_code: Option<String>,
    error_message: Option<String>,
}

impl HttpPaymentRail {
    pub fn new(config: RailConfig) -> Result<Self, RailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RailError::Transport(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, RailError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let error: Option<ProviderError> = response.json().await.ok();
            let message = error
                .map(|e| {
                    format!(
                        "{}: {}",
                        e.error_code.unwrap_or_default(),
                        e.error_message.unwrap_or_default()
                    )
                })
                .unwrap_or_else(|| status.to_string());
            warn!("Rail rejected {}: {}", path, message);
            return Err(RailError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response.json::<R>().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, error: reqwest::Error) -> RailError {
        if error.is_timeout() {
            RailError::Timeout(self.timeout())
        } else {
            RailError::Transport(error.to_string())
        }
    }
}

/// Interval unit/count/day understood by the provider's recurring API
fn recurring_interval(params: &RecurringTransferParams) -> (&'static str, u32, u32) {
    use crate::ledger::models::Frequency::*;

    match params.frequency {
        Daily => ("day", 1, 1),
        // Provider weeks run Monday=1..Friday=5; our anchor is Sunday-based
        Weekly => ("week", 1, params.day_of_week.unwrap_or(1).clamp(1, 5)),
        Biweekly => ("week", 2, params.day_of_week.unwrap_or(1).clamp(1, 5)),
        Monthly => ("month", 1, params.day_of_month.unwrap_or(1)),
        Quarterly => ("month", 3, params.day_of_month.unwrap_or(1)),
        Yearly => ("month", 12, params.day_of_month.unwrap_or(1)),
    }
}

fn format_amount(amount: Decimal) -> String {
    amount.round_dp(2).to_string()
}

#[async_trait]
impl PaymentRail for HttpPaymentRail {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id, direction = ?request.direction))]
    async fn create_transfer_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<TransferAuthorization, RailError> {
        let body = AuthorizationBody {
            client_id: &self.config.client_id,
            secret: &self.config.secret,
            access_token: &request.access_token,
            account_id: &request.account_id,
            direction: request.direction,
            network: "ach",
            amount: format_amount(request.amount),
            ach_class: "ppd",
            user: UserBody {
                legal_name: &request.legal_name,
            },
            idempotency_key: &request.idempotency_key,
        };

        let response: AuthorizationResponse =
            self.post("/transfer/authorization/create", &body).await?;
        let decision = match response.authorization.decision.as_str() {
            "approved" => AuthorizationDecision::Approved,
            _ => AuthorizationDecision::Denied,
        };

        info!(
            "Authorization {} decided: {:?}",
            response.authorization.id, decision
        );

        Ok(TransferAuthorization {
            authorization_id: response.authorization.id,
            decision,
            reason_code: response.authorization.decision_rationale.map(|r| r.code),
            access_token: request.access_token.clone(),
            account_id: request.account_id.clone(),
            amount: request.amount,
            direction: request.direction,
        })
    }

    #[instrument(skip(self, authorization), fields(authorization_id = %authorization.authorization_id))]
    async fn create_transfer(
        &self,
        authorization: &TransferAuthorization,
    ) -> Result<TransferReceipt, RailError> {
        authorization.ensure_approved()?;

        let body = TransferBody {
            client_id: &self.config.client_id,
            secret: &self.config.secret,
            access_token: &authorization.access_token,
            account_id: &authorization.account_id,
            authorization_id: &authorization.authorization_id,
            amount: format_amount(authorization.amount),
            description: match authorization.direction {
                TransferDirection::Debit => "Circle contribution",
                TransferDirection::Credit => "Circle payout",
            },
        };

        let response: TransferResponse = self.post("/transfer/create", &body).await?;
        info!("Transfer {} created ({})", response.transfer.id, response.transfer.status);

        Ok(TransferReceipt {
            transfer_id: response.transfer.id,
            status: response.transfer.status,
        })
    }

    async fn create_recurring_transfer(
        &self,
        params: &RecurringTransferParams,
    ) -> Result<String, RailError> {
        let (interval_unit, interval_count, interval_execution_day) = recurring_interval(params);
        let body = RecurringBody {
            client_id: &self.config.client_id,
            secret: &self.config.secret,
            access_token: &params.access_token,
            account_id: &params.account_id,
            amount: format_amount(params.amount),
            network: "ach",
            ach_class: "ppd",
            user: UserBody {
                legal_name: &params.legal_name,
            },
            schedule: RecurringScheduleBody {
                interval_unit,
                interval_count,
                interval_execution_day,
                start_date: params.start_date.format("%Y-%m-%d").to_string(),
            },
            idempotency_key: &params.idempotency_key,
            description: "Recurring contribution",
        };

        let response: RecurringResponse = self.post("/transfer/recurring/create", &body).await?;
        info!(
            "Recurring transfer {} created",
            response.recurring_transfer.recurring_transfer_id
        );
        Ok(response.recurring_transfer.recurring_transfer_id)
    }

    async fn cancel_recurring_transfer(&self, recurring_transfer_id: &str) -> Result<bool, RailError> {
        let body = CancelBody {
            client_id: &self.config.client_id,
            secret: &self.config.secret,
            recurring_transfer_id,
        };

        match self
            .post::<_, serde_json::Value>("/transfer/recurring/cancel", &body)
            .await
        {
            Ok(_) => Ok(true),
            // Already cancelled or unknown on the provider side
            Err(RailError::Rejected { status: 400, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
