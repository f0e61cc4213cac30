use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::ledger::models::Frequency;
use crate::settlement::{BatchReport, ItemResult, ReconcileOutcome, TransferEvent};

// ========== REQUEST MODELS ==========

/// Transfer status webhook from the payment rail
#[derive(Debug, Deserialize)]
pub struct TransferWebhookPayload {
    pub webhook_type: Option<String>,
    pub webhook_code: Option<String>,
    pub transfer_id: Option<String>,
    /// Some providers send the transfer reference as item_id
    pub item_id: Option<String>,
    pub status: Option<String>,
    pub failure_reason: Option<String>,
}

impl TransferWebhookPayload {
    /// `None` for event types that carry no transfer status
    pub fn into_event(self, raw: serde_json::Value) -> Option<TransferEvent> {
        if let Some(kind) = self.webhook_type.as_deref() {
            if !kind.eq_ignore_ascii_case("transfer") {
                return None;
            }
        }

        let transfer_id = self.transfer_id.or(self.item_id)?;
        let external_status = self.status?;

        Some(TransferEvent {
            transfer_id,
            external_status,
            failure_reason: self.failure_reason,
            event_type: self.webhook_code,
            raw,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationAction {
    Initialize,
    Advance,
    GetStatus,
    /// Release denied payouts for another authorization attempt
    RetryPayout,
}

/// Rotation management request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationRequest {
    pub circle_id: Uuid,
    pub action: RotationAction,
    pub admin_user_id: Option<Uuid>,
    pub member_id: Option<Uuid>,
}

fn positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        let mut error = ValidationError::new("positive");
        error.message = Some("amount must be greater than zero".into());
        return Err(error);
    }
    Ok(())
}

/// Enroll a recurring contribution
#[derive(Debug, Deserialize, Validate)]
pub struct CreateScheduleRequest {
    pub user_id: Uuid,
    pub circle_id: Option<Uuid>,
    pub goal_id: Option<Uuid>,
    #[validate(custom = "positive_amount")]
    pub amount: Decimal,
    pub frequency: Frequency,
    #[validate(range(min = 0, max = 6, message = "day_of_week must be 0-6"))]
    pub day_of_week: Option<u32>,
    #[validate(range(min = 1, max = 31, message = "day_of_month must be 1-31"))]
    pub day_of_month: Option<u32>,
    #[serde(default)]
    pub rail_managed: bool,
}

#[derive(Debug, Deserialize)]
pub struct CancelScheduleRequest {
    pub user_id: Uuid,
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ReconcileOutcome>,
}

#[derive(Debug, Serialize)]
pub struct PayoutSummary {
    pub circles_checked: usize,
    pub payouts_processed: usize,
    pub errors: usize,
}

#[derive(Debug, Serialize)]
pub struct ContributionSummary {
    pub schedules_checked: usize,
    pub contributions_processed: usize,
    pub errors: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse<S> {
    pub success: bool,
    pub summary: S,
    pub results: Vec<ItemResult>,
}

impl From<BatchReport> for BatchResponse<PayoutSummary> {
    fn from(report: BatchReport) -> Self {
        Self {
            success: true,
            summary: PayoutSummary {
                circles_checked: report.checked,
                payouts_processed: report.processed,
                errors: report.errors,
            },
            results: report.results,
        }
    }
}

impl From<BatchReport> for BatchResponse<ContributionSummary> {
    fn from(report: BatchReport) -> Self {
        Self {
            success: true,
            summary: ContributionSummary {
                schedules_checked: report.checked,
                contributions_processed: report.processed,
                errors: report.errors,
            },
            results: report.results,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> TransferWebhookPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_item_id_stands_in_for_transfer_id() {
        let raw = json!({ "webhook_type": "TRANSFER", "item_id": "tr_1", "status": "posted" });
        let event = payload(raw.clone()).into_event(raw).unwrap();
        assert_eq!(event.transfer_id, "tr_1");
        assert_eq!(event.external_status, "posted");
    }

    #[test]
    fn test_other_event_types_are_not_transfer_events() {
        let raw = json!({ "webhook_type": "ITEM", "item_id": "i_1", "status": "error" });
        assert!(payload(raw.clone()).into_event(raw).is_none());

        let raw = json!({ "webhook_type": "TRANSFER", "webhook_code": "TRANSFER_EVENTS_UPDATE" });
        assert!(payload(raw.clone()).into_event(raw).is_none());
    }

    #[test]
    fn test_schedule_request_validation() {
        let request: CreateScheduleRequest = serde_json::from_value(json!({
            "user_id": Uuid::new_v4(),
            "goal_id": Uuid::new_v4(),
            "amount": 0,
            "frequency": "weekly",
            "day_of_week": 9
        }))
        .unwrap();

        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("amount"));
        assert!(fields.contains_key("day_of_week"));
    }
}
