use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::models::*;
use crate::api::signature::{self, SIGNATURE_HEADER};
use crate::api::validation::{ApiJson, ValidatedJson};
use crate::error::{AppError, AppResult};
use crate::ledger::models::RecurringContributionSchedule;
use crate::rotation::{RotationEngine, RotationStatus};
use crate::settlement::contributions::NewSchedule;
use crate::settlement::{ContributionProcessor, PayoutScanner, WebhookReconciler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub rotation: Arc<RotationEngine>,
    pub reconciler: Arc<WebhookReconciler>,
    pub payouts: Arc<PayoutScanner>,
    pub contributions: Arc<ContributionProcessor>,
    /// Verifies `x-webhook-signature` when set
    pub webhook_secret: Option<Arc<str>>,
    /// "postgres" or "memory"
    pub storage: &'static str,
}

/// Transfer status webhook
/// POST /api/v1/webhooks/transfers
pub async fn transfer_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookResponse>> {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        signature::verify(secret, &body, header)?;
    }

    let raw: serde_json::Value = serde_json::from_slice(&body)?;
    let payload: TransferWebhookPayload = serde_json::from_value(raw.clone())?;
    let webhook_type = payload.webhook_type.clone();

    let Some(event) = payload.into_event(raw) else {
        debug!("Ignoring webhook without transfer status (type {:?})", webhook_type);
        return Ok(Json(WebhookResponse {
            success: true,
            outcome: None,
        }));
    };

    info!(
        "🔔 Transfer webhook: transfer={} status={}",
        event.transfer_id, event.external_status
    );
    let outcome = state.reconciler.reconcile(&event, Utc::now()).await?;

    Ok(Json(WebhookResponse {
        success: true,
        outcome: Some(outcome),
    }))
}

/// Initialize, advance, retry a denied payout or read a circle's rotation
/// POST /api/v1/rotation
pub async fn manage_rotation(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RotationRequest>,
) -> AppResult<Json<ApiResponse<RotationStatus>>> {
    let admin = || {
        request
            .admin_user_id
            .ok_or_else(|| AppError::Validation("adminUserId is required".to_string()))
    };

    let status = match request.action {
        RotationAction::Initialize => {
            state
                .rotation
                .initialize(request.circle_id, admin()?, Utc::now())
                .await?
        }
        RotationAction::Advance => {
            state
                .rotation
                .advance(request.circle_id, admin()?, Utc::now())
                .await?
        }
        RotationAction::RetryPayout => {
            let released = state
                .payouts
                .retry_denied(request.circle_id, admin()?, Utc::now())
                .await?;
            info!("Circle {}: {} denied payout(s) released", request.circle_id, released);
            state.rotation.status(request.circle_id, None).await?
        }
        RotationAction::GetStatus => {
            state
                .rotation
                .status(request.circle_id, request.member_id)
                .await?
        }
    };

    Ok(Json(ApiResponse::ok(status)))
}

/// POST /api/v1/batch/payouts
pub async fn run_payout_batch(
    State(state): State<AppState>,
) -> AppResult<Json<BatchResponse<PayoutSummary>>> {
    let report = state.payouts.run(Utc::now()).await?;
    Ok(Json(report.into()))
}

/// POST /api/v1/batch/contributions
pub async fn run_contribution_batch(
    State(state): State<AppState>,
) -> AppResult<Json<BatchResponse<ContributionSummary>>> {
    let report = state.contributions.run(Utc::now()).await?;
    Ok(Json(report.into()))
}

/// POST /api/v1/schedules
pub async fn create_schedule(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CreateScheduleRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<RecurringContributionSchedule>>)> {
    let schedule = state
        .contributions
        .create_schedule(
            NewSchedule {
                user_id: request.user_id,
                circle_id: request.circle_id,
                goal_id: request.goal_id,
                amount: request.amount,
                frequency: request.frequency,
                day_of_week: request.day_of_week,
                day_of_month: request.day_of_month,
                rail_managed: request.rail_managed,
            },
            Utc::now(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(schedule))))
}

/// POST /api/v1/schedules/:id/cancel
pub async fn cancel_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
    ApiJson(request): ApiJson<CancelScheduleRequest>,
) -> AppResult<Json<ApiResponse<RecurringContributionSchedule>>> {
    let schedule = state
        .contributions
        .cancel_schedule(schedule_id, request.user_id)
        .await?;
    Ok(Json(ApiResponse::ok(schedule)))
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        storage: state.storage.to_string(),
        timestamp: Utc::now(),
    })
}
