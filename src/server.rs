use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::info;

use crate::api::handler::{
    cancel_schedule, create_schedule, health_check, manage_rotation, run_contribution_batch,
    run_payout_batch, transfer_webhook, AppState,
};

pub fn create_app(state: AppState, request_timeout: Duration) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Rail webhooks
                .route("/webhooks/transfers", post(transfer_webhook))
                // Rotation management
                .route("/rotation", post(manage_rotation))
                // Batch triggers (external scheduler or operators)
                .route("/batch/payouts", post(run_payout_batch))
                .route("/batch/contributions", post(run_contribution_batch))
                // Recurring contribution enrollment
                .route("/schedules", post(create_schedule))
                .route("/schedules/:id/cancel", post(cancel_schedule)),
        )
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::api::signature;
    use crate::eligibility::PayoutPolicy;
    use crate::ledger::memory::InMemoryCircleStore;
    use crate::ledger::models::*;
    use crate::ledger::store::CircleStore;
    use crate::notify::LogNotifier;
    use crate::rail::stub::StubRail;
    use crate::rotation::{KeyedLocks, RotationEngine};
    use crate::schedule::ScheduleCalculator;
    use crate::settlement::{
        BatchSettings, ContributionProcessor, PayoutScanner, WebhookReconciler,
    };

    struct TestApp {
        store: InMemoryCircleStore,
        app: Router,
    }

    fn test_app(webhook_secret: Option<&str>) -> TestApp {
        let store = InMemoryCircleStore::new();
        let shared: Arc<dyn CircleStore> = Arc::new(store.clone());
        let rail = Arc::new(StubRail::new());
        let notifier = Arc::new(LogNotifier);
        let calculator = ScheduleCalculator::default();

        let rotation = Arc::new(RotationEngine::new(
            shared.clone(),
            Arc::new(store.clone()),
            calculator,
            Arc::new(KeyedLocks::new()),
        ));
        let state = AppState {
            rotation: rotation.clone(),
            reconciler: Arc::new(WebhookReconciler::new(shared.clone())),
            payouts: Arc::new(PayoutScanner::new(
                shared.clone(),
                rail.clone(),
                rotation,
                notifier.clone(),
                BatchSettings::default(),
                PayoutPolicy::default(),
                true,
            )),
            contributions: Arc::new(ContributionProcessor::new(
                shared,
                rail,
                calculator,
                notifier,
                BatchSettings::default(),
            )),
            webhook_secret: webhook_secret.map(Arc::from),
            storage: "memory",
        };

        TestApp {
            store,
            app: create_app(state, Duration::from_secs(5)),
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn seed_circle(store: &InMemoryCircleStore, members: usize) -> (Circle, Vec<CircleMember>) {
        let now = Utc::now();
        let circle = Circle {
            id: Uuid::new_v4(),
            name: "Savings".to_string(),
            contribution_amount: dec!(100),
            frequency: Frequency::Weekly,
            status: CircleStatus::Pending,
            start_date: now,
            current_cycle: 0,
            created_at: now,
        };
        store.insert_circle(circle.clone()).await;

        let mut seeded = Vec::new();
        for i in 0..members {
            let member = CircleMember {
                id: Uuid::new_v4(),
                circle_id: circle.id,
                user_id: Uuid::new_v4(),
                is_admin: i == 0,
                payout_position: None,
                next_payout_date: None,
                joined_at: now + ChronoDuration::seconds(i as i64),
            };
            store.insert_member(member.clone()).await;
            seeded.push(member);
        }
        (circle, seeded)
    }

    #[tokio::test]
    async fn test_health() {
        let t = test_app(None);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&t.app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["storage"], "memory");
    }

    #[tokio::test]
    async fn test_rotation_initialize_and_status() {
        let t = test_app(None);
        let (circle, members) = seed_circle(&t.store, 3).await;

        let (status, body) = send(
            &t.app,
            post_json(
                "/api/v1/rotation",
                json!({ "circleId": circle.id, "action": "initialize", "adminUserId": members[0].user_id }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["current_position"], 1);
        assert_eq!(body["data"]["member_count"], 3);

        let (status, body) = send(
            &t.app,
            post_json(
                "/api/v1/rotation",
                json!({ "circleId": circle.id, "action": "get_status", "memberId": members[2].id }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["member"]["payout_position"], 3);
    }

    #[tokio::test]
    async fn test_rotation_errors_use_error_body() {
        let t = test_app(None);
        let (circle, members) = seed_circle(&t.store, 2).await;

        let (status, body) = send(
            &t.app,
            post_json(
                "/api/v1/rotation",
                json!({ "circleId": circle.id, "action": "advance", "adminUserId": members[1].user_id }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "PERMISSION_DENIED");

        let (status, _) = send(
            &t.app,
            post_json("/api/v1/rotation", json!({ "circleId": circle.id, "action": "initialize" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &t.app,
            post_json("/api/v1/rotation", json!({ "circleId": circle.id, "action": "dissolve" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_retry_payout_action_requires_admin() {
        let t = test_app(None);
        let (circle, members) = seed_circle(&t.store, 2).await;
        let rotation = |action: &str, admin: Uuid| {
            post_json(
                "/api/v1/rotation",
                json!({ "circleId": circle.id, "action": action, "adminUserId": admin }),
            )
        };

        let (status, _) = send(&t.app, rotation("initialize", members[0].user_id)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&t.app, rotation("retry_payout", members[1].user_id)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error_code"], "PERMISSION_DENIED");

        let (status, body) = send(&t.app, rotation("retry_payout", members[0].user_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["current_position"], 1);
    }

    #[tokio::test]
    async fn test_webhook_updates_transaction() {
        let t = test_app(None);
        let mut tx = CircleTransaction::pending(
            TransactionType::Contribution,
            Some(Uuid::new_v4()),
            Uuid::new_v4(),
            dec!(100),
            "contribution:webhook".to_string(),
            Utc::now(),
        );
        tx.status = TransactionStatus::Completed;
        tx.external_transfer_id = Some("tr_42".to_string());
        t.store.put_transaction(tx).await;

        let payload = json!({
            "webhook_type": "TRANSFER",
            "webhook_code": "TRANSFER_EVENTS_UPDATE",
            "transfer_id": "tr_42",
            "status": "posted"
        });
        let (status, body) = send(&t.app, post_json("/api/v1/webhooks/transfers", payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["outcome"]["outcome"], "applied");

        let stored = t.store.get_transaction_by_transfer_id("tr_42").await.unwrap().unwrap();
        assert_eq!(stored.settlement_status, SettlementStatus::Settled);
    }

    #[tokio::test]
    async fn test_unknown_webhooks_are_accepted() {
        let t = test_app(None);

        for payload in [
            json!({ "webhook_type": "ITEM", "webhook_code": "ERROR", "item_id": "i_1" }),
            json!({ "webhook_type": "TRANSFER", "transfer_id": "tr_missing", "status": "posted" }),
        ] {
            let (status, body) = send(&t.app, post_json("/api/v1/webhooks/transfers", payload)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
        }
    }

    #[tokio::test]
    async fn test_webhook_signature_is_enforced() {
        let t = test_app(Some("whsec"));
        let body = json!({ "transfer_id": "tr_1", "status": "posted" }).to_string();

        let (status, _) = send(
            &t.app,
            post_json("/api/v1/webhooks/transfers", serde_json::from_str(&body).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let signed = Request::builder()
            .method("POST")
            .uri("/api/v1/webhooks/transfers")
            .header("content-type", "application/json")
            .header(signature::SIGNATURE_HEADER, signature::sign("whsec", body.as_bytes()).unwrap())
            .body(Body::from(body))
            .unwrap();
        let (status, _) = send(&t.app, signed).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_batch_endpoints_report_summaries() {
        let t = test_app(None);

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/batch/payouts")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&t.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["circles_checked"], 0);
        assert_eq!(body["summary"]["payouts_processed"], 0);
        assert_eq!(body["summary"]["errors"], 0);

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/batch/contributions")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&t.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["schedules_checked"], 0);
    }

    #[tokio::test]
    async fn test_schedule_enrollment_and_cancel() {
        let t = test_app(None);
        let (circle, members) = seed_circle(&t.store, 2).await;
        let user_id = members[1].user_id;

        let (status, body) = send(
            &t.app,
            post_json(
                "/api/v1/schedules",
                json!({
                    "user_id": user_id,
                    "circle_id": circle.id,
                    "amount": 100,
                    "frequency": "monthly",
                    "day_of_month": 31
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let schedule_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &t.app,
            post_json(
                "/api/v1/schedules",
                json!({ "user_id": user_id, "circle_id": circle.id, "amount": 100, "frequency": "monthly", "day_of_month": 40 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &t.app,
            post_json(
                &format!("/api/v1/schedules/{}/cancel", schedule_id),
                json!({ "user_id": user_id }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["is_active"], false);
    }
}
