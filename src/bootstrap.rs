use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::{
    api::handler::AppState,
    config::Config,
    error::AppResult,
    ledger::{CircleStore, InMemoryCircleStore, LedgerRepository, MemberDirectory},
    notify::notifier_from_url,
    rail::{HttpPaymentRail, PaymentRail},
    rotation::{KeyedLocks, RotationEngine},
    schedule::ScheduleCalculator,
    settlement::{BatchScheduler, ContributionProcessor, PayoutScanner, WebhookReconciler},
};

/// Everything `main` needs to serve requests and drive the batch jobs
pub struct Application {
    pub state: AppState,
    pub scheduler: BatchScheduler,
}

pub async fn initialize_app_state(config: &Config) -> AppResult<Application> {
    info!("Initializing application components ...");

    // Datastore
    let (store, directory, storage): (Arc<dyn CircleStore>, Arc<dyn MemberDirectory>, &'static str) =
        match config.database_url.as_deref() {
            Some(url) if !url.is_empty() => {
                let pool = initialize_database(url).await?;
                let ledger = Arc::new(LedgerRepository::new(pool));
                (ledger.clone() as Arc<dyn CircleStore>, ledger as Arc<dyn MemberDirectory>, "postgres")
            }
            _ => {
                warn!("⚠️  DATABASE_URL not set - using the in-memory store, state is lost on restart");
                let memory = Arc::new(InMemoryCircleStore::new());
                (memory.clone() as Arc<dyn CircleStore>, memory as Arc<dyn MemberDirectory>, "memory")
            }
        };

    // Payment rail
    let rail: Arc<dyn PaymentRail> = Arc::new(HttpPaymentRail::new(config.rail.clone())?);
    info!("✅ Payment rail client initialized ({})", config.rail.base_url);

    let notifier = notifier_from_url(config.notify_url.clone());
    let calculator = ScheduleCalculator::new(config.same_day_policy);
    let settings = config.batch.settings();
    info!(
        "✅ Policies: same-day={:?} payout={:?} complete-after-lap={}",
        config.same_day_policy, config.payout_policy, config.complete_circle_after_lap
    );

    // Core components
    let rotation = Arc::new(RotationEngine::new(
        store.clone(),
        directory,
        calculator,
        Arc::new(KeyedLocks::new()),
    )
    .with_lease_ttl(settings.lease_ttl));
    let reconciler = Arc::new(WebhookReconciler::new(store.clone()));
    let payouts = Arc::new(PayoutScanner::new(
        store.clone(),
        rail.clone(),
        rotation.clone(),
        notifier.clone(),
        settings.clone(),
        config.payout_policy,
        config.complete_circle_after_lap,
    ));
    let contributions = Arc::new(ContributionProcessor::new(
        store,
        rail,
        calculator,
        notifier,
        settings,
    ));

    let scheduler = BatchScheduler::new(config.batch.schedule(), payouts.clone(), contributions.clone());

    let state = AppState {
        rotation,
        reconciler,
        payouts,
        contributions,
        webhook_secret: config.webhook_secret.as_deref().filter(|s| !s.is_empty()).map(Arc::from),
        storage,
    };

    if state.webhook_secret.is_none() {
        warn!("⚠️  WEBHOOK_SECRET not set - webhook signatures are not verified");
    }

    Ok(Application { state, scheduler })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 20 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
