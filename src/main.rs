use std::time::Duration;

use rosca_backend::{bootstrap, config::Config, server};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,rosca_backend=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before anything reads the environment
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting rotating savings circle settlement service");

    let config = Config::from_env()?;

    let app = bootstrap::initialize_app_state(&config).await?;

    // Background batch jobs
    let jobs = app.scheduler.start();
    info!("⏱️ {} batch job(s) scheduled", jobs.len());

    // Create HTTP server
    let router = server::create_app(app.state, Duration::from_secs(config.request_timeout_secs));

    // Run the Server
    server::run_server(router, &config.bind_address).await?;

    Ok(())
}
