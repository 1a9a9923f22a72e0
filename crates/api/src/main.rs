//! AuditPack API Server
//!
//! Serves the chat webhook, invoice upload, and alert endpoints, and runs
//! an in-process queue drain so single-node deployments work without the
//! dedicated worker binary.

use std::time::Duration;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auditpack_api::{create_router, AppState, Config};
use auditpack_shared::{create_migration_pool, create_pool, run_migrations};

/// How often the in-process drain polls for queued analyses. The worker
/// binary drains on a coarser schedule; the two coexist safely because
/// claims use row locks.
const DRAIN_INTERVAL: Duration = Duration::from_secs(15);

const DRAIN_BATCH_SIZE: i64 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,auditpack_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting AuditPack API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    // Migrations run on a dedicated small pool, then release it.
    let migration_pool = create_migration_pool(&config.database_url).await?;
    run_migrations(&migration_pool).await?;
    migration_pool.close().await;

    let bind_address = config.bind_address.clone();
    let state = AppState::new(pool, config);

    // In-process analysis drain.
    let drain_pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
        loop {
            ticker.tick().await;
            let processed = drain_pipeline.process_analysis_queue(DRAIN_BATCH_SIZE).await;
            if processed > 0 {
                tracing::debug!(processed = processed, "In-process analysis drain complete");
            }
        }
    });

    let app = create_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "API server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
