//! AuditPack Background Worker
//!
//! Handles scheduled jobs including:
//! - Analysis queue draining (every minute)
//! - Stuck job recovery (every 5 minutes)
//! - Finished job cleanup (daily at 4:00 AM UTC)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use auditpack_api::Config;
use auditpack_pipeline::{FilesystemBackend, PipelineService};
use auditpack_shared::create_pool;

/// Jobs claimed per drain cycle. Each job is one provider call, so this
/// bounds concurrent spend on the AI API.
const DRAIN_BATCH_SIZE: i64 = 10;

/// A job still in `processing` after this long is presumed orphaned by a
/// crashed worker and returned to the queue.
const STALE_JOB_TIMEOUT_MINUTES: i32 = 15;

const FINISHED_JOB_RETENTION_DAYS: i32 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting AuditPack Worker v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let pool = create_pool(&config.database_url).await?;
    info!("Database pool created");

    let storage = Arc::new(FilesystemBackend::new(config.storage_path.clone()));
    let pipeline = Arc::new(PipelineService::new(
        pool,
        storage,
        config.provider_config(),
        config.messaging_config(),
    ));

    let scheduler = JobScheduler::new().await?;

    // Job 1: Drain the analysis queue every minute
    let drain_pipeline = pipeline.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let pipeline = drain_pipeline.clone();
            Box::pin(async move {
                let processed = pipeline.process_analysis_queue(DRAIN_BATCH_SIZE).await;
                if processed > 0 {
                    info!(processed = processed, "Analysis queue drain complete");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Analysis queue drain (every minute)");

    // Job 2: Recover jobs orphaned by crashed workers (every 5 minutes)
    let stale_pipeline = pipeline.clone();
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let pipeline = stale_pipeline.clone();
            Box::pin(async move {
                match pipeline.jobs.requeue_stale(STALE_JOB_TIMEOUT_MINUTES).await {
                    Ok(0) => {}
                    Ok(requeued) => info!(requeued = requeued, "Requeued stale analysis jobs"),
                    Err(e) => error!(error = %e, "Stale job recovery failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Stale job recovery (every 5 minutes)");

    // Job 3: Delete old finished jobs (daily at 4:00 AM UTC)
    let cleanup_pipeline = pipeline.clone();
    scheduler
        .add(Job::new_async("0 0 4 * * *", move |_uuid, _l| {
            let pipeline = cleanup_pipeline.clone();
            Box::pin(async move {
                match pipeline.jobs.cleanup_finished(FINISHED_JOB_RETENTION_DAYS).await {
                    Ok(deleted) => info!(deleted = deleted, "Finished job cleanup complete"),
                    Err(e) => error!(error = %e, "Finished job cleanup failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Finished job cleanup (daily 4:00 UTC)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker started - all jobs scheduled");

    // Keep the worker alive
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
    }
}
