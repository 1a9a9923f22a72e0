//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use auditpack_pipeline::{FilesystemBackend, PipelineService};

use crate::config::Config;

/// Shared application state.
///
/// All external collaborators are constructed once here and injected into
/// the pipeline; request handlers only ever see this handle.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub pipeline: Arc<PipelineService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        if config.webhook_secret.is_none() {
            tracing::warn!(
                "WHATSAPP_WEBHOOK_SECRET not configured - webhook signature validation disabled"
            );
        }
        if config.siliconflow_api_key.is_empty() {
            tracing::warn!("SILICONFLOW_API_KEY not configured - analysis calls will fail");
        }

        let storage = Arc::new(FilesystemBackend::new(config.storage_path.clone()));
        tracing::info!(path = %config.storage_path, "Filesystem blob store initialized");

        let pipeline = Arc::new(PipelineService::new(
            pool.clone(),
            storage,
            config.provider_config(),
            config.messaging_config(),
        ));

        Self {
            pool,
            config,
            pipeline,
        }
    }
}
