#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! AuditPack invoice ingestion-and-analysis pipeline
//!
//! Documents arrive via the upload endpoint or the chat webhook, are
//! deduplicated per client, persisted to blob storage, analyzed for tax
//! compliance by an external AI model, and the resulting issues become
//! alerts and outbound notifications. Unrecoverable analysis failures are
//! dead-lettered for offline triage.

pub mod alerts;
pub mod analysis;
pub mod audit;
pub mod dlq;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod intake;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod provider;
pub mod signature;
pub mod storage;

#[cfg(test)]
mod edge_case_tests;

pub use alerts::{alertable_issues, AlertService};
pub use analysis::{AnalysisOrchestrator, AnalysisOutcome};
pub use audit::AuditLogger;
pub use dlq::DeadLetterRecorder;
pub use error::{PipelineError, PipelineResult};
pub use ingest::{DocumentBytes, DocumentSource, IngestOutcome, IngestService};
pub use intake::{
    is_message_event, parse_command, Command, DocumentContent, IntakeService, MessageData,
    TextContent, WebhookPayload,
};
pub use jobs::{AnalysisJob, JobQueue};
pub use models::{
    Alert, Analysis, AnalysisIssue, AnalysisResult, Client, ClientWithFirm, DeadLetterEntry, Firm,
    Invoice, InvoiceStatus, IssueSeverity, IvaValidation, RecoverableTax, RiskLevel,
};
pub use notify::{MessagingConfig, NotificationSender};
pub use provider::{AiProvider, AnalysisRequest, ProviderConfig, SiliconFlowProvider};
pub use signature::{sign, verify_signature};
pub use storage::{FilesystemBackend, StorageBackend};

use std::sync::Arc;

use sqlx::PgPool;

/// Main pipeline service combining every stage behind one handle.
///
/// All collaborators (database pool, storage backend, HTTP client) are
/// injected at construction; there are no process-global singletons.
pub struct PipelineService {
    pub intake: IntakeService,
    pub ingest: IngestService,
    pub orchestrator: AnalysisOrchestrator,
    pub alerts: AlertService,
    pub notifier: NotificationSender,
    pub jobs: JobQueue,
    pub dlq: DeadLetterRecorder,
}

impl PipelineService {
    pub fn new(
        pool: PgPool,
        storage: Arc<dyn StorageBackend>,
        provider_config: ProviderConfig,
        messaging_config: MessagingConfig,
    ) -> Self {
        let http = reqwest::Client::new();
        let notifier = NotificationSender::new(http.clone(), messaging_config);
        let audit = AuditLogger::new(pool.clone());
        let alerts = AlertService::new(pool.clone(), audit.clone());
        let jobs = JobQueue::new(pool.clone());
        let dlq = DeadLetterRecorder::new(pool.clone());

        Self {
            intake: IntakeService::new(pool.clone()),
            ingest: IngestService::new(
                pool.clone(),
                storage,
                http.clone(),
                notifier.clone(),
                audit,
                jobs.clone(),
                dlq.clone(),
            ),
            orchestrator: AnalysisOrchestrator::new(
                pool,
                http,
                provider_config,
                alerts.clone(),
                notifier.clone(),
                dlq.clone(),
            ),
            alerts,
            notifier,
            jobs,
            dlq,
        }
    }

    /// Drain up to `batch` queued analysis jobs.
    ///
    /// Each job runs to a terminal outcome; dead-lettered analyses mark the
    /// job errored but never abort the batch. Returns the number of jobs
    /// processed.
    pub async fn process_analysis_queue(&self, batch: i64) -> u64 {
        let jobs = match self.jobs.claim_batch(batch).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim analysis jobs");
                return 0;
            }
        };

        let mut processed = 0u64;
        for job in jobs {
            processed += 1;
            match self.orchestrator.analyze_invoice(job.invoice_id).await {
                Ok(AnalysisOutcome::Analyzed { analysis_id }) => {
                    tracing::info!(
                        job_id = %job.id,
                        invoice_id = %job.invoice_id,
                        analysis_id = %analysis_id,
                        "Analysis job complete"
                    );
                    if let Err(e) = self.jobs.mark_done(job.id).await {
                        tracing::error!(job_id = %job.id, error = %e, "Failed to mark job done");
                    }
                }
                Ok(AnalysisOutcome::Skipped) => {
                    if let Err(e) = self.jobs.mark_done(job.id).await {
                        tracing::error!(job_id = %job.id, error = %e, "Failed to mark job done");
                    }
                }
                Ok(AnalysisOutcome::DeadLettered { error }) => {
                    if let Err(e) = self.jobs.mark_error(job.id, &error).await {
                        tracing::error!(job_id = %job.id, error = %e, "Failed to mark job errored");
                    }
                }
                Err(e) => {
                    // Invoice could not even be loaded (deleted mid-flight).
                    tracing::error!(
                        job_id = %job.id,
                        invoice_id = %job.invoice_id,
                        error = %e,
                        "Analysis job failed before orchestration"
                    );
                    if let Err(mark_err) = self.jobs.mark_error(job.id, &e.to_string()).await {
                        tracing::error!(job_id = %job.id, error = %mark_err, "Failed to mark job errored");
                    }
                }
            }
        }

        processed
    }
}
