//! Dedup and storage writer
//!
//! Takes a resolved client plus document metadata, fetches the bytes,
//! fingerprints them, short-circuits duplicates, persists blob and invoice
//! row, and hands analysis off to the job queue. The webhook response never
//! waits on analysis.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::dlq::DeadLetterRecorder;
use crate::error::{PipelineError, PipelineResult};
use crate::extract::extract_text;
use crate::jobs::JobQueue;
use crate::models::{ClientWithFirm, InvoiceStatus};
use crate::notify::NotificationSender;
use crate::storage::{invoice_blob_path, StorageBackend};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the document bytes come from.
pub enum DocumentBytes {
    /// Fetch from a media URL (chat webhook path).
    Remote(String),
    /// Already in hand (upload endpoint path).
    Inline(Vec<u8>),
}

/// Document metadata handed to ingestion.
pub struct DocumentSource {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: DocumentBytes,
}

/// Terminal outcome of an ingestion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Created { invoice_id: Uuid },
    /// Identical bytes already exist for this client. Not an error; no data
    /// was stored and nothing existing was mutated.
    Duplicate,
}

/// Compute the content fingerprint used for per-client deduplication.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn duplicate_message() -> &'static str {
    "Esta fatura ja foi recebida anteriormente. Nao sera processada novamente."
}

fn ack_message(file_name: &str, invoice_id: Uuid) -> String {
    let id = invoice_id.to_string();
    format!(
        "Fatura recebida: *{file_name}*\n\n\
         Estamos analisando o documento. Voce recebera uma notificacao quando a analise estiver pronta.\n\n\
         ID: {}",
        &id[..8]
    )
}

pub struct IngestService {
    pool: PgPool,
    storage: Arc<dyn StorageBackend>,
    http: reqwest::Client,
    notifier: NotificationSender,
    audit: AuditLogger,
    jobs: JobQueue,
    dlq: DeadLetterRecorder,
}

impl IngestService {
    pub fn new(
        pool: PgPool,
        storage: Arc<dyn StorageBackend>,
        http: reqwest::Client,
        notifier: NotificationSender,
        audit: AuditLogger,
        jobs: JobQueue,
        dlq: DeadLetterRecorder,
    ) -> Self {
        Self {
            pool,
            storage,
            http,
            notifier,
            audit,
            jobs,
            dlq,
        }
    }

    /// Run the full intake path for one document.
    pub async fn ingest(
        &self,
        client: &ClientWithFirm,
        source_type: &str,
        source_id: Option<&str>,
        document: DocumentSource,
    ) -> PipelineResult<IngestOutcome> {
        let bytes = match document.bytes {
            DocumentBytes::Inline(bytes) => bytes,
            DocumentBytes::Remote(url) => self.download(&url).await?,
        };

        let file_hash = fingerprint(&bytes);

        // Advisory pre-check: avoids storing bytes for known duplicates.
        // The real guard is the unique (client_id, file_hash) index hit at
        // insert time, which also closes the duplicate-in-flight race.
        if self.existing_invoice(client.id, &file_hash).await?.is_some() {
            tracing::info!(
                client_id = %client.id,
                file_hash = %file_hash,
                "Duplicate document received, skipping"
            );
            self.notifier
                .send_opt(client.whatsapp_number.as_deref(), duplicate_message())
                .await;
            return Ok(IngestOutcome::Duplicate);
        }

        let file_path = invoice_blob_path(client.firm_id, client.id, &document.file_name);
        self.storage.put(&file_path, &bytes).await?;

        // Best-effort extraction; empty text is valid input for analysis.
        let raw_text = extract_text(&document.mime_type, &bytes).await;

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO invoices
                (firm_id, client_id, source_type, source_id, file_path, file_name,
                 file_type, file_size_bytes, file_hash, raw_text, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (client_id, file_hash) WHERE deleted_at IS NULL
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(client.firm_id)
        .bind(client.id)
        .bind(source_type)
        .bind(source_id)
        .bind(&file_path)
        .bind(&document.file_name)
        .bind(&document.mime_type)
        .bind(bytes.len() as i64)
        .bind(&file_hash)
        .bind(&raw_text)
        .bind(InvoiceStatus::Processing.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        let Some((invoice_id,)) = inserted else {
            // A concurrent submission of the same bytes won the insert.
            // The blob written above is orphaned; acceptable, logged.
            tracing::warn!(
                client_id = %client.id,
                file_hash = %file_hash,
                file_path = %file_path,
                "Concurrent duplicate detected at insert, blob orphaned"
            );
            self.notifier
                .send_opt(client.whatsapp_number.as_deref(), duplicate_message())
                .await;
            return Ok(IngestOutcome::Duplicate);
        };

        tracing::info!(
            invoice_id = %invoice_id,
            client_id = %client.id,
            firm_id = %client.firm_id,
            file_name = %document.file_name,
            source_type = source_type,
            "Invoice created"
        );

        // Audit failures never roll back the invoice creation.
        self.audit
            .record(
                client.firm_id,
                Some(client.id),
                "create",
                "invoice",
                invoice_id,
                serde_json::json!({
                    "source": source_type,
                    "filename": document.file_name,
                }),
            )
            .await;

        // Job-queue handoff: the caller does not wait on analysis. The
        // invoice row is already committed, so an enqueue failure is routed
        // to the dead-letter sink instead of surfacing to the webhook
        // caller, which would strand the invoice in `processing`.
        if let Err(e) = self.jobs.enqueue(invoice_id, client.firm_id).await {
            self.dead_letter_unqueued(invoice_id, client.firm_id, &e).await;
        }

        self.notifier
            .send_opt(
                client.whatsapp_number.as_deref(),
                &ack_message(&document.file_name, invoice_id),
            )
            .await;

        Ok(IngestOutcome::Created { invoice_id })
    }

    /// Terminal handling for an invoice whose analysis job could not be
    /// enqueued: dead-letter it and mark the invoice `error` so it never
    /// lingers in `processing` with no job to pick it up.
    async fn dead_letter_unqueued(&self, invoice_id: Uuid, firm_id: Uuid, cause: &PipelineError) {
        tracing::error!(
            invoice_id = %invoice_id,
            error = %cause,
            "Failed to enqueue analysis job"
        );

        let dlq_result = self
            .dlq
            .record(
                invoice_id,
                firm_id,
                &format!("analysis enqueue failed: {cause}"),
                serde_json::json!({ "invoice_id": invoice_id }),
            )
            .await;
        if let Err(e) = dlq_result {
            tracing::error!(
                invoice_id = %invoice_id,
                error = %e,
                "Failed to write dead-letter entry for unqueued invoice"
            );
        }

        let update = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ($3, $4)
            "#,
        )
        .bind(invoice_id)
        .bind(InvoiceStatus::Error.as_str())
        .bind(InvoiceStatus::Pending.as_str())
        .bind(InvoiceStatus::Processing.as_str())
        .execute(&self.pool)
        .await;
        if let Err(e) = update {
            tracing::error!(
                invoice_id = %invoice_id,
                error = %e,
                "Failed to mark unqueued invoice as errored"
            );
        }
    }

    async fn download(&self, url: &str) -> PipelineResult<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| PipelineError::Download(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::Download(format!(
                "media fetch returned status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::Download(e.to_string()))?;

        Ok(bytes.to_vec())
    }

    async fn existing_invoice(
        &self,
        client_id: Uuid,
        file_hash: &str,
    ) -> PipelineResult<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM invoices
            WHERE client_id = $1 AND file_hash = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(client_id)
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        Ok(row.map(|(id,)| id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_sha256_hex() {
        let a = fingerprint(b"invoice bytes");
        let b = fingerprint(b"invoice bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_differs_on_any_byte_change() {
        assert_ne!(fingerprint(b"invoice bytes"), fingerprint(b"invoice bytez"));
        assert_ne!(fingerprint(b""), fingerprint(b" "));
    }

    #[test]
    fn ack_message_uses_short_invoice_id() {
        let id = Uuid::new_v4();
        let msg = ack_message("fatura.pdf", id);
        assert!(msg.contains("*fatura.pdf*"));
        assert!(msg.contains(&id.to_string()[..8]));
        assert!(!msg.contains(&id.to_string()));
    }
}
