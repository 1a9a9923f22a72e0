//! Dead-letter recording for unrecoverable analysis failures
//!
//! The dead-letter table is the terminal failure sink of the pipeline:
//! entries are written when analysis retries are exhausted or persistence
//! fails mid-flight, and are consumed by out-of-band retry tooling.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::DeadLetterEntry;

#[derive(Clone)]
pub struct DeadLetterRecorder {
    pool: PgPool,
}

impl DeadLetterRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Capture an unrecoverable analysis failure.
    pub async fn record(
        &self,
        invoice_id: Uuid,
        firm_id: Uuid,
        error_message: &str,
        original_payload: serde_json::Value,
    ) -> PipelineResult<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO analysis_dlq (invoice_id, firm_id, error_message, original_payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(invoice_id)
        .bind(firm_id)
        .bind(error_message)
        .bind(original_payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        tracing::error!(
            invoice_id = %invoice_id,
            firm_id = %firm_id,
            dlq_id = %id,
            error = error_message,
            "Analysis dead-lettered"
        );

        Ok(id)
    }

    /// List dead-letter entries for a tenant, newest first.
    pub async fn list(&self, firm_id: Uuid, limit: i64) -> PipelineResult<Vec<DeadLetterEntry>> {
        let entries = sqlx::query_as(
            r#"
            SELECT id, invoice_id, firm_id, error_message, original_payload, created_at
            FROM analysis_dlq
            WHERE firm_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(firm_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        Ok(entries)
    }
}
