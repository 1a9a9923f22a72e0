//! Analysis job queue
//!
//! Ingestion hands analysis off by enqueuing a job row instead of awaiting
//! the orchestrator, so the work survives the webhook response and can be
//! retried and observed independently of the HTTP request lifecycle. Jobs
//! are claimed with `FOR UPDATE SKIP LOCKED` so the worker binary and the
//! in-process drain loop can run side by side without double-processing.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};

/// One queued analysis job referencing an invoice.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub firm_id: Uuid,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub claimed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue an analysis job for an invoice.
    ///
    /// At most one live (queued or processing) job exists per invoice;
    /// enqueuing while one is live is a no-op returning the existing id.
    pub async fn enqueue(&self, invoice_id: Uuid, firm_id: Uuid) -> PipelineResult<Uuid> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO analysis_jobs (invoice_id, firm_id, status)
            VALUES ($1, $2, 'queued')
            ON CONFLICT (invoice_id) WHERE status IN ('queued', 'processing')
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(invoice_id)
        .bind(firm_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        if let Some((id,)) = inserted {
            tracing::info!(invoice_id = %invoice_id, job_id = %id, "Analysis job enqueued");
            return Ok(id);
        }

        let (existing,): (Uuid,) = sqlx::query_as(
            r#"
            SELECT id FROM analysis_jobs
            WHERE invoice_id = $1 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(invoice_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        tracing::debug!(invoice_id = %invoice_id, job_id = %existing, "Analysis job already live");
        Ok(existing)
    }

    /// Atomically claim up to `limit` queued jobs for processing.
    pub async fn claim_batch(&self, limit: i64) -> PipelineResult<Vec<AnalysisJob>> {
        let jobs = sqlx::query_as(
            r#"
            UPDATE analysis_jobs
            SET status = 'processing', attempts = attempts + 1, claimed_at = NOW()
            WHERE id IN (
                SELECT id FROM analysis_jobs
                WHERE status = 'queued'
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, invoice_id, firm_id, status, attempts, last_error, claimed_at, created_at
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        Ok(jobs)
    }

    pub async fn mark_done(&self, job_id: Uuid) -> PipelineResult<()> {
        sqlx::query("UPDATE analysis_jobs SET status = 'done', last_error = NULL WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn mark_error(&self, job_id: Uuid, error: &str) -> PipelineResult<()> {
        sqlx::query("UPDATE analysis_jobs SET status = 'error', last_error = $2 WHERE id = $1")
            .bind(job_id)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;
        Ok(())
    }

    /// Requeue jobs stuck in `processing` past the timeout (worker crashed
    /// mid-claim). Returns the number of recovered jobs.
    pub async fn requeue_stale(&self, timeout_minutes: i32) -> PipelineResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'queued', claimed_at = NULL
            WHERE status = 'processing'
              AND claimed_at < NOW() - ($1 || ' minutes')::INTERVAL
            "#,
        )
        .bind(timeout_minutes)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Delete terminal jobs older than the retention window.
    pub async fn cleanup_finished(&self, keep_days: i32) -> PipelineResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM analysis_jobs
            WHERE status IN ('done', 'error')
              AND created_at < NOW() - ($1 || ' days')::INTERVAL
            "#,
        )
        .bind(keep_days)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
