//! Audit event emission
//!
//! The pipeline emits create/update events for invoices and alerts. Audit
//! writes are best-effort: a failed insert is logged and swallowed so it
//! can never roll back the primary write it describes.

use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct AuditLogger {
    pool: PgPool,
}

impl AuditLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        firm_id: Uuid,
        client_id: Option<Uuid>,
        action_type: &str,
        resource_type: &str,
        resource_id: Uuid,
        metadata: serde_json::Value,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (firm_id, client_id, action_type, resource_type, resource_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(firm_id)
        .bind(client_id)
        .bind(action_type)
        .bind(resource_type)
        .bind(resource_id)
        .bind(metadata)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                firm_id = %firm_id,
                resource_type = resource_type,
                resource_id = %resource_id,
                error = %e,
                "Audit log write failed (non-fatal)"
            );
        }
    }
}
