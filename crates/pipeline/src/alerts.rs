//! Alert derivation and resolution
//!
//! Alerts are derived 1:N from an analysis's critical and warning issues
//! (criticals first) and are only ever mutated by an explicit resolve
//! action; they are never auto-deleted.

use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Alert, AnalysisIssue, IssueSeverity};

/// Order issues for alert creation: criticals first, then warnings.
/// Info-level issues never become alerts.
pub fn alertable_issues(issues: &[AnalysisIssue]) -> Vec<&AnalysisIssue> {
    let criticals = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Critical);
    let warnings = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Warning);
    criticals.chain(warnings).collect()
}

#[derive(Clone)]
pub struct AlertService {
    pool: PgPool,
    audit: AuditLogger,
}

impl AlertService {
    pub fn new(pool: PgPool, audit: AuditLogger) -> Self {
        Self { pool, audit }
    }

    /// Create one alert row per alertable issue, in order.
    ///
    /// Inserts are discrete sequential operations; a failure surfaces to
    /// the orchestrator (which dead-letters), and downstream readers must
    /// tolerate an analyzed invoice with missing alerts.
    pub async fn create_for_issues(
        &self,
        firm_id: Uuid,
        client_id: Uuid,
        invoice_id: Uuid,
        analysis_id: Uuid,
        issues: &[AnalysisIssue],
    ) -> PipelineResult<Vec<Uuid>> {
        let mut created = Vec::new();

        for issue in alertable_issues(issues) {
            let (id,): (Uuid,) = sqlx::query_as(
                r#"
                INSERT INTO alerts
                    (firm_id, client_id, invoice_id, analysis_id, severity, category,
                     title, description, suggested_action)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING id
                "#,
            )
            .bind(firm_id)
            .bind(client_id)
            .bind(invoice_id)
            .bind(analysis_id)
            .bind(issue.severity.as_str())
            .bind(&issue.code)
            .bind(&issue.message)
            .bind(&issue.message)
            .bind(&issue.suggested_action)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PipelineError::Database(e.to_string()))?;

            created.push(id);
        }

        if !created.is_empty() {
            tracing::info!(
                invoice_id = %invoice_id,
                analysis_id = %analysis_id,
                alerts = created.len(),
                "Alerts created from analysis issues"
            );
        }

        Ok(created)
    }

    /// Resolve an alert.
    ///
    /// Idempotent: the guarded UPDATE only fires while `resolved_at` is
    /// null, so a second resolve keeps the first resolver and timestamp.
    /// Returns the alert in its (possibly previously) resolved state.
    pub async fn resolve(
        &self,
        firm_id: Uuid,
        alert_id: Uuid,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> PipelineResult<Alert> {
        let updated = sqlx::query(
            r#"
            UPDATE alerts
            SET resolved_at = NOW(), resolved_by = $3, resolution_notes = $4, updated_at = NOW()
            WHERE id = $1 AND firm_id = $2 AND resolved_at IS NULL
            "#,
        )
        .bind(alert_id)
        .bind(firm_id)
        .bind(resolved_by)
        .bind(notes)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        let alert: Option<Alert> = sqlx::query_as(
            r#"
            SELECT id, firm_id, client_id, invoice_id, analysis_id, severity, category,
                   title, description, suggested_action, resolved_at, resolved_by,
                   resolution_notes, created_at, updated_at
            FROM alerts
            WHERE id = $1 AND firm_id = $2
            "#,
        )
        .bind(alert_id)
        .bind(firm_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        let alert = alert.ok_or_else(|| PipelineError::NotFound(format!("alert {alert_id}")))?;

        // Audited only when this call actually resolved the alert, so an
        // idempotent re-resolve leaves no duplicate trail.
        if updated.rows_affected() > 0 {
            self.audit
                .record(
                    firm_id,
                    alert.client_id,
                    "update",
                    "alert",
                    alert_id,
                    serde_json::json!({ "resolved_by": resolved_by }),
                )
                .await;
        }

        Ok(alert)
    }

    /// Count unresolved warning/critical alerts for a client (the `/status`
    /// command counter).
    pub async fn pending_count(&self, client_id: Uuid) -> PipelineResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM alerts
            WHERE client_id = $1
              AND resolved_at IS NULL
              AND severity IN ('warning', 'critical')
            "#,
        )
        .bind(client_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(code: &str, severity: IssueSeverity) -> AnalysisIssue {
        AnalysisIssue {
            code: code.to_string(),
            severity,
            message: format!("message for {code}"),
            suggested_action: None,
        }
    }

    #[test]
    fn criticals_order_before_warnings() {
        let issues = vec![
            issue("W1", IssueSeverity::Warning),
            issue("C1", IssueSeverity::Critical),
            issue("I1", IssueSeverity::Info),
            issue("W2", IssueSeverity::Warning),
            issue("C2", IssueSeverity::Critical),
        ];
        let ordered: Vec<&str> = alertable_issues(&issues)
            .iter()
            .map(|i| i.code.as_str())
            .collect();
        assert_eq!(ordered, vec!["C1", "C2", "W1", "W2"]);
    }

    #[test]
    fn info_issues_never_alert() {
        let issues = vec![issue("I1", IssueSeverity::Info), issue("I2", IssueSeverity::Info)];
        assert!(alertable_issues(&issues).is_empty());
    }

    #[test]
    fn one_alert_per_alertable_issue() {
        let issues = vec![
            issue("C1", IssueSeverity::Critical),
            issue("W1", IssueSeverity::Warning),
        ];
        assert_eq!(alertable_issues(&issues).len(), 2);
    }
}
