//! Analysis orchestration
//!
//! Drives one invoice through AI compliance analysis: provider selection,
//! bounded invocation, persistence of the analysis, alert derivation,
//! invoice status transition, and the critical-issue notification. Any
//! unrecoverable failure lands in the dead-letter table and marks the
//! invoice `error`; nothing re-throws past the orchestrator boundary.

use sqlx::PgPool;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::alerts::AlertService;
use crate::dlq::DeadLetterRecorder;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnalysisResult, ClientWithFirm, Invoice, InvoiceStatus, IssueSeverity};
use crate::notify::NotificationSender;
use crate::provider::{AiProvider, AnalysisRequest, ProviderConfig};

/// Terminal outcome of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Analyzed { analysis_id: Uuid },
    /// Failure captured in the dead-letter table; invoice marked `error`.
    DeadLettered { error: String },
    /// Invoice already in a terminal status; nothing to do.
    Skipped,
}

/// Map a stored mimetype to the document type the prompt mentions.
pub fn document_type_for(file_type: &str) -> &'static str {
    if file_type.contains("xml") {
        "xml"
    } else {
        "pdf"
    }
}

fn critical_notification(file_name: &str, result: &AnalysisResult) -> String {
    let bullets: Vec<String> = result
        .issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Critical)
        .map(|i| format!("- {}", i.message))
        .collect();

    format!(
        "*Atencao: Problemas criticos detectados*\n\n\
         Fatura: {file_name}\n\n{}\n\n\
         Entre em contato com seu contador para mais informacoes.",
        bullets.join("\n")
    )
}

pub struct AnalysisOrchestrator {
    pool: PgPool,
    http: reqwest::Client,
    provider_config: ProviderConfig,
    alerts: AlertService,
    notifier: NotificationSender,
    dlq: DeadLetterRecorder,
}

impl AnalysisOrchestrator {
    pub fn new(
        pool: PgPool,
        http: reqwest::Client,
        provider_config: ProviderConfig,
        alerts: AlertService,
        notifier: NotificationSender,
        dlq: DeadLetterRecorder,
    ) -> Self {
        Self {
            pool,
            http,
            provider_config,
            alerts,
            notifier,
            dlq,
        }
    }

    /// Analyze one persisted invoice.
    ///
    /// Returns `Err` only when the invoice itself cannot be loaded; every
    /// failure past that point is dead-lettered and reported through
    /// [`AnalysisOutcome::DeadLettered`].
    pub async fn analyze_invoice(&self, invoice_id: Uuid) -> PipelineResult<AnalysisOutcome> {
        let invoice = self.load_invoice(invoice_id).await?;

        // Terminal statuses never revert within the pipeline.
        if InvoiceStatus::parse(&invoice.status).is_some_and(InvoiceStatus::is_terminal) {
            tracing::debug!(
                invoice_id = %invoice_id,
                status = %invoice.status,
                "Invoice already terminal, skipping analysis"
            );
            return Ok(AnalysisOutcome::Skipped);
        }

        let client = self.load_client(invoice.client_id).await?;

        match self.run_analysis(&invoice, &client).await {
            Ok(analysis_id) => Ok(AnalysisOutcome::Analyzed { analysis_id }),
            Err(e) => {
                let message = e.to_string();

                // Designated terminal failure sink: record, mark, swallow.
                let dlq_result = self
                    .dlq
                    .record(
                        invoice.id,
                        invoice.firm_id,
                        &message,
                        serde_json::json!({ "invoice_id": invoice.id }),
                    )
                    .await;
                if let Err(dlq_err) = dlq_result {
                    tracing::error!(
                        invoice_id = %invoice.id,
                        error = %dlq_err,
                        "Failed to write dead-letter entry"
                    );
                }

                if let Err(update_err) = self.mark_invoice_error(invoice.id).await {
                    tracing::error!(
                        invoice_id = %invoice.id,
                        error = %update_err,
                        "Failed to mark invoice as errored"
                    );
                }

                Ok(AnalysisOutcome::DeadLettered { error: message })
            }
        }
    }

    async fn run_analysis(
        &self,
        invoice: &Invoice,
        client: &ClientWithFirm,
    ) -> PipelineResult<Uuid> {
        let provider = AiProvider::for_name(
            client.preferred_llm.as_deref(),
            self.http.clone(),
            self.provider_config.clone(),
        );

        let request = AnalysisRequest {
            invoice_text: invoice.raw_text.clone().unwrap_or_default(),
            document_type: document_type_for(&invoice.file_type).to_string(),
            country_code: client.country_code.clone(),
            regime_iva: client.regime_iva.clone(),
        };

        tracing::info!(
            invoice_id = %invoice.id,
            provider = provider.name(),
            country = %request.country_code,
            "Starting invoice analysis"
        );

        let result = provider.analyze(&request).await?;

        let analysis_id = self
            .persist_analysis(invoice, provider.name(), provider.model(), &result)
            .await?;

        self.alerts
            .create_for_issues(
                invoice.firm_id,
                invoice.client_id,
                invoice.id,
                analysis_id,
                &result.issues,
            )
            .await?;

        self.mark_invoice_analyzed(invoice.id, &result).await?;

        tracing::info!(
            invoice_id = %invoice.id,
            analysis_id = %analysis_id,
            compliance_score = result.compliance_score,
            risk_level = result.risk_level.as_str(),
            issues = result.issues.len(),
            "Invoice analysis complete"
        );

        let has_criticals = result
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Critical);
        if has_criticals {
            self.notifier
                .send_opt(
                    client.whatsapp_number.as_deref(),
                    &critical_notification(&invoice.file_name, &result),
                )
                .await;
        }

        Ok(analysis_id)
    }

    async fn persist_analysis(
        &self,
        invoice: &Invoice,
        provider_name: &str,
        model: &str,
        result: &AnalysisResult,
    ) -> PipelineResult<Uuid> {
        let iva_validation = serde_json::to_value(&result.iva_validation)
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        let recoverable_tax = result
            .recoverable_tax
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        let issues = serde_json::to_value(&result.issues)
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;

        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO analyses
                (firm_id, invoice_id, client_id, llm_provider, llm_model,
                 compliance_score, risk_level, iva_validation, recoverable_tax,
                 issues, confidence_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(invoice.firm_id)
        .bind(invoice.id)
        .bind(invoice.client_id)
        .bind(provider_name)
        .bind(model)
        .bind(result.compliance_score)
        .bind(result.risk_level.as_str())
        .bind(iva_validation)
        .bind(recoverable_tax)
        .bind(issues)
        .bind(result.confidence_score)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        Ok(id)
    }

    async fn mark_invoice_analyzed(
        &self,
        invoice_id: Uuid,
        result: &AnalysisResult,
    ) -> PipelineResult<()> {
        let mut payload = serde_json::to_value(result)
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        if let Some(obj) = payload.as_object_mut() {
            let analyzed_at = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default();
            obj.insert("analyzed_at".to_string(), serde_json::json!(analyzed_at));
        }

        sqlx::query(
            r#"
            UPDATE invoices
            SET status = $3,
                extracted_data = extracted_data || $2,
                updated_at = NOW()
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(invoice_id)
        .bind(payload)
        .bind(InvoiceStatus::Analyzed.as_str())
        .bind(InvoiceStatus::Processing.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        Ok(())
    }

    async fn mark_invoice_error(&self, invoice_id: Uuid) -> PipelineResult<()> {
        sqlx::query(
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
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        Ok(())
    }

    async fn load_invoice(&self, invoice_id: Uuid) -> PipelineResult<Invoice> {
        let invoice: Option<Invoice> = sqlx::query_as(
            r#"
            SELECT id, firm_id, client_id, source_type, source_id, file_path, file_name,
                   file_type, file_size_bytes, file_hash, raw_text, extracted_data,
                   status, created_at, updated_at, deleted_at
            FROM invoices
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        invoice.ok_or_else(|| PipelineError::NotFound(format!("invoice {invoice_id}")))
    }

    async fn load_client(&self, client_id: Uuid) -> PipelineResult<ClientWithFirm> {
        let client: Option<ClientWithFirm> = sqlx::query_as(
            r#"
            SELECT c.id, c.firm_id, c.name, c.whatsapp_number, c.regime_iva,
                   f.country_code, f.preferred_llm
            FROM clients c
            JOIN firms f ON f.id = c.firm_id
            WHERE c.id = $1 AND c.deleted_at IS NULL
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        client.ok_or_else(|| PipelineError::NotFound(format!("client {client_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisIssue, IvaValidation, RiskLevel};

    #[test]
    fn document_type_mapping() {
        assert_eq!(document_type_for("application/pdf"), "pdf");
        assert_eq!(document_type_for("text/xml"), "xml");
        assert_eq!(document_type_for("application/xml"), "xml");
        assert_eq!(document_type_for("application/octet-stream"), "pdf");
    }

    #[test]
    fn critical_notification_lists_only_critical_messages() {
        let result = AnalysisResult {
            compliance_score: 40,
            risk_level: RiskLevel::High,
            iva_validation: IvaValidation::default(),
            recoverable_tax: None,
            issues: vec![
                AnalysisIssue {
                    code: "IVA_RATE_INVALID".to_string(),
                    severity: IssueSeverity::Critical,
                    message: "Taxa de IVA invalida".to_string(),
                    suggested_action: None,
                },
                AnalysisIssue {
                    code: "MISSING_NIF".to_string(),
                    severity: IssueSeverity::Warning,
                    message: "NIF do cliente em falta".to_string(),
                    suggested_action: None,
                },
            ],
            confidence_score: 0.9,
        };

        let msg = critical_notification("fatura.pdf", &result);
        assert!(msg.contains("fatura.pdf"));
        assert!(msg.contains("- Taxa de IVA invalida"));
        assert!(!msg.contains("NIF do cliente em falta"));
    }
}
