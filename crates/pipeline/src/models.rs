//! Persisted entities and domain enums
//!
//! Row structs mirror the database schema and keep enum-ish columns as
//! `String` (enum conversion happens at the edges, where it matters).
//! Every table is scoped by `firm_id`; clients and invoices are
//! soft-deleted via `deleted_at` and never hard-deleted.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Invoice lifecycle status.
///
/// `pending` -> `processing` -> `analyzed` | `error`. `archived` is set by
/// external tooling only; the pipeline never produces it and never reverts
/// a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Processing,
    Analyzed,
    Error,
    Archived,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Processing => "processing",
            InvoiceStatus::Analyzed => "analyzed",
            InvoiceStatus::Error => "error",
            InvoiceStatus::Archived => "archived",
        }
    }

    /// Parse a stored status column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InvoiceStatus::Pending),
            "processing" => Some(InvoiceStatus::Processing),
            "analyzed" => Some(InvoiceStatus::Analyzed),
            "error" => Some(InvoiceStatus::Error),
            "archived" => Some(InvoiceStatus::Archived),
            _ => None,
        }
    }

    /// Terminal statuses are never reverted within the pipeline.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Analyzed | InvoiceStatus::Error | InvoiceStatus::Archived
        )
    }
}

/// Coarse compliance risk classification assigned by analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Parse a provider-supplied risk level, defaulting to `medium` when
    /// the value is absent or unrecognized.
    pub fn parse_or_default(s: Option<&str>) -> Self {
        match s {
            Some("low") => RiskLevel::Low,
            Some("medium") => RiskLevel::Medium,
            Some("high") => RiskLevel::High,
            Some("critical") => RiskLevel::Critical,
            _ => RiskLevel::Medium,
        }
    }
}

/// Severity of a single analysis issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Info,
    Warning,
    Critical,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Info => "info",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Critical => "critical",
        }
    }

    /// Unrecognized severities rank as `info` so they never trigger alerts.
    pub fn parse_or_default(s: Option<&str>) -> Self {
        match s {
            Some("info") => IssueSeverity::Info,
            Some("warning") => IssueSeverity::Warning,
            Some("critical") => IssueSeverity::Critical,
            _ => IssueSeverity::Info,
        }
    }
}

/// A firm (tenant) row. The unit of data isolation.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Firm {
    pub id: Uuid,
    pub name: String,
    pub country_code: String,
    pub preferred_llm: Option<String>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A firm's customer whose invoices are tracked.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Client {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub name: String,
    pub tax_id: Option<String>,
    /// Stored digits-only; matched against normalized inbound sender ids.
    pub whatsapp_number: Option<String>,
    pub regime_iva: String,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

/// A client joined with the tenant-level preferences analysis needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClientWithFirm {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub name: String,
    pub whatsapp_number: Option<String>,
    pub regime_iva: String,
    pub country_code: String,
    pub preferred_llm: Option<String>,
}

/// An ingested invoice document.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub client_id: Uuid,
    pub source_type: String,
    pub source_id: Option<String>,
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size_bytes: Option<i64>,
    pub file_hash: String,
    pub raw_text: Option<String>,
    pub extracted_data: serde_json::Value,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

/// One compliance finding inside an analysis. Not independently addressable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisIssue {
    pub code: String,
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

/// IVA (VAT) validation verdict inside an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvaValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for IvaValidation {
    fn default() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Optional recoverable-tax estimate inside an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverableTax {
    pub amount: f64,
    pub confidence: f64,
    pub reason: String,
}

/// Normalized result of one AI compliance analysis.
///
/// This is the fixed schema every provider reply is coerced into; malformed
/// replies degrade to [`AnalysisResult::parse_failure`] instead of erroring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub compliance_score: i32,
    pub risk_level: RiskLevel,
    pub iva_validation: IvaValidation,
    pub recoverable_tax: Option<RecoverableTax>,
    pub issues: Vec<AnalysisIssue>,
    pub confidence_score: f64,
}

impl AnalysisResult {
    /// Safe default produced when a provider reply is not parseable JSON.
    ///
    /// Degrades gracefully so downstream alerting keeps working: score 50,
    /// medium risk, a single synthetic `PARSE_ERROR` warning, confidence 0.
    pub fn parse_failure() -> Self {
        Self {
            compliance_score: 50,
            risk_level: RiskLevel::Medium,
            iva_validation: IvaValidation {
                is_valid: false,
                errors: vec!["Failed to parse AI analysis".to_string()],
                warnings: Vec::new(),
            },
            recoverable_tax: None,
            issues: vec![AnalysisIssue {
                code: "PARSE_ERROR".to_string(),
                severity: IssueSeverity::Warning,
                message: "Could not parse AI analysis results".to_string(),
                suggested_action: Some("Please review manually".to_string()),
            }],
            confidence_score: 0.0,
        }
    }
}

/// A persisted analysis row, one per successful analysis attempt.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Analysis {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub invoice_id: Uuid,
    pub client_id: Uuid,
    pub llm_provider: String,
    pub llm_model: String,
    pub compliance_score: i32,
    pub risk_level: String,
    pub iva_validation: serde_json::Value,
    pub recoverable_tax: Option<serde_json::Value>,
    pub issues: serde_json::Value,
    pub confidence_score: f64,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<OffsetDateTime>,
    pub review_notes: Option<String>,
    pub created_at: OffsetDateTime,
}

/// An alert derived from a critical or warning analysis issue.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub client_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub analysis_id: Option<Uuid>,
    pub severity: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub suggested_action: Option<String>,
    pub resolved_at: Option<OffsetDateTime>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A dead-letter entry capturing an unrecoverable analysis failure.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub firm_id: Uuid,
    pub error_message: String,
    pub original_payload: serde_json::Value,
    pub created_at: OffsetDateTime,
}
