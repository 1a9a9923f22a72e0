//! AI provider client for invoice compliance analysis
//!
//! Providers are a closed set keyed by name; unknown or unset names fall
//! back to the SiliconFlow baseline. The provider call is bounded (30s per
//! attempt, 3 attempts, exponential backoff) and its reply is coerced into
//! the fixed [`AnalysisResult`] schema. A reply that is not valid JSON
//! degrades to a safe default instead of erroring, so downstream alerting
//! keeps working.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    AnalysisIssue, AnalysisResult, IssueSeverity, IvaValidation, RecoverableTax, RiskLevel,
};

const DEFAULT_API_URL: &str = "https://api.siliconflow.cn/v1";
const SILICONFLOW_MODEL: &str = "deepseek-ai/DeepSeek-V2.5";

/// Provider connection settings, shared by all provider variants.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_attempts: usize,
    pub backoff_base_ms: u64,
}

impl ProviderConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_base_ms: 1000,
        }
    }
}

/// Parameters for one analysis request.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub invoice_text: String,
    pub document_type: String,
    pub country_code: String,
    pub regime_iva: String,
}

/// Closed registry of AI providers, keyed by name.
///
/// Unrecognized or missing names select the SiliconFlow baseline.
pub enum AiProvider {
    SiliconFlow(SiliconFlowProvider),
}

impl AiProvider {
    pub fn for_name(
        name: Option<&str>,
        http: reqwest::Client,
        config: ProviderConfig,
    ) -> Self {
        match name {
            Some("siliconflow") | Some("") | None => {
                AiProvider::SiliconFlow(SiliconFlowProvider::new(http, config))
            }
            Some(other) => {
                tracing::warn!(provider = other, "Unknown AI provider, using siliconflow");
                AiProvider::SiliconFlow(SiliconFlowProvider::new(http, config))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AiProvider::SiliconFlow(_) => "siliconflow",
        }
    }

    pub fn model(&self) -> &'static str {
        match self {
            AiProvider::SiliconFlow(p) => p.model(),
        }
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> PipelineResult<AnalysisResult> {
        match self {
            AiProvider::SiliconFlow(p) => p.analyze(request).await,
        }
    }
}

/// SiliconFlow chat-completions client (OpenAI-compatible wire format).
pub struct SiliconFlowProvider {
    http: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'static str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatCompletionMessage,
}

#[derive(Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

impl SiliconFlowProvider {
    pub fn new(http: reqwest::Client, config: ProviderConfig) -> Self {
        Self { http, config }
    }

    pub fn model(&self) -> &'static str {
        SILICONFLOW_MODEL
    }

    /// Run one analysis with bounded retries and exponential backoff.
    ///
    /// A non-2xx status, a transport error, or a malformed completion
    /// envelope all count as a failed attempt; exhausting the attempts is a
    /// terminal provider error for the orchestrator to dead-letter.
    pub async fn analyze(&self, request: &AnalysisRequest) -> PipelineResult<AnalysisResult> {
        // Base delay doubling per retry: base, 2*base, ...
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.config.backoff_base_ms / 2)
            .take(self.config.max_attempts.saturating_sub(1));

        Retry::spawn(strategy, || self.attempt(request)).await
    }

    async fn attempt(&self, request: &AnalysisRequest) -> PipelineResult<AnalysisResult> {
        let system = system_prompt(&request.country_code);
        let user = build_user_prompt(request);
        let body = ChatRequest {
            model: SILICONFLOW_MODEL,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.3,
            max_tokens: 2000,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Provider(format!(
                "provider returned status {status}"
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("malformed completion: {e}")))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PipelineError::Provider("empty completion content".to_string()))?;

        Ok(parse_analysis(&content))
    }
}

/// System instruction per tax jurisdiction.
///
/// Portugal gets the detailed IVA ruleset; everything else a generic,
/// schema-only instruction.
pub fn system_prompt(country_code: &str) -> String {
    if country_code == "PT" {
        return r#"You are a Portuguese tax compliance expert. Analyze invoices for IVA (VAT) compliance according to Portuguese tax law.

Rules to check:
1. IVA rates: 6% (reduced), 13% (intermediate), 23% (standard), 0% (exempt)
2. Required fields: invoice number, date, supplier NIF, customer NIF, total amount, tax amount
3. NIF must be 9 digits and valid
4. SAF-T compliance for electronic invoices
5. Deductibility of IVA depends on the activity sector

Respond ONLY with valid JSON in this exact format:
{
  "compliance_score": 0-100,
  "risk_level": "low|medium|high|critical",
  "iva_validation": {
    "is_valid": boolean,
    "errors": ["error1", "error2"],
    "warnings": ["warning1", "warning2"]
  },
  "recoverable_tax": {
    "amount": number,
    "confidence": 0-1,
    "reason": "explanation"
  } | null,
  "issues": [
    {
      "code": "ERROR_CODE",
      "severity": "info|warning|critical",
      "message": "description",
      "suggested_action": "what to do"
    }
  ],
  "confidence_score": 0-1
}"#
            .to_string();
    }

    r#"You are a tax compliance expert. Analyze invoices for tax compliance.

Respond ONLY with valid JSON in this exact format:
{
  "compliance_score": 0-100,
  "risk_level": "low|medium|high|critical",
  "iva_validation": {
    "is_valid": boolean,
    "errors": [],
    "warnings": []
  },
  "recoverable_tax": null,
  "issues": [],
  "confidence_score": 0-1
}"#
    .to_string()
}

/// User instruction embedding the extracted document text and context.
pub fn build_user_prompt(request: &AnalysisRequest) -> String {
    format!(
        "Analyze the following invoice for tax compliance:\n\n\
         DOCUMENT TYPE: {}\n\
         COUNTRY: {}\n\
         TAX REGIME: {}\n\n\
         INVOICE CONTENT:\n{}\n\n\
         Provide a detailed analysis including compliance score, risk level, \
         IVA validation, any recoverable tax, and specific issues found.",
        request.document_type, request.country_code, request.regime_iva, request.invoice_text
    )
}

/// Coerce a provider reply into the fixed analysis schema.
///
/// Field-level defaults: score 0, risk `medium`, iva_validation valid with
/// empty lists, recoverable_tax null, issues empty, confidence 0.5. A reply
/// that fails to parse as JSON at all degrades to
/// [`AnalysisResult::parse_failure`].
pub fn parse_analysis(content: &str) -> AnalysisResult {
    let value: serde_json::Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse provider analysis JSON");
            return AnalysisResult::parse_failure();
        }
    };

    let compliance_score = value
        .get("compliance_score")
        .and_then(|v| v.as_f64())
        .map(|v| v.round().clamp(0.0, 100.0) as i32)
        .unwrap_or(0);

    let risk_level = RiskLevel::parse_or_default(value.get("risk_level").and_then(|v| v.as_str()));

    let iva = value.get("iva_validation");
    let iva_validation = IvaValidation {
        is_valid: iva
            .and_then(|v| v.get("is_valid"))
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
        errors: string_list(iva.and_then(|v| v.get("errors"))),
        warnings: string_list(iva.and_then(|v| v.get("warnings"))),
    };

    let recoverable_tax = value
        .get("recoverable_tax")
        .filter(|v| !v.is_null())
        .map(|v| RecoverableTax {
            amount: v.get("amount").and_then(|a| a.as_f64()).unwrap_or(0.0),
            confidence: v
                .get("confidence")
                .and_then(|c| c.as_f64())
                .unwrap_or(0.0)
                .clamp(0.0, 1.0),
            reason: v
                .get("reason")
                .and_then(|r| r.as_str())
                .unwrap_or_default()
                .to_string(),
        });

    let issues = value
        .get("issues")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(parse_issue).collect())
        .unwrap_or_default();

    let confidence_score = value
        .get("confidence_score")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);

    AnalysisResult {
        compliance_score,
        risk_level,
        iva_validation,
        recoverable_tax,
        issues,
        confidence_score,
    }
}

fn parse_issue(value: &serde_json::Value) -> Option<AnalysisIssue> {
    let code = value.get("code").and_then(|v| v.as_str())?;
    Some(AnalysisIssue {
        code: code.to_string(),
        severity: IssueSeverity::parse_or_default(value.get("severity").and_then(|v| v.as_str())),
        message: value
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        suggested_action: value
            .get("suggested_action")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            invoice_text: "FATURA FT 2026/001 Total 123.00 IVA 23%".to_string(),
            document_type: "pdf".to_string(),
            country_code: "PT".to_string(),
            regime_iva: "geral".to_string(),
        }
    }

    fn test_config(base_url: String) -> ProviderConfig {
        ProviderConfig {
            api_key: "test-key".to_string(),
            base_url,
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff_base_ms: 10,
        }
    }

    #[test]
    fn portuguese_jurisdiction_gets_iva_ruleset() {
        let prompt = system_prompt("PT");
        assert!(prompt.contains("Portuguese tax compliance expert"));
        assert!(prompt.contains("IVA rates"));
    }

    #[test]
    fn unknown_jurisdiction_gets_generic_prompt() {
        let prompt = system_prompt("DE");
        assert!(!prompt.contains("Portuguese"));
        assert!(prompt.contains("valid JSON"));
    }

    #[test]
    fn user_prompt_embeds_context() {
        let prompt = build_user_prompt(&request());
        assert!(prompt.contains("DOCUMENT TYPE: pdf"));
        assert!(prompt.contains("COUNTRY: PT"));
        assert!(prompt.contains("TAX REGIME: geral"));
        assert!(prompt.contains("FT 2026/001"));
    }

    #[test]
    fn parse_full_response() {
        let content = r#"{
            "compliance_score": 40,
            "risk_level": "high",
            "iva_validation": {"is_valid": false, "errors": ["bad rate"], "warnings": []},
            "recoverable_tax": {"amount": 12.5, "confidence": 0.8, "reason": "deductible"},
            "issues": [
                {"code": "IVA_RATE_INVALID", "severity": "critical", "message": "Rate 21% is not a Portuguese IVA rate", "suggested_action": "Correct the rate"}
            ],
            "confidence_score": 0.9
        }"#;
        let result = parse_analysis(content);
        assert_eq!(result.compliance_score, 40);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert!(!result.iva_validation.is_valid);
        assert_eq!(result.iva_validation.errors, vec!["bad rate"]);
        let tax = result.recoverable_tax.unwrap();
        assert_eq!(tax.amount, 12.5);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].code, "IVA_RATE_INVALID");
        assert_eq!(result.issues[0].severity, IssueSeverity::Critical);
        assert_eq!(result.confidence_score, 0.9);
    }

    #[test]
    fn parse_defaults_for_missing_fields() {
        let result = parse_analysis("{}");
        assert_eq!(result.compliance_score, 0);
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert!(result.iva_validation.is_valid);
        assert!(result.iva_validation.errors.is_empty());
        assert!(result.recoverable_tax.is_none());
        assert!(result.issues.is_empty());
        assert_eq!(result.confidence_score, 0.5);
    }

    #[test]
    fn parse_invalid_json_degrades_to_default() {
        let result = parse_analysis("the model felt chatty today");
        assert_eq!(result, AnalysisResult::parse_failure());
    }

    #[test]
    fn parse_clamps_out_of_range_scores() {
        let result = parse_analysis(r#"{"compliance_score": 250, "confidence_score": 3.0}"#);
        assert_eq!(result.compliance_score, 100);
        assert_eq!(result.confidence_score, 1.0);
    }

    #[test]
    fn parse_skips_issues_without_code() {
        let result = parse_analysis(
            r#"{"issues": [{"severity": "critical", "message": "no code"}, {"code": "OK", "message": "m"}]}"#,
        );
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].code, "OK");
    }

    #[test]
    fn invalid_risk_level_defaults_to_medium() {
        let result = parse_analysis(r#"{"risk_level": "catastrophic"}"#);
        assert_eq!(result.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn unknown_provider_name_falls_back_to_baseline() {
        let provider = AiProvider::for_name(
            Some("chatgpt-9000"),
            reqwest::Client::new(),
            test_config(DEFAULT_API_URL.to_string()),
        );
        assert_eq!(provider.name(), "siliconflow");
        assert_eq!(provider.model(), SILICONFLOW_MODEL);
    }

    #[tokio::test]
    async fn analyze_returns_parsed_result() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "{\"compliance_score\": 88, \"risk_level\": \"low\"}"
                }
            }]
        });
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let provider = SiliconFlowProvider::new(reqwest::Client::new(), test_config(server.url()));
        let result = provider.analyze(&request()).await.unwrap();
        assert_eq!(result.compliance_score, 88);
        assert_eq!(result.risk_level, RiskLevel::Low);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn analyze_exhausts_all_attempts_on_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let provider = SiliconFlowProvider::new(reqwest::Client::new(), test_config(server.url()));
        let err = provider.analyze(&request()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Provider(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn analyze_treats_empty_content_as_failed_attempt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": [{"message": {"content": ""}}]}"#)
            .expect(3)
            .create_async()
            .await;

        let provider = SiliconFlowProvider::new(reqwest::Client::new(), test_config(server.url()));
        assert!(provider.analyze(&request()).await.is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn analyze_degrades_gracefully_on_unparseable_content() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": [{"message": {"content": "I cannot answer in JSON"}}]}"#)
            .create_async()
            .await;

        let provider = SiliconFlowProvider::new(reqwest::Client::new(), test_config(server.url()));
        let result = provider.analyze(&request()).await.unwrap();
        assert_eq!(result, AnalysisResult::parse_failure());
    }
}
