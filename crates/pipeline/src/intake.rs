//! Document intake: webhook payload classification and sender resolution
//!
//! Resolves an inbound sender to a client (and through it, the tenant),
//! routes documents to ingestion and text to the command interpreter.

use serde::Deserialize;
use sqlx::PgPool;

use auditpack_shared::normalize_phone;

use crate::error::{PipelineError, PipelineResult};
use crate::models::ClientWithFirm;

/// Inbound chat-webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub data: MessageData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageData {
    #[serde(default)]
    pub id: Option<String>,
    pub from: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<TextContent>,
    #[serde(default)]
    pub document: Option<DocumentContent>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextContent {
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentContent {
    pub filename: String,
    pub mimetype: String,
    pub url: String,
}

/// Only message events are processed; everything else is acknowledged
/// without side effects.
pub fn is_message_event(event: &str) -> bool {
    event.contains("message")
}

/// Recognized text commands from the chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Status,
    Help,
    Other,
}

pub fn parse_command(text: &str) -> Command {
    match text.trim().to_lowercase().as_str() {
        "/status" | "status" => Command::Status,
        "/ajuda" | "/help" | "help" => Command::Help,
        _ => Command::Other,
    }
}

pub fn status_message(invoice_count: i64, pending_alerts: i64) -> String {
    format!(
        "*Status dos ultimos 30 dias*\n\n\
         Faturas recebidas: {invoice_count}\n\
         Alertas pendentes: {pending_alerts}\n\n\
         Para enviar uma fatura, simplesmente anexe o PDF ou XML aqui."
    )
}

pub fn help_message() -> String {
    "*Comandos disponiveis:*\n\n\
     /status - Ver status das faturas\n\
     /ajuda - Mostrar esta mensagem\n\n\
     Para enviar uma fatura, basta anexar o arquivo PDF ou XML nesta conversa."
        .to_string()
}

pub fn default_message() -> String {
    "Ola! Recebemos sua mensagem.\n\n\
     Para enviar uma fatura, anexe o arquivo PDF ou XML.\n\n\
     Digite /ajuda para ver os comandos disponiveis."
        .to_string()
}

#[derive(Clone)]
pub struct IntakeService {
    pool: PgPool,
}

impl IntakeService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve a sender identifier to a client with its tenant preferences.
    ///
    /// Match is exact against the normalized (digits-only) stored contact
    /// number; soft-deleted and inactive clients never match.
    pub async fn resolve_sender(&self, from: &str) -> PipelineResult<Option<ClientWithFirm>> {
        let number = normalize_phone(from);
        if number.is_empty() {
            return Ok(None);
        }

        let client = sqlx::query_as(
            r#"
            SELECT c.id, c.firm_id, c.name, c.whatsapp_number, c.regime_iva,
                   f.country_code, f.preferred_llm
            FROM clients c
            JOIN firms f ON f.id = c.firm_id
            WHERE c.whatsapp_number = $1
              AND c.deleted_at IS NULL
              AND c.is_active
              AND f.is_active
            "#,
        )
        .bind(&number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?;

        Ok(client)
    }

    /// Look up a client by id (the upload endpoint path).
    pub async fn client_by_id(
        &self,
        client_id: uuid::Uuid,
    ) -> PipelineResult<Option<ClientWithFirm>> {
        let client = sqlx::query_as(
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

        Ok(client)
    }

    /// Count invoices received for a client over the last 30 days.
    pub async fn recent_invoice_count(&self, client_id: uuid::Uuid) -> PipelineResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM invoices
            WHERE client_id = $1
              AND deleted_at IS NULL
              AND created_at >= NOW() - INTERVAL '30 days'
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

    #[test]
    fn message_events_are_classified() {
        assert!(is_message_event("messages.upsert"));
        assert!(is_message_event("message.received"));
        assert!(!is_message_event("connection.update"));
        assert!(!is_message_event("presence.update"));
    }

    #[test]
    fn commands_parse_case_insensitively() {
        assert_eq!(parse_command("/status"), Command::Status);
        assert_eq!(parse_command("  STATUS "), Command::Status);
        assert_eq!(parse_command("/ajuda"), Command::Help);
        assert_eq!(parse_command("help"), Command::Help);
        assert_eq!(parse_command("bom dia"), Command::Other);
    }

    #[test]
    fn status_message_embeds_counters() {
        let msg = status_message(7, 2);
        assert!(msg.contains("Faturas recebidas: 7"));
        assert!(msg.contains("Alertas pendentes: 2"));
    }

    #[test]
    fn webhook_payload_deserializes() {
        let raw = r#"{
            "event": "messages.upsert",
            "data": {
                "id": "msg-1",
                "from": "351912345678@c.us",
                "type": "document",
                "document": {
                    "filename": "fatura.pdf",
                    "mimetype": "application/pdf",
                    "url": "https://media.example/abc"
                },
                "timestamp": 1756400000
            }
        }"#;
        let payload: WebhookPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.data.message_type, "document");
        let doc = payload.data.document.unwrap();
        assert_eq!(doc.filename, "fatura.pdf");
        assert!(payload.data.text.is_none());
    }

    #[test]
    fn text_payload_deserializes_without_document() {
        let raw = r#"{
            "event": "messages.upsert",
            "data": {"from": "351912345678", "type": "text", "text": {"body": "/status"}}
        }"#;
        let payload: WebhookPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.data.text.unwrap().body, "/status");
    }
}
