//! Outbound WhatsApp notifications (Evolution API)
//!
//! Delivery is best-effort relative to the persistence steps that precede
//! it: an unconfigured endpoint degrades to logging the would-be message,
//! and delivery failures are logged and swallowed, never propagated.

use serde::Serialize;

use auditpack_shared::normalize_phone;

/// Messaging endpoint settings. All optional: missing endpoint or key puts
/// the sender in log-only mode.
#[derive(Debug, Clone, Default)]
pub struct MessagingConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub instance_name: String,
}

impl MessagingConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("EVOLUTION_API_URL").ok().filter(|v| !v.is_empty()),
            api_key: std::env::var("EVOLUTION_API_KEY").ok().filter(|v| !v.is_empty()),
            instance_name: std::env::var("EVOLUTION_INSTANCE_NAME")
                .unwrap_or_else(|_| "auditpack".to_string()),
        }
    }

    fn is_configured(&self) -> bool {
        self.api_url.is_some() && self.api_key.is_some()
    }
}

#[derive(Serialize)]
struct SendTextBody<'a> {
    number: String,
    text: &'a str,
}

/// Sends status and result messages back to the originating channel.
#[derive(Clone)]
pub struct NotificationSender {
    http: reqwest::Client,
    config: MessagingConfig,
}

impl NotificationSender {
    pub fn new(http: reqwest::Client, config: MessagingConfig) -> Self {
        Self { http, config }
    }

    /// Deliver a plain-text message to a contact number.
    ///
    /// Always returns without error; failures only produce logs.
    pub async fn send(&self, to: &str, message: &str) {
        let number = normalize_phone(to);

        let (Some(api_url), Some(api_key)) = (&self.config.api_url, &self.config.api_key) else {
            tracing::info!(to = %number, message = %message, "WhatsApp message (log-only mode)");
            return;
        };

        let url = format!(
            "{}/message/sendText/{}",
            api_url.trim_end_matches('/'),
            self.config.instance_name
        );

        let result = self
            .http
            .post(&url)
            .header("apikey", api_key)
            .json(&SendTextBody {
                number: number.clone(),
                text: message,
            })
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(to = %number, "WhatsApp message sent");
            }
            Ok(response) => {
                tracing::warn!(
                    to = %number,
                    status = %response.status(),
                    "WhatsApp message rejected by messaging API"
                );
            }
            Err(e) => {
                tracing::warn!(to = %number, error = %e, "Failed to send WhatsApp message");
            }
        }
    }

    /// Convenience for optional contact numbers; absent contact is a no-op.
    pub async fn send_opt(&self, to: Option<&str>, message: &str) {
        if let Some(to) = to {
            self.send(to, message).await;
        } else {
            tracing::debug!("No contact number on record, skipping notification");
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_sender_is_a_silent_success() {
        let sender = NotificationSender::new(reqwest::Client::new(), MessagingConfig::default());
        assert!(!sender.is_configured());
        // Must not panic or error.
        sender.send("+351 912 345 678", "ola").await;
        sender.send_opt(None, "ola").await;
    }

    #[tokio::test]
    async fn delivers_to_messaging_endpoint_with_normalized_number() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/message/sendText/auditpack")
            .match_header("apikey", "key-123")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "number": "351912345678",
                "text": "Fatura recebida"
            })))
            .with_status(201)
            .create_async()
            .await;

        let config = MessagingConfig {
            api_url: Some(server.url()),
            api_key: Some("key-123".to_string()),
            instance_name: "auditpack".to_string(),
        };
        let sender = NotificationSender::new(reqwest::Client::new(), config);
        sender.send("+351 912-345-678", "Fatura recebida").await;
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/message/sendText/auditpack")
            .with_status(500)
            .create_async()
            .await;

        let config = MessagingConfig {
            api_url: Some(server.url()),
            api_key: Some("key-123".to_string()),
            instance_name: "auditpack".to_string(),
        };
        let sender = NotificationSender::new(reqwest::Client::new(), config);
        // Returns normally despite the 500.
        sender.send("351912345678", "mensagem").await;
    }
}
