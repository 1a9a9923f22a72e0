//! Environment configuration

use anyhow::{Context, Result};

use auditpack_pipeline::{MessagingConfig, ProviderConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Shared secret for webhook signature validation. When unset, unsigned
    /// webhooks are accepted with a warning.
    pub webhook_secret: Option<String>,
    pub storage_path: String,
    pub siliconflow_api_key: String,
    pub siliconflow_api_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable is required")?,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            webhook_secret: std::env::var("WHATSAPP_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            storage_path: std::env::var("STORAGE_PATH")
                .unwrap_or_else(|_| "data/storage".to_string()),
            siliconflow_api_key: std::env::var("SILICONFLOW_API_KEY").unwrap_or_default(),
            siliconflow_api_url: std::env::var("SILICONFLOW_API_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        })
    }

    pub fn provider_config(&self) -> ProviderConfig {
        let mut config = ProviderConfig::new(self.siliconflow_api_key.clone());
        if let Some(url) = &self.siliconflow_api_url {
            config.base_url = url.clone();
        }
        config
    }

    pub fn messaging_config(&self) -> MessagingConfig {
        MessagingConfig::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_config_keeps_default_url_when_unset() {
        let config = Config {
            database_url: "postgres://localhost/test".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            webhook_secret: None,
            storage_path: "/tmp/storage".to_string(),
            siliconflow_api_key: "key".to_string(),
            siliconflow_api_url: None,
        };
        assert!(config.provider_config().base_url.contains("siliconflow"));
    }

    #[test]
    fn provider_config_honors_override() {
        let config = Config {
            database_url: "postgres://localhost/test".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            webhook_secret: None,
            storage_path: "/tmp/storage".to_string(),
            siliconflow_api_key: "key".to_string(),
            siliconflow_api_url: Some("http://localhost:9999/v1".to_string()),
        };
        assert_eq!(config.provider_config().base_url, "http://localhost:9999/v1");
    }
}
