//! Resolved gateway settings.
//!
//! The runtime never reads the environment or the filesystem. Callers load
//! these values however they like and hand them over at construction time.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

fn default_provider_timeout() -> u64 {
    120
}

fn default_enabled() -> bool {
    true
}

/// Top-level runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Upper bound on any single adapter call made by the orchestrator.
    pub request_timeout_secs: u64,

    /// Write a usage row after every successful generation.
    pub cost_tracking: bool,

    /// Warn once the ledger's total cost passes this many dollars.
    pub cost_alert_threshold: f64,

    // Routing and rate-limit flags are carried for callers; the runtime does
    // not enforce them.
    pub smart_routing: bool,
    pub prefer_local_models: bool,
    pub fallback_to_cloud: bool,
    pub rate_limit_enabled: bool,
    pub requests_per_minute: u32,

    pub providers: ProviderSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            cost_tracking: true,
            cost_alert_threshold: 10.0,
            smart_routing: true,
            prefer_local_models: true,
            fallback_to_cloud: true,
            rate_limit_enabled: true,
            requests_per_minute: 60,
            providers: ProviderSettings::default(),
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Per-backend sections. An absent section means "not configured".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub ollama: Option<OllamaSettings>,
    pub openai: Option<OpenAiSettings>,
    pub anthropic: Option<ApiSettings>,
    pub google: Option<ApiSettings>,
    pub mistral: Option<ApiSettings>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            ollama: Some(OllamaSettings::default()),
            openai: None,
            anthropic: None,
            google: None,
            mistral: None,
        }
    }
}

/// Local inference daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ollama_host")]
    pub host: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_ollama_host() -> String {
    DEFAULT_OLLAMA_HOST.to_string()
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_ollama_host(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

/// OpenAI adds an optional organization header on top of the common fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiSettings {
    #[serde(flatten)]
    pub api: ApiSettings,
    #[serde(default)]
    pub org_id: Option<String>,
}

/// Credential and endpoint for a cloud vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Override the vendor endpoint (proxies, tests).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: None,
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl ApiSettings {
    pub fn with_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_configure_only_the_local_daemon() {
        let settings = Settings::default();
        assert_eq!(settings.request_timeout(), Duration::from_secs(60));
        assert!(settings.cost_tracking);
        let ollama = settings.providers.ollama.unwrap();
        assert_eq!(ollama.host, DEFAULT_OLLAMA_HOST);
        assert!(settings.providers.openai.is_none());
    }

    #[test]
    fn openai_section_flattens_api_fields() {
        let settings: OpenAiSettings =
            serde_json::from_str(r#"{"api_key":"sk-test","org_id":"org-1"}"#).unwrap();
        assert_eq!(settings.api.api_key.as_deref(), Some("sk-test"));
        assert!(settings.api.enabled);
        assert_eq!(settings.api.timeout_secs, 120);
        assert_eq!(settings.org_id.as_deref(), Some("org-1"));
    }
}
