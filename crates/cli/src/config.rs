//! Configuration loading from modelhub.toml and the environment.

use runtime::{ApiSettings, OpenAiSettings, Settings};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_FILE: &str = "modelhub.toml";
const DEFAULT_DATABASE_PATH: &str = "./data/models.db";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Top-level configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file holding the usage ledger and conversations.
    pub database_path: PathBuf,

    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Everything the runtime consumes.
    #[serde(flatten)]
    pub settings: Settings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            settings: Settings::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load the file if it exists, then apply process environment overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None if Path::new(CONFIG_FILE).exists() => Self::load(CONFIG_FILE)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Overlay environment values. A credential or host in the environment
    /// configures its provider even when the file has no section for it.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let providers = &mut self.settings.providers;

        if let Some(key) = var("OPENAI_API_KEY") {
            providers
                .openai
                .get_or_insert_with(OpenAiSettings::default)
                .api
                .api_key = Some(key);
        }
        if let Some(org) = var("OPENAI_ORG_ID") {
            providers
                .openai
                .get_or_insert_with(OpenAiSettings::default)
                .org_id = Some(org);
        }
        for (name, section) in [
            ("ANTHROPIC_API_KEY", &mut providers.anthropic),
            ("GOOGLE_API_KEY", &mut providers.google),
            ("MISTRAL_API_KEY", &mut providers.mistral),
        ] {
            if let Some(key) = var(name) {
                section.get_or_insert_with(ApiSettings::default).api_key = Some(key);
            }
        }

        if let Some(host) = var("OLLAMA_HOST") {
            providers.ollama.get_or_insert_with(Default::default).host = host;
        }
        if let Some(raw) = var("OLLAMA_TIMEOUT") {
            providers.ollama.get_or_insert_with(Default::default).timeout_secs =
                parse_env("OLLAMA_TIMEOUT", &raw)?;
        }

        if let Some(path) = var("DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        if let Some(raw) = var("REQUEST_TIMEOUT") {
            self.settings.request_timeout_secs = parse_env("REQUEST_TIMEOUT", &raw)?;
        }
        if let Some(raw) = var("ENABLE_COST_TRACKING") {
            self.settings.cost_tracking = parse_bool("ENABLE_COST_TRACKING", &raw)?;
        }
        if let Some(raw) = var("COST_ALERT_THRESHOLD") {
            self.settings.cost_alert_threshold = parse_env("COST_ALERT_THRESHOLD", &raw)?;
        }

        Ok(())
    }
}

fn parse_env<T: FromStr>(var: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: raw.to_string(),
    })
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            var: var.to_string(),
            value: raw.to_string(),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {var}: {value:?}")]
    Env { var: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.database_path, PathBuf::from("./data/models.db"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.settings.request_timeout_secs, 60);
        assert!(config.settings.providers.ollama.is_some());
        assert!(config.settings.providers.anthropic.is_none());
    }

    #[test]
    fn parses_provider_sections() {
        let config = Config::parse(
            r#"
            database_path = "/tmp/hub.db"
            cost_alert_threshold = 2.5
            requests_per_minute = 10

            [providers.ollama]
            host = "http://gpu-box:11434"

            [providers.openai]
            api_key = "sk-file"
            org_id = "org-9"

            [providers.mistral]
            api_key = "ms-file"
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/hub.db"));
        assert_eq!(config.settings.cost_alert_threshold, 2.5);
        assert_eq!(config.settings.requests_per_minute, 10);
        let providers = &config.settings.providers;
        assert_eq!(providers.ollama.as_ref().unwrap().host, "http://gpu-box:11434");
        assert_eq!(providers.ollama.as_ref().unwrap().timeout_secs, 120);
        let openai = providers.openai.as_ref().unwrap();
        assert_eq!(openai.api.api_key.as_deref(), Some("sk-file"));
        assert_eq!(openai.org_id.as_deref(), Some("org-9"));
        assert!(!providers.mistral.as_ref().unwrap().enabled);
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = Config::parse("database_path = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file_and_adds_sections() {
        let mut config = Config::parse("[providers.openai]\napi_key = \"sk-file\"\n").unwrap();
        config
            .apply_env(env(&[
                ("OPENAI_API_KEY", "sk-env"),
                ("ANTHROPIC_API_KEY", "sk-ant-env"),
                ("GOOGLE_API_KEY", "  "),
                ("OLLAMA_HOST", "http://remote:11434"),
                ("OLLAMA_TIMEOUT", "30"),
                ("DATABASE_PATH", "/var/lib/hub.db"),
                ("LOG_LEVEL", "DEBUG"),
                ("REQUEST_TIMEOUT", "15"),
                ("ENABLE_COST_TRACKING", "false"),
                ("COST_ALERT_THRESHOLD", "0.5"),
            ]))
            .unwrap();

        let providers = &config.settings.providers;
        assert_eq!(
            providers.openai.as_ref().unwrap().api.api_key.as_deref(),
            Some("sk-env")
        );
        assert_eq!(
            providers.anthropic.as_ref().unwrap().api_key.as_deref(),
            Some("sk-ant-env")
        );
        assert!(providers.google.is_none());
        let ollama = providers.ollama.as_ref().unwrap();
        assert_eq!(ollama.host, "http://remote:11434");
        assert_eq!(ollama.timeout_secs, 30);
        assert_eq!(config.database_path, PathBuf::from("/var/lib/hub.db"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.settings.request_timeout_secs, 15);
        assert!(!config.settings.cost_tracking);
        assert_eq!(config.settings.cost_alert_threshold, 0.5);
    }

    #[test]
    fn bad_numeric_env_is_reported() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("REQUEST_TIMEOUT", "soon")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid value for REQUEST_TIMEOUT: \"soon\"");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level = \"warn\"\ncost_tracking = false").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.log_level, "warn");
        assert!(!config.settings.cost_tracking);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::resolve(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
