//! LLM provider adapters.
//!
//! Each provider implements [`Provider`] for its specific API and hides the
//! vendor's request shape, usage fields, and pricing behind the common
//! generation contract.

mod anthropic;
mod chat_completions;
mod google;
mod mistral;
mod ollama;
mod openai;

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use mistral::MistralProvider;
pub use ollama::{OllamaProvider, PullStatus};
pub use openai::OpenAiProvider;

use crate::model::{
    Capability, GenerationRequest, GenerationResult, HealthReport, ModelDescriptor,
    ProviderError, TextStream,
};
use crate::settings::ProviderSettings;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for generation backends.
///
/// Implementations hold only read-only construction config, so one instance
/// can serve any number of concurrent calls.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry name (`ollama`, `openai`, ...).
    fn name(&self) -> &str;

    /// The backend's catalog. Unreachable backends yield an empty list.
    async fn list_models(&self) -> Vec<ModelDescriptor>;

    /// Exact-name catalog lookup.
    async fn get_model_info(&self, name: &str) -> Option<ModelDescriptor> {
        self.list_models().await.into_iter().find(|m| m.name == name)
    }

    /// One non-streaming generation.
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, ProviderError>;

    /// Streamed generation. Nothing is sent until the stream is first polled.
    fn generate_stream(&self, request: &GenerationRequest) -> TextStream;

    /// Cheapest call that proves the backend answers.
    async fn probe(&self) -> Result<(), ProviderError>;

    async fn is_available(&self) -> bool {
        self.probe().await.is_ok()
    }

    async fn health_check(&self) -> HealthReport {
        match self.probe().await {
            Ok(()) => HealthReport::healthy(self.name(), self.list_models().await.len()),
            Err(e) => HealthReport::unhealthy(self.name(), e.to_string()),
        }
    }
}

/// One row of a vendor's fixed pricing table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CatalogEntry {
    pub name: &'static str,
    pub display_name: &'static str,
    pub context_length: u32,
    pub capabilities: &'static [Capability],
    pub price_per_1k_input: f64,
    pub price_per_1k_output: f64,
}

impl CatalogEntry {
    pub fn descriptor(&self, provider: &str) -> ModelDescriptor {
        ModelDescriptor::priced(
            self.name,
            self.display_name,
            provider,
            self.context_length,
            self.capabilities.to_vec(),
            self.price_per_1k_input,
            self.price_per_1k_output,
        )
    }
}

pub(crate) fn catalog_models(catalog: &[CatalogEntry], provider: &str) -> Vec<ModelDescriptor> {
    catalog.iter().map(|entry| entry.descriptor(provider)).collect()
}

pub(crate) fn catalog_lookup(
    catalog: &[CatalogEntry],
    provider: &str,
    name: &str,
) -> Option<ModelDescriptor> {
    catalog
        .iter()
        .find(|entry| entry.name == name)
        .map(|entry| entry.descriptor(provider))
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Config(e.to_string()))
}

pub(crate) fn require_key(provider: &str, key: Option<&str>) -> Result<String, ProviderError> {
    match key.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(ProviderError::Config(format!("{provider} API key is required"))),
    }
}

/// Send a request and turn non-2xx replies into [`ProviderError::Api`].
pub(crate) async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::Network(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Api(format!("{status}: {body}")));
    }

    Ok(response)
}

pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    response
        .json()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

/// `data:` payloads of a server-sent-events body.
pub(crate) fn sse_data(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String, ProviderError>> + Send {
    use eventsource_stream::Eventsource;

    response.bytes_stream().eventsource().map(|event| {
        event
            .map(|event| event.data)
            .map_err(|e| ProviderError::Network(e.to_string()))
    })
}

pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Drain a fragment stream into the full text.
pub async fn collect_stream(mut stream: TextStream) -> Result<String, ProviderError> {
    let mut content = String::new();
    while let Some(fragment) = stream.next().await {
        content.push_str(&fragment?);
    }
    Ok(content)
}

/// Construct every enabled backend in registration order.
///
/// Failures are returned alongside the backend name so the caller can report
/// them and carry on with the rest.
pub fn build_providers(
    settings: &ProviderSettings,
) -> Vec<(&'static str, Result<Arc<dyn Provider>, ProviderError>)> {
    let mut built: Vec<(&'static str, Result<Arc<dyn Provider>, ProviderError>)> = Vec::new();

    if let Some(s) = settings.ollama.as_ref().filter(|s| s.enabled) {
        built.push((
            ollama::NAME,
            OllamaProvider::new(s).map(|p| Arc::new(p) as Arc<dyn Provider>),
        ));
    }
    if let Some(s) = settings.openai.as_ref().filter(|s| s.api.enabled) {
        built.push((
            openai::NAME,
            OpenAiProvider::new(s).map(|p| Arc::new(p) as Arc<dyn Provider>),
        ));
    }
    if let Some(s) = settings.anthropic.as_ref().filter(|s| s.enabled) {
        built.push((
            anthropic::NAME,
            AnthropicProvider::new(s).map(|p| Arc::new(p) as Arc<dyn Provider>),
        ));
    }
    if let Some(s) = settings.google.as_ref().filter(|s| s.enabled) {
        built.push((
            google::NAME,
            GoogleProvider::new(s).map(|p| Arc::new(p) as Arc<dyn Provider>),
        ));
    }
    if let Some(s) = settings.mistral.as_ref().filter(|s| s.enabled) {
        built.push((
            mistral::NAME,
            MistralProvider::new(s).map(|p| Arc::new(p) as Arc<dyn Provider>),
        ));
    }

    built
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ApiSettings, OpenAiSettings};

    #[test]
    fn missing_keys_fail_construction_without_hiding_others() {
        let settings = ProviderSettings {
            openai: Some(OpenAiSettings::default()),
            anthropic: Some(ApiSettings::with_key("sk-ant-test")),
            google: Some(ApiSettings::with_key("   ")),
            ..ProviderSettings::default()
        };

        let built = build_providers(&settings);
        let names: Vec<_> = built.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ["ollama", "openai", "anthropic", "google"]);

        assert!(built[0].1.is_ok());
        assert!(matches!(built[1].1, Err(ProviderError::Config(_))));
        assert!(built[2].1.is_ok());
        assert!(matches!(built[3].1, Err(ProviderError::Config(_))));
    }

    #[test]
    fn disabled_sections_are_skipped() {
        let mut settings = ProviderSettings::default();
        if let Some(ollama) = settings.ollama.as_mut() {
            ollama.enabled = false;
        }
        assert!(build_providers(&settings).is_empty());
    }

    #[test]
    fn catalog_lookup_is_exact() {
        const TABLE: &[CatalogEntry] = &[CatalogEntry {
            name: "alpha",
            display_name: "Alpha",
            context_length: 1000,
            capabilities: &[Capability::Chat],
            price_per_1k_input: 0.1,
            price_per_1k_output: 0.2,
        }];
        assert!(catalog_lookup(TABLE, "p", "alpha").is_some());
        assert!(catalog_lookup(TABLE, "p", "alph").is_none());
        assert!(catalog_lookup(TABLE, "p", "alpha:latest").is_none());
        assert_eq!(catalog_models(TABLE, "p")[0].provider, "p");
    }
}
