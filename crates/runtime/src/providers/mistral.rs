//! Mistral AI backend (chat-completions compatible).

use super::chat_completions::{self, ApiRequest};
use super::{
    CatalogEntry, Provider, catalog_lookup, catalog_models, elapsed_ms, http_client, require_key,
    send,
};
use crate::model::{
    Capability, GenerationRequest, GenerationResult, ModelDescriptor, ProviderError, TextStream,
};
use crate::pricing;
use crate::settings::ApiSettings;
use async_trait::async_trait;
use std::time::Instant;

pub(crate) const NAME: &str = "mistral";
const DEFAULT_BASE_URL: &str = "https://api.mistral.ai";

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        name: "mistral-large-latest",
        display_name: "Mistral Large",
        context_length: 128_000,
        capabilities: &[
            Capability::Chat,
            Capability::Completion,
            Capability::FunctionCalling,
        ],
        price_per_1k_input: 0.002,
        price_per_1k_output: 0.006,
    },
    CatalogEntry {
        name: "mistral-small-latest",
        display_name: "Mistral Small",
        context_length: 32_000,
        capabilities: &[Capability::Chat, Capability::Completion],
        price_per_1k_input: 0.0002,
        price_per_1k_output: 0.0006,
    },
    CatalogEntry {
        name: "mistral-medium-latest",
        display_name: "Mistral Medium",
        context_length: 32_000,
        capabilities: &[Capability::Chat, Capability::Completion],
        price_per_1k_input: 0.0027,
        price_per_1k_output: 0.0081,
    },
];

/// Mistral API backend.
pub struct MistralProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl MistralProvider {
    pub fn new(settings: &ApiSettings) -> Result<Self, ProviderError> {
        let api_key = require_key("Mistral", settings.api_key.as_deref())?;
        let base_url = settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            client: http_client(settings.timeout())?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chat_request(&self, request: &GenerationRequest, stream: bool) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&ApiRequest::new(request, stream))
    }
}

#[async_trait]
impl Provider for MistralProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn list_models(&self) -> Vec<ModelDescriptor> {
        catalog_models(CATALOG, NAME)
    }

    async fn get_model_info(&self, name: &str) -> Option<ModelDescriptor> {
        catalog_lookup(CATALOG, NAME, name)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, ProviderError> {
        let start = Instant::now();
        let completion = chat_completions::complete(self.chat_request(request, false)).await?;
        let latency_ms = elapsed_ms(start);

        let cost = match self.get_model_info(&request.model).await {
            Some(descriptor) => pricing::cost(
                &descriptor,
                completion.usage.input_tokens,
                completion.usage.output_tokens,
            ),
            None => 0.0,
        };

        Ok(GenerationResult {
            model: request.model.clone(),
            provider: NAME.to_string(),
            content: completion.content,
            usage: completion.usage,
            cost,
            latency_ms,
            finish_reason: completion.finish_reason,
            metadata: completion.metadata,
        })
    }

    fn generate_stream(&self, request: &GenerationRequest) -> TextStream {
        chat_completions::stream(self.chat_request(request, true))
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let req = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .bearer_auth(&self.api_key);
        send(req).await.map(|_| ())
    }
}
