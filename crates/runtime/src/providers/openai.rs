//! OpenAI chat-completions backend.

use super::chat_completions::{self, ApiRequest};
use super::{
    CatalogEntry, Provider, catalog_lookup, catalog_models, elapsed_ms, http_client, require_key,
    send,
};
use crate::model::{
    Capability, GenerationRequest, GenerationResult, ModelDescriptor, ProviderError, TextStream,
};
use crate::pricing;
use crate::settings::OpenAiSettings;
use async_trait::async_trait;
use std::time::Instant;

pub(crate) const NAME: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        name: "gpt-4o",
        display_name: "GPT-4o",
        context_length: 128_000,
        capabilities: &[
            Capability::Chat,
            Capability::Completion,
            Capability::Vision,
            Capability::FunctionCalling,
        ],
        price_per_1k_input: 0.0025,
        price_per_1k_output: 0.01,
    },
    CatalogEntry {
        name: "gpt-4o-mini",
        display_name: "GPT-4o Mini",
        context_length: 128_000,
        capabilities: &[
            Capability::Chat,
            Capability::Completion,
            Capability::Vision,
            Capability::FunctionCalling,
        ],
        price_per_1k_input: 0.00015,
        price_per_1k_output: 0.0006,
    },
    CatalogEntry {
        name: "gpt-4-turbo",
        display_name: "GPT-4 Turbo",
        context_length: 128_000,
        capabilities: &[
            Capability::Chat,
            Capability::Completion,
            Capability::Vision,
            Capability::FunctionCalling,
        ],
        price_per_1k_input: 0.01,
        price_per_1k_output: 0.03,
    },
    CatalogEntry {
        name: "gpt-3.5-turbo",
        display_name: "GPT-3.5 Turbo",
        context_length: 16_385,
        capabilities: &[
            Capability::Chat,
            Capability::Completion,
            Capability::FunctionCalling,
        ],
        price_per_1k_input: 0.0005,
        price_per_1k_output: 0.0015,
    },
];

/// OpenAI API backend.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    org_id: Option<String>,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(settings: &OpenAiSettings) -> Result<Self, ProviderError> {
        let api_key = require_key("OpenAI", settings.api.api_key.as_deref())?;
        Ok(Self {
            client: http_client(settings.api.timeout())?,
            api_key,
            org_id: settings.org_id.clone(),
            base_url: settings
                .api
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.bearer_auth(&self.api_key);
        match &self.org_id {
            Some(org) => req.header("OpenAI-Organization", org),
            None => req,
        }
    }

    fn chat_request(&self, request: &GenerationRequest, stream: bool) -> reqwest::RequestBuilder {
        self.authorized(self.client.post(format!("{}/v1/chat/completions", self.base_url)))
            .json(&ApiRequest::new(request, stream))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
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

        let cost = self
            .get_model_info(&request.model)
            .await
            .map(|d| pricing::cost(&d, completion.usage.input_tokens, completion.usage.output_tokens))
            .unwrap_or(0.0);

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
        send(self.authorized(self.client.get(format!("{}/v1/models", self.base_url))))
            .await
            .map(|_| ())
    }
}
