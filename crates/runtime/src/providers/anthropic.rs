//! Anthropic Messages API backend.

use super::{
    CatalogEntry, Provider, catalog_lookup, catalog_models, elapsed_ms, http_client, read_json,
    require_key, send, sse_data,
};
use crate::model::{
    Capability, GenerationRequest, GenerationResult, ModelDescriptor, ProviderError, TextStream,
    TokenUsage,
};
use crate::pricing;
use crate::settings::ApiSettings;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;
use storage::Role;

pub(crate) const NAME: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// The Messages API rejects requests without a token limit.
const DEFAULT_MAX_TOKENS: u32 = 4096;

const PROBE_MODEL: &str = "claude-3-haiku-20240307";

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        name: "claude-3-5-sonnet-20241022",
        display_name: "Claude 3.5 Sonnet",
        context_length: 200_000,
        capabilities: &[
            Capability::Chat,
            Capability::Completion,
            Capability::Vision,
            Capability::FunctionCalling,
        ],
        price_per_1k_input: 0.003,
        price_per_1k_output: 0.015,
    },
    CatalogEntry {
        name: "claude-3-opus-20240229",
        display_name: "Claude 3 Opus",
        context_length: 200_000,
        capabilities: &[Capability::Chat, Capability::Completion, Capability::Vision],
        price_per_1k_input: 0.015,
        price_per_1k_output: 0.075,
    },
    CatalogEntry {
        name: "claude-3-haiku-20240307",
        display_name: "Claude 3 Haiku",
        context_length: 200_000,
        capabilities: &[Capability::Chat, Capability::Completion, Capability::Vision],
        price_per_1k_input: 0.00025,
        price_per_1k_output: 0.00125,
    },
];

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop_sequences: &'a [String],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

impl<'a> ApiRequest<'a> {
    /// System-role messages move into the top-level `system` field, after the
    /// explicit system prompt.
    fn new(request: &'a GenerationRequest, stream: bool) -> Self {
        let mut system: Vec<String> = request.system_prompt.iter().cloned().collect();
        let mut messages = Vec::new();

        for message in request.conversation() {
            match message.role {
                Role::System => system.push(message.content),
                role => messages.push(ApiMessage {
                    role: role.as_str(),
                    content: message.content,
                }),
            }
        }

        Self {
            model: &request.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: &request.stop_sequences,
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    id: Option<String>,
    model: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    content: Vec<ApiResponseBlock>,
    usage: Option<ApiUsage>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiEvent {
    ContentBlockDelta { delta: ApiDelta },
    MessageStop,
    Error { error: ApiErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Anthropic API backend.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(settings: &ApiSettings) -> Result<Self, ProviderError> {
        let api_key = require_key("Anthropic", settings.api_key.as_deref())?;
        let base_url = settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            client: http_client(settings.timeout())?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn apply_headers(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
    }

    fn messages_request(&self, body: &ApiRequest<'_>) -> RequestBuilder {
        self.apply_headers(self.client.post(format!("{}/v1/messages", self.base_url)))
            .json(body)
    }
}

impl std::fmt::Display for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "anthropic({})", self.base_url)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
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
        let response = send(self.messages_request(&ApiRequest::new(request, false))).await?;
        let body: ApiResponse = read_json(response).await?;
        let latency_ms = elapsed_ms(start);

        let content: String = body
            .content
            .into_iter()
            .filter_map(|block| match block {
                ApiResponseBlock::Text { text } => Some(text),
                ApiResponseBlock::Unknown => None,
            })
            .collect();

        let usage = body
            .usage
            .map(|u| TokenUsage::new(u.input_tokens.unwrap_or(0), u.output_tokens.unwrap_or(0)))
            .unwrap_or_default();

        let cost = match self.get_model_info(&request.model).await {
            Some(descriptor) => {
                pricing::cost(&descriptor, usage.input_tokens, usage.output_tokens)
            }
            None => 0.0,
        };

        let mut metadata = Map::new();
        for (key, value) in [("id", body.id), ("model", body.model), ("type", body.kind)] {
            if let Some(value) = value {
                metadata.insert(key.into(), Value::String(value));
            }
        }

        Ok(GenerationResult {
            model: request.model.clone(),
            provider: NAME.to_string(),
            content,
            usage,
            cost,
            latency_ms,
            finish_reason: body.stop_reason,
            metadata,
        })
    }

    fn generate_stream(&self, request: &GenerationRequest) -> TextStream {
        let req = self.messages_request(&ApiRequest::new(request, true));

        Box::pin(async_stream::try_stream! {
            let response = send(req).await?;
            let mut events = Box::pin(sse_data(response));

            while let Some(data) = events.next().await {
                let data = data?;
                let event: ApiEvent = serde_json::from_str(&data)
                    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                match event {
                    ApiEvent::ContentBlockDelta { delta: ApiDelta::TextDelta { text } } => {
                        if !text.is_empty() {
                            yield text;
                        }
                    }
                    ApiEvent::MessageStop => break,
                    ApiEvent::Error { error } => {
                        Err(ProviderError::Api(match error.kind {
                            Some(kind) => format!("{kind}: {}", error.message),
                            None => error.message,
                        }))?;
                    }
                    _ => {}
                }
            }
        })
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let probe = GenerationRequest::new(PROBE_MODEL)
            .with_prompt("test")
            .with_max_tokens(1);
        send(self.messages_request(&ApiRequest::new(&probe, false)))
            .await
            .map(|_| ())
    }
}
