//! Google Gemini (generative language API) backend.
//!
//! Gemini has no system role on this endpoint, so the conversation is folded
//! into one text prompt with `System:`/`User:`/`Assistant:` line prefixes and
//! the system prompt is prepended as a preamble.

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

pub(crate) const NAME: &str = "google";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        name: "gemini-1.5-pro",
        display_name: "Gemini 1.5 Pro",
        context_length: 2_000_000,
        capabilities: &[
            Capability::Chat,
            Capability::Completion,
            Capability::Vision,
            Capability::FunctionCalling,
        ],
        price_per_1k_input: 0.00125,
        price_per_1k_output: 0.005,
    },
    CatalogEntry {
        name: "gemini-1.5-flash",
        display_name: "Gemini 1.5 Flash",
        context_length: 1_000_000,
        capabilities: &[
            Capability::Chat,
            Capability::Completion,
            Capability::Vision,
            Capability::FunctionCalling,
        ],
        price_per_1k_input: 0.000075,
        price_per_1k_output: 0.0003,
    },
    CatalogEntry {
        name: "gemini-pro",
        display_name: "Gemini Pro",
        context_length: 32_760,
        capabilities: &[Capability::Chat, Capability::Completion],
        price_per_1k_input: 0.0005,
        price_per_1k_output: 0.0015,
    },
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest<'a> {
    contents: [ApiContent; 1],
    generation_config: ApiGenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct ApiContent {
    role: &'static str,
    parts: [ApiPart; 1],
}

#[derive(Debug, Serialize)]
struct ApiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig<'a> {
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop_sequences: &'a [String],
}

impl<'a> ApiRequest<'a> {
    fn new(request: &'a GenerationRequest) -> Self {
        Self {
            contents: [ApiContent {
                role: "user",
                parts: [ApiPart {
                    text: fold_prompt(request),
                }],
            }],
            generation_config: ApiGenerationConfig {
                temperature: request.temperature,
                top_p: request.top_p,
                max_output_tokens: request.max_tokens,
                stop_sequences: &request.stop_sequences,
            },
        }
    }
}

/// Flatten the request into the single prompt Gemini receives.
fn fold_prompt(request: &GenerationRequest) -> String {
    let prompt = match request.chat_messages() {
        Some(messages) => messages
            .iter()
            .map(|m| {
                let label = match m.role {
                    Role::System => "System",
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                format!("{label}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => request.prompt.clone().unwrap_or_default(),
    };

    match &request.system_prompt {
        Some(system) => format!("{system}\n\n{prompt}"),
        None => prompt,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    usage_metadata: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    content: Option<ApiCandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidateContent {
    #[serde(default)]
    parts: Vec<ApiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiModelList {
    #[serde(default)]
    models: Vec<Value>,
}

impl ApiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| content.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }
}

/// Gemini API backend.
pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleProvider {
    pub fn new(settings: &ApiSettings) -> Result<Self, ProviderError> {
        let api_key = require_key("Google", settings.api_key.as_deref())?;
        let base_url = settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            client: http_client(settings.timeout())?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn model_request(&self, request: &GenerationRequest, method: &str) -> RequestBuilder {
        self.client
            .post(format!(
                "{}/v1beta/models/{}:{method}",
                self.base_url, request.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&ApiRequest::new(request))
    }
}

#[async_trait]
impl Provider for GoogleProvider {
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
        let response = send(self.model_request(request, "generateContent")).await?;
        let body: ApiResponse = read_json(response).await?;
        let latency_ms = elapsed_ms(start);

        let content = body.text();
        let usage = body
            .usage_metadata
            .map(|u| {
                TokenUsage::reported(
                    u.prompt_token_count,
                    u.candidates_token_count,
                    u.total_token_count,
                )
            })
            .unwrap_or_default();
        let finish_reason = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.finish_reason);

        let cost = match self.get_model_info(&request.model).await {
            Some(descriptor) => {
                pricing::cost(&descriptor, usage.input_tokens, usage.output_tokens)
            }
            None => 0.0,
        };

        let mut metadata = Map::new();
        metadata.insert("model".into(), Value::String(request.model.clone()));

        Ok(GenerationResult {
            model: request.model.clone(),
            provider: NAME.to_string(),
            content,
            usage,
            cost,
            latency_ms,
            finish_reason,
            metadata,
        })
    }

    fn generate_stream(&self, request: &GenerationRequest) -> TextStream {
        let req = self.model_request(request, "streamGenerateContent?alt=sse");

        Box::pin(async_stream::try_stream! {
            let response = send(req).await?;
            let mut events = Box::pin(sse_data(response));

            while let Some(data) = events.next().await {
                let chunk: ApiResponse = serde_json::from_str(&data?)
                    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                let text = chunk.text();
                if !text.is_empty() {
                    yield text;
                }
            }
        })
    }

    /// Lists the vendor's models; an empty list counts as unavailable.
    async fn probe(&self) -> Result<(), ProviderError> {
        let req = self
            .client
            .get(format!("{}/v1beta/models", self.base_url))
            .header("x-goog-api-key", &self.api_key);
        let list: ApiModelList = read_json(send(req).await?).await?;
        if list.models.is_empty() {
            return Err(ProviderError::InvalidResponse("no models listed".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::Message;

    #[test]
    fn messages_fold_into_labelled_lines() {
        let request = GenerationRequest::new("gemini-pro")
            .with_system_prompt("be brief")
            .with_prompt("ignored")
            .with_messages(vec![
                Message::system("rules"),
                Message::user("hi"),
                Message::assistant("hello"),
            ]);
        assert_eq!(
            fold_prompt(&request),
            "be brief\n\nSystem: rules\nUser: hi\nAssistant: hello"
        );
    }

    #[test]
    fn bare_prompt_is_sent_verbatim() {
        let request = GenerationRequest::new("gemini-pro").with_prompt("hi");
        assert_eq!(fold_prompt(&request), "hi");
    }

    #[test]
    fn generation_config_uses_camel_case() {
        let request = GenerationRequest::new("gemini-pro")
            .with_prompt("hi")
            .with_max_tokens(64)
            .with_stop_sequences(["."]);
        let body = serde_json::to_value(ApiRequest::new(&request)).unwrap();
        let config = &body["generationConfig"];
        assert_eq!(config["maxOutputTokens"], 64);
        assert_eq!(config["topP"], 1.0);
        assert_eq!(config["stopSequences"][0], ".");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn response_text_joins_parts() {
        let body: ApiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(body.text(), "ab");
    }
}
