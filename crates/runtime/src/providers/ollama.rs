//! Local Ollama daemon backend.
//!
//! The catalog is whatever the daemon has pulled, fetched live from
//! `/api/tags`. Generation is free, so cost is always zero.

use super::{Provider, elapsed_ms, http_client, read_json, send};
use crate::model::{
    Capability, GenerationRequest, GenerationResult, HealthReport, ModelDescriptor, ProviderError,
    TextStream, TokenUsage,
};
use crate::settings::OllamaSettings;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::warn;

pub(crate) const NAME: &str = "ollama";

/// Ollama's tag listing does not expose a context window.
const DEFAULT_CONTEXT_LENGTH: u32 = 4096;

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    stream: bool,
    options: ApiOptions<'a>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiOptions<'a> {
    temperature: f64,
    top_p: f64,
    /// `-1` lets the daemon generate until a natural stop.
    num_predict: i64,
    stop: &'a [String],
}

impl<'a> ApiChatRequest<'a> {
    fn new(request: &'a GenerationRequest, stream: bool) -> Self {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(ApiMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.extend(request.conversation().into_iter().map(|m| ApiMessage {
            role: m.role.as_str(),
            content: m.content,
        }));

        Self {
            model: &request.model,
            messages,
            stream,
            options: ApiOptions {
                temperature: request.temperature,
                top_p: request.top_p,
                num_predict: request.max_tokens.map_or(-1, i64::from),
                stop: &request.stop_sequences,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    message: Option<ApiResponseMessage>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    done_reason: Option<String>,
    total_duration: Option<u64>,
    load_duration: Option<u64>,
    prompt_eval_duration: Option<u64>,
    eval_duration: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiTags {
    #[serde(default)]
    models: Vec<ApiTag>,
}

#[derive(Debug, Deserialize)]
struct ApiTag {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    modified_at: String,
    #[serde(default)]
    digest: String,
}

#[derive(Debug, Serialize)]
struct ApiModelName<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct ApiPullRequest<'a> {
    name: &'a str,
    stream: bool,
}

/// Final status reported by the daemon after a pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullStatus {
    pub status: String,
}

impl ApiTag {
    fn into_descriptor(self) -> ModelDescriptor {
        let base = self.name.split(':').next().unwrap_or_default();
        let display_name = title_case(base);
        let capabilities = infer_capabilities(base);

        let mut metadata = Map::new();
        metadata.insert("size".into(), Value::from(self.size));
        metadata.insert("modified_at".into(), Value::String(self.modified_at));
        metadata.insert("digest".into(), Value::String(self.digest));

        ModelDescriptor::local(
            self.name,
            display_name,
            NAME,
            DEFAULT_CONTEXT_LENGTH,
            capabilities,
        )
        .with_metadata(metadata)
    }
}

/// Guess capabilities from the model's base name.
///
/// This is a naming heuristic only; the daemon does not report capabilities.
fn infer_capabilities(base_name: &str) -> Vec<Capability> {
    let lower = base_name.to_lowercase();
    let mut capabilities = vec![Capability::Chat, Capability::Completion];
    if lower.contains("code") {
        capabilities.push(Capability::Code);
    }
    if lower.contains("vision") || lower.contains("llava") {
        capabilities.push(Capability::Vision);
    }
    capabilities
}

/// Uppercase the first letter of every alphabetic run, lowercase the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Ollama daemon backend.
pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
}

impl OllamaProvider {
    pub fn new(settings: &OllamaSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(Duration::from_secs(settings.timeout_secs))?,
            host: settings.host.trim_end_matches('/').to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.host)
    }

    fn chat_request(&self, request: &GenerationRequest, stream: bool) -> RequestBuilder {
        self.client
            .post(self.url("/api/chat"))
            .json(&ApiChatRequest::new(request, stream))
    }

    async fn tags(&self) -> Result<Vec<ApiTag>, ProviderError> {
        let response = send(self.client.get(self.url("/api/tags"))).await?;
        let tags: ApiTags = read_json(response).await?;
        Ok(tags.models)
    }

    /// Download a model into the daemon and wait for it to finish.
    pub async fn pull_model(&self, name: &str) -> Result<PullStatus, ProviderError> {
        let req = self.client.post(self.url("/api/pull")).json(&ApiPullRequest {
            name,
            stream: false,
        });
        read_json(send(req).await?).await
    }

    /// Remove a local model. `Ok(false)` when the daemon does not have it.
    pub async fn delete_model(&self, name: &str) -> Result<bool, ProviderError> {
        let response = self
            .client
            .delete(self.url("/api/delete"))
            .json(&ApiModelName { name })
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Api(format!("{status}: {body}")))
            }
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn list_models(&self) -> Vec<ModelDescriptor> {
        match self.tags().await {
            Ok(tags) => tags.into_iter().map(ApiTag::into_descriptor).collect(),
            Err(e) => {
                warn!(host = %self.host, error = %e, "failed to list ollama models");
                Vec::new()
            }
        }
    }

    /// Matches the full tag or the base name (`llama3` finds `llama3:8b`).
    async fn get_model_info(&self, name: &str) -> Option<ModelDescriptor> {
        let prefix = format!("{name}:");
        self.list_models()
            .await
            .into_iter()
            .find(|m| m.name == name || m.name.starts_with(&prefix))
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, ProviderError> {
        let start = Instant::now();
        let response = send(self.chat_request(request, false)).await?;
        let body: ApiChatResponse = read_json(response).await?;
        let latency_ms = elapsed_ms(start);

        if let Some(error) = body.error {
            return Err(ProviderError::Api(error));
        }

        let mut metadata = Map::new();
        for (key, value) in [
            ("total_duration", body.total_duration),
            ("load_duration", body.load_duration),
            ("prompt_eval_duration", body.prompt_eval_duration),
            ("eval_duration", body.eval_duration),
        ] {
            metadata.insert(key.into(), Value::from(value.unwrap_or(0)));
        }

        Ok(GenerationResult {
            model: request.model.clone(),
            provider: NAME.to_string(),
            content: body.message.map(|m| m.content).unwrap_or_default(),
            usage: TokenUsage::new(
                body.prompt_eval_count.unwrap_or(0),
                body.eval_count.unwrap_or(0),
            ),
            cost: 0.0,
            latency_ms,
            finish_reason: body.done_reason,
            metadata,
        })
    }

    fn generate_stream(&self, request: &GenerationRequest) -> TextStream {
        let req = self.chat_request(request, true);

        Box::pin(async_stream::try_stream! {
            let response = send(req).await?;
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            // Newline-delimited JSON; a chunk may hold several lines or part of one.
            loop {
                let next = bytes.next().await;
                let done = next.is_none();
                if let Some(chunk) = next {
                    let chunk = chunk.map_err(|e| ProviderError::Network(e.to_string()))?;
                    buffer.extend_from_slice(&chunk);
                }

                let mut lines: Vec<Vec<u8>> = Vec::new();
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    lines.push(buffer.drain(..=pos).collect());
                }
                if done && !buffer.is_empty() {
                    lines.push(std::mem::take(&mut buffer));
                }

                for line in lines {
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let chunk: ApiChatResponse = serde_json::from_str(line)
                        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                    if let Some(error) = chunk.error {
                        Err(ProviderError::Api(error))?;
                    }
                    if let Some(text) = chunk.message.map(|m| m.content).filter(|t| !t.is_empty()) {
                        yield text;
                    }
                }

                if done {
                    break;
                }
            }
        })
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        self.tags().await.map(|_| ())
    }

    async fn health_check(&self) -> HealthReport {
        match self.tags().await {
            Ok(tags) => {
                let names: Vec<Value> = tags.iter().map(|t| Value::String(t.name.clone())).collect();
                HealthReport::healthy(NAME, names.len())
                    .with_detail("host", Value::String(self.host.clone()))
                    .with_detail("models", Value::Array(names))
            }
            Err(e) => HealthReport::unhealthy(NAME, e.to_string())
                .with_detail("host", Value::String(self.host.clone())),
        }
    }
}
