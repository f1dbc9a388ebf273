//! Chat-completions wire format shared by OpenAI-compatible vendors.

use super::{read_json, send, sse_data};
use crate::model::{GenerationRequest, ProviderError, TextStream, TokenUsage};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize)]
pub(crate) struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

impl<'a> ApiRequest<'a> {
    /// System prompt first, then the conversation. An unset `max_tokens` is
    /// omitted rather than sent as null.
    pub fn new(request: &'a GenerationRequest, stream: bool) -> Self {
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
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop: &request.stop_sequences,
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    id: Option<String>,
    created: Option<i64>,
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiChunk {
    #[serde(default)]
    choices: Vec<ApiChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChunkChoice {
    delta: ApiDelta,
}

#[derive(Debug, Deserialize)]
struct ApiDelta {
    content: Option<String>,
}

/// The vendor-neutral pieces of one completion.
#[derive(Debug)]
pub(crate) struct Completion {
    pub content: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
    pub metadata: Map<String, Value>,
}

impl From<ApiResponse> for Completion {
    fn from(response: ApiResponse) -> Self {
        let usage = response
            .usage
            .map(|u| TokenUsage::reported(u.prompt_tokens, u.completion_tokens, u.total_tokens))
            .unwrap_or_default();

        let (content, finish_reason) = response
            .choices
            .into_iter()
            .next()
            .map(|c| (c.message.content.unwrap_or_default(), c.finish_reason))
            .unwrap_or_default();

        let mut metadata = Map::new();
        if let Some(id) = response.id {
            metadata.insert("id".into(), Value::String(id));
        }
        if let Some(created) = response.created {
            metadata.insert("created".into(), Value::from(created));
        }
        if let Some(model) = response.model {
            metadata.insert("model".into(), Value::String(model));
        }

        Self {
            content,
            usage,
            finish_reason,
            metadata,
        }
    }
}

pub(crate) async fn complete(request: reqwest::RequestBuilder) -> Result<Completion, ProviderError> {
    let response = send(request).await?;
    let body: ApiResponse = read_json(response).await?;
    Ok(body.into())
}

/// Text deltas of a `stream: true` request, ending at `[DONE]`.
pub(crate) fn stream(request: reqwest::RequestBuilder) -> TextStream {
    Box::pin(async_stream::try_stream! {
        let response = send(request).await?;
        let mut events = Box::pin(sse_data(response));

        while let Some(data) = events.next().await {
            let data = data?;
            if data.trim() == "[DONE]" {
                break;
            }
            let chunk: ApiChunk = serde_json::from_str(&data)
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            for choice in chunk.choices {
                if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                    yield text;
                }
            }
        }
    })
}
