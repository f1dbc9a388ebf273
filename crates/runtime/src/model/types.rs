//! Core generation types (provider-agnostic).
//!
//! These types are the single contract every adapter normalizes its vendor
//! API into. Vendor wire shapes belong in the adapter modules.

use super::errors::ProviderError;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::pin::Pin;
use storage::{Message, UsageRecord};

/// What a model can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Completion,
    Vision,
    FunctionCalling,
    Code,
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "completion" => Ok(Self::Completion),
            "vision" => Ok(Self::Vision),
            "function_calling" => Ok(Self::FunctionCalling),
            "code" => Ok(Self::Code),
            other => Err(format!("unknown capability: {other}")),
        }
    }
}

/// One addressable model.
///
/// Local descriptors always carry zero pricing; use [`ModelDescriptor::local`]
/// to build them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Vendor-specific model id.
    pub name: String,
    pub display_name: String,
    /// Registry name of the provider that serves this model.
    pub provider: String,
    /// Token budget.
    pub context_length: u32,
    pub capabilities: Vec<Capability>,
    pub price_per_1k_input: f64,
    pub price_per_1k_output: f64,
    pub is_local: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ModelDescriptor {
    /// Describe a model running on caller-controlled infrastructure.
    pub fn local(
        name: impl Into<String>,
        display_name: impl Into<String>,
        provider: impl Into<String>,
        context_length: u32,
        capabilities: Vec<Capability>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            provider: provider.into(),
            context_length,
            capabilities,
            price_per_1k_input: 0.0,
            price_per_1k_output: 0.0,
            is_local: true,
            metadata: Map::new(),
        }
    }

    /// Describe a metered cloud model.
    pub fn priced(
        name: impl Into<String>,
        display_name: impl Into<String>,
        provider: impl Into<String>,
        context_length: u32,
        capabilities: Vec<Capability>,
        price_per_1k_input: f64,
        price_per_1k_output: f64,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            provider: provider.into(),
            context_length,
            capabilities,
            price_per_1k_input,
            price_per_1k_output,
            is_local: false,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    1.0
}

/// A generation request in provider-neutral form.
///
/// `messages` wins over `prompt` when both are present. `temperature` and
/// `top_p` are forwarded to the vendor as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// `None` leaves the limit to the adapter.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: None,
            messages: None,
            system_prompt: None,
            max_tokens: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            stop_sequences: Vec::new(),
            stream: false,
            metadata: Map::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = top_p;
        self
    }

    /// Set stop sequences, dropping repeats but keeping first-seen order.
    pub fn with_stop_sequences<I, S>(mut self, stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_sequences.clear();
        for stop in stops {
            let stop = stop.into();
            if !self.stop_sequences.contains(&stop) {
                self.stop_sequences.push(stop);
            }
        }
        self
    }

    /// The explicit message list, if one was supplied and is non-empty.
    pub fn chat_messages(&self) -> Option<&[Message]> {
        self.messages.as_deref().filter(|m| !m.is_empty())
    }

    /// Conversational input after applying precedence: `messages`, then `prompt`.
    pub fn conversation(&self) -> Vec<Message> {
        match (self.chat_messages(), &self.prompt) {
            (Some(messages), _) => messages.to_vec(),
            (None, Some(prompt)) => vec![Message::user(prompt.clone())],
            (None, None) => Vec::new(),
        }
    }
}

/// Token accounting for one generation. `total_tokens` is always populated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }

    /// Reconcile whatever counts a vendor reported.
    ///
    /// When a split is available the total is its sum. A vendor that reports
    /// only a combined total keeps input/output at zero and the total as given.
    pub fn reported(input: Option<u32>, output: Option<u32>, total: Option<u32>) -> Self {
        let usage = Self::new(input.unwrap_or(0), output.unwrap_or(0));
        if usage.total_tokens == 0 {
            Self {
                total_tokens: total.unwrap_or(0),
                ..usage
            }
        } else {
            usage
        }
    }
}

/// The outcome of one completed generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub model: String,
    pub provider: String,
    pub content: String,
    #[serde(flatten)]
    pub usage: TokenUsage,
    pub cost: f64,
    /// Wall-clock from dispatch to completion.
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl GenerationResult {
    /// Ledger row for this generation, stamped now.
    pub fn usage_record(&self) -> UsageRecord {
        UsageRecord {
            model: self.model.clone(),
            provider: self.provider.clone(),
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
            total_tokens: self.usage.total_tokens,
            cost: self.cost,
            latency_ms: self.latency_ms,
            timestamp: chrono::Utc::now(),
            metadata: (!self.metadata.is_empty()).then(|| Value::Object(self.metadata.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of a provider health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub available: bool,
    pub provider: String,
    pub models_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl HealthReport {
    pub fn healthy(provider: impl Into<String>, models_count: usize) -> Self {
        Self {
            status: HealthStatus::Healthy,
            available: true,
            provider: provider.into(),
            models_count,
            error: None,
            details: Map::new(),
        }
    }

    pub fn unhealthy(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            available: false,
            provider: provider.into(),
            models_count: 0,
            error: Some(error.into()),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Lazy, single-pass sequence of text fragments in emission order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;
