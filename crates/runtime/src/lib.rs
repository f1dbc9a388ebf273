//! Modelhub runtime: provider adapters and generation orchestration.
//!
//! This crate puts several LLM backends (a local Ollama daemon and the
//! OpenAI, Anthropic, Google, and Mistral APIs) behind one generation
//! contract, fans requests out across them, and records usage through a
//! [`storage::Recorder`].
//!
//! # Overview
//!
//! - **Provider**: the adapter trait. Each backend maps its native request,
//!   usage fields, pricing table, and error surface onto [`GenerationRequest`]
//!   and [`GenerationResult`].
//! - **Orchestrator**: a registry of adapters, built once, plus the usage
//!   ledger. Routes `generate`, runs comparisons and health probes in
//!   parallel, and never lets one backend's failure hide the others.
//! - **pricing**: the pure per-1k token cost function.
//!
//! # Example
//!
//! ```no_run
//! use runtime::{GenerationRequest, Orchestrator, Settings};
//! use std::sync::Arc;
//! use storage::Store;
//!
//! # async fn example() -> runtime::Result<()> {
//! let store = Arc::new(Store::in_memory()?);
//! let hub = Orchestrator::from_settings(&Settings::default(), store);
//!
//! let request = GenerationRequest::new("llama3").with_prompt("Hello!");
//! let result = hub.generate("ollama", &request).await?;
//! println!("{} ({} tokens)", result.content, result.usage.total_tokens);
//! # Ok(())
//! # }
//! ```

mod error;
pub mod model;
mod orchestrator;
pub mod pricing;
pub mod providers;
pub mod settings;

pub use error::{Error, Result};

pub use model::{
    Capability, GenerationRequest, GenerationResult, HealthReport, HealthStatus, ModelDescriptor,
    ProviderError, TextStream, TokenUsage,
};

pub use orchestrator::{ComparisonOutcome, ComparisonResult, Orchestrator, OrchestratorBuilder};

pub use providers::{
    AnthropicProvider, GoogleProvider, MistralProvider, OllamaProvider, OpenAiProvider, Provider,
    PullStatus, collect_stream,
};

pub use settings::{ApiSettings, OllamaSettings, OpenAiSettings, ProviderSettings, Settings};
