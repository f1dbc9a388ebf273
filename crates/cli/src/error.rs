//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// No conversation with the given id.
    #[error("conversation not found: {id}")]
    ConversationNotFound { id: String },

    /// The model was not in the provider's catalog.
    #[error("model {model} not found for provider {provider}")]
    ModelNotFound { model: String, provider: String },

    /// A `--messages` file could not be decoded.
    #[error("invalid messages file {path}: {message}")]
    Messages { path: PathBuf, message: String },

    /// A command-line value was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The local daemon is not enabled in the configuration.
    #[error("ollama is not configured")]
    OllamaDisabled,

    /// An error occurred in the runtime layer.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// An adapter call made directly by the CLI failed.
    #[error(transparent)]
    Provider(#[from] runtime::ProviderError),

    /// An error occurred in the storage layer.
    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
