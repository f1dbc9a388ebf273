use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The requested provider is not in the live registry.
    #[error("Provider not found")]
    ProviderNotFound(String),

    #[error("{provider} generation error: {message}")]
    Generation { provider: String, message: String },

    #[error("failed to initialize {provider}: {message}")]
    Construction { provider: String, message: String },

    #[error("{provider} did not answer within {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error(transparent)]
    Storage(#[from] storage::Error),
}

impl Error {
    pub(crate) fn generation(provider: &str, source: crate::model::ProviderError) -> Self {
        Self::Generation {
            provider: provider.to_string(),
            message: source.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
