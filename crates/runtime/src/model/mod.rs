//! Generation contract shared by every provider adapter.

pub mod errors;
pub mod types;

pub use errors::ProviderError;
pub use types::{
    Capability, GenerationRequest, GenerationResult, HealthReport, HealthStatus, ModelDescriptor,
    TextStream, TokenUsage,
};
