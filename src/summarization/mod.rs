//! Abstractions for generating page summaries via local or hosted providers.
//!
//! The Ollama client issues HTTP requests directly to the runtime, mirroring the embedding
//! adapter; the Anthropic client talks to the Messages API. Timeouts are applied by the caller
//! per page, so clients never retry on their own.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ConfigError, ProviderKind, SummarizationSettings};

mod anthropic;
mod ollama;

pub use anthropic::AnthropicSummarizationClient;
pub use ollama::OllamaSummarizationClient;

/// Errors surfaced while attempting summarization.
#[derive(Debug, Error)]
pub enum SummarizationClientError {
    /// The call did not finish within the caller's deadline.
    #[error("Summarization timed out after {0}s")]
    Timeout(u64),
    /// Provider was unreachable.
    #[error("Summarization provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate summary: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Request payload passed to the summarization provider.
#[derive(Debug, Clone)]
pub struct SummarizationRequest {
    /// Instructions describing the expected summary shape.
    pub system: String,
    /// Page text, already cut to the input budget.
    pub prompt: String,
    /// Character budget the summary should respect.
    pub max_chars: usize,
}

/// Interface implemented by summarization providers.
#[async_trait]
pub trait SummarizationClient: Send + Sync {
    /// Generate a summary for one page.
    async fn generate_summary(
        &self,
        request: SummarizationRequest,
    ) -> Result<String, SummarizationClientError>;
}

/// Build the summarization client selected by configuration.
pub fn build_summarization_client(
    settings: &SummarizationSettings,
) -> Result<Arc<dyn SummarizationClient>, ConfigError> {
    tracing::debug!(
        provider = ?settings.provider,
        model = %settings.model,
        max_chars = settings.max_chars,
        "Building summarization client"
    );
    match settings.provider {
        ProviderKind::LocalModel => Ok(Arc::new(OllamaSummarizationClient::new(settings)?)),
        ProviderKind::RemoteApi => Ok(Arc::new(AnthropicSummarizationClient::new(settings)?)),
    }
}

fn http_client(user_agent: &str) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|error| ConfigError::InvalidValue(format!("HTTP client: {error}")))
}
