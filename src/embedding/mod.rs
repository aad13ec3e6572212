//! Embedding client abstraction and provider adapters.
//!
//! Both adapters batch their input, retry transient failures and refuse to hand back a vector
//! list whose length differs from the input. Dimension checks happen in the engine, which knows
//! the width the store expects.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ConfigError, EmbeddingSettings, ProviderKind};
use crate::retry::{RetryPolicy, Retryable};

mod ollama;
mod openai;

pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be reached.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider did not answer within the request timeout.
    #[error("Embedding request timed out: {0}")]
    Timeout(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider answered with a payload that does not fit the request.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Provider throttled or failed server-side.
    #[error("Embedding provider returned {status}: {body}")]
    Transient {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

impl Retryable for EmbeddingClientError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::Timeout(_) | Self::Transient { .. }
        )
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Build the embedding client selected by configuration.
pub fn build_embedding_client(
    settings: &EmbeddingSettings,
    retry: RetryPolicy,
) -> Result<Arc<dyn EmbeddingClient>, ConfigError> {
    tracing::debug!(
        provider = ?settings.provider,
        model = %settings.model,
        dimension = settings.dimension,
        batch_size = settings.batch_size,
        "Building embedding client"
    );
    match settings.provider {
        ProviderKind::LocalModel => Ok(Arc::new(OllamaEmbeddingClient::new(settings, retry)?)),
        ProviderKind::RemoteApi => Ok(Arc::new(OpenAiEmbeddingClient::new(settings, retry)?)),
    }
}

pub(crate) fn http_client(
    user_agent: &str,
    timeout: std::time::Duration,
) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|error| ConfigError::InvalidValue(format!("HTTP client: {error}")))
}

pub(crate) fn classify_send_error(provider: &str, error: reqwest::Error) -> EmbeddingClientError {
    if error.is_timeout() {
        EmbeddingClientError::Timeout(format!("{provider}: {error}"))
    } else if error.is_connect() || error.is_request() {
        EmbeddingClientError::ProviderUnavailable(format!("{provider}: {error}"))
    } else {
        EmbeddingClientError::GenerationFailed(format!("{provider}: {error}"))
    }
}

pub(crate) async fn classify_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, EmbeddingClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.as_u16() == 429 || status.is_server_error() {
        Err(EmbeddingClientError::Transient {
            status: status.as_u16(),
            body,
        })
    } else {
        Err(EmbeddingClientError::GenerationFailed(format!(
            "{provider} returned {status}: {body}"
        )))
    }
}

pub(crate) fn ensure_count(
    expected: usize,
    embeddings: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
    if embeddings.len() == expected {
        Ok(embeddings)
    } else {
        Err(EmbeddingClientError::InvalidResponse(format!(
            "expected {expected} embeddings, received {}",
            embeddings.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use std::time::Duration;

    #[test]
    fn transient_and_unavailable_errors_are_retryable() {
        assert!(EmbeddingClientError::ProviderUnavailable("down".into()).is_retryable());
        assert!(EmbeddingClientError::Timeout("slow".into()).is_retryable());
        assert!(
            EmbeddingClientError::Transient {
                status: 429,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!EmbeddingClientError::GenerationFailed("bad input".into()).is_retryable());
        assert!(!EmbeddingClientError::InvalidResponse("short".into()).is_retryable());
    }

    #[tokio::test]
    async fn refused_connections_are_not_reported_as_timeouts() {
        let error = reqwest::Client::new()
            .get("http://127.0.0.1:1/api/embed")
            .send()
            .await
            .unwrap_err();
        let classified = classify_send_error("ollama", error);
        assert!(
            matches!(classified, EmbeddingClientError::ProviderUnavailable(_)),
            "{classified:?}"
        );
    }

    #[tokio::test]
    async fn slow_providers_are_reported_as_timeouts() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).delay(Duration::from_millis(500));
            })
            .await;

        let error = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .expect("client")
            .post(format!("{}/api/embed", server.base_url()))
            .send()
            .await
            .unwrap_err();
        let classified = classify_send_error("ollama", error);
        assert!(matches!(classified, EmbeddingClientError::Timeout(_)), "{classified:?}");
    }

    #[test]
    fn count_mismatch_is_reported() {
        let error = ensure_count(2, vec![vec![0.0]]).unwrap_err();
        assert!(error.to_string().contains("expected 2 embeddings, received 1"));
    }
}
