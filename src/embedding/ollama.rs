use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{
    EmbeddingClient, EmbeddingClientError, classify_send_error, classify_status, ensure_count,
    http_client,
};
use crate::config::{ConfigError, EmbeddingSettings};
use crate::retry::{RetryPolicy, with_retry};

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Embeddings from a local Ollama runtime via `POST /api/embed`.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    batch_size: usize,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddingClient {
    /// Build a client from embedding settings.
    pub fn new(settings: &EmbeddingSettings, retry: RetryPolicy) -> Result<Self, ConfigError> {
        Ok(Self {
            http: http_client("rustyingest/embed", settings.timeout)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            model: settings.model.clone(),
            batch_size: settings.batch_size.max(1),
            retry,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let payload = json!({
            "model": self.model,
            "input": batch,
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| classify_send_error("Ollama", error))?;
        let response = classify_status("Ollama", response).await?;

        let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;
        ensure_count(batch.len(), body.embeddings)
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = with_retry(&self.retry, "ollama_embed", || self.embed_batch(batch)).await?;
            embeddings.extend(vectors);
        }
        tracing::debug!(model = %self.model, count = embeddings.len(), "Generated embeddings");
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use std::time::Duration;

    fn client(base_url: String, batch_size: usize) -> OllamaEmbeddingClient {
        OllamaEmbeddingClient {
            http: Client::builder()
                .user_agent("rustyingest-test")
                .build()
                .expect("client"),
            base_url,
            model: "all-minilm".into(),
            batch_size,
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        }
    }

    #[tokio::test]
    async fn embeds_in_batches() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embed")
                    .body_contains("\"model\":\"all-minilm\"");
                then.status(200).json_body(json!({
                    "embeddings": [[0.1, 0.2], [0.3, 0.4]]
                }));
            })
            .await;

        let vectors = client(server.base_url(), 2)
            .generate_embeddings(vec!["a".into(), "b".into(), "c".into(), "d".into()])
            .await
            .expect("embeddings");

        mock.assert_hits(2);
        assert_eq!(vectors.len(), 4);
        assert_eq!(vectors[2], vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn short_response_is_invalid() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({ "embeddings": [[0.1, 0.2]] }));
            })
            .await;

        let error = client(server.base_url(), 8)
            .generate_embeddings(vec!["a".into(), "b".into()])
            .await
            .unwrap_err();
        assert!(matches!(error, EmbeddingClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surface() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(500).body("model crashed");
            })
            .await;

        let error = client(server.base_url(), 8)
            .generate_embeddings(vec!["a".into()])
            .await
            .unwrap_err();
        mock.assert_hits(2);
        assert!(matches!(error, EmbeddingClientError::Transient { status: 500, .. }));
    }
}
