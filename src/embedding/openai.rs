use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{
    EmbeddingClient, EmbeddingClientError, classify_send_error, classify_status, ensure_count,
    http_client,
};
use crate::config::{ConfigError, EmbeddingSettings, Secret};
use crate::retry::{RetryPolicy, with_retry};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Embeddings from the hosted OpenAI API via `POST /v1/embeddings`.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: Secret,
    model: String,
    batch_size: usize,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingClient {
    /// Build a client from embedding settings; a credential is required.
    pub fn new(settings: &EmbeddingSettings, retry: RetryPolicy) -> Result<Self, ConfigError> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingVariable("EMBEDDING_API_KEY".into()))?;
        Ok(Self {
            http: http_client("rustyingest/embed", settings.timeout)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            api_key,
            model: settings.model.clone(),
            batch_size: settings.batch_size.max(1),
            retry,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'))
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let payload = json!({
            "model": self.model,
            "input": batch,
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose())
            .json(&payload)
            .send()
            .await
            .map_err(|error| classify_send_error("OpenAI", error))?;
        let response = classify_status("OpenAI", response).await?;

        let mut body: OpenAiEmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!("failed to decode OpenAI response: {error}"))
        })?;
        body.data.sort_by_key(|item| item.index);
        ensure_count(
            batch.len(),
            body.data.into_iter().map(|item| item.embedding).collect(),
        )
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = with_retry(&self.retry, "openai_embed", || self.embed_batch(batch)).await?;
            embeddings.extend(vectors);
        }
        tracing::debug!(model = %self.model, count = embeddings.len(), "Generated embeddings");
        Ok(embeddings)
    }
}
