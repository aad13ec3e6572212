use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{SummarizationClient, SummarizationClientError, SummarizationRequest, http_client};
use crate::config::{ConfigError, Secret, SummarizationSettings};

const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Summaries from the Anthropic Messages API.
pub struct AnthropicSummarizationClient {
    http: Client,
    base_url: String,
    api_key: Secret,
    model: String,
}

impl AnthropicSummarizationClient {
    /// Build a client from summarization settings; a credential is required.
    pub fn new(settings: &SummarizationSettings) -> Result<Self, ConfigError> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingVariable("SUMMARIZATION_API_KEY".into()))?;
        Ok(Self {
            http: http_client("rustyingest/summary")?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_URL.to_string()),
            api_key,
            model: settings.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Rough token allowance for a character budget, leaving room for the model to finish a sentence.
pub(super) fn output_token_budget(max_chars: usize) -> usize {
    (max_chars / 2).clamp(64, 1024)
}

#[async_trait]
impl SummarizationClient for AnthropicSummarizationClient {
    async fn generate_summary(
        &self,
        request: SummarizationRequest,
    ) -> Result<String, SummarizationClientError> {
        let payload = json!({
            "model": self.model,
            "max_tokens": output_token_budget(request.max_chars),
            "temperature": 0.1,
            "system": request.system,
            "messages": [
                { "role": "user", "content": request.prompt }
            ],
        });

        let response = self
            .http
            .post(self.endpoint())
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                SummarizationClientError::ProviderUnavailable(format!(
                    "failed to reach Anthropic API: {error}"
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizationClientError::GenerationFailed(format!(
                "Anthropic API returned {status}: {body}"
            )));
        }

        let body: MessagesResponse = response.json().await.map_err(|error| {
            SummarizationClientError::InvalidResponse(format!(
                "failed to decode Anthropic response: {error}"
            ))
        })?;

        let text: String = body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() {
            return Err(SummarizationClientError::InvalidResponse(
                "Anthropic response carried no text".into(),
            ));
        }
        Ok(text.trim().to_string())
    }
}
