//! Page summarization: prompt construction, per-page deadlines and output shaping.
//!
//! A failed or late summary never fails the document. The page is stored with an `[ERROR] ...`
//! placeholder and the failure is listed in the run report.

use std::sync::Arc;
use std::time::Duration;

use crate::config::SummarizationSettings;
use crate::summarization::{SummarizationClient, SummarizationClientError, SummarizationRequest};

const TRUNCATION_MARKER: &str = "...";

/// Prefix of summaries stored in place of a failed generation.
pub const ERROR_PREFIX: &str = "[ERROR]";

fn system_prompt(max_chars: usize) -> String {
    format!(
        "You summarize a single page of a document for a search index. \
         Write three short bullet points with the key facts, then a two or three sentence summary. \
         Stay factual and do not speculate. Keep the whole answer under {max_chars} characters."
    )
}

/// Build the provider request for one page, cutting input to `input_chars`.
pub fn build_request(text: &str, settings: &SummarizationSettings) -> SummarizationRequest {
    let prompt: String = text.trim().chars().take(settings.input_chars).collect();
    SummarizationRequest {
        system: system_prompt(settings.max_chars),
        prompt,
        max_chars: settings.max_chars,
    }
}

/// Drop carriage returns and collapse runs of blank lines.
pub fn normalize_summary(raw: &str) -> String {
    let raw = raw.replace('\r', "");
    let mut lines = Vec::new();
    let mut previous_blank = false;
    for line in raw.lines() {
        let line = line.trim_end();
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

/// Cut `text` to at most `max_chars` characters, ending in `...` when cut.
pub fn clamp_summary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_MARKER.len());
    let mut clamped: String = text.chars().take(keep).collect();
    clamped.truncate(clamped.trim_end().len());
    clamped.push_str(TRUNCATION_MARKER);
    clamped
}

/// Placeholder stored when a page summary could not be produced.
pub fn error_placeholder(error: &SummarizationClientError, max_chars: usize) -> String {
    let message = match error {
        SummarizationClientError::Timeout(secs) => {
            format!("{ERROR_PREFIX} summarization timed out after {secs}s")
        }
        other => format!("{ERROR_PREFIX} {other}"),
    };
    clamp_summary(&message, max_chars)
}

/// Summarizes page text under the configured deadline and character budget.
#[derive(Clone)]
pub struct PageSummarizer {
    client: Arc<dyn SummarizationClient>,
    settings: SummarizationSettings,
}

impl PageSummarizer {
    /// Wrap a provider client.
    pub fn new(client: Arc<dyn SummarizationClient>, settings: SummarizationSettings) -> Self {
        Self { client, settings }
    }

    /// Character budget applied to every stored summary.
    pub fn max_chars(&self) -> usize {
        self.settings.max_chars
    }

    /// Summarize one page; the result already fits the character budget.
    pub async fn summarize(&self, text: &str) -> Result<String, SummarizationClientError> {
        let request = build_request(text, &self.settings);
        let raw = match self.settings.timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.client.generate_summary(request))
                .await
                .map_err(|_| SummarizationClientError::Timeout(whole_seconds(deadline)))??,
            None => self.client.generate_summary(request).await?,
        };

        let summary = normalize_summary(&raw);
        if summary.is_empty() {
            return Err(SummarizationClientError::InvalidResponse(
                "provider returned an empty summary".into(),
            ));
        }
        Ok(clamp_summary(&summary, self.settings.max_chars))
    }

    /// Summarize one page, substituting a placeholder on failure.
    ///
    /// The error is returned alongside so callers can report it.
    pub async fn summarize_or_placeholder(
        &self,
        text: &str,
    ) -> (String, Option<SummarizationClientError>) {
        match self.summarize(text).await {
            Ok(summary) => (summary, None),
            Err(error) => (error_placeholder(&error, self.settings.max_chars), Some(error)),
        }
    }
}

fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs().max(1)
}
