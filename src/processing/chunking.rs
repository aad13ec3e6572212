//! Overlapping text splitter applied to each extracted page.
//!
//! Pages are split independently so a chunk never spans two pages. Lengths are measured in
//! characters by default (matching `TEXT_SPLITTER_CHUNK_SIZE=1000`,
//! `TEXT_SPLITTER_CHUNK_OVERLAP=100`) or in tokens of the embedding model when
//! `TEXT_SPLITTER_UNIT=tokens`.
//!
//! - Boundaries: `semchunk-rs` prefers paragraph, line, sentence and word breaks in that order.
//!   Any chunk it returns over the budget is split again on paragraph, line and word breaks, and
//!   on characters as a last resort.
//! - Overlap: the tail of the previous chunk is prepended to the next one and the result is
//!   trimmed back under the budget.
//! - Token counting: `tiktoken-rs` for known encodings; a whitespace counter when the model's
//!   tokenizer is unavailable (common for Ollama models).

use crate::config::{ChunkUnit, ChunkingSettings};
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

use super::types::ChunkingError;

pub(crate) type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Splits page text into overlapping chunks of bounded length.
#[derive(Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
    counter: TokenCounter,
}

impl std::fmt::Debug for TextSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextSplitter")
            .field("chunk_size", &self.chunk_size)
            .field("overlap", &self.overlap)
            .finish_non_exhaustive()
    }
}

impl TextSplitter {
    /// Build a splitter from configuration; `model` selects the tokenizer for token units.
    pub fn from_settings(settings: &ChunkingSettings, model: &str) -> Result<Self, ChunkingError> {
        let counter = match settings.unit {
            ChunkUnit::Chars => char_counter(),
            ChunkUnit::Tokens => build_token_counter(model),
        };
        Self::with_counter(settings.chunk_size, settings.overlap, counter)
    }

    /// Character-measured splitter.
    pub fn by_chars(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        Self::with_counter(chunk_size, overlap, char_counter())
    }

    pub(crate) fn with_counter(
        chunk_size: usize,
        overlap: usize,
        counter: TokenCounter,
    ) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self {
            chunk_size,
            overlap,
            counter,
        })
    }

    /// Target chunk length.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `text`; all-whitespace input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        chunk_text_with_counter(text, self.chunk_size, self.overlap, self.counter.clone())
            .into_iter()
            .filter(|chunk| !chunk.trim().is_empty())
            .collect()
    }
}

/// Build a token counter for the embedding model.
///
/// Falls back to whitespace tokenization for unknown or locally aliased models. The fallback is
/// logged at `warn` level to aid diagnosis while keeping ingestion flowing.
pub(crate) fn build_token_counter(model: &str) -> TokenCounter {
    match build_tiktoken_counter(model) {
        Ok(counter) => counter,
        Err(error) => {
            tracing::warn!(
                model,
                error = %error,
                "Tokenizer unavailable; falling back to whitespace counter"
            );
            default_token_counter()
        }
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            if let Some(candidate) = encoding_from_name(model) {
                candidate
            } else {
                tracing::warn!(
                    model,
                    "Falling back to 'cl100k_base' encoding for token counting"
                );
                cl100k_base()
            }
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

fn char_counter() -> TokenCounter {
    Arc::new(|segment: &str| segment.chars().count())
}

fn default_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

fn chunk_text_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    token_counter: TokenCounter,
) -> Vec<String> {
    let counter_for_chunker = token_counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let mut bounded = Vec::new();
    for chunk in chunker.chunk(text) {
        split_oversized(&chunk, chunk_size, &token_counter, &mut bounded);
    }
    apply_overlap(bounded, chunk_size, overlap, &token_counter)
}

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Push `text` onto `out`, split into pieces that each fit `chunk_size`.
fn split_oversized(
    text: &str,
    chunk_size: usize,
    token_counter: &TokenCounter,
    out: &mut Vec<String>,
) {
    if token_counter.as_ref()(text) <= chunk_size {
        out.push(text.to_string());
        return;
    }
    let text = text.trim();
    let Some(separator) = SEPARATORS.into_iter().find(|sep| text.contains(*sep)) else {
        split_by_chars(text, chunk_size, token_counter, out);
        return;
    };

    let mut current = String::new();
    for piece in text.split(separator).map(str::trim).filter(|piece| !piece.is_empty()) {
        if !current.is_empty() {
            let candidate = format!("{current}{separator}{piece}");
            if token_counter.as_ref()(&candidate) <= chunk_size {
                current = candidate;
                continue;
            }
            out.push(std::mem::take(&mut current));
        }
        if token_counter.as_ref()(piece) <= chunk_size {
            current = piece.to_string();
        } else {
            split_oversized(piece, chunk_size, token_counter, out);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
}

fn split_by_chars(
    text: &str,
    chunk_size: usize,
    token_counter: &TokenCounter,
    out: &mut Vec<String>,
) {
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if token_counter.as_ref()(&current) > chunk_size {
            current.pop();
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            current.push(ch);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
}

/// Apply a token-limited overlap between the tail of the previous chunk and the current one.
///
/// Ensures the resulting overlapped chunk does not exceed `chunk_size` by trimming from the
/// start as needed.
fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    if chunks.is_empty() {
        return chunks;
    }

    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut iter = chunks.into_iter();
    let Some(mut previous) = iter.next() else {
        return overlapped;
    };
    overlapped.push(previous.clone());

    for current in iter {
        let overlapped_chunk = build_overlapped_chunk(
            &previous,
            &current,
            effective_overlap,
            chunk_size,
            token_counter,
        );
        overlapped.push(overlapped_chunk);
        previous = current;
    }

    overlapped
}

fn build_overlapped_chunk(
    previous: &str,
    current: &str,
    overlap: usize,
    chunk_size: usize,
    token_counter: &TokenCounter,
) -> String {
    if overlap == 0 {
        return current.to_string();
    }

    let tail = tail_with_token_limit(previous, overlap, token_counter);
    let mut combined = String::with_capacity(tail.len() + current.len() + 1);

    if !tail.is_empty() {
        combined.push_str(tail);
        if !ends_with_whitespace(tail) && !starts_with_whitespace(current) {
            combined.push(' ');
        }
    }

    combined.push_str(current);
    trim_to_token_budget(&combined, chunk_size, token_counter)
}

fn tail_with_token_limit<'a>(
    text: &'a str,
    token_limit: usize,
    token_counter: &TokenCounter,
) -> &'a str {
    if token_limit == 0 {
        return "";
    }

    let trimmed_text = text.trim_start();
    if token_counter.as_ref()(trimmed_text) <= token_limit {
        return trimmed_text;
    }

    let len = text.len();
    let mut start = 0;

    while start < len {
        let next_start = text[start..]
            .char_indices()
            .nth(1)
            .map(|(offset, _)| start + offset)
            .unwrap_or(len);
        start = next_start;
        let candidate = &text[start..];
        let trimmed = candidate.trim_start();
        if token_counter.as_ref()(trimmed) <= token_limit {
            return trimmed;
        }
    }

    ""
}

fn trim_to_token_budget(text: &str, token_budget: usize, token_counter: &TokenCounter) -> String {
    if token_budget == 0 {
        return String::new();
    }

    if token_counter.as_ref()(text) <= token_budget {
        return text.to_string();
    }

    let len = text.len();
    let mut start = 0;

    while start < len {
        let next_start = text[start..]
            .char_indices()
            .nth(1)
            .map(|(offset, _)| start + offset)
            .unwrap_or(len);
        start = next_start;
        let candidate = &text[start..];
        let trimmed = candidate.trim_start();
        if token_counter.as_ref()(trimmed) <= token_budget {
            return trimmed.to_string();
        }
    }

    String::new()
}

fn starts_with_whitespace(text: &str) -> bool {
    text.chars()
        .next()
        .map(|c| c.is_whitespace())
        .unwrap_or(false)
}

fn ends_with_whitespace(text: &str) -> bool {
    text.chars()
        .next_back()
        .map(|c| c.is_whitespace())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_text_respects_chunk_size_whitespace_counter() {
        let text = "one two three four five";
        let chunks = chunk_text_with_counter(text, 2, 0, default_token_counter());
        assert_eq!(chunks, vec!["one two", "three four", "five"]);
    }

    #[test]
    fn chunk_text_with_counter_applies_overlap() {
        let text = "one two three four five";
        let counter = default_token_counter();
        let chunks = chunk_text_with_counter(text, 3, 1, counter.clone());
        assert_eq!(chunks, vec!["one two three", "three four five"]);
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 3);
        }
    }

    #[test]
    fn splitter_rejects_zero_chunk_size() {
        let error = TextSplitter::by_chars(0, 0).unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn blank_text_produces_no_chunks() {
        let splitter = TextSplitter::by_chars(100, 10).expect("splitter");
        assert!(splitter.split("  \n\t ").is_empty());
    }

    #[test]
    fn short_page_is_a_single_chunk() {
        let splitter = TextSplitter::by_chars(1000, 100).expect("splitter");
        let chunks = splitter.split("Revenue grew four percent in the third quarter.");
        assert_eq!(chunks, vec!["Revenue grew four percent in the third quarter."]);
    }

    #[test]
    fn character_budget_is_respected_with_overlap() {
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta. Iota kappa lambda mu. \
                    Nu xi omicron pi. Rho sigma tau upsilon. Phi chi psi omega.";
        let splitter = TextSplitter::by_chars(40, 8).expect("splitter");
        let chunks = splitter.split(text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40, "chunk too long: {chunk:?}");
        }
        assert!(chunks[0].starts_with("Alpha"));
        assert!(chunks.last().expect("chunks").contains("omega"));
    }

    #[test]
    fn multi_paragraph_text_stays_within_the_budget() {
        let paragraph = "Quarterly revenue grew on subscription renewals and lower churn. ".repeat(30);
        let text = format!("Title\n\n{paragraph}\n\n{paragraph}");
        let splitter = TextSplitter::by_chars(1000, 100).expect("splitter");
        let chunks = splitter.split(&text);
        assert!(chunks.len() >= 4, "got {} chunks", chunks.len());
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 1000, "chunk of {} chars", chunk.chars().count());
        }
        assert!(chunks[0].starts_with("Title"));
        assert!(chunks.last().expect("chunks").trim_end().ends_with("churn."));
    }

    #[test]
    fn oversized_chunks_are_split_on_words_without_overlap() {
        let text = "# heading\n\nheading alpha bravo charlie delta echo foxtrot golf hotel india \
                    juliet kilo lima mike november oscar papa\n";
        let splitter = TextSplitter::by_chars(40, 0).expect("splitter");
        let chunks = splitter.split(text);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40, "chunk too long: {chunk:?}");
        }
        let chunk_words: Vec<&str> = chunks.iter().flat_map(|chunk| chunk.split_whitespace()).collect();
        let original_words: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(chunk_words, original_words);
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let mut out = Vec::new();
        split_oversized(&"x".repeat(25), 10, &char_counter(), &mut out);
        assert_eq!(out, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn token_budget_uses_tiktoken() {
        let text = "The quick brown fox jumps over the lazy dog.";
        let splitter = TextSplitter::from_settings(
            &ChunkingSettings {
                chunk_size: 5,
                overlap: 0,
                unit: ChunkUnit::Tokens,
            },
            "text-embedding-3-small",
        )
        .expect("splitter");
        let chunks = splitter.split(text);
        let token_counter = build_tiktoken_counter("text-embedding-3-small").expect("counter");
        for chunk in &chunks {
            assert!(token_counter.as_ref()(chunk) <= 5);
        }
        let chunk_words: Vec<String> = chunks
            .iter()
            .flat_map(|chunk| chunk.split_whitespace().map(|word| word.to_string()))
            .collect();
        let original_words: Vec<String> = text
            .split_whitespace()
            .map(|word| word.to_string())
            .collect();
        assert_eq!(chunk_words, original_words);
    }
}
