//! Environment-driven configuration.
//!
//! [`Config::from_env`] reads a `.env` file (when present) and then the process environment.
//! Parsing itself goes through [`Config::from_lookup`], which accepts any key lookup so callers
//! and tests can feed values without touching process state. The loaded configuration is passed
//! explicitly to the engine and the provider factories.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Credential string whose `Debug` output never reveals the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a raw credential.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw credential for use in a request header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Provider family used for embedding and summarization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    /// Model served by a local Ollama runtime.
    LocalModel,
    /// Hosted API (OpenAI for embeddings, Anthropic for summaries).
    RemoteApi,
}

impl FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local-model" | "local" | "ollama" => Ok(Self::LocalModel),
            "remote-api" | "remote" | "openai" | "anthropic" => Ok(Self::RemoteApi),
            _ => Err(()),
        }
    }
}

/// Unit used to measure chunk length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkUnit {
    /// Unicode scalar values.
    Chars,
    /// Tokens of the embedding model's tokenizer.
    Tokens,
}

impl FromStr for ChunkUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chars" | "characters" => Ok(Self::Chars),
            "tokens" => Ok(Self::Tokens),
            _ => Err(()),
        }
    }
}

/// Vector store connection and collection naming.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Base URL of the Qdrant instance.
    pub url: String,
    /// Optional API key sent with every request.
    pub api_key: Option<Secret>,
    /// Collection holding chunk rows.
    pub chunks_collection: String,
    /// Collection holding page summary rows.
    pub pages_collection: String,
    /// Rows fetched per request while reading existing state.
    pub page_size: usize,
    /// Request timeout for store calls.
    pub timeout: Duration,
}

/// Embedding provider selection.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    /// Provider family.
    pub provider: ProviderKind,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Width of every vector the provider returns.
    pub dimension: usize,
    /// Override for the provider base URL.
    pub base_url: Option<String>,
    /// Credential for the remote API.
    pub api_key: Option<Secret>,
    /// Maximum number of texts per provider call.
    pub batch_size: usize,
    /// Request timeout for provider calls.
    pub timeout: Duration,
}

/// Summarization provider selection and summary limits.
#[derive(Debug, Clone)]
pub struct SummarizationSettings {
    /// Provider family.
    pub provider: ProviderKind,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Override for the provider base URL.
    pub base_url: Option<String>,
    /// Credential for the remote API.
    pub api_key: Option<Secret>,
    /// Hard cap on persisted summary length in characters.
    pub max_chars: usize,
    /// Page text beyond this many characters is not sent to the provider.
    pub input_chars: usize,
    /// Per-page timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

/// Text splitter parameters.
#[derive(Debug, Clone)]
pub struct ChunkingSettings {
    /// Target chunk length.
    pub chunk_size: usize,
    /// Overlap carried from the previous chunk.
    pub overlap: usize,
    /// Unit both lengths are measured in.
    pub unit: ChunkUnit,
}

/// OCR fallback for image-only PDF pages.
#[derive(Debug, Clone)]
pub struct OcrSettings {
    /// Whether blank PDF pages are sent through OCR.
    pub enabled: bool,
    /// Tesseract language code.
    pub language: String,
}

/// Bounded retry policy for store and embedding calls.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled after each attempt.
    pub initial_delay: Duration,
}

/// Runtime configuration for one ingestion run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Corpus root; the CLI flag takes precedence when given.
    pub source_dir: Option<PathBuf>,
    /// Vector store settings.
    pub store: StoreSettings,
    /// Embedding provider settings.
    pub embedding: EmbeddingSettings,
    /// Summarization provider settings.
    pub summarization: SummarizationSettings,
    /// Text splitter settings.
    pub chunking: ChunkingSettings,
    /// OCR fallback settings.
    pub ocr: OcrSettings,
    /// Retry policy.
    pub retry: RetrySettings,
    /// Abort the run when an existing-state lookup fails instead of degrading.
    pub strict_store_lookups: bool,
}

const DEFAULT_CHUNKS_COLLECTION: &str = "chunks";
const DEFAULT_PAGES_COLLECTION: &str = "pages";
const DEFAULT_OLLAMA_SUMMARY_MODEL: &str = "llama3.2";
const DEFAULT_ANTHROPIC_SUMMARY_MODEL: &str = "claude-3-5-haiku-20241022";

impl Config {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        tracing::debug!(
            qdrant_url = %config.store.url,
            chunks = %config.store.chunks_collection,
            pages = %config.store.pages_collection,
            embedding_provider = ?config.embedding.provider,
            embedding_model = %config.embedding.model,
            dimension = config.embedding.dimension,
            summarization_provider = ?config.summarization.provider,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let http_timeout = Duration::from_secs(vars.parse_or("HTTP_TIMEOUT_SECS", 60u64)?);

        let store = StoreSettings {
            url: vars.required("QDRANT_URL")?,
            api_key: vars.optional("QDRANT_API_KEY").map(Secret::new),
            chunks_collection: vars
                .optional("CHUNKS_COLLECTION_NAME")
                .unwrap_or_else(|| DEFAULT_CHUNKS_COLLECTION.to_string()),
            pages_collection: vars
                .optional("PAGES_COLLECTION_NAME")
                .unwrap_or_else(|| DEFAULT_PAGES_COLLECTION.to_string()),
            page_size: vars.parse_or("STORE_PAGE_SIZE", 512usize)?,
            timeout: http_timeout,
        };
        if store.chunks_collection == store.pages_collection {
            return Err(ConfigError::InvalidValue(
                "PAGES_COLLECTION_NAME must differ from CHUNKS_COLLECTION_NAME".into(),
            ));
        }

        let embedding_provider: ProviderKind = vars.parse_required("EMBEDDING_PROVIDER")?;
        let dimension: usize = vars.parse_required("EMBEDDING_DIMENSION")?;
        if dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        let embedding = EmbeddingSettings {
            provider: embedding_provider,
            model: vars.required("EMBEDDING_MODEL")?,
            dimension,
            base_url: vars.optional("EMBEDDING_URL"),
            api_key: vars
                .optional("EMBEDDING_API_KEY")
                .or_else(|| vars.optional("OPENAI_API_KEY"))
                .map(Secret::new),
            batch_size: vars.parse_or("EMBEDDING_BATCH_SIZE", 256usize)?.max(1),
            timeout: http_timeout,
        };

        let summarization_provider = match vars.optional("SUMMARIZATION_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("SUMMARIZATION_PROVIDER".into()))?,
            None => ProviderKind::LocalModel,
        };
        let default_summary_model = match summarization_provider {
            ProviderKind::LocalModel => DEFAULT_OLLAMA_SUMMARY_MODEL,
            ProviderKind::RemoteApi => DEFAULT_ANTHROPIC_SUMMARY_MODEL,
        };
        let timeout_secs: u64 = vars.parse_or("SUMMARY_TIMEOUT_SECS", 90)?;
        let summarization = SummarizationSettings {
            provider: summarization_provider,
            model: vars
                .optional("SUMMARIZATION_MODEL")
                .unwrap_or_else(|| default_summary_model.to_string()),
            base_url: vars.optional("SUMMARIZATION_URL"),
            api_key: vars
                .optional("SUMMARIZATION_API_KEY")
                .or_else(|| vars.optional("ANTHROPIC_API_KEY"))
                .map(Secret::new),
            max_chars: vars.parse_or("SUMMARY_MAX_CHARS", 550usize)?,
            input_chars: vars.parse_or("SUMMARY_INPUT_CHARS", 10_000usize)?,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        };
        if summarization.max_chars < 4 {
            return Err(ConfigError::InvalidValue("SUMMARY_MAX_CHARS".into()));
        }

        let chunking = ChunkingSettings {
            chunk_size: vars.parse_or("TEXT_SPLITTER_CHUNK_SIZE", 1000usize)?,
            overlap: vars.parse_or("TEXT_SPLITTER_CHUNK_OVERLAP", 100usize)?,
            unit: match vars.optional("TEXT_SPLITTER_UNIT") {
                Some(value) => value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("TEXT_SPLITTER_UNIT".into()))?,
                None => ChunkUnit::Chars,
            },
        };
        if chunking.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("TEXT_SPLITTER_CHUNK_SIZE".into()));
        }

        let ocr = OcrSettings {
            enabled: vars.flag_or("OCR_ENABLED", true)?,
            language: vars
                .optional("OCR_LANGUAGE")
                .unwrap_or_else(|| "eng".to_string()),
        };

        let retry = RetrySettings {
            max_attempts: vars.parse_or("RETRY_MAX_ATTEMPTS", 3u32)?.max(1),
            initial_delay: Duration::from_millis(vars.parse_or("RETRY_INITIAL_DELAY_MS", 500u64)?),
        };

        Ok(Self {
            source_dir: vars.optional("INGEST_SOURCE_DIR").map(PathBuf::from),
            store,
            embedding,
            summarization,
            chunking,
            ocr,
            retry,
            strict_store_lookups: vars.flag_or("STRICT_STORE_LOOKUPS", false)?,
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
    }

    fn parse_required<T: FromStr>(&self, key: &str) -> Result<T, ConfigError> {
        self.required(key)?
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string()))
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.optional(key)
            .map(|value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string()))
            })
            .transpose()
            .map(|value| value.unwrap_or(default))
    }

    fn flag_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue(key.to_string())),
            },
        }
    }
}
