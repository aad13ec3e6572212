//! Ingestion entrypoint: one reconciliation run over a corpus directory.
//!
//! Configuration comes from `.env` and the environment; the flags below override the few
//! settings that change per invocation. The run report goes to stdout.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rustyingest::{
    config::Config,
    embedding::build_embedding_client,
    extract::ExtractorRegistry,
    logging,
    processing::{EngineSettings, PageSummarizer, ReconciliationEngine, TextSplitter},
    qdrant::QdrantService,
    retry::RetryPolicy,
    summarization::build_summarization_client,
};

#[derive(Parser)]
#[command(
    name = "rustyingest",
    about = "Incrementally ingest PDF, XLSX and Markdown documents into page and chunk collections"
)]
struct Cli {
    /// Corpus root; overrides INGEST_SOURCE_DIR.
    #[arg(long)]
    source_dir: Option<PathBuf>,
    /// Print the run report as JSON.
    #[arg(long)]
    json: bool,
    /// Abort when an existing-state lookup fails instead of treating it as empty.
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env().context("failed to load configuration")?;
    logging::init_tracing();

    if cli.strict {
        config.strict_store_lookups = true;
    }
    let source_dir = cli
        .source_dir
        .or_else(|| config.source_dir.clone())
        .context("no corpus given: pass --source-dir or set INGEST_SOURCE_DIR")?;

    let retry = RetryPolicy::from(&config.retry);
    let store = Arc::new(
        QdrantService::new(&config.store, retry.clone()).context("failed to build store client")?,
    );
    let embedder = build_embedding_client(&config.embedding, retry)?;
    let summarizer = PageSummarizer::new(
        build_summarization_client(&config.summarization)?,
        config.summarization.clone(),
    );
    let splitter = TextSplitter::from_settings(&config.chunking, &config.embedding.model)?;
    let extractors = ExtractorRegistry::with_defaults(splitter, &config.ocr);

    let engine = ReconciliationEngine::new(
        EngineSettings::from_config(&config),
        store,
        extractors,
        embedder,
        summarizer,
    );
    let report = engine
        .run(&source_dir)
        .await
        .context("ingestion run failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}
