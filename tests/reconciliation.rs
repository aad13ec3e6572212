use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rustyingest::{
    config::{OcrSettings, ProviderKind, SummarizationSettings},
    embedding::{EmbeddingClient, EmbeddingClientError},
    extract::{DocumentExtractor, ExtractError, ExtractorRegistry, PageText},
    processing::{
        EngineSettings, PageSummarizer, ReconciliationEngine, RunError, RunReport, TextSplitter,
    },
    store::{CollectionSchema, ColumnBatch, MemoryStore, Predicate, Row, StoreError, VectorStore},
    summarization::{SummarizationClient, SummarizationClientError, SummarizationRequest},
};
use serde_json::Value;
use tempfile::TempDir;

const DIM: usize = 8;
const SHORT_EMBED: &str = "SHORT-EMBED";
const WIDE_EMBED: &str = "WIDE-EMBED";
const FAIL_SUMMARY: &str = "FAIL-SUMMARY";

/// Deterministic embedder: buckets bytes into `DIM` slots.
struct ByteEmbedder;

#[async_trait]
impl EmbeddingClient for ByteEmbedder {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let short = texts.iter().any(|text| text.contains(SHORT_EMBED));
        let wide = texts.iter().any(|text| text.contains(WIDE_EMBED));
        let mut vectors: Vec<Vec<f32>> = texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; if wide { DIM + 1 } else { DIM }];
                for (index, byte) in text.bytes().enumerate() {
                    vector[index % DIM] += f32::from(byte) / 255.0;
                }
                vector
            })
            .collect();
        if short {
            vectors.pop();
        }
        Ok(vectors)
    }
}

/// Summaries that only depend on the page length.
struct LengthSummarizer;

#[async_trait]
impl SummarizationClient for LengthSummarizer {
    async fn generate_summary(
        &self,
        request: SummarizationRequest,
    ) -> Result<String, SummarizationClientError> {
        if request.prompt.contains(FAIL_SUMMARY) {
            return Err(SummarizationClientError::GenerationFailed(
                "model overloaded".into(),
            ));
        }
        Ok(format!(
            "- Page of {} characters.\nShort summary.",
            request.prompt.chars().count()
        ))
    }
}

/// Store whose startup or lookups can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_load: bool,
    fail_query: bool,
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn load(&self, schema: &CollectionSchema) -> Result<(), StoreError> {
        if self.fail_load {
            return Err(StoreError::Backend("connection refused".into()));
        }
        self.inner.load(schema).await
    }

    async fn query(
        &self,
        collection: &str,
        predicate: &Predicate,
        fields: &[&str],
        limit: usize,
    ) -> Result<Vec<Row>, StoreError> {
        if self.fail_query {
            return Err(StoreError::Backend("malformed response".into()));
        }
        self.inner.query(collection, predicate, fields, limit).await
    }

    async fn insert(
        &self,
        schema: &CollectionSchema,
        batch: ColumnBatch,
    ) -> Result<usize, StoreError> {
        self.inner.insert(schema, batch).await
    }

    async fn delete(&self, collection: &str, predicate: &Predicate) -> Result<(), StoreError> {
        self.inner.delete(collection, predicate).await
    }
}

/// Treats each form-feed separated section of a file as one page.
struct FormFeedPages;

impl DocumentExtractor for FormFeedPages {
    fn extract_pages(&self, _path: &Path, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|error| ExtractError::Encoding(error.to_string()))?;
        Ok(text
            .split('\u{c}')
            .enumerate()
            .map(|(index, page)| PageText::new(index as u32 + 1, page))
            .collect())
    }
}

fn summarization_settings() -> SummarizationSettings {
    SummarizationSettings {
        provider: ProviderKind::LocalModel,
        model: "fake".into(),
        base_url: None,
        api_key: None,
        max_chars: 550,
        input_chars: 10_000,
        timeout: None,
    }
}

fn default_extractors() -> ExtractorRegistry {
    let splitter = TextSplitter::by_chars(40, 0).expect("splitter");
    ExtractorRegistry::with_defaults(
        splitter,
        &OcrSettings {
            enabled: false,
            language: "eng".into(),
        },
    )
}

fn engine_with(store: Arc<dyn VectorStore>, settings: EngineSettings) -> ReconciliationEngine {
    engine_from(store, settings, default_extractors())
}

fn engine_from(
    store: Arc<dyn VectorStore>,
    settings: EngineSettings,
    extractors: ExtractorRegistry,
) -> ReconciliationEngine {
    let summarizer = PageSummarizer::new(Arc::new(LengthSummarizer), summarization_settings());
    ReconciliationEngine::new(settings, store, extractors, Arc::new(ByteEmbedder), summarizer)
}

fn engine(store: Arc<dyn VectorStore>) -> ReconciliationEngine {
    engine_with(store, EngineSettings::new("chunks", "pages", DIM))
}

fn prose(tag: &str) -> String {
    format!(
        "# {tag}\n\n{tag} alpha bravo charlie delta echo foxtrot golf hotel india juliet kilo lima mike november oscar papa\n"
    )
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).expect("write corpus file");
}

fn corpus(files: &[(&str, String)]) -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    for (name, content) in files {
        write(dir.path(), name, content);
    }
    dir
}

fn u64_field(row: &Row, field: &str) -> u64 {
    row.get(field).and_then(Value::as_u64).expect("integer field")
}

fn str_field<'a>(row: &'a Row, field: &str) -> &'a str {
    row.get(field).and_then(Value::as_str).expect("text field")
}

fn sorted_chunk_ids(store: &MemoryStore) -> Vec<u64> {
    let mut ids: Vec<u64> = store
        .rows("chunks")
        .iter()
        .map(|row| u64_field(row, "chunk_id"))
        .collect();
    ids.sort_unstable();
    ids
}

fn chunks_for<'a>(rows: &'a [Row], file_name: &str) -> Vec<&'a Row> {
    rows.iter()
        .filter(|row| str_field(row, "file_name") == file_name)
        .collect()
}

async fn run(engine: &ReconciliationEngine, dir: &TempDir) -> RunReport {
    engine.run(dir.path()).await.expect("run succeeds")
}

#[tokio::test]
async fn first_run_assigns_contiguous_ids_and_links_chunks_to_pages() {
    let dir = corpus(&[("a.md", prose("first")), ("b.md", prose("second"))]);
    let store = Arc::new(MemoryStore::new());
    let report = run(&engine(store.clone()), &dir).await;

    assert_eq!(report.processed_count(), 2);
    assert_eq!(report.failed_count(), 0);

    let total = store.len("chunks") as u64;
    assert!(total >= 4, "each document should yield several chunks");
    assert_eq!(sorted_chunk_ids(&store), (0..total).collect::<Vec<_>>());
    assert_eq!(report.chunk_id_range, Some((0, total)));

    let page_ids: HashSet<String> = store
        .rows("pages")
        .iter()
        .map(|row| str_field(row, "page_id").to_string())
        .collect();
    assert_eq!(
        page_ids,
        HashSet::from(["a_page_1".to_string(), "b_page_1".to_string()])
    );
    for chunk in store.rows("chunks") {
        assert!(page_ids.contains(str_field(&chunk, "page_id")));
    }

    let chunks = store.rows("chunks");
    let first_doc = chunks_for(&chunks, "a.md");
    let n_a = first_doc.len() as u64;
    assert!(first_doc.iter().all(|row| u64_field(row, "chunk_id") < n_a));
}

#[tokio::test]
async fn chunk_rows_carry_document_metadata() {
    let dir = corpus(&[("notes.md", prose("meta"))]);
    let store = Arc::new(MemoryStore::new());
    run(&engine(store.clone()), &dir).await;

    let chunks = store.rows("chunks");
    let mut indexes: Vec<u64> = chunks.iter().map(|row| u64_field(row, "chunk_index")).collect();
    indexes.sort_unstable();
    assert_eq!(indexes, (0..chunks.len() as u64).collect::<Vec<_>>());

    let hash = str_field(&chunks[0], "content_hash");
    assert_eq!(hash.len(), 64);
    for chunk in &chunks {
        assert_eq!(str_field(chunk, "file_id"), "notes");
        assert_eq!(str_field(chunk, "content_hash"), hash);
        assert!(str_field(chunk, "source_location").ends_with("notes.md"));
        assert!(str_field(chunk, "chunk_text").starts_with(str_field(chunk, "preview")));
        let embedding = chunk.get("embedding").and_then(Value::as_array).expect("vector");
        assert_eq!(embedding.len(), DIM);
    }

    let pages = store.rows("pages");
    assert_eq!(pages.len(), 1);
    assert_eq!(u64_field(&pages[0], "local_page_num"), 1);
    assert!(str_field(&pages[0], "summary").starts_with("- Page of"));
}

#[tokio::test]
async fn rerunning_an_unchanged_corpus_changes_nothing() {
    let dir = corpus(&[("a.md", prose("first")), ("b.md", prose("second"))]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());

    run(&engine, &dir).await;
    let chunks_before = store.rows("chunks");
    let pages_before = store.rows("pages");

    let report = run(&engine, &dir).await;
    assert_eq!(report.skipped, vec!["a.md".to_string(), "b.md".to_string()]);
    assert_eq!(report.processed_count(), 0);
    assert_eq!(report.chunk_id_range, None);
    assert_eq!(store.rows("chunks"), chunks_before);
    assert_eq!(store.rows("pages"), pages_before);
}

#[tokio::test]
async fn modified_document_is_replaced_with_fresh_ids() {
    let dir = corpus(&[("doc_a.md", prose("original"))]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());

    run(&engine, &dir).await;
    let first_ids = sorted_chunk_ids(&store);
    let n_a = first_ids.len() as u64;
    assert_eq!(first_ids, (0..n_a).collect::<Vec<_>>());
    let old_hash = str_field(&store.rows("chunks")[0], "content_hash").to_string();
    let old_summary = str_field(&store.rows("pages")[0], "summary").to_string();

    write(dir.path(), "doc_a.md", &prose("rewritten and somewhat longer"));
    let report = run(&engine, &dir).await;

    assert_eq!(report.processed.len(), 1);
    assert!(report.processed[0].replaced);
    assert_eq!(report.processed[0].pages_written, 1);

    let chunks = store.rows("chunks");
    assert!(chunks.iter().all(|row| u64_field(row, "chunk_id") >= n_a));
    assert!(chunks.iter().all(|row| str_field(row, "content_hash") != old_hash));
    let new_ids = sorted_chunk_ids(&store);
    assert_eq!(new_ids, (n_a..n_a + new_ids.len() as u64).collect::<Vec<_>>());

    let pages = store.rows("pages");
    assert_eq!(pages.len(), 1);
    assert_ne!(str_field(&pages[0], "summary"), old_summary);
}

#[tokio::test]
async fn short_embedding_response_fails_only_that_document() {
    let dir = corpus(&[
        ("a.md", prose("first")),
        ("b.md", format!("{} {SHORT_EMBED}", prose("broken"))),
        ("c.md", prose("third")),
    ]);
    let store = Arc::new(MemoryStore::new());
    let report = run(&engine(store.clone()), &dir).await;

    let reason = report.failure_for("b.md").expect("b.md failed");
    assert!(reason.starts_with("embedding mismatch"), "{reason}");
    assert_eq!(report.processed_count(), 2);

    let chunks = store.rows("chunks");
    assert!(chunks_for(&chunks, "b.md").is_empty());
    assert!(
        store
            .rows("pages")
            .iter()
            .all(|row| str_field(row, "file_id") != "b")
    );

    let total = chunks.len() as u64;
    assert_eq!(sorted_chunk_ids(&store), (0..total).collect::<Vec<_>>());
}

#[tokio::test]
async fn wrong_vector_width_is_an_embedding_mismatch() {
    let dir = corpus(&[("wide.md", format!("{} {WIDE_EMBED}", prose("wide")))]);
    let store = Arc::new(MemoryStore::new());
    let report = run(&engine(store.clone()), &dir).await;

    let reason = report.failure_for("wide.md").expect("wide.md failed");
    assert!(reason.contains("expected 8"), "{reason}");
    assert!(store.is_empty("chunks"));
    assert!(store.is_empty("pages"));
}

#[tokio::test]
async fn failed_summary_is_stored_as_placeholder() {
    let dir = corpus(&[("flaky.md", format!("{} {FAIL_SUMMARY}", prose("flaky")))]);
    let store = Arc::new(MemoryStore::new());
    let report = run(&engine(store.clone()), &dir).await;

    assert_eq!(report.processed_count(), 1);
    assert_eq!(report.summary_failures.len(), 1);
    assert_eq!(report.summary_failures[0].page_id, "flaky_page_1");

    let pages = store.rows("pages");
    let summary = str_field(&pages[0], "summary");
    assert!(summary.starts_with("[ERROR]"), "{summary}");
    assert!(summary.contains("model overloaded"));
    assert!(!store.is_empty("chunks"));
}

#[tokio::test]
async fn empty_and_malformed_documents_do_not_stop_the_run() {
    let dir = corpus(&[("blank.md", "   \n\n  ".to_string()), ("z.md", prose("last"))]);
    fs::write(dir.path().join("broken.xlsx"), b"not a workbook").expect("write xlsx");
    let store = Arc::new(MemoryStore::new());
    let report = run(&engine(store.clone()), &dir).await;

    assert_eq!(report.total(), 3);
    assert!(
        report
            .failure_for("blank.md")
            .is_some_and(|reason| reason.contains("no usable text"))
    );
    assert!(
        report
            .failure_for("broken.xlsx")
            .is_some_and(|reason| reason.contains("spreadsheet extraction failed"))
    );
    assert_eq!(report.processed.len(), 1);
    assert_eq!(report.processed[0].file_name, "z.md");

    let rendered = report.to_string();
    assert!(rendered.contains("failed: 2"));
    assert!(rendered.contains("blank.md: "));
}

#[tokio::test]
async fn existing_pages_are_not_summarized_again() {
    let dir = corpus(&[("a.md", prose("first"))]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());
    run(&engine, &dir).await;
    let pages_before = store.rows("pages");
    let n = store.len("chunks") as u64;

    store
        .delete("chunks", &Predicate::eq("file_name", "a.md"))
        .await
        .expect("drop chunks");
    let report = run(&engine, &dir).await;

    assert_eq!(report.processed.len(), 1);
    assert!(!report.processed[0].replaced);
    assert_eq!(report.processed[0].pages_written, 0);
    assert_eq!(report.processed[0].pages_reused, 1);
    assert_eq!(store.rows("pages"), pages_before);
    assert_eq!(store.len("chunks") as u64, n);
}

#[tokio::test]
async fn failed_lookups_degrade_or_abort_under_strict_mode() {
    let dir = corpus(&[("a.md", prose("first"))]);

    let lenient = Arc::new(FlakyStore {
        fail_query: true,
        ..FlakyStore::default()
    });
    let report = run(&engine(lenient.clone()), &dir).await;
    assert_eq!(report.degraded_lookups.len(), 3);
    assert_eq!(report.processed_count(), 1);
    assert!(report.to_string().contains("Degraded lookups"));

    let strict = Arc::new(FlakyStore {
        fail_query: true,
        ..FlakyStore::default()
    });
    let mut settings = EngineSettings::new("chunks", "pages", DIM);
    settings.strict_store_lookups = true;
    let error = engine_with(strict.clone(), settings)
        .run(dir.path())
        .await
        .unwrap_err();
    assert!(matches!(error, RunError::StrictLookup(_)));
    assert!(strict.inner.is_empty("chunks"));
}

#[tokio::test]
async fn unreachable_store_or_missing_corpus_abort_the_run() {
    let dir = corpus(&[("a.md", prose("first"))]);
    let down = Arc::new(FlakyStore {
        fail_load: true,
        ..FlakyStore::default()
    });
    let error = engine(down).run(dir.path()).await.unwrap_err();
    assert!(matches!(error, RunError::StoreUnavailable(_)));

    let missing = dir.path().join("does-not-exist");
    let error = engine(Arc::new(MemoryStore::new()))
        .run(&missing)
        .await
        .unwrap_err();
    assert!(matches!(error, RunError::Corpus(_)));
}

#[tokio::test]
async fn shrinking_multi_page_document_drops_stale_pages() {
    let mut extractors = default_extractors();
    extractors.register("md", Arc::new(FormFeedPages));
    let store = Arc::new(MemoryStore::new());
    let engine = engine_from(
        store.clone(),
        EngineSettings::new("chunks", "pages", DIM),
        extractors,
    );

    let dir = corpus(&[(
        "manual.md",
        [prose("intro"), prose("setup"), prose("appendix")].join("\u{c}"),
    )]);
    let report = run(&engine, &dir).await;
    assert_eq!(report.processed[0].pages_written, 3);
    let old_summaries: HashSet<String> = store
        .rows("pages")
        .iter()
        .map(|row| str_field(row, "summary").to_string())
        .collect();
    let old_max = sorted_chunk_ids(&store).last().copied().expect("chunks");

    write(
        dir.path(),
        "manual.md",
        &[
            prose("introduction, revised for the second edition"),
            prose("setup on every supported platform"),
        ]
        .join("\u{c}"),
    );
    let report = run(&engine, &dir).await;
    assert!(report.processed[0].replaced);
    assert_eq!(report.processed[0].pages_written, 2);

    let pages = store.rows("pages");
    let page_ids: HashSet<String> = pages
        .iter()
        .map(|row| str_field(row, "page_id").to_string())
        .collect();
    assert_eq!(
        page_ids,
        HashSet::from(["manual_page_1".to_string(), "manual_page_2".to_string()])
    );
    for page in &pages {
        assert!(!old_summaries.contains(str_field(page, "summary")));
    }

    let chunks = store.rows("chunks");
    assert!(!chunks.is_empty());
    for chunk in &chunks {
        assert!(page_ids.contains(str_field(chunk, "page_id")));
        assert!(u64_field(chunk, "chunk_id") > old_max);
    }
    assert!(chunks.iter().any(|row| str_field(row, "page_id") == "manual_page_2"));
}

#[tokio::test]
async fn lookups_cover_rows_beyond_one_page() {
    let store = Arc::new(MemoryStore::new());
    let mut settings = EngineSettings::new("chunks", "pages", DIM);
    settings.page_size = 1;
    let engine = engine_with(store.clone(), settings);

    let dir = corpus(&[("a.md", prose("first")), ("b.md", prose("second"))]);
    run(&engine, &dir).await;
    let stored = sorted_chunk_ids(&store);
    let next = stored.len() as u64;

    write(dir.path(), "c.md", &prose("third"));
    let report = run(&engine, &dir).await;

    assert_eq!(report.skipped, vec!["a.md".to_string(), "b.md".to_string()]);
    assert_eq!(report.processed.len(), 1);
    assert_eq!(report.processed[0].file_name, "c.md");
    let (start, _) = report.chunk_id_range.expect("ids allocated");
    assert_eq!(start, next);

    let chunks = store.rows("chunks");
    let total = chunks.len() as u64;
    assert_eq!(sorted_chunk_ids(&store), (0..total).collect::<Vec<_>>());
    assert!(
        chunks_for(&chunks, "a.md")
            .iter()
            .chain(chunks_for(&chunks, "b.md").iter())
            .all(|row| u64_field(row, "chunk_id") < next)
    );
}

#[cfg(unix)]
#[tokio::test]
async fn undecodable_file_names_are_reported_as_failed() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = corpus(&[("a.md", prose("first"))]);
    fs::write(dir.path().join(OsStr::from_bytes(b"q\xe9.md")), prose("latin1"))
        .expect("write corpus file");
    let store = Arc::new(MemoryStore::new());
    let report = run(&engine(store.clone()), &dir).await;

    assert_eq!(report.total(), 2);
    assert_eq!(report.processed_count(), 1);
    let reason = report.failure_for("q\u{fffd}.md").expect("rejected file reported");
    assert!(reason.contains("not valid UTF-8"), "{reason}");
    assert_eq!(chunks_for(&store.rows("chunks"), "a.md").len(), store.len("chunks"));
}
