//! Dual-collection writer: the only component that mutates the store.
//!
//! Every batch is checked before it is sent: it must be non-empty, carry exactly the schema's
//! fields with matching types, have one value per row in every column, use unique primary keys
//! and hold vectors of the configured width. A failed check sends nothing.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use crate::store::{
    CollectionSchema, Column, ColumnBatch, FieldKind, FieldSpec, Predicate, StoreError,
    VectorStore,
};

use super::ids::CHUNK_ID_FIELD;
use super::types::WriteError;

/// Chunk collection field names.
pub mod chunk_fields {
    /// Primary key, monotonic across runs.
    pub const CHUNK_ID: &str = super::CHUNK_ID_FIELD;
    /// Owning document's file id.
    pub const FILE_ID: &str = "file_id";
    /// Owning document's file name; the change-detection key.
    pub const FILE_NAME: &str = "file_name";
    /// Fingerprint of the document version the chunk came from.
    pub const CONTENT_HASH: &str = "content_hash";
    /// Page the chunk was cut from.
    pub const PAGE_ID: &str = "page_id";
    /// Position of the chunk within its document.
    pub const CHUNK_INDEX: &str = "chunk_index";
    /// Chunk text.
    pub const CHUNK_TEXT: &str = "chunk_text";
    /// Short preview of the chunk text.
    pub const PREVIEW: &str = "preview";
    /// Where the source file was found.
    pub const SOURCE_LOCATION: &str = "source_location";
    /// Chunk embedding.
    pub const EMBEDDING: &str = "embedding";
}

/// Page collection field names.
pub mod page_fields {
    /// Primary key, `{file_id}_page_{n}`.
    pub const PAGE_ID: &str = "page_id";
    /// Owning document's file id.
    pub const FILE_ID: &str = "file_id";
    /// 1-based page number within the document.
    pub const LOCAL_PAGE_NUM: &str = "local_page_num";
    /// Page summary or an error placeholder.
    pub const SUMMARY: &str = "summary";
    /// Embedding of the summary.
    pub const SUMMARY_EMBEDDING: &str = "summary_embedding";
}

/// Schema of the chunk collection.
pub fn chunk_schema(name: &str, dimension: usize) -> CollectionSchema {
    use chunk_fields::*;
    CollectionSchema {
        name: name.to_string(),
        primary_key: CHUNK_ID,
        vector_field: EMBEDDING,
        dimension,
        fields: vec![
            field(CHUNK_ID, FieldKind::Integer),
            field(FILE_ID, FieldKind::Keyword),
            field(FILE_NAME, FieldKind::Keyword),
            field(CONTENT_HASH, FieldKind::Keyword),
            field(PAGE_ID, FieldKind::Keyword),
            field(CHUNK_INDEX, FieldKind::Integer),
            field(CHUNK_TEXT, FieldKind::Text),
            field(PREVIEW, FieldKind::Text),
            field(SOURCE_LOCATION, FieldKind::Text),
            field(EMBEDDING, FieldKind::Vector),
        ],
    }
}

/// Schema of the page collection.
pub fn page_schema(name: &str, dimension: usize) -> CollectionSchema {
    use page_fields::*;
    CollectionSchema {
        name: name.to_string(),
        primary_key: PAGE_ID,
        vector_field: SUMMARY_EMBEDDING,
        dimension,
        fields: vec![
            field(PAGE_ID, FieldKind::Keyword),
            field(FILE_ID, FieldKind::Keyword),
            field(LOCAL_PAGE_NUM, FieldKind::Integer),
            field(SUMMARY, FieldKind::Text),
            field(SUMMARY_EMBEDDING, FieldKind::Vector),
        ],
    }
}

fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

/// Document-level values repeated on every chunk row.
#[derive(Debug, Clone)]
pub struct ChunkOwner<'a> {
    /// File id of the document.
    pub file_id: &'a str,
    /// File name of the document.
    pub file_name: &'a str,
    /// Fingerprint of the document bytes.
    pub content_hash: &'a str,
    /// Where the document was found.
    pub source_location: &'a str,
}

/// Per-chunk values known before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChunk {
    /// Page the chunk belongs to.
    pub page_id: String,
    /// Position within the document.
    pub chunk_index: u64,
    /// Chunk text.
    pub text: String,
}

/// Per-page values known before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPage {
    /// Derived page id.
    pub page_id: String,
    /// 1-based page number.
    pub local_page_num: u32,
    /// Summary text or placeholder.
    pub summary: String,
}

const PREVIEW_CHARS: usize = 200;

/// First 200 characters of a chunk, with `...` when cut.
pub fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Assemble a column-major chunk batch.
///
/// Columns are built independently so a short `embeddings` list produces a batch the writer
/// will reject rather than one silently padded or truncated.
pub fn build_chunk_batch(
    owner: &ChunkOwner<'_>,
    ids: Range<u64>,
    chunks: &[PendingChunk],
    embeddings: Vec<Vec<f32>>,
) -> ColumnBatch {
    use chunk_fields::*;
    let repeat = |value: &str| Column::Text(vec![value.to_string(); chunks.len()]);
    ColumnBatch::new()
        .with_column(CHUNK_ID, Column::Int(ids.collect()))
        .with_column(FILE_ID, repeat(owner.file_id))
        .with_column(FILE_NAME, repeat(owner.file_name))
        .with_column(CONTENT_HASH, repeat(owner.content_hash))
        .with_column(
            PAGE_ID,
            Column::Text(chunks.iter().map(|chunk| chunk.page_id.clone()).collect()),
        )
        .with_column(
            CHUNK_INDEX,
            Column::Int(chunks.iter().map(|chunk| chunk.chunk_index).collect()),
        )
        .with_column(
            CHUNK_TEXT,
            Column::Text(chunks.iter().map(|chunk| chunk.text.clone()).collect()),
        )
        .with_column(
            PREVIEW,
            Column::Text(chunks.iter().map(|chunk| preview(&chunk.text)).collect()),
        )
        .with_column(SOURCE_LOCATION, repeat(owner.source_location))
        .with_column(EMBEDDING, Column::Vector(embeddings))
}

/// Assemble a column-major page batch.
pub fn build_page_batch(file_id: &str, pages: &[PendingPage], embeddings: Vec<Vec<f32>>) -> ColumnBatch {
    use page_fields::*;
    ColumnBatch::new()
        .with_column(
            PAGE_ID,
            Column::Text(pages.iter().map(|page| page.page_id.clone()).collect()),
        )
        .with_column(FILE_ID, Column::Text(vec![file_id.to_string(); pages.len()]))
        .with_column(
            LOCAL_PAGE_NUM,
            Column::Int(pages.iter().map(|page| u64::from(page.local_page_num)).collect()),
        )
        .with_column(
            SUMMARY,
            Column::Text(pages.iter().map(|page| page.summary.clone()).collect()),
        )
        .with_column(SUMMARY_EMBEDDING, Column::Vector(embeddings))
}

/// Check a batch against a schema; returns the row count on success.
pub fn validate_batch(schema: &CollectionSchema, batch: &ColumnBatch) -> Result<usize, WriteError> {
    let reject = |reason: String| WriteError::Rejected {
        collection: schema.name.clone(),
        reason,
    };

    let rows = batch.row_count();
    if rows == 0 {
        return Err(reject("batch is empty".into()));
    }

    for (name, _) in batch.columns() {
        if schema.field(name).is_none() {
            return Err(reject(format!("unknown field {name}")));
        }
    }

    for field in &schema.fields {
        let column = batch
            .column(field.name)
            .ok_or_else(|| reject(format!("field {} is missing", field.name)))?;
        if !column.fits(field.kind) {
            return Err(reject(format!(
                "field {} does not hold {:?} values",
                field.name, field.kind
            )));
        }
        if column.len() != rows {
            return Err(reject(format!(
                "column {} has {} values for {rows} rows",
                field.name,
                column.len()
            )));
        }
    }

    if let Some(Column::Vector(vectors)) = batch.column(schema.vector_field)
        && let Some((index, vector)) = vectors
            .iter()
            .enumerate()
            .find(|(_, vector)| vector.len() != schema.dimension)
    {
        return Err(reject(format!(
            "vector {index} has width {}, expected {}",
            vector.len(),
            schema.dimension
        )));
    }

    let mut keys = HashSet::with_capacity(rows);
    for index in 0..rows {
        let row = batch.row(index);
        let key = row
            .get(schema.primary_key)
            .map(ToString::to_string)
            .unwrap_or_default();
        if !keys.insert(key.clone()) {
            return Err(reject(format!("duplicate primary key {key}")));
        }
    }

    Ok(rows)
}

/// Writes and deletes rows in the page and chunk collections.
pub struct DualCollectionWriter {
    store: Arc<dyn VectorStore>,
    chunks: CollectionSchema,
    pages: CollectionSchema,
}

impl DualCollectionWriter {
    /// Writer over `store` for the named collections.
    pub fn new(
        store: Arc<dyn VectorStore>,
        chunks_collection: &str,
        pages_collection: &str,
        dimension: usize,
    ) -> Self {
        Self {
            store,
            chunks: chunk_schema(chunks_collection, dimension),
            pages: page_schema(pages_collection, dimension),
        }
    }

    /// Chunk collection schema.
    pub fn chunk_schema(&self) -> &CollectionSchema {
        &self.chunks
    }

    /// Page collection schema.
    pub fn page_schema(&self) -> &CollectionSchema {
        &self.pages
    }

    /// Load both collections; must succeed before any query or write.
    pub async fn load(&self) -> Result<(), StoreError> {
        self.store.load(&self.chunks).await?;
        self.store.load(&self.pages).await
    }

    /// Check a chunk batch without writing it.
    pub fn validate_chunks(&self, batch: &ColumnBatch) -> Result<usize, WriteError> {
        validate_batch(&self.chunks, batch)
    }

    /// Check a page batch without writing it.
    pub fn validate_pages(&self, batch: &ColumnBatch) -> Result<usize, WriteError> {
        validate_batch(&self.pages, batch)
    }

    /// Validate and insert page rows.
    pub async fn write_pages(&self, batch: ColumnBatch) -> Result<usize, WriteError> {
        self.write(&self.pages, batch).await
    }

    /// Validate and insert chunk rows.
    pub async fn write_chunks(&self, batch: ColumnBatch) -> Result<usize, WriteError> {
        self.write(&self.chunks, batch).await
    }

    /// Remove every chunk row of a document, by file name.
    pub async fn delete_by_file_name(&self, file_name: &str) -> Result<(), WriteError> {
        self.store
            .delete(
                &self.chunks.name,
                &Predicate::eq(chunk_fields::FILE_NAME, file_name),
            )
            .await?;
        tracing::debug!(collection = %self.chunks.name, file = file_name, "Deleted chunk rows");
        Ok(())
    }

    /// Remove every page row of a document, by file id.
    pub async fn delete_pages_by_file_id(&self, file_id: &str) -> Result<(), WriteError> {
        self.store
            .delete(&self.pages.name, &Predicate::eq(page_fields::FILE_ID, file_id))
            .await?;
        tracing::debug!(collection = %self.pages.name, file_id, "Deleted page rows");
        Ok(())
    }

    async fn write(&self, schema: &CollectionSchema, batch: ColumnBatch) -> Result<usize, WriteError> {
        let rows = validate_batch(schema, &batch)?;
        let written = self.store.insert(schema, batch).await?;
        tracing::debug!(collection = %schema.name, rows, "Batch written");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const DIM: usize = 3;

    fn owner() -> ChunkOwner<'static> {
        ChunkOwner {
            file_id: "report",
            file_name: "report.pdf",
            content_hash: "abc",
            source_location: "/corpus/report.pdf",
        }
    }

    fn pending_chunks(count: usize) -> Vec<PendingChunk> {
        (0..count)
            .map(|index| PendingChunk {
                page_id: "report_page_1".into(),
                chunk_index: index as u64,
                text: format!("chunk {index}"),
            })
            .collect()
    }

    #[test]
    fn well_formed_chunk_batch_passes() {
        let batch = build_chunk_batch(&owner(), 5..8, &pending_chunks(3), vec![vec![0.0; DIM]; 3]);
        assert_eq!(validate_batch(&chunk_schema("chunks", DIM), &batch).expect("valid"), 3);
    }

    #[test]
    fn short_embedding_column_is_rejected() {
        let batch = build_chunk_batch(&owner(), 0..3, &pending_chunks(3), vec![vec![0.0; DIM]; 2]);
        let error = validate_batch(&chunk_schema("chunks", DIM), &batch).unwrap_err();
        assert!(error.to_string().contains("column embedding has 2 values for 3 rows"));
    }

    #[test]
    fn wrong_vector_width_is_rejected() {
        let batch = build_page_batch(
            "report",
            &[PendingPage {
                page_id: "report_page_1".into(),
                local_page_num: 1,
                summary: "summary".into(),
            }],
            vec![vec![0.0; DIM + 1]],
        );
        let error = validate_batch(&page_schema("pages", DIM), &batch).unwrap_err();
        assert!(error.to_string().contains("width 4, expected 3"));
    }

    #[test]
    fn missing_and_unknown_fields_are_rejected() {
        let schema = page_schema("pages", DIM);
        let missing = ColumnBatch::new()
            .with_column(page_fields::PAGE_ID, Column::Text(vec!["a_page_1".into()]))
            .with_column(page_fields::SUMMARY_EMBEDDING, Column::Vector(vec![vec![0.0; DIM]]));
        assert!(
            validate_batch(&schema, &missing)
                .unwrap_err()
                .to_string()
                .contains("is missing")
        );

        let unknown = build_page_batch(
            "a",
            &[PendingPage {
                page_id: "a_page_1".into(),
                local_page_num: 1,
                summary: "s".into(),
            }],
            vec![vec![0.0; DIM]],
        )
        .with_column("extra", Column::Text(vec!["x".into()]));
        assert!(
            validate_batch(&schema, &unknown)
                .unwrap_err()
                .to_string()
                .contains("unknown field extra")
        );
    }

    #[test]
    fn empty_and_duplicate_batches_are_rejected() {
        let schema = chunk_schema("chunks", DIM);
        let empty = build_chunk_batch(&owner(), 0..0, &[], Vec::new());
        assert!(validate_batch(&schema, &empty).is_err());

        let mut chunks = pending_chunks(2);
        chunks[1].chunk_index = 0;
        let duplicate = build_chunk_batch(&owner(), 0..2, &chunks, vec![vec![0.0; DIM]; 2])
            .with_column(chunk_fields::CHUNK_ID, Column::Int(vec![9, 9]));
        assert!(
            validate_batch(&schema, &duplicate)
                .unwrap_err()
                .to_string()
                .contains("duplicate primary key")
        );
    }

    #[test]
    fn previews_are_cut_at_two_hundred_chars() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(250);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), 203);
        assert!(cut.ends_with("..."));
        assert_eq!(preview(&"y".repeat(200)), "y".repeat(200));
    }

    #[tokio::test]
    async fn rejected_batches_never_reach_the_store() {
        let store = Arc::new(MemoryStore::new());
        let writer = DualCollectionWriter::new(store.clone(), "chunks", "pages", DIM);
        writer.load().await.expect("load");

        let bad = build_chunk_batch(&owner(), 0..3, &pending_chunks(3), vec![vec![0.0; DIM]; 2]);
        assert!(matches!(
            writer.write_chunks(bad).await,
            Err(WriteError::Rejected { .. })
        ));
        assert!(store.is_empty("chunks"));
    }

    #[tokio::test]
    async fn deletes_target_the_right_collection_and_key() {
        let store = Arc::new(MemoryStore::new());
        let writer = DualCollectionWriter::new(store.clone(), "chunks", "pages", DIM);
        writer.load().await.expect("load");

        writer
            .write_chunks(build_chunk_batch(
                &owner(),
                0..2,
                &pending_chunks(2),
                vec![vec![0.0; DIM]; 2],
            ))
            .await
            .expect("chunks");
        writer
            .write_pages(build_page_batch(
                "report",
                &[PendingPage {
                    page_id: "report_page_1".into(),
                    local_page_num: 1,
                    summary: "s".into(),
                }],
                vec![vec![0.0; DIM]],
            ))
            .await
            .expect("pages");

        writer.delete_by_file_name("other.pdf").await.expect("noop delete");
        assert_eq!(store.len("chunks"), 2);

        writer.delete_by_file_name("report.pdf").await.expect("delete chunks");
        writer.delete_pages_by_file_id("report").await.expect("delete pages");
        assert!(store.is_empty("chunks"));
        assert!(store.is_empty("pages"));
    }
}
