//! Existing-state snapshot read from the store at the start of a run.
//!
//! Lookups are lenient: a failed query leaves that part of the snapshot empty and records the
//! failure in [`StoreSnapshot::degraded`]. The engine decides whether that is fatal.

use std::collections::HashMap;

use serde_json::Value;

use crate::store::{Predicate, Row, VectorStore};

use super::ids::next_chunk_id_seed;
use super::writer::{chunk_fields, page_fields};

/// What the store already holds, keyed for change detection.
#[derive(Debug, Default, Clone)]
pub struct StoreSnapshot {
    hashes: HashMap<String, String>,
    page_owners: HashMap<String, String>,
    /// First free chunk id.
    pub seed: u64,
    /// Lookups that failed and were treated as empty.
    pub degraded: Vec<String>,
}

impl StoreSnapshot {
    /// Read fingerprints, page ids and the chunk id seed, paging `page_size` rows at a time.
    pub async fn load(
        store: &dyn VectorStore,
        chunks_collection: &str,
        pages_collection: &str,
        page_size: usize,
    ) -> Self {
        let mut snapshot = Self::default();

        match next_chunk_id_seed(store, chunks_collection).await {
            Ok(seed) => snapshot.seed = seed,
            Err(error) => {
                tracing::warn!(collection = chunks_collection, %error, "Chunk id lookup failed; starting ids at zero");
                snapshot
                    .degraded
                    .push(format!("{chunks_collection} (chunk ids): {error}"));
            }
        }

        match store
            .query_all(
                chunks_collection,
                &Predicate::All,
                &[chunk_fields::FILE_NAME, chunk_fields::CONTENT_HASH],
                page_size,
            )
            .await
        {
            Ok(rows) => snapshot.hashes = hashes_by_file(&rows),
            Err(error) => {
                tracing::warn!(collection = chunks_collection, %error, "Chunk lookup failed; treating collection as empty");
                snapshot
                    .degraded
                    .push(format!("{chunks_collection}: {error}"));
            }
        }

        match store
            .query_all(
                pages_collection,
                &Predicate::All,
                &[page_fields::PAGE_ID, page_fields::FILE_ID],
                page_size,
            )
            .await
        {
            Ok(rows) => {
                snapshot.page_owners = rows
                    .iter()
                    .filter_map(|row| {
                        Some((
                            text(row, page_fields::PAGE_ID)?,
                            text(row, page_fields::FILE_ID)?,
                        ))
                    })
                    .collect();
            }
            Err(error) => {
                tracing::warn!(collection = pages_collection, %error, "Page lookup failed; treating collection as empty");
                snapshot
                    .degraded
                    .push(format!("{pages_collection}: {error}"));
            }
        }

        tracing::info!(
            files = snapshot.hashes.len(),
            pages = snapshot.page_owners.len(),
            seed = snapshot.seed,
            degraded = snapshot.degraded.len(),
            "Loaded existing store state"
        );
        snapshot
    }

    /// Fingerprint stored for `file_name`, if any.
    pub fn stored_hash(&self, file_name: &str) -> Option<&str> {
        self.hashes.get(file_name).map(String::as_str)
    }

    /// Whether a page row with this id already exists.
    pub fn page_exists(&self, page_id: &str) -> bool {
        self.page_owners.contains_key(page_id)
    }

    /// Number of documents with a stored fingerprint.
    pub fn known_files(&self) -> usize {
        self.hashes.len()
    }

    /// Drop everything known about a document after its rows were deleted.
    pub fn forget_file(&mut self, file_name: &str, file_id: &str) {
        self.hashes.remove(file_name);
        self.page_owners.retain(|_, owner| owner != file_id);
    }

    /// Record page rows written for `file_id`.
    pub fn record_pages<'a>(&mut self, file_id: &str, page_ids: impl IntoIterator<Item = &'a str>) {
        for page_id in page_ids {
            self.page_owners
                .insert(page_id.to_string(), file_id.to_string());
        }
    }

    /// Record the fingerprint of a document version that was fully written.
    pub fn record_hash(&mut self, file_name: &str, hash: &str) {
        self.hashes.insert(file_name.to_string(), hash.to_string());
    }
}

fn text(row: &Row, field: &str) -> Option<String> {
    row.get(field).and_then(Value::as_str).map(str::to_string)
}

fn hashes_by_file(rows: &[Row]) -> HashMap<String, String> {
    let mut hashes = HashMap::new();
    for row in rows {
        let (Some(file_name), Some(hash)) = (
            text(row, chunk_fields::FILE_NAME),
            text(row, chunk_fields::CONTENT_HASH),
        ) else {
            continue;
        };
        if let Some(existing) = hashes.get(&file_name)
            && existing != &hash
        {
            tracing::warn!(file = %file_name, "Chunks carry more than one fingerprint; document will be replaced");
        }
        hashes.insert(file_name, hash);
    }
    hashes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::writer::{
        ChunkOwner, DualCollectionWriter, PendingChunk, PendingPage, build_chunk_batch,
        build_page_batch,
    };
    use crate::store::MemoryStore;
    use std::sync::Arc;

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let writer = DualCollectionWriter::new(store.clone(), "chunks", "pages", 2);
        writer.load().await.expect("load");
        let owner = ChunkOwner {
            file_id: "notes",
            file_name: "notes.md",
            content_hash: "h1",
            source_location: "notes.md",
        };
        let chunks = vec![PendingChunk {
            page_id: "notes_page_1".into(),
            chunk_index: 0,
            text: "hello".into(),
        }];
        writer
            .write_chunks(build_chunk_batch(&owner, 6..7, &chunks, vec![vec![0.0, 1.0]]))
            .await
            .expect("chunks");
        let pages = vec![PendingPage {
            page_id: "notes_page_1".into(),
            local_page_num: 1,
            summary: "s".into(),
        }];
        writer
            .write_pages(build_page_batch("notes", &pages, vec![vec![1.0, 0.0]]))
            .await
            .expect("pages");
        store
    }

    #[tokio::test]
    async fn snapshot_reflects_stored_rows() {
        let store = seeded_store().await;
        let snapshot = StoreSnapshot::load(store.as_ref(), "chunks", "pages", 100).await;
        assert_eq!(snapshot.stored_hash("notes.md"), Some("h1"));
        assert!(snapshot.page_exists("notes_page_1"));
        assert_eq!(snapshot.seed, 7);
        assert!(snapshot.degraded.is_empty());
    }

    #[tokio::test]
    async fn small_pages_still_cover_every_row() {
        let store = seeded_store().await;
        let writer = DualCollectionWriter::new(store.clone(), "chunks", "pages", 2);
        let owner = ChunkOwner {
            file_id: "budget",
            file_name: "budget.xlsx",
            content_hash: "h2",
            source_location: "budget.xlsx",
        };
        let chunks: Vec<PendingChunk> = (0..3)
            .map(|index| PendingChunk {
                page_id: "budget_page_1".into(),
                chunk_index: index,
                text: format!("row {index}"),
            })
            .collect();
        writer
            .write_chunks(build_chunk_batch(&owner, 7..10, &chunks, vec![vec![0.5, 0.5]; 3]))
            .await
            .expect("chunks");

        let snapshot = StoreSnapshot::load(store.as_ref(), "chunks", "pages", 1).await;
        assert_eq!(snapshot.known_files(), 2);
        assert_eq!(snapshot.stored_hash("budget.xlsx"), Some("h2"));
        assert_eq!(snapshot.seed, 10);
    }

    #[tokio::test]
    async fn failed_lookups_degrade_to_empty() {
        let store = MemoryStore::new();
        let snapshot = StoreSnapshot::load(&store, "chunks", "pages", 100).await;
        assert_eq!(snapshot.known_files(), 0);
        assert_eq!(snapshot.seed, 0);
        assert_eq!(snapshot.degraded.len(), 3);
    }

    #[tokio::test]
    async fn forgetting_a_file_drops_its_pages_and_hash() {
        let store = seeded_store().await;
        let mut snapshot = StoreSnapshot::load(store.as_ref(), "chunks", "pages", 100).await;
        snapshot.forget_file("notes.md", "notes");
        assert_eq!(snapshot.stored_hash("notes.md"), None);
        assert!(!snapshot.page_exists("notes_page_1"));

        snapshot.record_pages("notes", ["notes_page_1"]);
        snapshot.record_hash("notes.md", "h2");
        assert!(snapshot.page_exists("notes_page_1"));
        assert_eq!(snapshot.stored_hash("notes.md"), Some("h2"));
    }
}
