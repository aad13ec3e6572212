//! Chunk and page identifier allocation.
//!
//! Chunk ids are a single monotonic sequence across runs: the next run starts one past the
//! largest id already stored. Page ids are derived from the file id and page number, so the
//! same page of the same file always maps to the same row.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::{StoreError, VectorStore};

/// Field holding the chunk id in the chunk collection.
pub const CHUNK_ID_FIELD: &str = "chunk_id";

/// Deterministic page id: `{file_id}_page_{local_page_num}`.
pub fn derive_page_id(file_id: &str, local_page_num: u32) -> String {
    format!("{file_id}_page_{local_page_num}")
}

/// Ids for `count` consecutive chunks starting at `seed`.
pub fn allocate_chunk_ids(seed: u64, count: usize) -> Range<u64> {
    seed..seed + count as u64
}

/// One past `max`, or zero for an empty collection.
pub fn seed_after(max: Option<u64>) -> u64 {
    max.map(|max| max + 1).unwrap_or(0)
}

/// Ask the chunk collection for its next free id.
///
/// Reads the collection-wide maximum; no row cap applies.
pub async fn next_chunk_id_seed(store: &dyn VectorStore, collection: &str) -> Result<u64, StoreError> {
    let max = store.max_integer(collection, CHUNK_ID_FIELD).await?;
    Ok(seed_after(max))
}

/// Process-wide chunk id counter for one run.
///
/// The sequential engine reads [`peek`](Self::peek), writes a document, then
/// [`commit`](Self::commit)s exactly that document's count. Parallel callers
/// [`reserve`](Self::reserve) a disjoint range up front instead.
#[derive(Debug)]
pub struct ChunkIdSequence {
    next: AtomicU64,
}

impl ChunkIdSequence {
    /// Sequence whose next id is `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            next: AtomicU64::new(seed),
        }
    }

    /// Next unassigned id.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Atomically claim `count` consecutive ids.
    pub fn reserve(&self, count: usize) -> Range<u64> {
        let start = self.next.fetch_add(count as u64, Ordering::SeqCst);
        allocate_chunk_ids(start, count)
    }

    /// Advance past ids `start..start + count`, failing if another writer moved the sequence.
    pub fn commit(&self, start: u64, count: usize) -> Result<(), u64> {
        self.next
            .compare_exchange(start, start + count as u64, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
    }
}
