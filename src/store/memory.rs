//! In-process store used by tests and by callers embedding the engine without a server.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{CollectionSchema, ColumnBatch, Predicate, Row, StoreError, VectorStore};

#[derive(Debug)]
struct MemoryCollection {
    dimension: usize,
    vector_field: &'static str,
    rows: BTreeMap<String, Row>,
}

/// Thread-safe in-memory [`VectorStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
    /// Empty store with no collections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every row of a collection, vectors included; empty when unknown.
    pub fn rows(&self, collection: &str) -> Vec<Row> {
        self.lock()
            .ok()
            .and_then(|collections| {
                collections
                    .get(collection)
                    .map(|stored| stored.rows.values().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Number of rows held by a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|collections| collections.get(collection).map(|stored| stored.rows.len()))
            .unwrap_or(0)
    }

    /// True when the collection holds no rows.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MemoryCollection>>, StoreError> {
        self.collections
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

fn primary_key_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn load(&self, schema: &CollectionSchema) -> Result<(), StoreError> {
        let mut collections = self.lock()?;
        match collections.get(&schema.name) {
            Some(existing) if existing.dimension != schema.dimension => {
                Err(StoreError::SchemaMismatch {
                    collection: schema.name.clone(),
                    expected: schema.dimension,
                    actual: existing.dimension,
                })
            }
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    schema.name.clone(),
                    MemoryCollection {
                        dimension: schema.dimension,
                        vector_field: schema.vector_field,
                        rows: BTreeMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn query(
        &self,
        collection: &str,
        predicate: &Predicate,
        fields: &[&str],
        limit: usize,
    ) -> Result<Vec<Row>, StoreError> {
        let collections = self.lock()?;
        let stored = collections
            .get(collection)
            .ok_or_else(|| StoreError::NotLoaded(collection.to_string()))?;

        Ok(stored
            .rows
            .values()
            .filter(|row| predicate.matches(row))
            .take(limit)
            .map(|row| {
                row.iter()
                    .filter(|(name, _)| fields.contains(&name.as_str()))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            })
            .collect())
    }

    async fn insert(
        &self,
        schema: &CollectionSchema,
        batch: ColumnBatch,
    ) -> Result<usize, StoreError> {
        let mut collections = self.lock()?;
        let stored = collections
            .get_mut(&schema.name)
            .ok_or_else(|| StoreError::NotLoaded(schema.name.clone()))?;

        let rows = batch.row_count();
        let mut staged = Vec::with_capacity(rows);
        for index in 0..rows {
            let row = batch.row(index);
            let width = row
                .get(stored.vector_field)
                .and_then(Value::as_array)
                .map(Vec::len);
            if width != Some(stored.dimension) {
                return Err(StoreError::Rejected {
                    collection: schema.name.clone(),
                    reason: format!(
                        "row {index} has vector width {width:?}, expected {}",
                        stored.dimension
                    ),
                });
            }
            let key = row
                .get(schema.primary_key)
                .map(primary_key_string)
                .ok_or_else(|| StoreError::Rejected {
                    collection: schema.name.clone(),
                    reason: format!("row {index} lacks primary key {}", schema.primary_key),
                })?;
            staged.push((key, row));
        }

        stored.rows.extend(staged);
        Ok(rows)
    }

    async fn delete(&self, collection: &str, predicate: &Predicate) -> Result<(), StoreError> {
        let mut collections = self.lock()?;
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::NotLoaded(collection.to_string()))?;
        stored.rows.retain(|_, row| !predicate.matches(row));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Column, FieldKind, FieldSpec};
    use serde_json::json;

    fn schema() -> CollectionSchema {
        CollectionSchema {
            name: "pages".into(),
            primary_key: "page_id",
            vector_field: "summary_embedding",
            dimension: 2,
            fields: vec![
                FieldSpec {
                    name: "page_id",
                    kind: FieldKind::Keyword,
                },
                FieldSpec {
                    name: "summary_embedding",
                    kind: FieldKind::Vector,
                },
            ],
        }
    }

    fn batch(ids: &[&str]) -> ColumnBatch {
        ColumnBatch::new()
            .with_column(
                "page_id",
                Column::Text(ids.iter().map(|id| id.to_string()).collect()),
            )
            .with_column(
                "summary_embedding",
                Column::Vector(ids.iter().map(|_| vec![0.5, 0.5]).collect()),
            )
    }

    #[tokio::test]
    async fn queries_before_load_fail() {
        let store = MemoryStore::new();
        let error = store
            .query("pages", &Predicate::All, &["page_id"], 10)
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::NotLoaded(_)));
    }

    #[tokio::test]
    async fn insert_query_and_delete_round_trip() {
        let store = MemoryStore::new();
        store.load(&schema()).await.expect("load");
        store
            .insert(&schema(), batch(&["a_page_1", "a_page_2", "b_page_1"]))
            .await
            .expect("insert");

        let rows = store
            .query("pages", &Predicate::eq("page_id", "a_page_2"), &["page_id"], 10)
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("page_id"), Some(&json!("a_page_2")));
        assert!(rows[0].get("summary_embedding").is_none());

        store
            .delete("pages", &Predicate::eq("page_id", "a_page_1"))
            .await
            .expect("delete");
        assert_eq!(store.len("pages"), 2);
    }

    #[tokio::test]
    async fn wrong_vector_width_is_rejected_without_partial_writes() {
        let store = MemoryStore::new();
        store.load(&schema()).await.expect("load");
        let bad = batch(&["a_page_1", "a_page_2"]).with_column(
            "summary_embedding",
            Column::Vector(vec![vec![0.1, 0.2], vec![0.3]]),
        );

        let error = store.insert(&schema(), bad).await.unwrap_err();
        assert!(matches!(error, StoreError::Rejected { .. }));
        assert!(store.is_empty("pages"));
    }

    #[tokio::test]
    async fn reloading_with_another_dimension_is_a_schema_mismatch() {
        let store = MemoryStore::new();
        store.load(&schema()).await.expect("load");
        let mut wider = schema();
        wider.dimension = 3;
        let error = store.load(&wider).await.unwrap_err();
        assert!(matches!(error, StoreError::SchemaMismatch { actual: 2, .. }));
    }

    #[tokio::test]
    async fn query_honours_limit() {
        let store = MemoryStore::new();
        store.load(&schema()).await.expect("load");
        store
            .insert(&schema(), batch(&["x_page_1", "x_page_2", "x_page_3"]))
            .await
            .expect("insert");
        let rows = store
            .query("pages", &Predicate::All, &["page_id"], 2)
            .await
            .expect("query");
        assert_eq!(rows.len(), 2);
    }
}
