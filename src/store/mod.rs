//! Vector store abstraction shared by the engine and its backends.
//!
//! The engine needs a handful of capabilities from a store: making a collection available
//! ([`VectorStore::load`]), predicate queries, an integer maximum, column-major inserts and
//! predicate deletes.
//! [`crate::qdrant::QdrantService`] implements them over HTTP and [`MemoryStore`] in process.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::qdrant::QdrantError;

mod memory;

pub use memory::MemoryStore;

/// A stored row projected to the requested fields.
pub type Row = Map<String, Value>;

/// Errors surfaced by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A collection was queried or written before `load`.
    #[error("collection {0} has not been loaded")]
    NotLoaded(String),
    /// The collection exists with a different vector width.
    #[error("collection {collection} stores {actual}-dimensional vectors, expected {expected}")]
    SchemaMismatch {
        /// Collection name.
        collection: String,
        /// Width required by the configuration.
        expected: usize,
        /// Width reported by the store.
        actual: usize,
    },
    /// The store refused a batch.
    #[error("store rejected batch for {collection}: {reason}")]
    Rejected {
        /// Collection name.
        collection: String,
        /// Explanation from the backend.
        reason: String,
    },
    /// Qdrant transport or status failure.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// Any other backend failure.
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Row filter understood by every backend.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Matches every row.
    All,
    /// Matches rows whose `field` equals `value`.
    Equals {
        /// Field name.
        field: String,
        /// Expected value.
        value: Value,
    },
}

impl Predicate {
    /// Equality predicate on a single field.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Evaluate the predicate against an in-memory row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::All => true,
            Self::Equals { field, value } => row.get(field) == Some(value),
        }
    }
}

/// Storage type of a schema field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Unsigned integer, indexed for equality.
    Integer,
    /// Short string, indexed for equality.
    Keyword,
    /// Free text, not indexed.
    Text,
    /// Dense vector of the schema's dimension.
    Vector,
}

/// One named field of a collection schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name.
    pub name: &'static str,
    /// Storage type.
    pub kind: FieldKind,
}

/// Shape of a collection: its fields, primary key and vector width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,
    /// Field whose value identifies a row.
    pub primary_key: &'static str,
    /// Field holding the row's vector.
    pub vector_field: &'static str,
    /// Width of the vector field.
    pub dimension: usize,
    /// Every field a row must carry, including the primary key and the vector.
    pub fields: Vec<FieldSpec>,
}

impl CollectionSchema {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// A single column of values.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    /// Unsigned integers.
    Int(Vec<u64>),
    /// Strings.
    Text(Vec<String>),
    /// Dense vectors.
    Vector(Vec<Vec<f32>>),
}

impl Column {
    /// Number of values in the column.
    pub fn len(&self) -> usize {
        match self {
            Self::Int(values) => values.len(),
            Self::Text(values) => values.len(),
            Self::Vector(values) => values.len(),
        }
    }

    /// True when the column holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the column can populate a field of the given kind.
    pub fn fits(&self, kind: FieldKind) -> bool {
        matches!(
            (self, kind),
            (Self::Int(_), FieldKind::Integer)
                | (Self::Text(_), FieldKind::Keyword | FieldKind::Text)
                | (Self::Vector(_), FieldKind::Vector)
        )
    }

    /// JSON value at `index`, if present.
    pub fn value_at(&self, index: usize) -> Option<Value> {
        match self {
            Self::Int(values) => values.get(index).map(|value| Value::from(*value)),
            Self::Text(values) => values.get(index).map(|value| Value::from(value.as_str())),
            Self::Vector(values) => values.get(index).map(|vector| Value::from(vector.clone())),
        }
    }
}

/// Column-major batch of rows destined for one collection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnBatch {
    columns: Vec<(String, Column)>,
}

impl ColumnBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named column, replacing any previous column of the same name.
    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Self {
        let name = name.into();
        self.columns.retain(|(existing, _)| existing != &name);
        self.columns.push((name, column));
        self
    }

    /// Borrow a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, column)| column)
    }

    /// Iterate columns in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns
            .iter()
            .map(|(name, column)| (name.as_str(), column))
    }

    /// Row count implied by the first column; zero for an empty batch.
    pub fn row_count(&self) -> usize {
        self.columns
            .first()
            .map(|(_, column)| column.len())
            .unwrap_or(0)
    }

    /// Materialise row `index` as a JSON object.
    pub fn row(&self, index: usize) -> Row {
        self.columns
            .iter()
            .filter_map(|(name, column)| column.value_at(index).map(|value| (name.clone(), value)))
            .collect()
    }
}

/// Capability set required from a vector store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Make a collection available for queries and writes, creating it when missing.
    async fn load(&self, schema: &CollectionSchema) -> Result<(), StoreError>;

    /// Return up to `limit` rows matching `predicate`, projected to `fields`.
    async fn query(
        &self,
        collection: &str,
        predicate: &Predicate,
        fields: &[&str],
        limit: usize,
    ) -> Result<Vec<Row>, StoreError>;

    /// Every row matching `predicate`, fetched `page_size` rows at a time.
    async fn query_all(
        &self,
        collection: &str,
        predicate: &Predicate,
        fields: &[&str],
        _page_size: usize,
    ) -> Result<Vec<Row>, StoreError> {
        self.query(collection, predicate, fields, usize::MAX).await
    }

    /// Largest value of an integer `field` across the whole collection; `None` when no row
    /// carries one.
    async fn max_integer(&self, collection: &str, field: &str) -> Result<Option<u64>, StoreError> {
        let rows = self
            .query(collection, &Predicate::All, &[field], usize::MAX)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(field).and_then(Value::as_u64))
            .max())
    }

    /// Insert (or overwrite by primary key) every row of `batch`; returns the row count.
    async fn insert(&self, schema: &CollectionSchema, batch: ColumnBatch)
    -> Result<usize, StoreError>;

    /// Remove every row matching `predicate`.
    async fn delete(&self, collection: &str, predicate: &Predicate) -> Result<(), StoreError>;
}
