//! Conversion of column-major batches into Qdrant points.

use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::store::{CollectionSchema, Column, ColumnBatch};

use super::types::QdrantError;

/// Qdrant point id for a primary-key value.
///
/// Integer keys are used as numeric point ids directly. String keys are mapped to a UUIDv5 so
/// the same key always addresses the same point.
pub fn point_id(key: &Value) -> Result<Value, QdrantError> {
    match key {
        Value::Number(number) => number
            .as_u64()
            .map(Value::from)
            .ok_or_else(|| QdrantError::InvalidPoint(format!("{number} is not an unsigned id"))),
        Value::String(text) => Ok(Value::String(
            Uuid::new_v5(&Uuid::NAMESPACE_OID, text.as_bytes()).to_string(),
        )),
        other => Err(QdrantError::InvalidPoint(format!(
            "unsupported primary key value {other}"
        ))),
    }
}

/// Build the `points` array for an upsert.
///
/// The vector column becomes the point vector; every other column, the primary key included,
/// lands in the payload so queries can project it back.
pub fn build_points(schema: &CollectionSchema, batch: &ColumnBatch) -> Result<Vec<Value>, QdrantError> {
    let vectors = match batch.column(schema.vector_field) {
        Some(Column::Vector(vectors)) => vectors,
        _ => {
            return Err(QdrantError::InvalidPoint(format!(
                "batch lacks vector column {}",
                schema.vector_field
            )));
        }
    };

    let mut points = Vec::with_capacity(batch.row_count());
    for (index, vector) in vectors.iter().enumerate() {
        let mut payload = Map::new();
        for (name, column) in batch.columns() {
            if name == schema.vector_field {
                continue;
            }
            if let Some(value) = column.value_at(index) {
                payload.insert(name.to_string(), value);
            }
        }
        let key = payload.get(schema.primary_key).ok_or_else(|| {
            QdrantError::InvalidPoint(format!(
                "row {index} lacks primary key {}",
                schema.primary_key
            ))
        })?;
        points.push(json!({
            "id": point_id(key)?,
            "vector": vector,
            "payload": payload,
        }));
    }
    Ok(points)
}
