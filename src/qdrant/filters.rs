//! Translation of store predicates into Qdrant payload filters.

use serde_json::{Value, json};

use crate::store::Predicate;

/// Build the `filter` object for scroll and delete requests.
pub fn build_filter(predicate: &Predicate) -> Value {
    match predicate {
        Predicate::All => json!({ "must": [] }),
        Predicate::Equals { field, value } => json!({
            "must": [
                { "key": field, "match": { "value": value } }
            ]
        }),
    }
}
