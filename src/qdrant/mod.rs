//! Qdrant vector store integration.

pub mod client;
pub mod filters;
pub mod payload;
/// Streaming helpers for Qdrant scroll pagination.
pub mod scroller;
pub mod types;

pub use client::QdrantService;
pub use filters::build_filter;
pub use payload::{build_points, point_id};
pub use types::QdrantError;
