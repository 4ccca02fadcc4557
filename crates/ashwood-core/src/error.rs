//! Core error types for ashwood-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! graph precondition violations and schema metadata problems.

use thiserror::Error;

/// Precondition violations raised by [`Digraph`](crate::digraph::Digraph)
/// operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The operation named a vertex that is not part of the graph.
    #[error("vertex not found: {vertex}")]
    VertexNotFound { vertex: String },
}

impl GraphError {
    pub(crate) fn vertex_not_found<V: std::fmt::Debug>(vertex: &V) -> Self {
        GraphError::VertexNotFound {
            vertex: format!("{vertex:?}"),
        }
    }
}

/// Errors produced while assembling or loading schema metadata.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A table with the same full name is already registered.
    #[error("duplicate table: '{name}'")]
    DuplicateTable { name: String },

    /// A table lookup by full name failed.
    #[error("table not found: '{name}'")]
    TableNotFound { name: String },

    /// The schema document could not be parsed.
    #[error("schema parse error: {0}")]
    Json(#[from] serde_json::Error),
}
