//! Graph and schema primitives for dependency-ordered commits.
//!
//! # Modules
//!
//! - [`digraph`]: the [`Digraph`] trait with map-of-maps and indexed storage
//! - [`algo`]: stable topological sort, strongly connected components, reachability
//! - [`schema`]: table, column, primary-key and foreign-key metadata
//! - [`error`]: GraphError and SchemaError

pub mod algo;
pub mod digraph;
pub mod error;
pub mod schema;

// Re-export commonly used types
pub use algo::{reachable_from, strongly_connected_components, topological_sort, TopologicalOrder};
pub use digraph::{ArcRef, Digraph, IndexedDigraph, MapDigraph};
pub use error::{GraphError, SchemaError};
pub use schema::{Column, ForeignKey, Join, PrimaryKey, Relationship, Schema, Table};
