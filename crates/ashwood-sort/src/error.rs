//! Sort error types.
//!
//! Every variant is a mapping-level failure: it is raised before any SQL
//! runs and aborts the whole commit.

use thiserror::Error;

/// Errors produced while ordering tables or objects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SortError {
    /// Tables reference each other through NOT NULL foreign keys, so no
    /// insert order exists.
    #[error("unresolvable foreign key cycle between tables: {}", tables.join(", "))]
    Cycle { tables: Vec<String> },

    /// The table is not part of the indexed schema.
    #[error("table not known to the sorter: '{name}'")]
    UnknownTable { name: String },

    /// Objects of one table form a cycle through a reflexive relationship.
    #[error("sorting objects for '{table}' failed: cycle among {count} object(s)")]
    ObjectCycle { table: String, count: usize },

    /// A lazily loaded master could not be resolved.
    #[error("cannot resolve fault for '{table}' through '{relationship}': {reason}")]
    FaultResolution {
        table: String,
        relationship: String,
        reason: String,
    },
}
