//! Dependency ordering for commits.
//!
//! Provides the generic [`DependencyGraph`] primitive and the
//! [`EntitySorter`] built on it, which orders tables for insert and delete
//! and orders same-table objects linked by reflexive relationships.
//!
//! # Modules
//!
//! - [`dependency`]: keyed dependency graph with cycle breaking
//! - [`entity`]: schema-level table ordering
//! - [`object`]: instance-level ordering for reflexive tables
//! - [`error`]: SortError

pub mod dependency;
pub mod entity;
pub mod error;
pub mod object;

pub use dependency::{DependencyCycle, DependencyGraph, Direction, ResolvedOrder, Strength};
pub use entity::EntitySorter;
pub use error::SortError;
pub use object::{FaultResolver, MasterRef, NoFaults, SortableObject};
