//! Mutable labeled directed graphs keyed by vertex identity.
//!
//! [`Digraph`] is the storage contract shared by the sorter and the commit
//! engine. Two backends implement it:
//!
//! - [`MapDigraph`]: an insertion-ordered map of maps. Cheap to build and
//!   iterate in a stable order; removing a vertex or listing its incoming
//!   arcs scans every adjacency map (O(order)).
//! - [`IndexedDigraph`]: an arena of vertices with forward and backward arc
//!   lists (petgraph `StableGraph`). Vertex removal and incoming iteration
//!   cost O(degree), for removal-heavy workloads.
//!
//! At most one arc exists per ordered `(origin, destination)` pair; putting
//! an arc again overwrites its value.

mod indexed;
mod map;

use std::fmt;

pub use indexed::IndexedDigraph;
pub use map::{Arcs, MapDigraph};

use crate::error::GraphError;

/// A borrowed view of one arc.
pub struct ArcRef<'a, V, A> {
    pub origin: &'a V,
    pub destination: &'a V,
    pub value: &'a A,
}

impl<V, A> Clone for ArcRef<'_, V, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V, A> Copy for ArcRef<'_, V, A> {}

impl<V: fmt::Debug, A: fmt::Debug> fmt::Debug for ArcRef<'_, V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} -> {:?} ({:?})",
            self.origin, self.destination, self.value
        )
    }
}

/// Boxed read-only iterator over arcs.
pub type ArcIter<'a, V, A> = Box<dyn Iterator<Item = ArcRef<'a, V, A>> + 'a>;

/// The mutable directed graph contract.
///
/// Iterators borrow the graph and are read-only. Structural edits while
/// walking arcs go through [`retain_arcs`](Digraph::retain_arcs).
pub trait Digraph<V, A> {
    /// Adds a vertex. Returns `true` if it was not already present.
    fn add_vertex(&mut self, vertex: V) -> bool;

    /// Removes a vertex together with every arc touching it.
    ///
    /// Returns the number of arcs dropped. Fails if the vertex is absent.
    fn remove_vertex(&mut self, vertex: &V) -> Result<usize, GraphError>;

    fn contains_vertex(&self, vertex: &V) -> bool;

    /// Inserts or overwrites the arc `origin -> destination`, adding missing
    /// endpoints. Returns the previous value of that arc, if any.
    fn put_arc(&mut self, origin: V, destination: V, value: A) -> Option<A>;

    fn arc(&self, origin: &V, destination: &V) -> Option<&A>;

    fn has_arc(&self, origin: &V, destination: &V) -> bool {
        self.arc(origin, destination).is_some()
    }

    /// Removes the arc `origin -> destination`, returning its value.
    fn remove_arc(&mut self, origin: &V, destination: &V) -> Option<A>;

    /// Number of vertices.
    fn order(&self) -> usize;

    /// Number of arcs.
    fn size(&self) -> usize;

    fn vertices<'a>(&'a self) -> Box<dyn Iterator<Item = &'a V> + 'a>
    where
        V: 'a;

    /// Arcs leaving `vertex`. Empty if the vertex is absent.
    fn outgoing<'a>(&'a self, vertex: &'a V) -> ArcIter<'a, V, A>
    where
        V: 'a,
        A: 'a;

    /// Arcs entering `vertex`. Empty if the vertex is absent.
    fn incoming<'a>(&'a self, vertex: &'a V) -> ArcIter<'a, V, A>
    where
        V: 'a,
        A: 'a;

    /// Every arc in the graph.
    fn arcs<'a>(&'a self) -> ArcIter<'a, V, A>
    where
        V: 'a,
        A: 'a;

    /// Keeps only the arcs for which `keep` returns `true`.
    ///
    /// Returns the number of arcs removed.
    fn retain_arcs(&mut self, keep: &mut dyn FnMut(&V, &V, &A) -> bool) -> usize;

    /// Number of arcs leaving `vertex`; zero if absent.
    fn out_degree(&self, vertex: &V) -> usize;

    /// Number of arcs entering `vertex`; zero if absent.
    fn in_degree(&self, vertex: &V) -> usize;

    fn is_empty(&self) -> bool {
        self.order() == 0
    }
}
