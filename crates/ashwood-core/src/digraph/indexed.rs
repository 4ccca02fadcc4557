//! Indexed bidirectional digraph backed by petgraph's `StableGraph`.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};

use super::{ArcIter, ArcRef, Digraph};
use crate::error::GraphError;

/// Digraph with forward and backward arc lists per vertex.
///
/// Vertices live in a `StableGraph` arena so indices survive removals; a
/// side map resolves vertex identity to its arena index. Incoming arcs are
/// reached without scanning other vertices. Vacated arena slots are reused,
/// so vertex iteration order is not insertion order once vertices have been
/// removed.
#[derive(Debug, Clone)]
pub struct IndexedDigraph<V, A> {
    graph: StableGraph<V, A, Directed, u32>,
    index: HashMap<V, NodeIndex<u32>>,
}

impl<V, A> Default for IndexedDigraph<V, A> {
    fn default() -> Self {
        IndexedDigraph {
            graph: StableGraph::default(),
            index: HashMap::new(),
        }
    }
}

impl<V: Eq + Hash + Clone, A> IndexedDigraph<V, A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only access to the underlying petgraph arena.
    pub fn graph(&self) -> &StableGraph<V, A, Directed, u32> {
        &self.graph
    }

    fn ensure_vertex(&mut self, vertex: V) -> NodeIndex<u32> {
        if let Some(&idx) = self.index.get(&vertex) {
            return idx;
        }
        let idx = self.graph.add_node(vertex.clone());
        self.index.insert(vertex, idx);
        idx
    }

    fn arcs_at<'a>(&'a self, vertex: &V, direction: Direction) -> ArcIter<'a, V, A>
    where
        V: 'a,
        A: 'a,
    {
        let Some(&idx) = self.index.get(vertex) else {
            return Box::new(std::iter::empty());
        };
        let graph = &self.graph;
        Box::new(graph.edges_directed(idx, direction).map(move |edge| ArcRef {
            origin: &graph[edge.source()],
            destination: &graph[edge.target()],
            value: edge.weight(),
        }))
    }
}

impl<V: Eq + Hash + Clone + fmt::Debug, A> Digraph<V, A> for IndexedDigraph<V, A> {
    fn add_vertex(&mut self, vertex: V) -> bool {
        if self.index.contains_key(&vertex) {
            return false;
        }
        self.ensure_vertex(vertex);
        true
    }

    fn remove_vertex(&mut self, vertex: &V) -> Result<usize, GraphError> {
        let idx = self
            .index
            .remove(vertex)
            .ok_or_else(|| GraphError::vertex_not_found(vertex))?;

        // A self-loop shows up in both directions; count it once.
        let outgoing = self.graph.edges_directed(idx, Direction::Outgoing).count();
        let incoming = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|edge| edge.source() != idx)
            .count();

        self.graph.remove_node(idx);
        Ok(outgoing + incoming)
    }

    fn contains_vertex(&self, vertex: &V) -> bool {
        self.index.contains_key(vertex)
    }

    fn put_arc(&mut self, origin: V, destination: V, value: A) -> Option<A> {
        let from = self.ensure_vertex(origin);
        let to = self.ensure_vertex(destination);
        match self.graph.find_edge(from, to) {
            Some(edge) => Some(std::mem::replace(&mut self.graph[edge], value)),
            None => {
                self.graph.add_edge(from, to, value);
                None
            }
        }
    }

    fn arc(&self, origin: &V, destination: &V) -> Option<&A> {
        let from = *self.index.get(origin)?;
        let to = *self.index.get(destination)?;
        let edge = self.graph.find_edge(from, to)?;
        self.graph.edge_weight(edge)
    }

    fn remove_arc(&mut self, origin: &V, destination: &V) -> Option<A> {
        let from = *self.index.get(origin)?;
        let to = *self.index.get(destination)?;
        let edge = self.graph.find_edge(from, to)?;
        self.graph.remove_edge(edge)
    }

    fn order(&self) -> usize {
        self.graph.node_count()
    }

    fn size(&self) -> usize {
        self.graph.edge_count()
    }

    fn vertices<'a>(&'a self) -> Box<dyn Iterator<Item = &'a V> + 'a>
    where
        V: 'a,
    {
        let graph = &self.graph;
        Box::new(
            graph
                .node_indices()
                .filter_map(move |idx| graph.node_weight(idx)),
        )
    }

    fn outgoing<'a>(&'a self, vertex: &'a V) -> ArcIter<'a, V, A>
    where
        V: 'a,
        A: 'a,
    {
        self.arcs_at(vertex, Direction::Outgoing)
    }

    fn incoming<'a>(&'a self, vertex: &'a V) -> ArcIter<'a, V, A>
    where
        V: 'a,
        A: 'a,
    {
        self.arcs_at(vertex, Direction::Incoming)
    }

    fn arcs<'a>(&'a self) -> ArcIter<'a, V, A>
    where
        V: 'a,
        A: 'a,
    {
        let graph = &self.graph;
        Box::new(graph.edge_indices().filter_map(move |edge| {
            let (source, target) = graph.edge_endpoints(edge)?;
            Some(ArcRef {
                origin: &graph[source],
                destination: &graph[target],
                value: &graph[edge],
            })
        }))
    }

    fn retain_arcs(&mut self, keep: &mut dyn FnMut(&V, &V, &A) -> bool) -> usize {
        let before = self.graph.edge_count();
        self.graph.retain_edges(|frozen, edge| match frozen.edge_endpoints(edge) {
            Some((source, target)) => keep(&frozen[source], &frozen[target], &frozen[edge]),
            None => true,
        });
        before - self.graph.edge_count()
    }

    fn out_degree(&self, vertex: &V) -> usize {
        self.index.get(vertex).map_or(0, |&idx| {
            self.graph.edges_directed(idx, Direction::Outgoing).count()
        })
    }

    fn in_degree(&self, vertex: &V) -> usize {
        self.index.get(vertex).map_or(0, |&idx| {
            self.graph.edges_directed(idx, Direction::Incoming).count()
        })
    }
}
