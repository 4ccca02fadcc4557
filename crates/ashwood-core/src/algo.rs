//! Graph algorithms over any [`Digraph`].
//!
//! - [`topological_sort`]: Kahn's algorithm with a caller-supplied priority
//!   deciding between vertices that are ready at the same time.
//! - [`strongly_connected_components`]: Tarjan via petgraph.
//! - [`reachable_from`]: depth-first reachability.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::hash::Hash;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::digraph::Digraph;

/// Result of a topological sort.
///
/// `sorted` holds every vertex that could be ordered. Vertices on a cycle,
/// or downstream of one, end up in `cyclic` in graph vertex order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologicalOrder<V> {
    pub sorted: Vec<V>,
    pub cyclic: Vec<V>,
}

impl<V> TopologicalOrder<V> {
    /// True if every vertex was ordered.
    pub fn is_complete(&self) -> bool {
        self.cyclic.is_empty()
    }
}

/// Orders vertices so that for every arc `u -> v`, `u` precedes `v`.
///
/// Among vertices whose predecessors have all been emitted, the one with
/// the smallest `priority` goes first; equal priorities fall back to graph
/// vertex order. Passing the input position as priority makes the sort
/// stable with respect to that input.
pub fn topological_sort<'g, V, A, G, K, P>(graph: &'g G, mut priority: P) -> TopologicalOrder<V>
where
    V: Eq + Hash + Clone + 'g,
    A: 'g,
    G: Digraph<V, A> + ?Sized,
    K: Ord,
    P: FnMut(&V) -> K,
{
    let vertices: Vec<&V> = graph.vertices().collect();
    let position: HashMap<&V, usize> = vertices
        .iter()
        .enumerate()
        .map(|(i, vertex)| (*vertex, i))
        .collect();

    let mut in_degree = vec![0usize; vertices.len()];
    for arc in graph.arcs() {
        in_degree[position[arc.destination]] += 1;
    }

    let mut ready = BinaryHeap::new();
    for (i, vertex) in vertices.iter().copied().enumerate() {
        if in_degree[i] == 0 {
            ready.push(Reverse((priority(vertex), i)));
        }
    }

    let mut emitted = vec![false; vertices.len()];
    let mut sorted = Vec::with_capacity(vertices.len());
    while let Some(Reverse((_, i))) = ready.pop() {
        emitted[i] = true;
        sorted.push(vertices[i].clone());
        for arc in graph.outgoing(vertices[i]) {
            let j = position[arc.destination];
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push(Reverse((priority(vertices[j]), j)));
            }
        }
    }

    let cyclic = vertices
        .iter()
        .zip(&emitted)
        .filter(|(_, done)| !**done)
        .map(|(vertex, _)| (*vertex).clone())
        .collect();

    TopologicalOrder { sorted, cyclic }
}

/// True if the graph contains at least one cycle (self-loops included).
pub fn has_cycle<'g, V, A, G>(graph: &'g G) -> bool
where
    V: Eq + Hash + Clone + 'g,
    A: 'g,
    G: Digraph<V, A> + ?Sized,
{
    !topological_sort(graph, |_| ()).is_complete()
}

/// Strongly connected components, in reverse topological order (a
/// component comes before every component that reaches it). Members of a
/// component keep graph vertex order.
pub fn strongly_connected_components<'g, V, A, G>(graph: &'g G) -> Vec<Vec<V>>
where
    V: Eq + Hash + Clone + 'g,
    A: 'g,
    G: Digraph<V, A> + ?Sized,
{
    let vertices: Vec<&V> = graph.vertices().collect();
    let position: HashMap<&V, usize> = vertices
        .iter()
        .enumerate()
        .map(|(i, vertex)| (*vertex, i))
        .collect();

    let mut shadow: DiGraph<(), (), u32> = DiGraph::with_capacity(vertices.len(), graph.size());
    for _ in &vertices {
        shadow.add_node(());
    }
    for arc in graph.arcs() {
        shadow.add_edge(
            NodeIndex::new(position[arc.origin]),
            NodeIndex::new(position[arc.destination]),
            (),
        );
    }

    petgraph::algo::tarjan_scc(&shadow)
        .into_iter()
        .map(|component| {
            let mut members: Vec<usize> = component.into_iter().map(|idx| idx.index()).collect();
            members.sort_unstable();
            members.into_iter().map(|i| vertices[i].clone()).collect()
        })
        .collect()
}

/// Every vertex reachable from `start` by following arcs forward, in
/// depth-first discovery order. `start` itself is included only if it lies
/// on a cycle.
pub fn reachable_from<'g, V, A, G>(graph: &'g G, start: &V) -> Vec<V>
where
    V: Eq + Hash + Clone + 'g,
    A: 'g,
    G: Digraph<V, A> + ?Sized,
{
    let mut seen: HashSet<&V> = HashSet::new();
    let mut found = Vec::new();
    let mut stack: Vec<&V> = match graph.vertices().find(|vertex| *vertex == start) {
        Some(vertex) => vec![vertex],
        None => return found,
    };

    while let Some(vertex) = stack.pop() {
        for arc in graph.outgoing(vertex) {
            if seen.insert(arc.destination) {
                found.push(arc.destination.clone());
                stack.push(arc.destination);
            }
        }
    }
    found
}
