//! Map-of-maps digraph storage.

use std::fmt;
use std::hash::Hash;

use indexmap::map::{self, IndexMap};

use super::{ArcIter, ArcRef, Digraph};
use crate::error::GraphError;

/// Digraph stored as `origin -> (destination -> value)`.
///
/// Both levels are insertion ordered, so vertex and arc iteration follow
/// the order in which they were first added. Removing a vertex strips its
/// incoming arcs by sweeping every adjacency map.
#[derive(Debug, Clone)]
pub struct MapDigraph<V, A> {
    adjacency: IndexMap<V, IndexMap<V, A>>,
    size: usize,
}

impl<V, A> Default for MapDigraph<V, A> {
    fn default() -> Self {
        MapDigraph {
            adjacency: IndexMap::new(),
            size: 0,
        }
    }
}

impl<V: Eq + Hash + Clone, A> MapDigraph<V, A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(vertices: usize) -> Self {
        MapDigraph {
            adjacency: IndexMap::with_capacity(vertices),
            size: 0,
        }
    }

    /// Mutable access to an arc value.
    pub fn arc_mut(&mut self, origin: &V, destination: &V) -> Option<&mut A> {
        self.adjacency.get_mut(origin)?.get_mut(destination)
    }

    /// Insertion position of a vertex.
    pub fn position(&self, vertex: &V) -> Option<usize> {
        self.adjacency.get_index_of(vertex)
    }

    /// Lazy iterator over every arc, computed one arc ahead.
    pub fn arc_iter(&self) -> Arcs<'_, V, A> {
        Arcs::new(self)
    }
}

impl<V: Eq + Hash + Clone + fmt::Debug, A> Digraph<V, A> for MapDigraph<V, A> {
    fn add_vertex(&mut self, vertex: V) -> bool {
        if self.adjacency.contains_key(&vertex) {
            return false;
        }
        self.adjacency.insert(vertex, IndexMap::new());
        true
    }

    fn remove_vertex(&mut self, vertex: &V) -> Result<usize, GraphError> {
        let outgoing = self
            .adjacency
            .shift_remove(vertex)
            .ok_or_else(|| GraphError::vertex_not_found(vertex))?;
        let mut removed = outgoing.len();

        // Incoming arcs live in the other vertices' maps.
        for destinations in self.adjacency.values_mut() {
            if destinations.shift_remove(vertex).is_some() {
                removed += 1;
            }
        }

        self.size -= removed;
        Ok(removed)
    }

    fn contains_vertex(&self, vertex: &V) -> bool {
        self.adjacency.contains_key(vertex)
    }

    fn put_arc(&mut self, origin: V, destination: V, value: A) -> Option<A> {
        let origin_index = match self.adjacency.get_index_of(&origin) {
            Some(index) => index,
            None => self.adjacency.insert_full(origin, IndexMap::new()).0,
        };
        self.add_vertex(destination.clone());

        let previous = self.adjacency[origin_index].insert(destination, value);
        if previous.is_none() {
            self.size += 1;
        }
        previous
    }

    fn arc(&self, origin: &V, destination: &V) -> Option<&A> {
        self.adjacency.get(origin)?.get(destination)
    }

    fn remove_arc(&mut self, origin: &V, destination: &V) -> Option<A> {
        let removed = self.adjacency.get_mut(origin)?.shift_remove(destination);
        if removed.is_some() {
            self.size -= 1;
        }
        removed
    }

    fn order(&self) -> usize {
        self.adjacency.len()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn vertices<'a>(&'a self) -> Box<dyn Iterator<Item = &'a V> + 'a>
    where
        V: 'a,
    {
        Box::new(self.adjacency.keys())
    }

    fn outgoing<'a>(&'a self, vertex: &'a V) -> ArcIter<'a, V, A>
    where
        V: 'a,
        A: 'a,
    {
        match self.adjacency.get_key_value(vertex) {
            Some((origin, destinations)) => {
                Box::new(destinations.iter().map(move |(destination, value)| ArcRef {
                    origin,
                    destination,
                    value,
                }))
            }
            None => Box::new(std::iter::empty()),
        }
    }

    fn incoming<'a>(&'a self, vertex: &'a V) -> ArcIter<'a, V, A>
    where
        V: 'a,
        A: 'a,
    {
        Box::new(self.adjacency.iter().filter_map(move |(origin, destinations)| {
            destinations
                .get_key_value(vertex)
                .map(|(destination, value)| ArcRef {
                    origin,
                    destination,
                    value,
                })
        }))
    }

    fn arcs<'a>(&'a self) -> ArcIter<'a, V, A>
    where
        V: 'a,
        A: 'a,
    {
        Box::new(Arcs::new(self))
    }

    fn retain_arcs(&mut self, keep: &mut dyn FnMut(&V, &V, &A) -> bool) -> usize {
        let mut removed = 0;
        for (origin, destinations) in self.adjacency.iter_mut() {
            let before = destinations.len();
            destinations.retain(|destination, value| keep(origin, destination, value));
            removed += before - destinations.len();
        }
        self.size -= removed;
        removed
    }

    fn out_degree(&self, vertex: &V) -> usize {
        self.adjacency.get(vertex).map_or(0, IndexMap::len)
    }

    fn in_degree(&self, vertex: &V) -> usize {
        self.adjacency
            .values()
            .filter(|destinations| destinations.contains_key(vertex))
            .count()
    }
}

/// Lazy arc iterator over a [`MapDigraph`].
///
/// Keeps the next arc resolved ahead of time so [`peek`](Arcs::peek) can
/// answer without materializing the arc list.
pub struct Arcs<'a, V, A> {
    origins: map::Iter<'a, V, IndexMap<V, A>>,
    current: Option<(&'a V, map::Iter<'a, V, A>)>,
    lookahead: Option<ArcRef<'a, V, A>>,
    remaining: usize,
}

impl<'a, V, A> Arcs<'a, V, A> {
    fn new(graph: &'a MapDigraph<V, A>) -> Self {
        let mut arcs = Arcs {
            origins: graph.adjacency.iter(),
            current: None,
            lookahead: None,
            remaining: graph.size,
        };
        arcs.lookahead = arcs.advance();
        arcs
    }

    fn advance(&mut self) -> Option<ArcRef<'a, V, A>> {
        loop {
            if let Some((origin, destinations)) = self.current.as_mut() {
                if let Some((destination, value)) = destinations.next() {
                    return Some(ArcRef {
                        origin: *origin,
                        destination,
                        value,
                    });
                }
            }
            let (origin, destinations) = self.origins.next()?;
            self.current = Some((origin, destinations.iter()));
        }
    }

    /// The arc the next call to `next` will return.
    pub fn peek(&self) -> Option<&ArcRef<'a, V, A>> {
        self.lookahead.as_ref()
    }
}

impl<'a, V, A> Iterator for Arcs<'a, V, A> {
    type Item = ArcRef<'a, V, A>;

    fn next(&mut self) -> Option<Self::Item> {
        let arc = self.lookahead.take()?;
        self.lookahead = self.advance();
        self.remaining -= 1;
        Some(arc)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V, A> ExactSizeIterator for Arcs<'_, V, A> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chain() -> MapDigraph<&'static str, u32> {
        let mut graph = MapDigraph::new();
        graph.put_arc("a", "b", 1);
        graph.put_arc("b", "c", 2);
        graph.put_arc("c", "a", 3);
        graph
    }

    #[test]
    fn add_vertex_reports_novelty() {
        let mut graph: MapDigraph<u32, ()> = MapDigraph::new();
        assert!(graph.add_vertex(1));
        assert!(!graph.add_vertex(1));
        assert_eq!(graph.order(), 1);
        assert_eq!(graph.size(), 0);
    }

    #[test]
    fn put_arc_adds_endpoints_and_counts_once() {
        let mut graph = MapDigraph::new();
        assert_eq!(graph.put_arc("x", "y", 1), None);
        assert_eq!(graph.order(), 2);
        assert_eq!(graph.size(), 1);

        assert_eq!(graph.put_arc("x", "y", 7), Some(1));
        assert_eq!(graph.size(), 1);
        assert_eq!(graph.arc(&"x", &"y"), Some(&7));
        assert!(!graph.has_arc(&"y", &"x"));
    }

    #[test]
    fn put_same_arc_twice_is_idempotent() {
        let mut graph = MapDigraph::new();
        graph.put_arc(1, 2, "fk");
        graph.put_arc(1, 2, "fk");
        assert_eq!(graph.size(), 1);
    }

    #[test]
    fn vertex_order_follows_first_mention() {
        let mut graph = MapDigraph::new();
        graph.put_arc("b", "a", ());
        graph.add_vertex("c");
        let order: Vec<_> = graph.vertices().copied().collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert_eq!(graph.position(&"c"), Some(2));
    }

    #[test]
    fn remove_arc_updates_size() {
        let mut graph = chain();
        assert_eq!(graph.remove_arc(&"a", &"b"), Some(1));
        assert_eq!(graph.remove_arc(&"a", &"b"), None);
        assert_eq!(graph.remove_arc(&"zz", &"b"), None);
        assert_eq!(graph.size(), 2);
        assert_eq!(graph.order(), 3);
    }

    #[test]
    fn remove_vertex_drops_both_directions() {
        let mut graph = chain();
        graph.put_arc("b", "b", 9);
        assert_eq!(graph.remove_vertex(&"b").unwrap(), 3);
        assert_eq!(graph.order(), 2);
        assert_eq!(graph.size(), 1);
        assert!(graph.has_arc(&"c", &"a"));
    }

    #[test]
    fn remove_absent_vertex_fails() {
        let mut graph = chain();
        let err = graph.remove_vertex(&"nope").unwrap_err();
        assert_eq!(
            err,
            GraphError::VertexNotFound {
                vertex: "\"nope\"".into()
            }
        );
        assert_eq!(graph.order(), 3);
    }

    #[test]
    fn iterators_on_absent_vertex_are_empty() {
        let graph = chain();
        assert_eq!(graph.outgoing(&"missing").count(), 0);
        assert_eq!(graph.incoming(&"missing").count(), 0);
        assert_eq!(graph.out_degree(&"missing"), 0);
        assert_eq!(graph.in_degree(&"missing"), 0);
    }

    #[test]
    fn incoming_scans_all_origins() {
        let mut graph = chain();
        graph.put_arc("b", "a", 4);
        let mut origins: Vec<_> = graph.incoming(&"a").map(|arc| *arc.origin).collect();
        origins.sort();
        assert_eq!(origins, vec!["b", "c"]);
        assert_eq!(graph.in_degree(&"a"), 2);
    }

    #[test]
    fn arc_iterator_peeks_ahead() {
        let graph = chain();
        let mut arcs = graph.arc_iter();
        assert_eq!(arcs.len(), 3);
        assert_eq!(arcs.peek().map(|arc| *arc.value), Some(1));
        let first = arcs.next().unwrap();
        assert_eq!((*first.origin, *first.destination), ("a", "b"));
        assert_eq!(arcs.len(), 2);
        let rest: Vec<_> = arcs.map(|arc| *arc.value).collect();
        assert_eq!(rest, vec![2, 3]);
    }

    #[test]
    fn arc_iterator_skips_vertices_without_arcs() {
        let mut graph = MapDigraph::new();
        graph.add_vertex(0);
        graph.put_arc(1, 2, 'x');
        graph.add_vertex(3);
        graph.put_arc(3, 0, 'y');
        let values: Vec<_> = graph.arcs().map(|arc| *arc.value).collect();
        assert_eq!(values, vec!['x', 'y']);

        let empty: MapDigraph<u8, ()> = MapDigraph::new();
        assert!(empty.arc_iter().peek().is_none());
    }

    #[test]
    fn retain_arcs_removes_and_counts() {
        let mut graph = chain();
        let removed = graph.retain_arcs(&mut |_, _, value| *value != 2);
        assert_eq!(removed, 1);
        assert_eq!(graph.size(), 2);
        assert!(!graph.has_arc(&"b", &"c"));
    }

    #[test]
    fn arc_mut_edits_in_place() {
        let mut graph = chain();
        *graph.arc_mut(&"a", &"b").unwrap() += 10;
        assert_eq!(graph.arc(&"a", &"b"), Some(&11));
    }

    proptest! {
        #[test]
        fn size_matches_distinct_pairs(arcs in prop::collection::vec((0u8..12, 0u8..12), 0..60)) {
            let mut graph = MapDigraph::new();
            let mut pairs = std::collections::HashSet::new();
            for (origin, destination) in &arcs {
                graph.put_arc(*origin, *destination, ());
                pairs.insert((*origin, *destination));
            }
            prop_assert_eq!(graph.size(), pairs.len());
            prop_assert_eq!(graph.arcs().count(), pairs.len());
        }

        #[test]
        fn removing_vertex_drops_touching_arcs(
            arcs in prop::collection::vec((0u8..8, 0u8..8), 1..40),
            victim in 0u8..8,
        ) {
            let mut graph = MapDigraph::new();
            for (origin, destination) in &arcs {
                graph.put_arc(*origin, *destination, ());
            }
            prop_assume!(graph.contains_vertex(&victim));

            let order = graph.order();
            let size = graph.size();
            let removed = graph.remove_vertex(&victim).unwrap();

            prop_assert_eq!(graph.order(), order - 1);
            prop_assert_eq!(graph.size(), size - removed);
            prop_assert!(graph
                .arcs()
                .all(|arc| *arc.origin != victim && *arc.destination != victim));
        }
    }
}
