//! Keyed dependency graph with stable ordering and cycle breaking.
//!
//! One primitive serves both table-level and object-level ordering: keys
//! are table names or object identities, arcs run from a dependent key to
//! the key it depends on.
//!
//! Ordering is a stable topological sort: when nothing constrains two keys,
//! they keep the order in which they were added. When the arcs form a
//! cycle, optional arcs inside each strongly connected component are
//! dropped and sorting resumes; a cycle held together by mandatory arcs
//! alone is reported as a [`DependencyCycle`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use ashwood_core::algo::{strongly_connected_components, topological_sort};
use ashwood_core::{Digraph, MapDigraph};

/// How strongly a dependent needs its dependency to exist first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strength {
    /// NOT NULL reference: ordering is required.
    Mandatory,
    /// Nullable reference: ordering is preferred and may be given up to
    /// break a cycle.
    Optional,
}

impl Strength {
    fn merge(self, other: Strength) -> Strength {
        match (self, other) {
            (Strength::Optional, Strength::Optional) => Strength::Optional,
            _ => Strength::Mandatory,
        }
    }
}

/// Which way an order is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Dependencies first.
    Insert,
    /// Dependents first; the exact reverse of `Insert`.
    Delete,
}

/// Keys that could not be ordered because of a mandatory cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCycle<K> {
    pub members: Vec<K>,
}

/// A fully ordered dependency graph.
#[derive(Debug, Clone)]
pub struct ResolvedOrder<K> {
    /// Insert order: every key after the keys it depends on.
    pub order: Vec<K>,
    /// The dependency arcs that survived cycle breaking, dependent ->
    /// dependency. Always acyclic.
    pub graph: MapDigraph<K, Strength>,
    /// Optional arcs dropped to break cycles, as (dependent, dependency).
    pub dropped: Vec<(K, K)>,
}

impl<K: Clone> ResolvedOrder<K> {
    pub fn in_direction(&self, direction: Direction) -> Vec<K> {
        let mut order = self.order.clone();
        if direction == Direction::Delete {
            order.reverse();
        }
        order
    }
}

/// Dependency graph over keys of type `K`.
#[derive(Debug, Clone)]
pub struct DependencyGraph<K> {
    graph: MapDigraph<K, Strength>,
}

impl<K> Default for DependencyGraph<K> {
    fn default() -> Self {
        DependencyGraph {
            graph: MapDigraph::default(),
        }
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> DependencyGraph<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a key. Input order of keys is the tie-break order.
    pub fn add(&mut self, key: K) -> bool {
        self.graph.add_vertex(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.graph.contains_vertex(key)
    }

    pub fn len(&self) -> usize {
        self.graph.order()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Records that `dependent` must come after `dependency` on insert.
    ///
    /// Repeated declarations merge; a mandatory one wins. Missing keys are
    /// added. A key depending on itself is a cycle.
    pub fn depend(&mut self, dependent: K, dependency: K, strength: Strength) {
        let merged = match self.graph.arc(&dependent, &dependency) {
            Some(existing) => existing.merge(strength),
            None => strength,
        };
        self.graph.put_arc(dependent, dependency, merged);
    }

    /// Dependent -> dependency arcs as declared.
    pub fn graph(&self) -> &MapDigraph<K, Strength> {
        &self.graph
    }

    /// Orders every key, breaking optional cycles.
    pub fn resolve(&self) -> Result<ResolvedOrder<K>, DependencyCycle<K>> {
        let position: HashMap<&K, usize> = self
            .graph
            .vertices()
            .enumerate()
            .map(|(i, key)| (key, i))
            .collect();

        let mut working = self.graph.clone();
        let mut dropped = Vec::new();

        loop {
            // Sort over dependency -> dependent so dependencies come first.
            let forward = reversed(&working);
            let attempt = topological_sort(&forward, |key| position.get(key).copied());
            if attempt.is_complete() {
                return Ok(ResolvedOrder {
                    order: attempt.sorted,
                    graph: working,
                    dropped,
                });
            }

            let component_of = cyclic_components(&working);
            let mut removed = Vec::new();
            working.retain_arcs(&mut |dependent, dependency, strength| {
                let same_cycle = match (component_of.get(dependent), component_of.get(dependency)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                };
                if same_cycle && *strength == Strength::Optional {
                    removed.push((dependent.clone(), dependency.clone()));
                    false
                } else {
                    true
                }
            });

            if removed.is_empty() {
                let mut members: Vec<K> = component_of.into_keys().collect();
                members.sort_by_key(|key| position.get(key).copied());
                return Err(DependencyCycle { members });
            }

            tracing::debug!(dropped = ?removed, "broke optional dependency cycle");
            dropped.extend(removed);
        }
    }

    /// Orders every key for the given direction.
    pub fn order(&self, direction: Direction) -> Result<Vec<K>, DependencyCycle<K>> {
        Ok(self.resolve()?.in_direction(direction))
    }
}

fn reversed<K: Eq + Hash + Clone + fmt::Debug>(graph: &MapDigraph<K, Strength>) -> MapDigraph<K, ()> {
    let mut forward = MapDigraph::with_capacity(graph.order());
    for key in graph.vertices() {
        forward.add_vertex(key.clone());
    }
    for arc in graph.arcs() {
        forward.put_arc(arc.destination.clone(), arc.origin.clone(), ());
    }
    forward
}

/// Maps every key that sits on a cycle to an id of its component.
fn cyclic_components<K: Eq + Hash + Clone + fmt::Debug>(
    graph: &MapDigraph<K, Strength>,
) -> HashMap<K, usize> {
    let mut component_of = HashMap::new();
    for (id, component) in strongly_connected_components(graph).into_iter().enumerate() {
        let on_cycle = component.len() > 1 || graph.has_arc(&component[0], &component[0]);
        if on_cycle {
            for key in component {
                component_of.insert(key, id);
            }
        }
    }
    component_of
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn dependencies_come_first_on_insert() {
        let mut deps = DependencyGraph::new();
        for key in ["line", "order", "customer"] {
            deps.add(key);
        }
        deps.depend("line", "order", Strength::Mandatory);
        deps.depend("order", "customer", Strength::Mandatory);

        assert_eq!(
            deps.order(Direction::Insert).unwrap(),
            vec!["customer", "order", "line"]
        );
        assert_eq!(
            deps.order(Direction::Delete).unwrap(),
            vec!["line", "order", "customer"]
        );
    }

    #[test]
    fn unrelated_keys_keep_input_order() {
        let mut deps = DependencyGraph::new();
        for key in ["z", "a", "m"] {
            deps.add(key);
        }
        assert_eq!(deps.order(Direction::Insert).unwrap(), vec!["z", "a", "m"]);
        assert_eq!(deps.order(Direction::Delete).unwrap(), vec!["m", "a", "z"]);
    }

    #[test]
    fn constrained_key_moves_only_as_far_as_needed() {
        let mut deps = DependencyGraph::new();
        for key in ["b", "x", "a", "y"] {
            deps.add(key);
        }
        deps.depend("b", "a", Strength::Optional);
        assert_eq!(
            deps.order(Direction::Insert).unwrap(),
            vec!["x", "a", "b", "y"]
        );
    }

    #[test]
    fn optional_cycle_is_broken() {
        let mut deps = DependencyGraph::new();
        deps.add("person");
        deps.add("address");
        deps.depend("person", "address", Strength::Optional);
        deps.depend("address", "person", Strength::Mandatory);

        let resolved = deps.resolve().unwrap();
        assert_eq!(resolved.order, vec!["person", "address"]);
        assert_eq!(resolved.dropped, vec![("person", "address")]);
        assert_eq!(resolved.graph.size(), 1);
    }

    #[test]
    fn mandatory_cycle_is_an_error() {
        let mut deps = DependencyGraph::new();
        deps.add("solo");
        deps.depend("a", "b", Strength::Mandatory);
        deps.depend("b", "a", Strength::Mandatory);
        let cycle = deps.resolve().unwrap_err();
        assert_eq!(cycle.members, vec!["a", "b"]);
    }

    #[test]
    fn mandatory_declaration_wins_merge() {
        let mut deps = DependencyGraph::new();
        deps.depend(1, 2, Strength::Optional);
        deps.depend(1, 2, Strength::Mandatory);
        deps.depend(1, 2, Strength::Optional);
        assert_eq!(deps.graph().arc(&1, &2), Some(&Strength::Mandatory));
        assert_eq!(deps.graph().size(), 1);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut deps = DependencyGraph::new();
        deps.depend("loop", "loop", Strength::Mandatory);
        assert!(deps.resolve().is_err());

        let mut optional = DependencyGraph::new();
        optional.depend("loop", "loop", Strength::Optional);
        assert_eq!(optional.order(Direction::Insert).unwrap(), vec!["loop"]);
    }

    proptest! {
        #[test]
        fn delete_is_exact_reverse_of_insert(
            arcs in prop::collection::vec((0u8..15, 0u8..15), 0..40)
        ) {
            let mut deps = DependencyGraph::new();
            for key in 0u8..15 {
                deps.add(key);
            }
            for (a, b) in arcs {
                // Only point downward so the graph stays acyclic.
                if a > b {
                    deps.depend(a, b, Strength::Mandatory);
                }
            }
            let insert = deps.order(Direction::Insert).unwrap();
            let mut delete = deps.order(Direction::Delete).unwrap();
            delete.reverse();
            prop_assert_eq!(&insert, &delete);

            let rank: HashMap<u8, usize> =
                insert.iter().enumerate().map(|(i, k)| (*k, i)).collect();
            for arc in deps.graph().arcs() {
                prop_assert!(rank[arc.destination] < rank[arc.origin]);
            }
        }
    }
}
