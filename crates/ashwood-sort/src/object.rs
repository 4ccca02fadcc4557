//! Instance-level hooks for ordering objects of a reflexive table.
//!
//! The sorter never looks inside objects; it asks each one for its identity
//! and, per reflexive relationship, for the identity of its master. A master
//! that has not been loaded yet is reported as a fault and handed to a
//! [`FaultResolver`].

use std::fmt;
use std::hash::Hash;

use ashwood_core::Relationship;

use crate::error::SortError;

/// What an object knows about its master through one relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterRef<K> {
    /// No master.
    None,
    /// Master identity is known.
    Key(K),
    /// The master exists but has not been loaded.
    Fault,
}

/// An object the sorter can order.
pub trait SortableObject {
    type Key: Clone + Eq + Hash + fmt::Debug;

    /// Identity of this object, unique within one sort call.
    fn object_key(&self) -> Self::Key;

    /// Master of this object through `relationship`, read from the state
    /// the object had when it was last committed where that matters (so a
    /// deleted object still reports its former master).
    fn master(&self, relationship: &Relationship) -> MasterRef<Self::Key>;
}

/// Resolves faulted masters.
///
/// Resolution must be idempotent: asking twice for the same object and
/// relationship yields the same answer.
pub trait FaultResolver<O: SortableObject> {
    /// Returns the master's identity, or `None` if there turns out to be no
    /// master.
    fn resolve(&mut self, object: &O, relationship: &Relationship) -> Result<Option<O::Key>, SortError>;
}

/// Resolver for callers whose objects never fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl<O: SortableObject> FaultResolver<O> for NoFaults {
    fn resolve(&mut self, object: &O, relationship: &Relationship) -> Result<Option<O::Key>, SortError> {
        Err(SortError::FaultResolution {
            table: relationship.source_table.clone(),
            relationship: relationship.name.clone(),
            reason: format!("no resolver configured for {:?}", object.object_key()),
        })
    }
}

impl<O, F> FaultResolver<O> for F
where
    O: SortableObject,
    F: FnMut(&O, &Relationship) -> Result<Option<O::Key>, SortError>,
{
    fn resolve(&mut self, object: &O, relationship: &Relationship) -> Result<Option<O::Key>, SortError> {
        self(object, relationship)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::dependency::Direction;
    use crate::entity::EntitySorter;
    use ashwood_core::{ForeignKey, Schema, Table};

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: &'static str,
        parent: MasterRef<&'static str>,
    }

    impl Row {
        fn root(id: &'static str) -> Self {
            Row {
                id,
                parent: MasterRef::None,
            }
        }

        fn child(id: &'static str, parent: &'static str) -> Self {
            Row {
                id,
                parent: MasterRef::Key(parent),
            }
        }

        fn faulted(id: &'static str) -> Self {
            Row {
                id,
                parent: MasterRef::Fault,
            }
        }
    }

    impl SortableObject for Row {
        type Key = &'static str;

        fn object_key(&self) -> &'static str {
            self.id
        }

        fn master(&self, _relationship: &Relationship) -> MasterRef<&'static str> {
            self.parent.clone()
        }
    }

    fn tree_sorter() -> EntitySorter {
        let node = Table::new("NODE")
            .with_primary_key("ID")
            .with_foreign_key(ForeignKey::new("PARENT_ID", "NODE", "ID").nullable());
        let plain = Table::new("PLAIN").with_primary_key("ID");
        EntitySorter::new(&Schema::from_tables([node, plain]).unwrap()).unwrap()
    }

    fn ids(rows: &[Row]) -> Vec<&'static str> {
        rows.iter().map(|row| row.id).collect()
    }

    fn chain() -> [Row; 3] {
        [Row::root("r1"), Row::child("r2", "r1"), Row::child("r3", "r2")]
    }

    #[test]
    fn chain_sorts_in_every_input_order() {
        let sorter = tree_sorter();
        let [r1, r2, r3] = chain();
        let permutations = [
            [&r1, &r2, &r3],
            [&r1, &r3, &r2],
            [&r2, &r1, &r3],
            [&r2, &r3, &r1],
            [&r3, &r1, &r2],
            [&r3, &r2, &r1],
        ];
        for permutation in permutations {
            let mut rows: Vec<Row> = permutation.iter().map(|row| (*row).clone()).collect();
            sorter
                .sort_objects_for_entity("NODE", &mut rows, Direction::Delete, &mut NoFaults)
                .unwrap();
            assert_eq!(ids(&rows), vec!["r3", "r2", "r1"]);

            sorter
                .sort_objects_for_entity("NODE", &mut rows, Direction::Insert, &mut NoFaults)
                .unwrap();
            assert_eq!(ids(&rows), vec!["r1", "r2", "r3"]);
        }
    }

    #[test]
    fn unrelated_objects_keep_input_order() {
        let sorter = tree_sorter();
        let mut rows = vec![
            Row::root("b"),
            Row::child("leaf", "a"),
            Row::root("c"),
            Row::root("a"),
        ];
        sorter
            .sort_objects_for_entity("NODE", &mut rows, Direction::Insert, &mut NoFaults)
            .unwrap();
        assert_eq!(ids(&rows), vec!["b", "c", "a", "leaf"]);
    }

    #[test]
    fn master_outside_batch_is_ignored() {
        let sorter = tree_sorter();
        let mut rows = vec![Row::child("x", "stored"), Row::root("y")];
        sorter
            .sort_objects_for_entity("NODE", &mut rows, Direction::Insert, &mut NoFaults)
            .unwrap();
        assert_eq!(ids(&rows), vec!["x", "y"]);
    }

    #[test]
    fn non_reflexive_table_is_untouched() {
        let sorter = tree_sorter();
        let mut rows = vec![Row::child("r2", "r1"), Row::root("r1")];
        sorter
            .sort_objects_for_entity("PLAIN", &mut rows, Direction::Insert, &mut NoFaults)
            .unwrap();
        assert_eq!(ids(&rows), vec!["r2", "r1"]);
    }

    #[test]
    fn faults_go_through_resolver() {
        let sorter = tree_sorter();
        let parents: HashMap<&str, &str> = [("r3", "r2"), ("r2", "r1")].into_iter().collect();
        let mut asked = Vec::new();
        let mut resolver = |row: &Row, _: &Relationship| -> Result<Option<&'static str>, SortError> {
            asked.push(row.id);
            Ok(parents.get(row.id).copied())
        };

        let mut rows = vec![Row::faulted("r3"), Row::faulted("r1"), Row::faulted("r2")];
        sorter
            .sort_objects_for_entity("NODE", &mut rows, Direction::Delete, &mut resolver)
            .unwrap();
        assert_eq!(ids(&rows), vec!["r3", "r2", "r1"]);
        assert_eq!(asked, vec!["r3", "r1", "r2"]);
    }

    #[test]
    fn fault_without_resolver_fails() {
        let sorter = tree_sorter();
        let mut rows = vec![Row::faulted("r2"), Row::root("r1")];
        let err = sorter
            .sort_objects_for_entity("NODE", &mut rows, Direction::Insert, &mut NoFaults)
            .unwrap_err();
        assert!(matches!(err, SortError::FaultResolution { ref table, .. } if table == "NODE"));
        assert_eq!(ids(&rows), vec!["r2", "r1"]);
    }

    #[test]
    fn object_cycle_is_reported() {
        let sorter = tree_sorter();
        let mut rows = vec![Row::child("a", "b"), Row::child("b", "a")];
        let err = sorter
            .sort_objects_for_entity("NODE", &mut rows, Direction::Insert, &mut NoFaults)
            .unwrap_err();
        assert_eq!(
            err,
            SortError::ObjectCycle {
                table: "NODE".into(),
                count: 2
            }
        );
    }
}
