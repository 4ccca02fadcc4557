//! Table-level ordering derived from schema foreign keys.
//!
//! [`EntitySorter`] indexes a [`Schema`] once and then answers ordering
//! questions for any subset of its tables, plus instance-level ordering for
//! tables with reflexive relationships.

use std::collections::{HashMap, HashSet};

use ashwood_core::algo::{reachable_from, strongly_connected_components};
use ashwood_core::{Digraph, ForeignKey, Relationship, Schema};

use crate::dependency::{DependencyGraph, Direction, Strength};
use crate::error::SortError;
use crate::object::{FaultResolver, MasterRef, SortableObject};

/// Precomputed table ordering for one schema.
///
/// Built with [`EntitySorter::new`]; not thread-safe, one sorter per flush
/// cycle owner.
#[derive(Debug, Clone)]
pub struct EntitySorter {
    insert_order: Vec<String>,
    rank: HashMap<String, usize>,
    /// Transitive insert-time dependencies of each table.
    dependencies: HashMap<String, HashSet<String>>,
    reflexive: HashMap<String, Vec<Relationship>>,
    broken: Vec<(String, String)>,
}

impl EntitySorter {
    /// Indexes the schema.
    ///
    /// Fails with [`SortError::Cycle`] if distinct tables reference each
    /// other through NOT NULL foreign keys only.
    pub fn new(schema: &Schema) -> Result<Self, SortError> {
        let referential = schema.referential_digraph();

        for component in strongly_connected_components(&referential) {
            if component.len() > 1 {
                tracing::debug!(tables = ?component, "tables reference each other");
            }
        }

        let mut deps = DependencyGraph::new();
        for table in referential.vertices() {
            deps.add(table.clone());
        }
        for arc in referential.arcs() {
            deps.depend(arc.origin.clone(), arc.destination.clone(), arc_strength(arc.value));
        }

        let resolved = deps
            .resolve()
            .map_err(|cycle| SortError::Cycle {
                tables: cycle.members,
            })?;

        let rank = resolved
            .order
            .iter()
            .enumerate()
            .map(|(i, table)| (table.clone(), i))
            .collect();

        let dependencies = resolved
            .order
            .iter()
            .map(|table| {
                let reached = reachable_from(&resolved.graph, table);
                (table.clone(), reached.into_iter().collect())
            })
            .collect();

        let reflexive = schema
            .tables()
            .filter_map(|table| {
                let relationships = table.reflexive_relationships();
                (!relationships.is_empty()).then(|| (table.full_name(), relationships))
            })
            .collect();

        tracing::debug!(order = ?resolved.order, "indexed table order");

        Ok(EntitySorter {
            insert_order: resolved.order,
            rank,
            dependencies,
            reflexive,
            broken: resolved.dropped,
        })
    }

    /// Every table, dependencies first.
    pub fn insert_order(&self) -> &[String] {
        &self.insert_order
    }

    /// Every table, dependents first.
    pub fn delete_order(&self) -> Vec<String> {
        self.insert_order.iter().rev().cloned().collect()
    }

    /// Position of the table in the full insert order.
    pub fn rank(&self, table: &str) -> Option<usize> {
        self.rank.get(table).copied()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.rank.contains_key(table)
    }

    /// Nullable foreign keys ignored to break cycles, as
    /// (referencing, referenced) table pairs.
    pub fn broken_cycles(&self) -> &[(String, String)] {
        &self.broken
    }

    /// True if `dependent` must be inserted after `dependency`.
    pub fn depends_on(&self, dependent: &str, dependency: &str) -> bool {
        self.dependencies
            .get(dependent)
            .is_some_and(|deps| deps.contains(dependency))
    }

    pub fn is_reflexive(&self, table: &str) -> bool {
        self.reflexive.contains_key(table)
    }

    pub fn reflexive_relationships(&self, table: &str) -> &[Relationship] {
        self.reflexive.get(table).map_or(&[], Vec::as_slice)
    }

    /// Orders table names in place.
    pub fn sort_tables(&self, tables: &mut Vec<String>, direction: Direction) -> Result<(), SortError> {
        self.sort_by_table(tables, |table| table.as_str(), direction)
    }

    /// Orders items by the table each belongs to.
    ///
    /// Items of one table stay together in their input order. Tables with no
    /// dependency between them keep the order in which they first appear.
    pub fn sort_by_table<T, F>(
        &self,
        items: &mut Vec<T>,
        table_of: F,
        direction: Direction,
    ) -> Result<(), SortError>
    where
        F: Fn(&T) -> &str,
    {
        if let Some(unknown) = items.iter().map(&table_of).find(|table| !self.contains(table)) {
            return Err(SortError::UnknownTable {
                name: unknown.to_string(),
            });
        }

        let mut groups: Vec<(String, Vec<T>)> = Vec::new();
        let mut group_of: HashMap<String, usize> = HashMap::new();
        for item in items.drain(..) {
            let table = table_of(&item);
            let idx = match group_of.get(table) {
                Some(&idx) => idx,
                None => {
                    let idx = groups.len();
                    group_of.insert(table.to_string(), idx);
                    groups.push((table.to_string(), Vec::new()));
                    idx
                }
            };
            groups[idx].1.push(item);
        }

        let mut deps = DependencyGraph::new();
        for (table, _) in &groups {
            deps.add(table.clone());
        }
        for (table, _) in &groups {
            for (other, _) in &groups {
                if other != table && self.depends_on(table, other) {
                    deps.depend(table.clone(), other.clone(), Strength::Mandatory);
                }
            }
        }

        let order = deps.order(direction).map_err(|cycle| SortError::Cycle {
            tables: cycle.members,
        })?;

        let mut slots: Vec<Option<Vec<T>>> = groups.into_iter().map(|(_, group)| Some(group)).collect();
        for table in order {
            if let Some(group) = group_of.get(&table).and_then(|&idx| slots[idx].take()) {
                items.extend(group);
            }
        }
        Ok(())
    }

    /// Orders same-table objects by their reflexive master links.
    ///
    /// `Direction::Insert` puts masters before the objects pointing at them
    /// (root first); `Direction::Delete` is the reverse (leaves first).
    /// Objects with no link between them keep their input order. Faulted
    /// masters are resolved through `resolver`. Tables without reflexive
    /// relationships are left untouched.
    pub fn sort_objects_for_entity<O, R>(
        &self,
        table: &str,
        objects: &mut Vec<O>,
        direction: Direction,
        resolver: &mut R,
    ) -> Result<(), SortError>
    where
        O: SortableObject,
        R: FaultResolver<O> + ?Sized,
    {
        if !self.contains(table) {
            return Err(SortError::UnknownTable {
                name: table.to_string(),
            });
        }
        let relationships = self.reflexive_relationships(table);
        if relationships.is_empty() || objects.len() < 2 {
            return Ok(());
        }

        let keys: Vec<O::Key> = objects.iter().map(<O as SortableObject>::object_key).collect();
        let mut deps = DependencyGraph::new();
        for key in &keys {
            deps.add(key.clone());
        }

        for (object, key) in objects.iter().zip(&keys) {
            for relationship in relationships {
                let master = match object.master(relationship) {
                    MasterRef::None => continue,
                    MasterRef::Key(master) => master,
                    MasterRef::Fault => match resolver.resolve(object, relationship)? {
                        Some(master) => master,
                        None => continue,
                    },
                };
                // Masters outside this batch are already in the database.
                if deps.contains(&master) {
                    deps.depend(key.clone(), master, Strength::Mandatory);
                }
            }
        }

        let order = deps
            .order(direction)
            .map_err(|cycle| SortError::ObjectCycle {
                table: table.to_string(),
                count: cycle.members.len(),
            })?;

        let mut slots: HashMap<O::Key, Vec<O>> = HashMap::with_capacity(keys.len());
        for (object, key) in objects.drain(..).zip(keys) {
            slots.entry(key).or_default().push(object);
        }
        for key in order {
            if let Some(group) = slots.remove(&key) {
                objects.extend(group);
            }
        }
        Ok(())
    }
}

/// An arc is mandatory if any relationship it carries has only NOT NULL
/// columns.
fn arc_strength(keys: &[ForeignKey]) -> Strength {
    let mut nullable_by_constraint: HashMap<Option<&str>, bool> = HashMap::new();
    for key in keys {
        let nullable = nullable_by_constraint
            .entry(key.fk_name.as_deref())
            .or_insert(false);
        *nullable |= key.is_nullable();
    }
    if nullable_by_constraint.values().any(|nullable| !nullable) {
        Strength::Mandatory
    } else {
        Strength::Optional
    }
}
