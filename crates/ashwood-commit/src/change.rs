//! Pending changes handed to a flush.
//!
//! A [`ChangeSet`] buckets [`ObjectChange`]s by operation and table. It is
//! filled by the caller (or loaded from JSON) and consumed by exactly one
//! [`Flush`](crate::flush::Flush).

use ashwood_core::Relationship;
use ashwood_sort::{FaultResolver, MasterRef, SortError, SortableObject};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::{ObjectId, Value};

/// Where a to-one relationship of an object points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipTarget {
    /// Explicitly no target; foreign key columns are written as NULL.
    None,
    /// Another object, stored or pending insert.
    Object(ObjectId),
    /// A target exists but has not been loaded; derive it from the
    /// snapshot when needed.
    Fault,
}

/// One object's change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectChange {
    pub id: ObjectId,
    /// Column values to write.
    #[serde(default)]
    pub values: IndexMap<String, Value>,
    /// Column values as last committed.
    #[serde(default)]
    pub snapshot: IndexMap<String, Value>,
    /// Relationship name to target.
    #[serde(default)]
    pub relationships: IndexMap<String, RelationshipTarget>,
    /// Snapshot columns an update or delete must still match.
    #[serde(default)]
    pub lock: Vec<String>,
}

impl ObjectChange {
    pub fn new(id: ObjectId) -> Self {
        ObjectChange {
            id,
            values: IndexMap::new(),
            snapshot: IndexMap::new(),
            relationships: IndexMap::new(),
            lock: Vec::new(),
        }
    }

    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    pub fn snapshot_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.snapshot.insert(column.into(), value.into());
        self
    }

    pub fn relate(mut self, relationship: impl Into<String>, target: ObjectId) -> Self {
        self.relationships
            .insert(relationship.into(), RelationshipTarget::Object(target));
        self
    }

    pub fn unrelate(mut self, relationship: impl Into<String>) -> Self {
        self.relationships
            .insert(relationship.into(), RelationshipTarget::None);
        self
    }

    pub fn fault(mut self, relationship: impl Into<String>) -> Self {
        self.relationships
            .insert(relationship.into(), RelationshipTarget::Fault);
        self
    }

    /// Adds a snapshot column to the optimistic lock qualifier.
    pub fn lock_on(mut self, column: impl Into<String>) -> Self {
        self.lock.push(column.into());
        self
    }

    pub fn uses_optimistic_lock(&self) -> bool {
        !self.lock.is_empty()
    }
}

impl SortableObject for ObjectChange {
    type Key = ObjectId;

    fn object_key(&self) -> ObjectId {
        self.id.clone()
    }

    fn master(&self, relationship: &Relationship) -> MasterRef<ObjectId> {
        match self.relationships.get(&relationship.name) {
            Some(RelationshipTarget::Object(id)) => MasterRef::Key(id.clone()),
            Some(RelationshipTarget::Fault) => MasterRef::Fault,
            Some(RelationshipTarget::None) => MasterRef::None,
            // Not loaded either way: the snapshot may still know the master.
            None if snapshot_has_joins(self, relationship) => MasterRef::Fault,
            None => MasterRef::None,
        }
    }
}

/// A deleted object, ordered by the master it had when last committed.
///
/// The snapshot's join columns win over the in-memory relationship, which
/// may already be cleared or re-pointed; the relationship is only read when
/// the snapshot lacks them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Deleted(pub(crate) ObjectChange);

impl SortableObject for Deleted {
    type Key = ObjectId;

    fn object_key(&self) -> ObjectId {
        self.0.id.clone()
    }

    fn master(&self, relationship: &Relationship) -> MasterRef<ObjectId> {
        if snapshot_has_joins(&self.0, relationship) {
            MasterRef::Fault
        } else {
            self.0.master(relationship)
        }
    }
}

fn snapshot_has_joins(change: &ObjectChange, relationship: &Relationship) -> bool {
    !relationship.joins.is_empty()
        && relationship
            .joins
            .iter()
            .all(|join| change.snapshot.contains_key(&join.source_column))
}

/// Resolves faulted masters from the committed snapshot: the foreign key
/// columns of the snapshot become the master's permanent id.
///
/// Deleted objects must be ordered by the master they had in the database,
/// not by one they may have been re-pointed to in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotFaultResolver;

impl FaultResolver<ObjectChange> for SnapshotFaultResolver {
    fn resolve(
        &mut self,
        object: &ObjectChange,
        relationship: &Relationship,
    ) -> Result<Option<ObjectId>, SortError> {
        let mut key = Vec::with_capacity(relationship.joins.len());
        for join in &relationship.joins {
            match object.snapshot.get(&join.source_column) {
                None | Some(Value::Null) => return Ok(None),
                Some(value) => key.push((join.target_column.clone(), value.clone())),
            }
        }
        if key.is_empty() {
            return Err(SortError::FaultResolution {
                table: relationship.source_table.clone(),
                relationship: relationship.name.clone(),
                reason: "relationship has no join columns".to_string(),
            });
        }
        Ok(Some(ObjectId::permanent(
            relationship.target_table.clone(),
            key,
        )))
    }
}

impl FaultResolver<Deleted> for SnapshotFaultResolver {
    fn resolve(
        &mut self,
        object: &Deleted,
        relationship: &Relationship,
    ) -> Result<Option<ObjectId>, SortError> {
        FaultResolver::<ObjectChange>::resolve(self, &object.0, relationship)
    }
}

/// Changes bucketed by operation, then by table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    inserts: IndexMap<String, Vec<ObjectChange>>,
    #[serde(default)]
    updates: IndexMap<String, Vec<ObjectChange>>,
    #[serde(default)]
    deletes: IndexMap<String, Vec<ObjectChange>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a change set from JSON.
    ///
    /// Objects listed under a table bucket inherit nothing from the bucket
    /// name; each object's `id.table` is authoritative and the set is
    /// re-bucketed by it.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let parsed: ChangeSet = serde_json::from_str(json)?;
        let mut changes = ChangeSet::new();
        for change in parsed.inserts.into_values().flatten() {
            changes.insert(change);
        }
        for change in parsed.updates.into_values().flatten() {
            changes.update(change);
        }
        for change in parsed.deletes.into_values().flatten() {
            changes.delete(change);
        }
        Ok(changes)
    }

    pub fn insert(&mut self, change: ObjectChange) -> &mut Self {
        bucket(&mut self.inserts, change);
        self
    }

    pub fn update(&mut self, change: ObjectChange) -> &mut Self {
        bucket(&mut self.updates, change);
        self
    }

    pub fn delete(&mut self, change: ObjectChange) -> &mut Self {
        bucket(&mut self.deletes, change);
        self
    }

    pub fn inserts(&self) -> &IndexMap<String, Vec<ObjectChange>> {
        &self.inserts
    }

    pub fn updates(&self) -> &IndexMap<String, Vec<ObjectChange>> {
        &self.updates
    }

    pub fn deletes(&self) -> &IndexMap<String, Vec<ObjectChange>> {
        &self.deletes
    }

    /// Total number of object changes.
    pub fn len(&self) -> usize {
        [&self.inserts, &self.updates, &self.deletes]
            .iter()
            .flat_map(|buckets| buckets.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn into_buckets(
        self,
    ) -> (
        IndexMap<String, Vec<ObjectChange>>,
        IndexMap<String, Vec<ObjectChange>>,
        IndexMap<String, Vec<ObjectChange>>,
    ) {
        (self.inserts, self.updates, self.deletes)
    }
}

fn bucket(buckets: &mut IndexMap<String, Vec<ObjectChange>>, change: ObjectChange) {
    buckets
        .entry(change.id.table.clone())
        .or_default()
        .push(change);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ashwood_core::Join;

    fn parent_relationship() -> Relationship {
        Relationship {
            name: "parent".into(),
            source_table: "NODE".into(),
            target_table: "NODE".into(),
            joins: vec![Join {
                source_column: "PARENT_ID".into(),
                target_column: "ID".into(),
            }],
            mandatory: false,
        }
    }

    #[test]
    fn buckets_by_table_in_first_seen_order() {
        let mut changes = ChangeSet::new();
        changes
            .insert(ObjectChange::new(ObjectId::temporary("B", "b1")))
            .insert(ObjectChange::new(ObjectId::temporary("A", "a1")))
            .insert(ObjectChange::new(ObjectId::temporary("B", "b2")))
            .delete(ObjectChange::new(ObjectId::permanent("A", [("ID", 1)])));

        let tables: Vec<&String> = changes.inserts().keys().collect();
        assert_eq!(tables, vec!["B", "A"]);
        assert_eq!(changes.inserts()["B"].len(), 2);
        assert_eq!(changes.len(), 4);
        assert!(changes.updates().is_empty());
    }

    #[test]
    fn master_reads_explicit_relationship_first() {
        let rel = parent_relationship();
        let parent = ObjectId::temporary("NODE", "root");
        let child = ObjectChange::new(ObjectId::temporary("NODE", "leaf")).relate("parent", parent.clone());
        assert_eq!(child.master(&rel), MasterRef::Key(parent));

        let orphan = ObjectChange::new(ObjectId::temporary("NODE", "x")).unrelate("parent");
        assert_eq!(orphan.master(&rel), MasterRef::None);

        let stored = ObjectChange::new(ObjectId::permanent("NODE", [("ID", 2)]))
            .snapshot_value("PARENT_ID", 1);
        assert_eq!(stored.master(&rel), MasterRef::Fault);
    }

    #[test]
    fn snapshot_resolver_builds_permanent_master() {
        let rel = parent_relationship();
        let stored = ObjectChange::new(ObjectId::permanent("NODE", [("ID", 2)]))
            .snapshot_value("PARENT_ID", 1);
        let master = SnapshotFaultResolver.resolve(&stored, &rel).unwrap();
        assert_eq!(master, Some(ObjectId::permanent("NODE", [("ID", 1)])));

        let root = ObjectChange::new(ObjectId::permanent("NODE", [("ID", 1)]))
            .snapshot_value("PARENT_ID", Value::Null);
        assert_eq!(SnapshotFaultResolver.resolve(&root, &rel).unwrap(), None);
    }

    #[test]
    fn deleted_object_reads_snapshot_before_memory() {
        let rel = parent_relationship();
        let stored = ObjectChange::new(ObjectId::permanent("NODE", [("ID", 2)]))
            .snapshot_value("PARENT_ID", 1)
            .unrelate("parent");
        assert_eq!(stored.master(&rel), MasterRef::None);

        let deleted = Deleted(stored);
        assert_eq!(deleted.master(&rel), MasterRef::Fault);
        assert_eq!(
            SnapshotFaultResolver.resolve(&deleted, &rel).unwrap(),
            Some(ObjectId::permanent("NODE", [("ID", 1)]))
        );

        // Nothing committed to go by: fall back to the relationship.
        let fresh = ObjectChange::new(ObjectId::permanent("NODE", [("ID", 3)]))
            .relate("parent", ObjectId::permanent("NODE", [("ID", 2)]));
        assert_eq!(
            Deleted(fresh).master(&rel),
            MasterRef::Key(ObjectId::permanent("NODE", [("ID", 2)]))
        );
    }

    #[test]
    fn parses_and_rebuckets_json() {
        let json = r#"{
            "inserts": {
                "whatever": [
                    {"id": {"table": "ARTIST", "key": {"temporary": "a1"}},
                     "values": {"NAME": "Monet"}}
                ]
            },
            "deletes": {
                "PAINTING": [
                    {"id": {"table": "PAINTING", "key": {"permanent": {"ID": 9}}},
                     "snapshot": {"VERSION": 3},
                     "lock": ["VERSION"]}
                ]
            }
        }"#;
        let changes = ChangeSet::from_json(json).unwrap();
        assert_eq!(changes.inserts()["ARTIST"][0].values["NAME"], Value::from("Monet"));
        let delete = &changes.deletes()["PAINTING"][0];
        assert!(delete.uses_optimistic_lock());
        assert_eq!(changes.len(), 2);
    }
}
