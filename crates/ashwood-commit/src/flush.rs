//! The commit orchestrator.
//!
//! A [`Flush`] takes a [`ChangeSet`] through one transaction:
//!
//! 1. **Sorting**: insert tables dependencies first, update tables in the
//!    same order, delete tables dependents first; objects of reflexive
//!    tables are ordered root-first for insert and leaf-first for delete.
//! 2. **Executing**: inserts (with primary keys generated and foreign keys
//!    copied from related objects), updates, deferred foreign key updates,
//!    deletes.
//! 3. **Commit** on success, **rollback** on any failure.
//!
//! A nullable reference to an object whose insert has not run yet is
//! written as NULL and fixed by an UPDATE once every insert has run. A
//! NOT NULL reference in the same situation is a mapping error.

use std::collections::{HashMap, HashSet};
use std::mem;

use ashwood_core::{Relationship, Schema, Table};
use ashwood_sort::{Direction, EntitySorter};
use indexmap::IndexMap;
use serde::Serialize;

use crate::batch::{BatchQuery, BatchResult, BatchRow};
use crate::change::{ChangeSet, Deleted, ObjectChange, RelationshipTarget, SnapshotFaultResolver};
use crate::config::{FlushConfig, PkStrategy};
use crate::error::{CommitError, ExecError, LockConflict, PkError};
use crate::executor::SqlExecutor;
use crate::pk::PkGenerator;
use crate::value::{KeyMap, ObjectId, ObjectKey, Value};

/// Lifecycle of a [`Flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Pending,
    Sorting,
    Executing,
    Committed,
    /// Rolled back.
    Failed,
}

/// Objects of one table, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableChanges {
    pub table: String,
    pub objects: Vec<ObjectChange>,
}

/// Sorted work for one flush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushPlan {
    pub inserts: Vec<TableChanges>,
    pub updates: Vec<TableChanges>,
    pub deletes: Vec<TableChanges>,
}

impl FlushPlan {
    /// Table names per phase, for display.
    pub fn table_order(&self) -> [Vec<&str>; 3] {
        fn names(phase: &[TableChanges]) -> Vec<&str> {
            phase.iter().map(|changes| changes.table.as_str()).collect()
        }
        [names(&self.inserts), names(&self.updates), names(&self.deletes)]
    }
}

/// Primary key assigned to a newly inserted object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignedKey {
    pub id: ObjectId,
    pub key: KeyMap,
}

/// Outcome of a committed flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Foreign keys written after the fact to break insert cycles.
    pub deferred_updates: usize,
    /// Keys of objects inserted under a temporary id, in insert order.
    pub assigned_keys: Vec<AssignedKey>,
}

impl CommitReport {
    /// The permanent id that replaced a temporary one.
    pub fn permanent_id(&self, temporary: &ObjectId) -> Option<ObjectId> {
        self.assigned_keys
            .iter()
            .find(|assigned| &assigned.id == temporary)
            .map(|assigned| ObjectId {
                table: assigned.id.table.clone(),
                key: ObjectKey::Permanent(assigned.key.clone()),
            })
    }
}

/// One commit of one change set. Runs once.
pub struct Flush<'a> {
    schema: &'a Schema,
    sorter: &'a EntitySorter,
    config: &'a FlushConfig,
    state: FlushState,
}

impl<'a> Flush<'a> {
    pub fn new(schema: &'a Schema, sorter: &'a EntitySorter, config: &'a FlushConfig) -> Self {
        Flush {
            schema,
            sorter,
            config,
            state: FlushState::Pending,
        }
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    /// Orders the change set without executing anything.
    pub fn plan(&self, changes: ChangeSet) -> Result<FlushPlan, CommitError> {
        let (inserts, updates, deletes) = changes.into_buckets();
        Ok(FlushPlan {
            inserts: self.order(inserts, Direction::Insert, true)?,
            updates: self.order(updates, Direction::Insert, false)?,
            deletes: self.order(deletes, Direction::Delete, true)?,
        })
    }

    fn order(
        &self,
        buckets: IndexMap<String, Vec<ObjectChange>>,
        direction: Direction,
        reflexive: bool,
    ) -> Result<Vec<TableChanges>, CommitError> {
        let mut tables: Vec<TableChanges> = buckets
            .into_iter()
            .map(|(table, objects)| TableChanges { table, objects })
            .collect();
        self.sorter
            .sort_by_table(&mut tables, |changes| changes.table.as_str(), direction)?;
        if reflexive {
            for changes in &mut tables {
                if direction == Direction::Delete {
                    self.order_deleted(changes)?;
                } else {
                    self.sorter.sort_objects_for_entity(
                        &changes.table,
                        &mut changes.objects,
                        direction,
                        &mut SnapshotFaultResolver,
                    )?;
                }
            }
        }
        Ok(tables)
    }

    /// Deleted rows go leaf-first by the links stored in the database.
    fn order_deleted(&self, changes: &mut TableChanges) -> Result<(), CommitError> {
        let mut deleted: Vec<Deleted> = mem::take(&mut changes.objects)
            .into_iter()
            .map(Deleted)
            .collect();
        self.sorter.sort_objects_for_entity(
            &changes.table,
            &mut deleted,
            Direction::Delete,
            &mut SnapshotFaultResolver,
        )?;
        changes.objects = deleted.into_iter().map(|deleted| deleted.0).collect();
        Ok(())
    }

    /// Sorts and executes the change set in one transaction.
    ///
    /// On error the transaction is rolled back and the flush ends in
    /// [`FlushState::Failed`]; nothing from this change set is committed.
    pub fn run<E, G>(
        &mut self,
        changes: ChangeSet,
        executor: &mut E,
        generator: &mut G,
    ) -> Result<CommitReport, CommitError>
    where
        E: SqlExecutor + ?Sized,
        G: PkGenerator + ?Sized,
    {
        if self.state != FlushState::Pending {
            return Err(CommitError::AlreadyRun { state: self.state });
        }

        self.state = FlushState::Sorting;
        let plan = match self.plan(changes) {
            Ok(plan) => plan,
            Err(err) => {
                self.state = FlushState::Failed;
                tracing::info!(error = %err, "flush failed while sorting");
                return Err(err);
            }
        };
        tracing::debug!(order = ?plan.table_order(), "flush plan");

        self.state = FlushState::Executing;
        if let Err(err) = executor.begin() {
            self.state = FlushState::Failed;
            return Err(err.into());
        }

        let outcome = Execution::new(self.schema, self.config, &mut *executor, &mut *generator)
            .apply(plan)
            .and_then(|report| {
                executor.commit()?;
                Ok(report)
            });

        match outcome {
            Ok(report) => {
                self.state = FlushState::Committed;
                tracing::info!(
                    inserted = report.inserted,
                    updated = report.updated,
                    deleted = report.deleted,
                    deferred = report.deferred_updates,
                    "flush committed"
                );
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback) = executor.rollback() {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                generator.rolled_back();
                self.state = FlushState::Failed;
                tracing::info!(error = %err, "flush rolled back");
                Err(err)
            }
        }
    }
}

/// A batch being filled, plus the object behind each row.
struct OpenBatch {
    query: BatchQuery,
    ids: Vec<ObjectId>,
}

impl OpenBatch {
    fn new(query: BatchQuery) -> Self {
        OpenBatch {
            query,
            ids: Vec::new(),
        }
    }

    fn push(&mut self, id: ObjectId, row: BatchRow) {
        self.query.push(row);
        self.ids.push(id);
    }
}

/// A nullable foreign key left NULL on insert, to be written later.
struct DeferredLink {
    source: ObjectId,
    table: String,
    relationship: Relationship,
    target: ObjectId,
}

/// State of the executing phase.
struct Execution<'x, E: ?Sized, G: ?Sized> {
    schema: &'x Schema,
    config: &'x FlushConfig,
    executor: &'x mut E,
    generator: &'x mut G,
    /// Primary keys of objects inserted by this flush.
    keys: HashMap<ObjectId, KeyMap>,
    /// Inserted objects whose statement has not run yet.
    pending: HashSet<ObjectId>,
    deferred: Vec<DeferredLink>,
    report: CommitReport,
}

impl<'x, E, G> Execution<'x, E, G>
where
    E: SqlExecutor + ?Sized,
    G: PkGenerator + ?Sized,
{
    fn new(
        schema: &'x Schema,
        config: &'x FlushConfig,
        executor: &'x mut E,
        generator: &'x mut G,
    ) -> Self {
        Execution {
            schema,
            config,
            executor,
            generator,
            keys: HashMap::new(),
            pending: HashSet::new(),
            deferred: Vec::new(),
            report: CommitReport::default(),
        }
    }

    fn apply(mut self, plan: FlushPlan) -> Result<CommitReport, CommitError> {
        self.pending = plan
            .inserts
            .iter()
            .flat_map(|changes| changes.objects.iter().map(|object| object.id.clone()))
            .collect();

        for changes in &plan.inserts {
            self.insert_table(changes)?;
        }
        for changes in &plan.updates {
            self.update_table(changes)?;
        }
        self.apply_deferred()?;
        for changes in &plan.deletes {
            self.delete_table(changes)?;
        }

        for object in plan.inserts.iter().flat_map(|changes| &changes.objects) {
            if !object.id.is_temporary() {
                continue;
            }
            if let Some(key) = self.keys.get(&object.id) {
                self.report.assigned_keys.push(AssignedKey {
                    id: object.id.clone(),
                    key: key.clone(),
                });
            }
        }
        Ok(self.report)
    }

    // -----------------------------------------------------------------------
    // Inserts
    // -----------------------------------------------------------------------

    fn insert_table(&mut self, changes: &TableChanges) -> Result<(), CommitError> {
        let schema = self.schema;
        let table = schema.require_table(&changes.table)?;
        let strategy = self.config.strategy_for(&changes.table);
        let relationships = table.relationships();
        let pk_columns = owned_pk_columns(table);

        let mut open: Option<OpenBatch> = None;
        for object in &changes.objects {
            // A row may only copy keys the database has already produced.
            if let Some(batch) = open.take_if(|batch| self.waits_on(object, batch)) {
                self.run_insert(batch, strategy, &pk_columns)?;
            }

            let mut values = object.values.clone();
            self.link(object, &changes.table, &relationships, &mut values, true)?;
            self.assign_pk(table, strategy, &pk_columns, object, &mut values)?;

            let columns: Vec<String> = values.keys().cloned().collect();
            if let Some(batch) = open.take_if(|batch| !batch.query.accepts(&columns, &[], false)) {
                self.run_insert(batch, strategy, &pk_columns)?;
            }
            open.get_or_insert_with(|| OpenBatch::new(BatchQuery::insert(changes.table.clone(), columns)))
                .push(
                    object.id.clone(),
                    BatchRow {
                        values: values.into_values().collect(),
                        qualifier: Vec::new(),
                    },
                );
        }
        if let Some(batch) = open {
            self.run_insert(batch, strategy, &pk_columns)?;
        }
        Ok(())
    }

    /// True if the object references a row of `batch` whose key is only
    /// known after the batch runs.
    fn waits_on(&self, object: &ObjectChange, batch: &OpenBatch) -> bool {
        object.relationships.values().any(|target| match target {
            RelationshipTarget::Object(id) => !self.keys.contains_key(id) && batch.ids.contains(id),
            _ => false,
        })
    }

    fn assign_pk(
        &mut self,
        table: &Table,
        strategy: PkStrategy,
        pk_columns: &[String],
        object: &ObjectChange,
        values: &mut IndexMap<String, Value>,
    ) -> Result<(), CommitError> {
        if let Some(key) = object.id.key_map() {
            for (column, value) in key {
                values.entry(column.clone()).or_insert_with(|| value.clone());
            }
        }

        let missing: Vec<&String> = pk_columns
            .iter()
            .filter(|column| values.get(*column).map_or(true, Value::is_null))
            .collect();

        if let Some(first) = missing.first() {
            match strategy {
                PkStrategy::AutoIncrement => {
                    for column in &missing {
                        values.shift_remove(*column);
                    }
                    // The key is read back after the insert runs.
                    return Ok(());
                }
                PkStrategy::Provided => {
                    return Err(PkError::Missing {
                        table: table.full_name(),
                        column: (*first).clone(),
                    }
                    .into());
                }
                PkStrategy::Generator => {
                    let value = self.generator.generate_pk(table)?;
                    values.insert((*first).clone(), value);
                }
            }
        }

        if !pk_columns.is_empty() {
            let key = pk_columns
                .iter()
                .map(|column| (column.clone(), values.get(column).cloned().unwrap_or(Value::Null)))
                .collect();
            self.keys.insert(object.id.clone(), key);
        }
        Ok(())
    }

    fn run_insert(
        &mut self,
        batch: OpenBatch,
        strategy: PkStrategy,
        pk_columns: &[String],
    ) -> Result<(), CommitError> {
        let result = self.execute(&batch)?;
        for (i, id) in batch.ids.iter().enumerate() {
            self.pending.remove(id);
            if self.keys.contains_key(id) {
                continue;
            }
            if let (PkStrategy::AutoIncrement, [column], Some(Some(generated))) =
                (strategy, pk_columns, result.generated_keys.get(i))
            {
                let key = KeyMap::from([(column.clone(), Value::Integer(*generated))]);
                self.keys.insert(id.clone(), key);
            }
        }
        self.report.inserted += batch.ids.len();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    fn update_table(&mut self, changes: &TableChanges) -> Result<(), CommitError> {
        let schema = self.schema;
        let table = schema.require_table(&changes.table)?;
        let relationships = table.relationships();
        let pk_columns = owned_pk_columns(table);

        let mut open = None;
        for object in &changes.objects {
            let mut values = object.values.clone();
            self.link(object, &changes.table, &relationships, &mut values, false)?;
            if values.is_empty() {
                tracing::debug!(object = %object.id, "nothing to update");
                continue;
            }
            let (qualifier_columns, qualifier) = self.qualifier(object, &pk_columns)?;
            let shape = BatchQuery::update(
                changes.table.clone(),
                values.keys().cloned().collect(),
                qualifier_columns,
                object.uses_optimistic_lock(),
            );
            let row = BatchRow {
                values: values.into_values().collect(),
                qualifier,
            };
            self.report.updated += self.stage(&mut open, shape, object.id.clone(), row)?;
        }
        if let Some(batch) = open {
            self.report.updated += self.run_checked(batch)?;
        }
        Ok(())
    }

    fn apply_deferred(&mut self) -> Result<(), CommitError> {
        let deferred = std::mem::take(&mut self.deferred);
        let schema = self.schema;
        let mut open = None;
        for link in &deferred {
            let unresolved = || CommitError::UnresolvedReference {
                object: link.source.clone(),
                relationship: link.relationship.name.clone(),
            };
            let target_key = self.key_of(&link.target).ok_or_else(unresolved)?;
            let mut values = IndexMap::new();
            copy_join_values(&link.relationship, &target_key, &mut values).ok_or_else(unresolved)?;

            let pk_columns = owned_pk_columns(schema.require_table(&link.table)?);
            let (qualifier_columns, qualifier) = self.key_qualifier(&link.source, &pk_columns)?;
            let shape = BatchQuery::update(
                link.table.clone(),
                values.keys().cloned().collect(),
                qualifier_columns,
                false,
            );
            let row = BatchRow {
                values: values.into_values().collect(),
                qualifier,
            };
            self.report.deferred_updates += self.stage(&mut open, shape, link.source.clone(), row)?;
        }
        if let Some(batch) = open {
            self.report.deferred_updates += self.run_checked(batch)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Deletes
    // -----------------------------------------------------------------------

    fn delete_table(&mut self, changes: &TableChanges) -> Result<(), CommitError> {
        let schema = self.schema;
        let pk_columns = owned_pk_columns(schema.require_table(&changes.table)?);

        let mut open = None;
        for object in &changes.objects {
            let (qualifier_columns, qualifier) = self.qualifier(object, &pk_columns)?;
            let shape = BatchQuery::delete(
                changes.table.clone(),
                qualifier_columns,
                object.uses_optimistic_lock(),
            );
            let row = BatchRow {
                values: Vec::new(),
                qualifier,
            };
            self.report.deleted += self.stage(&mut open, shape, object.id.clone(), row)?;
        }
        if let Some(batch) = open {
            self.report.deleted += self.run_checked(batch)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Writes foreign key columns for the object's relationships into
    /// `values`. With `may_defer`, a nullable reference to an object not
    /// inserted yet is written as NULL and queued for a later update.
    fn link(
        &mut self,
        object: &ObjectChange,
        table: &str,
        relationships: &[Relationship],
        values: &mut IndexMap<String, Value>,
        may_defer: bool,
    ) -> Result<(), CommitError> {
        for relationship in relationships {
            let target = match object.relationships.get(&relationship.name) {
                None | Some(RelationshipTarget::Fault) => continue,
                Some(RelationshipTarget::None) => {
                    set_null(relationship, values);
                    continue;
                }
                Some(RelationshipTarget::Object(target)) => target,
            };

            let unresolved = || CommitError::UnresolvedReference {
                object: object.id.clone(),
                relationship: relationship.name.clone(),
            };
            if let Some(key) = self.key_of(target) {
                copy_join_values(relationship, &key, values).ok_or_else(unresolved)?;
            } else if may_defer && !relationship.mandatory && self.pending.contains(target) {
                tracing::debug!(
                    object = %object.id,
                    target = %target,
                    relationship = %relationship.name,
                    "deferring nullable foreign key"
                );
                set_null(relationship, values);
                self.deferred.push(DeferredLink {
                    source: object.id.clone(),
                    table: table.to_string(),
                    relationship: relationship.clone(),
                    target: target.clone(),
                });
            } else {
                return Err(unresolved());
            }
        }
        Ok(())
    }

    /// Key of an object: assigned by this flush, or carried by its id.
    fn key_of(&self, id: &ObjectId) -> Option<KeyMap> {
        self.keys.get(id).or_else(|| id.key_map()).cloned()
    }

    /// Primary key plus optimistic lock columns.
    fn qualifier(
        &self,
        object: &ObjectChange,
        pk_columns: &[String],
    ) -> Result<(Vec<String>, Vec<Value>), CommitError> {
        let (mut columns, mut values) = self.key_qualifier(&object.id, pk_columns)?;
        for column in &object.lock {
            if columns.contains(column) {
                continue;
            }
            columns.push(column.clone());
            values.push(object.snapshot.get(column).cloned().unwrap_or(Value::Null));
        }
        Ok((columns, values))
    }

    /// Primary key columns and values identifying a stored row. Tables
    /// without a declared key fall back to the columns of the id.
    fn key_qualifier(
        &self,
        id: &ObjectId,
        pk_columns: &[String],
    ) -> Result<(Vec<String>, Vec<Value>), CommitError> {
        let missing = || CommitError::MissingKey { object: id.clone() };
        let key = self.key_of(id).ok_or_else(missing)?;
        if pk_columns.is_empty() {
            if key.is_empty() {
                return Err(missing());
            }
            return Ok(key.into_iter().unzip());
        }
        let mut values = Vec::with_capacity(pk_columns.len());
        for column in pk_columns {
            values.push(key.get(column).cloned().ok_or_else(missing)?);
        }
        Ok((pk_columns.to_vec(), values))
    }

    /// Adds a row to the open batch, first running the open batch if its
    /// shape differs. Returns the rows affected by any batch it ran.
    fn stage(
        &mut self,
        open: &mut Option<OpenBatch>,
        shape: BatchQuery,
        id: ObjectId,
        row: BatchRow,
    ) -> Result<usize, CommitError> {
        let mut affected = 0;
        if let Some(batch) = open.take_if(|batch| !batch.query.same_shape(&shape)) {
            affected = self.run_checked(batch)?;
        }
        open.get_or_insert_with(|| OpenBatch::new(shape)).push(id, row);
        Ok(affected)
    }

    /// Runs an update or delete batch; any row count other than one on an
    /// optimistically locked batch is a lock conflict.
    fn run_checked(&mut self, batch: OpenBatch) -> Result<usize, CommitError> {
        let result = self.execute(&batch)?;
        let mut conflicts = Vec::new();
        for ((id, row), &affected) in batch.ids.iter().zip(&batch.query.rows).zip(&result.counts) {
            if affected == 1 {
                continue;
            }
            if batch.query.uses_optimistic_lock {
                conflicts.push(LockConflict {
                    object: id.clone(),
                    qualifier: batch
                        .query
                        .qualifier_columns
                        .iter()
                        .cloned()
                        .zip(row.qualifier.iter().cloned())
                        .collect(),
                    affected,
                });
            } else {
                tracing::warn!(object = %id, affected, "statement did not affect exactly one row");
            }
        }
        if !conflicts.is_empty() {
            return Err(CommitError::OptimisticLock { conflicts });
        }
        Ok(result.counts.iter().sum())
    }

    fn execute(&mut self, batch: &OpenBatch) -> Result<BatchResult, CommitError> {
        tracing::debug!(
            table = %batch.query.table,
            sql = %batch.query.sql(),
            rows = batch.query.len(),
            "executing batch"
        );
        let result = self
            .executor
            .execute_batch(&batch.query)
            .map_err(|err| match err {
                ExecError::Constraint { row, kind, message } => match batch.ids.get(row) {
                    Some(object) => CommitError::Constraint {
                        object: object.clone(),
                        kind,
                        message,
                    },
                    None => ExecError::Constraint { row, kind, message }.into(),
                },
                other => other.into(),
            })?;
        if result.counts.len() != batch.ids.len() {
            return Err(ExecError::Sql {
                message: format!(
                    "executor reported {} row counts for a {}-row batch on {}",
                    result.counts.len(),
                    batch.ids.len(),
                    batch.query.table
                ),
            }
            .into());
        }
        Ok(result)
    }
}

fn owned_pk_columns(table: &Table) -> Vec<String> {
    table
        .primary_key_columns()
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn set_null(relationship: &Relationship, values: &mut IndexMap<String, Value>) {
    for join in &relationship.joins {
        values.insert(join.source_column.clone(), Value::Null);
    }
}

/// Copies the referenced key into the relationship's source columns.
/// `None` if the key lacks a joined column.
fn copy_join_values(
    relationship: &Relationship,
    key: &KeyMap,
    values: &mut IndexMap<String, Value>,
) -> Option<()> {
    for join in &relationship.joins {
        let value = key.get(&join.target_column)?;
        values.insert(join.source_column.clone(), value.clone());
    }
    Some(())
}
