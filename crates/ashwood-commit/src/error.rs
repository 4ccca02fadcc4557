//! Error types for ashwood-commit.
//!
//! Lower layers have their own enums ([`ExecError`], [`PkError`],
//! [`PoolError`], [`ConfigError`]). [`CommitError`] is what a flush returns;
//! it converts from each of them so `?` works across layers, and its
//! variants follow the failure taxonomy callers act on: mapping problems,
//! constraint violations, optimistic lock conflicts and infrastructure
//! failures.

use ashwood_core::SchemaError;
use ashwood_sort::SortError;
use thiserror::Error;

use crate::flush::FlushState;
use crate::value::{KeyMap, ObjectId};

/// Which database constraint rejected a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    PrimaryKey,
    ForeignKey,
    NotNull,
    Check,
    Other,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::PrimaryKey => "primary key",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::NotNull => "not null",
            ConstraintKind::Check => "check",
            ConstraintKind::Other => "constraint",
        };
        f.write_str(name)
    }
}

/// Errors raised by a [`SqlExecutor`](crate::executor::SqlExecutor).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// Row `row` of the batch violated a constraint.
    #[error("{kind} constraint violated at batch row {row}: {message}")]
    Constraint {
        row: usize,
        kind: ConstraintKind,
        message: String,
    },

    /// The connection is unusable.
    #[error("connection failure: {message}")]
    Connection { message: String },

    /// Any other SQL failure (bad statement, missing table, ...).
    #[error("sql error: {message}")]
    Sql { message: String },
}

/// Errors raised while generating primary keys.
#[derive(Debug, Error)]
pub enum PkError {
    /// The table has no primary key columns.
    #[error("table '{table}' has no primary key")]
    NoPrimaryKey { table: String },

    /// Generated keys cover single-column primary keys only.
    #[error("cannot generate a compound primary key for '{table}'")]
    Compound { table: String },

    /// The strategy requires a caller-provided value and none was given.
    #[error("missing primary key value for {table}.{column}")]
    Missing { table: String, column: String },

    /// The key support table could not be read or advanced.
    #[error("primary key lookup failed: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Errors raised by the connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Rejected pool bounds.
    #[error("invalid pool configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Opening a connection failed.
    #[error("cannot open connection: {reason}")]
    Connect { reason: String },

    /// The validation query failed and the one reconnect attempt did too.
    #[error("connection failed validation: {reason}")]
    Validation { reason: String },

    /// No connection became available in time.
    #[error("no connection available after waiting {waited_ms} ms")]
    Exhausted { waited_ms: u64 },

    /// The pool was shut down.
    #[error("connection pool is shut down")]
    ShutDown,
}

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting has an unusable value.
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    /// A configuration document could not be parsed.
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One object whose update or delete matched no row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConflict {
    pub object: ObjectId,
    /// Column values the statement required the row to still have.
    pub qualifier: KeyMap,
    /// Rows actually affected.
    pub affected: usize,
}

/// Errors returned by a flush.
#[derive(Debug, Error)]
pub enum CommitError {
    /// Tables or objects cannot be ordered.
    #[error("mapping error: {0}")]
    Mapping(#[from] SortError),

    /// Schema lookup failed.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A mandatory relationship points at an object that is neither stored
    /// nor part of this change set.
    #[error("unresolved reference from {object} through '{relationship}'")]
    UnresolvedReference { object: ObjectId, relationship: String },

    /// An update or delete target has no usable primary key.
    #[error("no primary key known for {object}")]
    MissingKey { object: ObjectId },

    /// Primary key generation failed.
    #[error("primary key error: {0}")]
    PrimaryKey(#[from] PkError),

    /// Rows changed or vanished since they were read.
    #[error("optimistic lock failure for {}", describe_conflicts(.conflicts))]
    OptimisticLock { conflicts: Vec<LockConflict> },

    /// The database rejected a row.
    #[error("{kind} constraint violated by {object}: {message}")]
    Constraint {
        object: ObjectId,
        kind: ConstraintKind,
        message: String,
    },

    /// The connection failed mid-flush.
    #[error("connection failure: {message}")]
    Connection { message: String },

    /// Other execution failure.
    #[error("execution error: {0}")]
    Execution(ExecError),

    /// A connection could not be obtained.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// A flush instance runs once.
    #[error("flush already ran (state: {state:?})")]
    AlreadyRun { state: FlushState },
}

impl CommitError {
    /// True for problems in the mapping or the change set itself, detected
    /// before or independent of database state.
    pub fn is_mapping_error(&self) -> bool {
        matches!(
            self,
            CommitError::Mapping(_)
                | CommitError::Schema(_)
                | CommitError::UnresolvedReference { .. }
                | CommitError::MissingKey { .. }
        )
    }
}

impl From<ExecError> for CommitError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Connection { message } => CommitError::Connection { message },
            other => CommitError::Execution(other),
        }
    }
}

fn describe_conflicts(conflicts: &[LockConflict]) -> String {
    conflicts
        .iter()
        .map(|conflict| conflict.object.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
