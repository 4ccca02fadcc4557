//! Commit orchestration over a relational database.
//!
//! A [`ChangeSet`] of inserted, updated and deleted objects is ordered with
//! [`ashwood_sort::EntitySorter`] and written in one transaction by a
//! [`Flush`]. SQLite is the bundled backend; connections can be shared
//! through a bounded [`ConnectionPool`].
//!
//! # Modules
//!
//! - [`value`]: column values and object identities
//! - [`change`]: per-object changes and the change set
//! - [`batch`]: parameterized SQL batches
//! - [`executor`]: the [`SqlExecutor`] seam
//! - [`flush`]: the commit state machine
//! - [`pk`]: primary key generators
//! - [`pool`]: connection pool
//! - [`sqlite`]: SQLite executor, DDL and connection factory
//! - [`config`]: pool and flush settings
//! - [`error`]: CommitError and friends

pub mod batch;
pub mod change;
pub mod config;
pub mod error;
pub mod executor;
pub mod flush;
pub mod pk;
pub mod pool;
pub mod sqlite;
pub mod value;

pub use batch::{BatchKind, BatchQuery, BatchResult, BatchRow};
pub use change::{ChangeSet, ObjectChange, RelationshipTarget, SnapshotFaultResolver};
pub use config::{FlushConfig, PkStrategy, PoolConfig};
pub use error::{
    CommitError, ConfigError, ConstraintKind, ExecError, LockConflict, PkError, PoolError,
};
pub use executor::SqlExecutor;
pub use flush::{AssignedKey, CommitReport, Flush, FlushPlan, FlushState, TableChanges};
pub use pk::{AutoPkTableGenerator, PkGenerator, SequencePkGenerator};
pub use pool::{ConnectionFactory, ConnectionPool, PooledConnection};
pub use sqlite::{
    create_tables, open_database, open_in_memory, schema_ddl, SqliteConnectionFactory,
    SqliteExecutor,
};
pub use value::{KeyMap, ObjectId, ObjectKey, Value};
