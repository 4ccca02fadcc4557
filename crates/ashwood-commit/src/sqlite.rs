//! SQLite backend: executor, connection factory, and DDL helpers.
//!
//! Connections are opened with foreign key enforcement on (SQLite leaves it
//! off by default), so constraint ordering mistakes surface as
//! [`ConstraintKind::ForeignKey`] errors instead of passing silently.

use std::path::{Path, PathBuf};

use ashwood_core::Schema;
use rusqlite::ffi;
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};

use crate::batch::{BatchKind, BatchQuery, BatchResult};
use crate::error::{ConstraintKind, ExecError, PoolError};
use crate::executor::SqlExecutor;
use crate::pool::ConnectionFactory;
use crate::value::Value;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Integer(v) => ToSqlOutput::from(*v),
            Value::Real(v) => ToSqlOutput::from(*v),
            Value::Text(v) => ToSqlOutput::from(v.as_str()),
            Value::Blob(v) => ToSqlOutput::from(v.as_slice()),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => Value::Blob(v.to_vec()),
        })
    }
}

/// Opens (or creates) a SQLite database at `path` with foreign keys on.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

/// Opens an in-memory SQLite database with foreign keys on.
pub fn open_in_memory() -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "foreign_keys", "ON")
}

/// `CREATE TABLE IF NOT EXISTS` statements for every table of the schema,
/// in schema order.
pub fn schema_ddl(schema: &Schema) -> Vec<String> {
    schema
        .tables()
        .map(|table| {
            let mut parts: Vec<String> = table
                .columns()
                .iter()
                .map(|column| {
                    let mut def = column.name.clone();
                    if let Some(sql_type) = &column.sql_type {
                        def.push(' ');
                        def.push_str(sql_type);
                    }
                    if !column.nullable {
                        def.push_str(" NOT NULL");
                    }
                    def
                })
                .collect();

            let pk = table.primary_key_columns();
            if !pk.is_empty() {
                parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));
            }
            for relationship in table.relationships() {
                let (source, target): (Vec<&str>, Vec<&str>) = relationship
                    .joins
                    .iter()
                    .map(|join| (join.source_column.as_str(), join.target_column.as_str()))
                    .unzip();
                parts.push(format!(
                    "FOREIGN KEY ({}) REFERENCES {} ({})",
                    source.join(", "),
                    relationship.target_table,
                    target.join(", ")
                ));
            }
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                table.full_name(),
                parts.join(", ")
            )
        })
        .collect()
}

/// Creates every table of the schema that does not exist yet.
pub fn create_tables(conn: &Connection, schema: &Schema) -> Result<(), rusqlite::Error> {
    for ddl in schema_ddl(schema) {
        tracing::debug!(sql = %ddl, "creating table");
        conn.execute_batch(&ddl)?;
    }
    Ok(())
}

/// [`SqlExecutor`] over a borrowed SQLite connection.
pub struct SqliteExecutor<'c> {
    conn: &'c Connection,
    in_transaction: bool,
}

impl<'c> SqliteExecutor<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteExecutor {
            conn,
            in_transaction: false,
        }
    }
}

impl SqlExecutor for SqliteExecutor<'_> {
    fn begin(&mut self) -> Result<(), ExecError> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|err| classify(err, 0))?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ExecError> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|err| classify(err, 0))?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), ExecError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|err| classify(err, 0))
    }

    fn execute_batch(&mut self, batch: &BatchQuery) -> Result<BatchResult, ExecError> {
        let mut result = BatchResult {
            counts: Vec::with_capacity(batch.len()),
            generated_keys: Vec::with_capacity(batch.len()),
        };
        for (i, row) in batch.rows.iter().enumerate() {
            let sql = batch.sql_for(row);
            let mut stmt = self.conn.prepare_cached(&sql).map_err(|err| classify(err, i))?;
            let count = stmt
                .execute(params_from_iter(batch.parameters(row)))
                .map_err(|err| classify(err, i))?;
            result.counts.push(count);
            result.generated_keys.push(
                (batch.kind == BatchKind::Insert).then(|| self.conn.last_insert_rowid()),
            );
        }
        Ok(result)
    }
}

/// Maps a rusqlite error to the failure class a flush reports.
fn classify(err: rusqlite::Error, row: usize) -> ExecError {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let message = message.unwrap_or_else(|| failure.to_string());
            match failure.code {
                ErrorCode::ConstraintViolation => ExecError::Constraint {
                    row,
                    kind: constraint_kind(failure.extended_code),
                    message,
                },
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::SystemIoFailure => ExecError::Connection { message },
                _ => ExecError::Sql { message },
            }
        }
        other => ExecError::Sql {
            message: other.to_string(),
        },
    }
}

fn constraint_kind(extended_code: std::os::raw::c_int) -> ConstraintKind {
    match extended_code {
        ffi::SQLITE_CONSTRAINT_UNIQUE => ConstraintKind::Unique,
        ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ConstraintKind::PrimaryKey,
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
        ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
        ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Check,
        _ => ConstraintKind::Other,
    }
}

/// Opens pooled SQLite connections, file-backed or in-memory.
///
/// Every in-memory connection is its own empty database.
#[derive(Debug, Clone)]
pub struct SqliteConnectionFactory {
    path: Option<PathBuf>,
}

impl SqliteConnectionFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SqliteConnectionFactory {
            path: Some(path.into()),
        }
    }

    pub fn in_memory() -> Self {
        SqliteConnectionFactory { path: None }
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    type Connection = Connection;

    fn connect(&self) -> Result<Connection, PoolError> {
        let conn = match &self.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .and_then(|conn| configure(&conn).map(|()| conn))
        .map_err(|err| PoolError::Connect {
            reason: err.to_string(),
        })?;
        Ok(conn)
    }

    fn validate(&self, conn: &mut Connection, query: &str) -> Result<(), PoolError> {
        let check = || -> Result<(), rusqlite::Error> {
            let mut stmt = conn.prepare(query)?;
            let mut rows = stmt.query([])?;
            rows.next()?;
            Ok(())
        };
        check().map_err(|err| PoolError::Validation {
            reason: err.to_string(),
        })
    }
}
