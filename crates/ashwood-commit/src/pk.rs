//! Primary key generation for inserted rows.

use std::collections::HashMap;

use ashwood_core::Table;
use rusqlite::{params, Connection};

use crate::error::PkError;
use crate::value::Value;

/// Produces the next primary key value for a table.
pub trait PkGenerator {
    fn generate_pk(&mut self, table: &Table) -> Result<Value, PkError>;

    /// The transaction that used the generated keys was rolled back.
    /// Anything reserved inside that transaction is gone and must not be
    /// handed out again.
    fn rolled_back(&mut self) {}
}

impl<G: PkGenerator + ?Sized> PkGenerator for &mut G {
    fn generate_pk(&mut self, table: &Table) -> Result<Value, PkError> {
        (**self).generate_pk(table)
    }

    fn rolled_back(&mut self) {
        (**self).rolled_back()
    }
}

/// Checks that the table has exactly one primary key column.
fn single_pk_column(table: &Table) -> Result<&str, PkError> {
    match table.primary_key_columns().as_slice() {
        [] => Err(PkError::NoPrimaryKey {
            table: table.full_name(),
        }),
        [column] => Ok(*column),
        _ => Err(PkError::Compound {
            table: table.full_name(),
        }),
    }
}

/// In-process counters, one per table.
#[derive(Debug, Clone)]
pub struct SequencePkGenerator {
    start: i64,
    next: HashMap<String, i64>,
}

impl Default for SequencePkGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl SequencePkGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every table's first key is `start`.
    pub fn starting_at(start: i64) -> Self {
        SequencePkGenerator {
            start,
            next: HashMap::new(),
        }
    }

    /// Continues a table's sequence from `next`.
    pub fn resume(&mut self, table: impl Into<String>, next: i64) {
        self.next.insert(table.into(), next);
    }
}

impl PkGenerator for SequencePkGenerator {
    fn generate_pk(&mut self, table: &Table) -> Result<Value, PkError> {
        single_pk_column(table)?;
        let next = self.next.entry(table.full_name()).or_insert(self.start);
        let value = *next;
        *next += 1;
        Ok(Value::Integer(value))
    }
}

/// Name of the key support table.
pub const AUTO_PK_TABLE: &str = "AUTO_PK_SUPPORT";

/// First key handed out for a table with no support row yet.
pub const AUTO_PK_INITIAL_VALUE: i64 = 200;

/// Keys drawn from the `AUTO_PK_SUPPORT` table.
///
/// Each table has one row holding its `NEXT_ID`. Keys are reserved
/// `cache_size` at a time by advancing `NEXT_ID` in a single statement, and
/// handed out from memory until the block runs out. Keys in a reserved
/// block that are never used are skipped, never reissued.
///
/// Reservations share the flush's connection and so its transaction. When
/// that transaction rolls back, the `NEXT_ID` advance is undone with it and
/// every cached block is dropped; the next key comes from a fresh
/// reservation.
#[derive(Debug)]
pub struct AutoPkTableGenerator<'c> {
    conn: &'c Connection,
    cache_size: i64,
    /// Per table: next key to hand out and the end of the reserved block.
    blocks: HashMap<String, (i64, i64)>,
}

impl<'c> AutoPkTableGenerator<'c> {
    /// Creates the support table if needed. A cache size of 0 is raised to 1.
    pub fn new(conn: &'c Connection, cache_size: u32) -> Result<Self, PkError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {AUTO_PK_TABLE} (
                TABLE_NAME CHAR(100) NOT NULL,
                NEXT_ID BIGINT NOT NULL,
                PRIMARY KEY (TABLE_NAME)
            )"
        ))?;
        Ok(AutoPkTableGenerator {
            conn,
            cache_size: i64::from(cache_size.max(1)),
            blocks: HashMap::new(),
        })
    }

    pub fn cache_size(&self) -> i64 {
        self.cache_size
    }

    /// Reserves the next block for `table`, returning its first key.
    fn reserve(&self, table: &str) -> Result<i64, PkError> {
        self.conn.execute(
            &format!("INSERT OR IGNORE INTO {AUTO_PK_TABLE} (TABLE_NAME, NEXT_ID) VALUES (?1, ?2)"),
            params![table, AUTO_PK_INITIAL_VALUE],
        )?;
        let advanced: i64 = self.conn.query_row(
            &format!(
                "UPDATE {AUTO_PK_TABLE} SET NEXT_ID = NEXT_ID + ?2 WHERE TABLE_NAME = ?1 RETURNING NEXT_ID"
            ),
            params![table, self.cache_size],
            |row| row.get(0),
        )?;
        tracing::debug!(table, first = advanced - self.cache_size, size = self.cache_size, "reserved key block");
        Ok(advanced - self.cache_size)
    }
}

impl PkGenerator for AutoPkTableGenerator<'_> {
    fn generate_pk(&mut self, table: &Table) -> Result<Value, PkError> {
        single_pk_column(table)?;
        let name = table.full_name();
        let (next, end) = match self.blocks.get(&name) {
            Some(&(next, end)) if next < end => (next, end),
            _ => {
                let first = self.reserve(&name)?;
                (first, first + self.cache_size)
            }
        };
        self.blocks.insert(name, (next + 1, end));
        Ok(Value::Integer(next))
    }

    fn rolled_back(&mut self) {
        if !self.blocks.is_empty() {
            tracing::debug!(tables = self.blocks.len(), "dropping reserved key blocks after rollback");
            self.blocks.clear();
        }
    }
}
