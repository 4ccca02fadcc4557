//! The SQL execution seam between a flush and a database.
//!
//! [`SqlExecutor`] is the only way a flush touches a database. The SQLite
//! implementation lives in [`crate::sqlite`]; tests can substitute a
//! recording fake.

use crate::batch::{BatchQuery, BatchResult};
use crate::error::ExecError;

/// Runs batches inside one transaction.
///
/// A flush calls `begin` once, then `execute_batch` any number of times,
/// then exactly one of `commit` or `rollback`.
pub trait SqlExecutor {
    // -----------------------------------------------------------------------
    // Transaction boundary
    // -----------------------------------------------------------------------

    /// Opens the transaction.
    fn begin(&mut self) -> Result<(), ExecError>;

    /// Makes every batch since `begin` durable.
    fn commit(&mut self) -> Result<(), ExecError>;

    /// Discards every batch since `begin`.
    fn rollback(&mut self) -> Result<(), ExecError>;

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    /// Executes every row of the batch in order and reports per-row
    /// affected counts. Stops at the first failing row;
    /// [`ExecError::Constraint`] carries that row's index.
    fn execute_batch(&mut self, batch: &BatchQuery) -> Result<BatchResult, ExecError>;
}

impl<E: SqlExecutor + ?Sized> SqlExecutor for &mut E {
    fn begin(&mut self) -> Result<(), ExecError> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<(), ExecError> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<(), ExecError> {
        (**self).rollback()
    }

    fn execute_batch(&mut self, batch: &BatchQuery) -> Result<BatchResult, ExecError> {
        (**self).execute_batch(batch)
    }
}
