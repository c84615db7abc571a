//! The blocking driver seam.
//!
//! Everything the engine needs from a relational driver is expressed as four
//! object-safe traits. All methods may block; the engine only ever calls them
//! from its dedicated worker threads, never from async context. Pool policy
//! is the provider's concern; the engine holds exactly one connection per
//! standalone statement or per transaction and releases it exactly once.

use crate::error::SqlReactiveError;
use crate::row::Row;
use crate::types::RowValues;

/// Hands out exclusively-owned connections.
///
/// `get()` may block the calling worker thread (e.g. waiting on a pool);
/// errors from it surface as execution failures on the originating stream.
pub trait ConnectionProvider: Send + Sync {
    /// # Errors
    /// Returns `SqlReactiveError::ConnectionError` (or a driver error) when
    /// no connection can be produced.
    fn get(&self) -> Result<Box<dyn Connection>, SqlReactiveError>;

    /// Release any resources held by the provider itself.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if shutdown fails.
    fn close(&self) -> Result<(), SqlReactiveError>;
}

/// One exclusively-owned driver connection.
pub trait Connection: Send {
    /// # Errors
    /// Returns `SqlReactiveError` if the statement cannot be compiled.
    fn prepare<'c>(
        &'c mut self,
        sql: &str,
    ) -> Result<Box<dyn PreparedStatement + 'c>, SqlReactiveError>;

    /// Toggle auto-commit. Disabling it opens a transaction scope; the next
    /// `commit`/`rollback` closes it.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if the driver rejects the change.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), SqlReactiveError>;

    /// # Errors
    /// Returns `SqlReactiveError` if the commit fails.
    fn commit(&mut self) -> Result<(), SqlReactiveError>;

    /// # Errors
    /// Returns `SqlReactiveError` if the rollback fails.
    fn rollback(&mut self) -> Result<(), SqlReactiveError>;

    /// Release the connection. Idempotent: a second call is a no-op.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if the driver reports a close failure.
    fn close(&mut self) -> Result<(), SqlReactiveError>;
}

/// A compiled statement bound to one connection.
pub trait PreparedStatement {
    /// Open a cursor over the result rows.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if execution fails.
    fn query<'s>(
        &'s mut self,
        params: &[RowValues],
    ) -> Result<Box<dyn RowCursor + 's>, SqlReactiveError>;

    /// Run a DML statement, returning the affected-row count.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if execution fails.
    fn execute(&mut self, params: &[RowValues]) -> Result<u64, SqlReactiveError>;

    /// Run an insert, returning the affected-row count and the generated key
    /// if the driver produced one.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if execution fails.
    fn execute_returning_key(
        &mut self,
        params: &[RowValues],
    ) -> Result<(u64, Option<RowValues>), SqlReactiveError>;

    /// Run the statement once per parameter set in one driver round-trip,
    /// returning one affected-row count per set, in order.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if any execution in the batch fails.
    fn execute_batch(
        &mut self,
        param_sets: &[Vec<RowValues>],
    ) -> Result<Vec<u64>, SqlReactiveError>;

    /// Release the statement. Idempotent.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if the driver reports a close failure.
    fn close(&mut self) -> Result<(), SqlReactiveError>;
}

/// A forward-only cursor over query results.
pub trait RowCursor {
    /// Fetch the next row, or `None` at end of results.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if the fetch fails.
    fn next_row(&mut self) -> Result<Option<Row>, SqlReactiveError>;

    /// Release the cursor. Idempotent.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if the driver reports a close failure.
    fn close(&mut self) -> Result<(), SqlReactiveError>;
}
