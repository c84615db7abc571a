//! rusqlite-backed implementation of the blocking driver contract.
//!
//! This is the crate's reference backend: a plain provider over file or
//! shared-cache in-memory databases, with no pooling of its own. Pool
//! policy belongs to whichever [`ConnectionProvider`] the host application
//! supplies.

mod params;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::OpenFlags;

use crate::driver::{Connection, ConnectionProvider, PreparedStatement, RowCursor};
use crate::error::SqlReactiveError;
use crate::row::Row;
use crate::types::RowValues;

pub use params::to_sqlite_value;

/// Opens one rusqlite connection per `get()`.
pub struct SqliteProvider {
    path: String,
    // Shared-cache in-memory databases vanish with their last connection;
    // the anchor keeps them alive for the provider's lifetime.
    anchor: Mutex<Option<rusqlite::Connection>>,
}

impl SqliteProvider {
    /// A provider over an on-disk database file.
    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            anchor: Mutex::new(None),
        }
    }

    /// A provider over a named shared-cache in-memory database.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if the anchoring connection cannot be
    /// opened.
    pub fn shared_memory(name: &str) -> Result<Self, SqlReactiveError> {
        let path = format!("file:{name}?mode=memory&cache=shared");
        let anchor = open_connection(&path)?;
        Ok(Self {
            path,
            anchor: Mutex::new(Some(anchor)),
        })
    }
}

fn open_connection(path: &str) -> Result<rusqlite::Connection, SqlReactiveError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = rusqlite::Connection::open_with_flags(path, flags)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

impl ConnectionProvider for SqliteProvider {
    fn get(&self) -> Result<Box<dyn Connection>, SqlReactiveError> {
        let conn = open_connection(&self.path)?;
        Ok(Box::new(SqliteConnection { conn: Some(conn) }))
    }

    fn close(&self) -> Result<(), SqlReactiveError> {
        let anchor = self
            .anchor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = anchor {
            conn.close()
                .map_err(|(_, err)| SqlReactiveError::from(err))?;
        }
        Ok(())
    }
}

struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
}

impl SqliteConnection {
    fn conn(&self) -> Result<&rusqlite::Connection, SqlReactiveError> {
        self.conn
            .as_ref()
            .ok_or_else(|| SqlReactiveError::ConnectionError("connection already closed".into()))
    }
}

impl Connection for SqliteConnection {
    fn prepare<'c>(
        &'c mut self,
        sql: &str,
    ) -> Result<Box<dyn PreparedStatement + 'c>, SqlReactiveError> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| SqlReactiveError::ConnectionError("connection already closed".into()))?;
        let stmt = conn.prepare(sql)?;
        let columns = Arc::new(
            stmt.column_names()
                .iter()
                .map(std::string::ToString::to_string)
                .collect::<Vec<_>>(),
        );
        Ok(Box::new(SqlitePreparedStatement { stmt, columns }))
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), SqlReactiveError> {
        let conn = self.conn()?;
        if enabled {
            // rusqlite returns to autocommit as soon as the open transaction
            // commits or rolls back; nothing to restore explicitly.
            Ok(())
        } else if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
            Ok(())
        } else {
            Err(SqlReactiveError::ExecutionError(
                "a transaction is already open on this connection".into(),
            ))
        }
    }

    fn commit(&mut self) -> Result<(), SqlReactiveError> {
        self.conn()?.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SqlReactiveError> {
        self.conn()?.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SqlReactiveError> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .map_err(|(_, err)| SqlReactiveError::from(err))?;
        }
        Ok(())
    }
}

struct SqlitePreparedStatement<'c> {
    stmt: rusqlite::Statement<'c>,
    columns: Arc<Vec<String>>,
}

impl PreparedStatement for SqlitePreparedStatement<'_> {
    fn query<'s>(
        &'s mut self,
        params: &[RowValues],
    ) -> Result<Box<dyn RowCursor + 's>, SqlReactiveError> {
        let values = params::to_sqlite_values(params);
        let rows = self.stmt.query(rusqlite::params_from_iter(values))?;
        Ok(Box::new(SqliteRowCursor {
            rows,
            columns: Arc::clone(&self.columns),
        }))
    }

    fn execute(&mut self, params: &[RowValues]) -> Result<u64, SqlReactiveError> {
        let values = params::to_sqlite_values(params);
        let affected = self.stmt.execute(rusqlite::params_from_iter(values))?;
        Ok(affected as u64)
    }

    fn execute_returning_key(
        &mut self,
        params: &[RowValues],
    ) -> Result<(u64, Option<RowValues>), SqlReactiveError> {
        let values = params::to_sqlite_values(params);
        let rowid = self.stmt.insert(rusqlite::params_from_iter(values))?;
        Ok((1, Some(RowValues::Int(rowid))))
    }

    fn execute_batch(
        &mut self,
        param_sets: &[Vec<RowValues>],
    ) -> Result<Vec<u64>, SqlReactiveError> {
        let mut counts = Vec::with_capacity(param_sets.len());
        for params in param_sets {
            let values = params::to_sqlite_values(params);
            let affected = self.stmt.execute(rusqlite::params_from_iter(values))?;
            counts.push(affected as u64);
        }
        Ok(counts)
    }

    fn close(&mut self) -> Result<(), SqlReactiveError> {
        // Finalized when dropped.
        Ok(())
    }
}

struct SqliteRowCursor<'s> {
    rows: rusqlite::Rows<'s>,
    columns: Arc<Vec<String>>,
}

impl RowCursor for SqliteRowCursor<'_> {
    fn next_row(&mut self) -> Result<Option<Row>, SqlReactiveError> {
        match self.rows.next()? {
            Some(row) => {
                let mut values = Vec::with_capacity(self.columns.len());
                for idx in 0..self.columns.len() {
                    values.push(params::value_from_row(row, idx)?);
                }
                Ok(Some(Row::new(Arc::clone(&self.columns), values)))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<(), SqlReactiveError> {
        Ok(())
    }
}
