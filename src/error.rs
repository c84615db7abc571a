use std::sync::Arc;

use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;

/// Errors surfaced by the engine.
///
/// The enum is `Clone` because a single transaction failure is delivered to
/// every stream bundled into that transaction; driver errors are wrapped in
/// `Arc` to keep that cheap.
#[derive(Debug, Clone, Error)]
pub enum SqlReactiveError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(Arc<rusqlite::Error>),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter binding error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("update affected {actual} row(s), below the declared minimum of {expected}")]
    MinimumAffectedRows { expected: u64, actual: u64 },

    #[error("single-value method received more than one row")]
    CardinalityViolation,

    #[error("stream buffer exceeded: consumer did not request rows in time")]
    BackpressureViolation,

    #[error("execution cancelled by the consumer")]
    Cancelled,
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for SqlReactiveError {
    fn from(err: rusqlite::Error) -> Self {
        SqlReactiveError::SqliteError(Arc::new(err))
    }
}
