//! Reactive data-access layer over blocking relational drivers.
//!
//! Declared data-access methods are registered once at startup, bound to
//! SQL templates, and invoked as asynchronous streams. All driver work runs
//! on a bounded pool of blocking worker threads; results flow back through
//! demand-driven sinks that enforce single- vs multi-value cardinality,
//! paging with a "more data remains" flag, and strict resource release.
//! Statements from several streams can be bundled into one all-or-nothing
//! transaction with automatic batching of consecutive identical updates and
//! minimum-affected-row validation.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use futures_util::TryStreamExt;
//! use sql_reactive::prelude::*;
//!
//! # async fn demo() -> Result<(), SqlReactiveError> {
//! let engine = ExecutionEngine::new(
//!     Arc::new(SqliteProvider::file("app.db")),
//!     EngineConfig::default(),
//! );
//! let dispatcher = MethodDispatcher::build(
//!     &engine,
//!     vec![
//!         MethodDecl::query(
//!             "accounts.list",
//!             QueryDecl::new("SELECT id, name FROM accounts WHERE tenant = :tenant")
//!                 .with_sort_columns(["name"])
//!                 .with_default_limit(25),
//!         )
//!         .with_args(["tenant"]),
//!     ],
//! )?;
//!
//! let options = CollectionOptions::new().with_limit(10);
//! let rows: Vec<Row> = dispatcher
//!     .stream("accounts.list", &Args::new().set("tenant", 7), Some(&options))?
//!     .try_collect()
//!     .await?;
//! assert!(options.is_last_record().is_some());
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod engine;
pub mod error;
pub mod paging;
pub mod prelude;
pub mod row;
pub mod sink;
mod sqlscan;
pub mod statement;
pub mod transaction;
pub mod types;
mod worker;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::SqlReactiveError;
