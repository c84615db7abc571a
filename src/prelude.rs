//! Convenient imports for common functionality.

pub use crate::chunk::{ChunkIterator, FnPagedSource, PagedSource};
pub use crate::config::EngineConfig;
pub use crate::dispatch::{
    Args, MethodDecl, MethodDispatcher, OperationDecl, ParamSource, QueryDecl, ReturnShape,
    UpdateDecl,
};
pub use crate::driver::{Connection, ConnectionProvider, PreparedStatement, RowCursor};
pub use crate::engine::ExecutionEngine;
pub use crate::error::SqlReactiveError;
pub use crate::paging::{CollectionOptions, PLATFORM_DEFAULT_LIMIT};
pub use crate::row::{FromRow, FromRowValue, GeneratedKey, Row};
pub use crate::sink::{RowStream, SingleValue};
pub use crate::transaction::{TransactionCoordinator, TxMember};
pub use crate::types::{Cardinality, RowValues, SortOrder};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteProvider;
