use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SqlReactiveError;
use crate::types::RowValues;

/// A row from a database query result, with access to both the column names
/// and the values.
#[derive(Debug, Clone)]
pub struct Row {
    /// The column names for this row (shared across all rows in a result)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<RowValues>,
    // Cache for faster column lookups, shared across rows of one cursor
    #[doc(hidden)]
    column_index_cache: Arc<HashMap<String, usize>>,
}

impl Row {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<RowValues>) -> Self {
        let cache = Arc::new(
            column_names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect::<HashMap<_, _>>(),
        );

        Self {
            column_names,
            values,
            column_index_cache: cache,
        }
    }

    /// Get the index of a column by name.
    #[must_use]
    pub fn column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    /// Get a value by name, or a descriptive error naming the column.
    ///
    /// # Errors
    /// Returns `SqlReactiveError::ExecutionError` when the column is absent.
    pub fn require(&self, column_name: &str) -> Result<&RowValues, SqlReactiveError> {
        self.get(column_name).ok_or_else(|| {
            SqlReactiveError::ExecutionError(format!("column `{column_name}` not in result row"))
        })
    }
}

/// Maps one result row to a target value.
///
/// Implementations are selected once per target type at setup time; the
/// engine never inspects row shapes itself. Column-to-field mapping rules
/// live entirely behind this seam.
pub trait FromRow: Sized + Send + 'static {
    /// # Errors
    /// Returns `SqlReactiveError` if the row cannot be mapped.
    fn from_row(row: &Row) -> Result<Self, SqlReactiveError>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self, SqlReactiveError> {
        Ok(row.clone())
    }
}

/// Maps one generated-key value to a target key type.
pub trait FromRowValue: Sized + Send + 'static {
    /// # Errors
    /// Returns `SqlReactiveError` if the value cannot be converted.
    fn from_row_value(value: &RowValues) -> Result<Self, SqlReactiveError>;
}

impl FromRowValue for i64 {
    fn from_row_value(value: &RowValues) -> Result<Self, SqlReactiveError> {
        value.as_int().copied().ok_or_else(|| {
            SqlReactiveError::ExecutionError(format!("generated key {value:?} is not an integer"))
        })
    }
}

impl FromRowValue for String {
    fn from_row_value(value: &RowValues) -> Result<Self, SqlReactiveError> {
        match value {
            RowValues::Text(s) => Ok(s.clone()),
            RowValues::Int(i) => Ok(i.to_string()),
            other => Err(SqlReactiveError::ExecutionError(format!(
                "generated key {other:?} is not textual"
            ))),
        }
    }
}

/// One generated primary-key value from a successful insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKey<K>(pub K);

impl<K> GeneratedKey<K> {
    #[must_use]
    pub fn into_inner(self) -> K {
        self.0
    }
}
