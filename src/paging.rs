//! Limit/offset paging: clause injection and the "more data remains" signal.
//!
//! A paged query always asks the database for one row more than the caller
//! will see. The engine withholds that sentinel row; its presence is what
//! flips `is_last_record` to `false`.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::sqlscan::find_last_top_level_order_by;
use crate::types::SortOrder;

/// Page limit applied when neither the request, the method declaration, nor
/// the engine configuration supplies one.
pub const PLATFORM_DEFAULT_LIMIT: u64 = 100;

/// Paging descriptor supplied by the caller before a query and consulted
/// afterward for the derived last-record flag.
///
/// Cloning shares the flag cell: the engine writes it after execution and
/// the caller reads it from the original, which is the intended
/// report-back channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Requested page size. Negative or absent falls back to the configured
    /// default chain.
    pub limit: Option<i64>,
    /// Requested row offset. Negative or absent is treated as zero.
    pub offset: Option<i64>,
    /// Requested sort column; ignored unless the method allows it.
    pub sort_column: Option<String>,
    /// Sort direction for `sort_column`.
    pub sort_order: SortOrder,
    #[serde(skip)]
    last_record: Arc<Mutex<Option<bool>>>,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: None,
            offset: None,
            sort_column: None,
            sort_order: SortOrder::Asc,
            last_record: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn with_sort(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.sort_column = Some(column.into());
        self.sort_order = order;
        self
    }

    /// Whether the executed page reached the end of the data.
    ///
    /// `None` until a query has run with these options.
    #[must_use]
    pub fn is_last_record(&self) -> Option<bool> {
        *self.last_record.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn set_last_record(&self, last: bool) {
        *self
            .last_record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(last);
    }
}

/// Sort/limit declaration attached to a query method.
#[derive(Debug, Clone, Default)]
pub struct PagingDecl {
    pub allowed_sort_columns: Vec<String>,
    pub default_sort: Option<(String, SortOrder)>,
    pub default_limit: Option<u64>,
    pub max_limit: Option<u64>,
}

/// Outcome of rewriting a template for one paged execution.
#[derive(Debug, Clone)]
pub struct PagingPlan {
    /// Executable SQL with sort and LIMIT/OFFSET injected. The LIMIT asks
    /// for `effective_limit + 1` rows.
    pub sql: String,
    /// Rows the caller will actually receive at most.
    pub effective_limit: u64,
    /// The originating options, kept to report the last-record flag.
    pub options: CollectionOptions,
}

/// Rewrite `template` for one execution under `options`.
///
/// A requested sort column must be in the declared allow-set to take
/// effect; unknown columns are ignored without error. The injected (or
/// method-default) sort becomes the leading key of the template's own
/// trailing ORDER BY when one exists.
pub(crate) fn rewrite(
    template: &str,
    options: &CollectionOptions,
    decl: &PagingDecl,
    config_default_limit: Option<u64>,
    config_max_limit: Option<u64>,
) -> PagingPlan {
    let effective_limit = effective_limit(
        options.limit,
        decl.default_limit.or(config_default_limit),
        decl.max_limit.or(config_max_limit),
    );
    let offset = options.offset.filter(|o| *o > 0).unwrap_or(0) as u64;

    let mut sql = inject_sort(template, options, decl);
    sql.push_str(&format!(" LIMIT {} OFFSET {}", effective_limit + 1, offset));

    PagingPlan {
        sql,
        effective_limit,
        options: options.clone(),
    }
}

fn sort_to_apply<'a>(
    options: &'a CollectionOptions,
    decl: &'a PagingDecl,
) -> Option<(&'a str, SortOrder)> {
    if let Some(requested) = options.sort_column.as_deref() {
        if decl
            .allowed_sort_columns
            .iter()
            .any(|allowed| allowed == requested)
        {
            return Some((requested, options.sort_order));
        }
        // Unrecognized sort columns are dropped silently.
    }
    decl.default_sort
        .as_ref()
        .map(|(column, order)| (column.as_str(), *order))
}

fn inject_sort(template: &str, options: &CollectionOptions, decl: &PagingDecl) -> String {
    let Some((column, order)) = sort_to_apply(options, decl) else {
        return template.to_string();
    };

    match find_last_top_level_order_by(template) {
        Some(site) => {
            // Splice the sort in as the leading key of the existing clause.
            let mut sql = String::with_capacity(template.len() + column.len() + 8);
            sql.push_str(&template[..site.body_start]);
            sql.push(' ');
            sql.push_str(column);
            sql.push(' ');
            sql.push_str(order.as_sql());
            sql.push(',');
            sql.push_str(&template[site.body_start..]);
            sql
        }
        None => format!("{template} ORDER BY {column} {}", order.as_sql()),
    }
}

fn effective_limit(requested: Option<i64>, default: Option<u64>, max: Option<u64>) -> u64 {
    let requested = requested.filter(|l| *l >= 0).map(|l| l as u64);
    [requested, max, default]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(PLATFORM_DEFAULT_LIMIT)
}
