//! The bound execution unit: one SQL text, its ordered parameters, and the
//! callbacks that feed the originating stream.
//!
//! A statement is created fresh per invocation and executes at most once.
//! It owns no I/O of its own; the execution engine and the transaction
//! coordinator drive it against a connection they hold.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::driver::Connection;
use crate::error::SqlReactiveError;
use crate::paging::PagingPlan;
use crate::row::Row;
use crate::sink::FlowControl;
use crate::types::{Cardinality, RowValues};

/// One result signal produced while a statement executes.
#[derive(Debug, Clone)]
pub enum StatementEvent {
    /// A query result row.
    Row(Row),
    /// The affected-row count of an update.
    AffectedRows(u64),
    /// The generated key captured from an insert.
    GeneratedKey(RowValues),
}

/// Callbacks a statement invokes during its own execution. Built by the
/// dispatcher around the originating stream's sink; `on_next` also carries
/// per-value deserialization, so its error return stops the producer.
pub struct StatementCallbacks {
    pub on_next: Box<dyn FnMut(StatementEvent) -> Result<(), SqlReactiveError> + Send>,
    pub on_error: Box<dyn FnMut(SqlReactiveError) + Send>,
    pub on_completed: Box<dyn FnMut() + Send>,
}

/// What kind of work the statement performs.
#[derive(Clone)]
pub enum StatementKind {
    Query {
        cardinality: Cardinality,
        paging: Option<PagingPlan>,
    },
    Update {
        min_affected_rows: u64,
        returning_key: bool,
    },
}

/// The captured result of one execution, held until delivery.
#[derive(Debug, Clone)]
pub enum StatementOutcome {
    Rows(Vec<Row>),
    Affected(u64),
    AffectedWithKey { affected: u64, key: Option<RowValues> },
}

pub struct Statement {
    method: String,
    sql: String,
    params: Vec<RowValues>,
    kind: StatementKind,
    callbacks: StatementCallbacks,
    flow: Arc<dyn FlowControl>,
    outcome: Option<StatementOutcome>,
}

impl Statement {
    pub(crate) fn new(
        method: impl Into<String>,
        sql: impl Into<String>,
        params: Vec<RowValues>,
        kind: StatementKind,
        callbacks: StatementCallbacks,
        flow: Arc<dyn FlowControl>,
    ) -> Self {
        Self {
            method: method.into(),
            sql: sql.into(),
            params,
            kind,
            callbacks,
            flow,
            outcome: None,
        }
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn params(&self) -> &[RowValues] {
        &self.params
    }

    #[must_use]
    pub fn kind(&self) -> &StatementKind {
        &self.kind
    }

    pub(crate) fn flow(&self) -> &Arc<dyn FlowControl> {
        &self.flow
    }

    /// Batch compatibility: consecutive updates with identical SQL can share
    /// one prepared statement. Key-returning inserts are excluded because a
    /// batch reports only counts.
    #[must_use]
    pub fn is_batch_compatible_with(&self, other: &Statement) -> bool {
        matches!(
            (&self.kind, &other.kind),
            (
                StatementKind::Update {
                    returning_key: false,
                    ..
                },
                StatementKind::Update {
                    returning_key: false,
                    ..
                },
            )
        ) && self.sql == other.sql
    }

    /// Append this statement's parameters to an open batch.
    ///
    /// # Errors
    /// Returns `SqlReactiveError::ExecutionError` if the batch was opened for
    /// different SQL.
    pub fn add_to_batch(&self, batch: &mut Batch) -> Result<(), SqlReactiveError> {
        if batch.sql != self.sql {
            return Err(SqlReactiveError::ExecutionError(format!(
                "statement `{}` is not compatible with the open batch",
                self.method
            )));
        }
        batch.param_sets.push(self.params.clone());
        Ok(())
    }

    /// Receive this statement's share of an aggregate batch result.
    pub fn report_batch_result(&mut self, affected: u64) {
        self.outcome = Some(StatementOutcome::Affected(affected));
    }

    /// Run the bound SQL against `conn`, capturing the outcome for later
    /// delivery. Updates capture the affected-row count or generated key;
    /// queries collect their rows (the paged sentinel row is withheld and
    /// the last-record flag written). The connection stays open; the caller
    /// owns its lifecycle.
    ///
    /// # Errors
    /// Returns the first execution or close error.
    pub fn execute(&mut self, conn: &mut dyn Connection) -> Result<(), SqlReactiveError> {
        let outcome = match &self.kind {
            StatementKind::Query { paging, .. } => {
                let rows = Self::run_query(conn, &self.sql, &self.params, paging.as_ref())?;
                StatementOutcome::Rows(rows)
            }
            StatementKind::Update { returning_key, .. } => {
                Self::run_update(conn, &self.sql, &self.params, *returning_key)?
            }
        };
        self.outcome = Some(outcome);
        Ok(())
    }

    fn run_query(
        conn: &mut dyn Connection,
        sql: &str,
        params: &[RowValues],
        paging: Option<&PagingPlan>,
    ) -> Result<Vec<Row>, SqlReactiveError> {
        let mut stmt = conn.prepare(sql)?;
        let mut primary: Option<SqlReactiveError> = None;
        let mut rows = Vec::new();
        let mut more_available = false;
        match stmt.query(params) {
            Err(e) => primary = Some(e),
            Ok(mut cursor) => {
                loop {
                    match cursor.next_row() {
                        Ok(Some(row)) => {
                            if let Some(plan) = paging {
                                if rows.len() as u64 >= plan.effective_limit {
                                    // The sentinel row: proof more data exists.
                                    more_available = true;
                                    break;
                                }
                            }
                            rows.push(row);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            primary = Some(e);
                            break;
                        }
                    }
                }
                if let Err(e) = cursor.close() {
                    note_close_failure("cursor", &mut primary, e);
                }
            }
        }
        if let Err(e) = stmt.close() {
            note_close_failure("statement", &mut primary, e);
        }
        if let Some(e) = primary {
            return Err(e);
        }
        if let Some(plan) = paging {
            plan.options.set_last_record(!more_available);
        }
        Ok(rows)
    }

    fn run_update(
        conn: &mut dyn Connection,
        sql: &str,
        params: &[RowValues],
        returning_key: bool,
    ) -> Result<StatementOutcome, SqlReactiveError> {
        let mut stmt = conn.prepare(sql)?;
        let mut primary: Option<SqlReactiveError> = None;
        let outcome = if returning_key {
            match stmt.execute_returning_key(params) {
                Ok((affected, key)) => Some(StatementOutcome::AffectedWithKey { affected, key }),
                Err(e) => {
                    primary = Some(e);
                    None
                }
            }
        } else {
            match stmt.execute(params) {
                Ok(affected) => Some(StatementOutcome::Affected(affected)),
                Err(e) => {
                    primary = Some(e);
                    None
                }
            }
        };
        if let Err(e) = stmt.close() {
            note_close_failure("statement", &mut primary, e);
        }
        match primary {
            Some(e) => Err(e),
            // outcome is always Some when no error was recorded
            None => outcome.ok_or_else(|| {
                SqlReactiveError::ExecutionError("update produced no outcome".into())
            }),
        }
    }

    /// Validate the captured affected-row count against the declared
    /// minimum. Queries always pass.
    ///
    /// # Errors
    /// Returns `SqlReactiveError::MinimumAffectedRows` on a shortfall.
    pub fn check_minimum(&self) -> Result<(), SqlReactiveError> {
        let StatementKind::Update {
            min_affected_rows, ..
        } = &self.kind
        else {
            return Ok(());
        };
        let min_affected_rows = *min_affected_rows;
        let actual = match &self.outcome {
            Some(StatementOutcome::Affected(n)) => *n,
            Some(StatementOutcome::AffectedWithKey { affected, .. }) => *affected,
            Some(StatementOutcome::Rows(_)) | None => {
                return Err(SqlReactiveError::ExecutionError(format!(
                    "update `{}` has no captured result",
                    self.method
                )));
            }
        };
        if actual < min_affected_rows {
            return Err(SqlReactiveError::MinimumAffectedRows {
                expected: min_affected_rows,
                actual,
            });
        }
        Ok(())
    }

    /// Push the captured outcome through the callbacks and complete.
    pub(crate) fn deliver_success(&mut self) {
        let Some(outcome) = self.outcome.take() else {
            (self.callbacks.on_error)(SqlReactiveError::ExecutionError(format!(
                "statement `{}` completed without a result",
                self.method
            )));
            return;
        };
        let delivered = match outcome {
            StatementOutcome::Rows(rows) => rows
                .into_iter()
                .try_for_each(|row| (self.callbacks.on_next)(StatementEvent::Row(row))),
            StatementOutcome::Affected(n) => {
                (self.callbacks.on_next)(StatementEvent::AffectedRows(n))
            }
            StatementOutcome::AffectedWithKey { key, .. } => match key {
                Some(key) => (self.callbacks.on_next)(StatementEvent::GeneratedKey(key)),
                None => Err(SqlReactiveError::ExecutionError(format!(
                    "insert `{}` returned no generated key",
                    self.method
                ))),
            },
        };
        match delivered {
            // The sink has already recorded the failure; nothing to add.
            Err(_) => {}
            Ok(()) => (self.callbacks.on_completed)(),
        }
    }

    pub(crate) fn fail(&mut self, err: SqlReactiveError) {
        (self.callbacks.on_error)(err);
    }

    pub(crate) fn emit(&mut self, event: StatementEvent) -> Result<(), SqlReactiveError> {
        (self.callbacks.on_next)(event)
    }

    pub(crate) fn emit_completed(&mut self) {
        (self.callbacks.on_completed)();
    }

    pub(crate) fn emit_error(&mut self, err: SqlReactiveError) {
        (self.callbacks.on_error)(err);
    }
}

fn note_close_failure(
    resource: &str,
    primary: &mut Option<SqlReactiveError>,
    err: SqlReactiveError,
) {
    if primary.is_none() {
        *primary = Some(err);
    } else {
        tracing::warn!(resource, error = %err, "close failed after an earlier error");
    }
}

/// An open batch over one prepared statement.
pub struct Batch {
    sql: String,
    param_sets: Vec<Vec<RowValues>>,
}

impl Batch {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            param_sets: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.param_sets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.param_sets.is_empty()
    }

    #[must_use]
    pub fn param_sets(&self) -> &[Vec<RowValues>] {
        &self.param_sets
    }
}

/// How a dispatcher-produced stream reaches the engine.
///
/// The origin can build the bound statement more than once: the stream's
/// first poll uses it for a standalone execution, and a transaction
/// coordinator uses it to extract the statement for bundling. Using both
/// paths runs the logical operation twice. This is kept deliberately, with a
/// warning, to match the layered retry semantics callers rely on.
pub(crate) struct StreamOrigin {
    method: String,
    build: Box<dyn Fn() -> Statement + Send + Sync>,
    submit: Box<dyn Fn(Statement) + Send + Sync>,
    started: AtomicBool,
}

impl StreamOrigin {
    pub(crate) fn new(
        method: impl Into<String>,
        build: Box<dyn Fn() -> Statement + Send + Sync>,
        submit: Box<dyn Fn(Statement) + Send + Sync>,
    ) -> Self {
        Self {
            method: method.into(),
            build,
            submit,
            started: AtomicBool::new(false),
        }
    }

    pub(crate) fn start_standalone(&self) {
        self.note_started();
        (self.submit)((self.build)());
    }

    pub(crate) fn extract_statement(&self) -> Statement {
        self.note_started();
        (self.build)()
    }

    fn note_started(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                method = %self.method,
                "statement consumed more than once; the operation will execute again"
            );
        }
    }
}
