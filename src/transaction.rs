//! All-or-nothing execution of statements bundled from multiple streams.
//!
//! The coordinator changes how the underlying work is scheduled (one
//! connection, strict submission order, consecutive identical-SQL updates
//! batched), never what each caller observes: every bundled stream keeps
//! its own single-/multi-value contract and receives either its own result
//! values or the one shared failure.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::driver::Connection;
use crate::engine::{EngineContext, EngineCore, ExecutionEngine};
use crate::error::SqlReactiveError;
use crate::statement::{Batch, Statement, StreamOrigin};
use crate::worker::Job;

/// A stream handed over for transactional execution.
///
/// Obtained from [`RowStream::tx_member`](crate::sink::RowStream::tx_member)
/// or [`SingleValue::tx_member`](crate::sink::SingleValue::tx_member). Only
/// streams produced by a dispatcher carry an extractable statement; anything
/// else is rejected outright.
pub struct TxMember {
    origin: Option<Arc<StreamOrigin>>,
}

impl TxMember {
    pub(crate) fn from_origin(origin: Option<Arc<StreamOrigin>>) -> Self {
        Self { origin }
    }
}

pub struct TransactionCoordinator {
    core: Arc<EngineCore>,
}

impl TransactionCoordinator {
    #[must_use]
    pub fn new(engine: &ExecutionEngine) -> Self {
        Self {
            core: Arc::clone(engine.core()),
        }
    }

    /// Run every member's statement as one commit/rollback unit.
    ///
    /// An empty member list is a trivial success and acquires nothing.
    /// Statements execute in submission order on a single connection with
    /// auto-commit disabled; consecutive members with identical SQL collapse
    /// into one driver batch call. The transaction commits iff every update
    /// met its declared minimum affected rows, otherwise it rolls back once
    /// and every member observes the same failure.
    ///
    /// A member bundled here can still be polled independently; doing both
    /// executes the operation twice (a warning is logged when it happens).
    /// Re-invoking after a failure repeats the whole unit from scratch.
    ///
    /// # Errors
    /// Returns the same error delivered to the bundled streams: a foreign
    /// member, a driver failure, or a minimum-affected-rows shortfall.
    pub async fn execute_transaction(
        &self,
        members: Vec<TxMember>,
    ) -> Result<(), SqlReactiveError> {
        if members.is_empty() {
            return Ok(());
        }

        let mut statements = Vec::with_capacity(members.len());
        for (index, member) in members.into_iter().enumerate() {
            match member.origin {
                Some(origin) => statements.push(origin.extract_statement()),
                None => {
                    let err = SqlReactiveError::ConfigError(format!(
                        "transaction member #{index} does not originate from this engine \
                         and carries no statement"
                    ));
                    for mut statement in statements {
                        statement.fail(err.clone());
                    }
                    return Err(err);
                }
            }
        }

        let (respond_to, outcome) = oneshot::channel();
        if let Err(job) = self.core.workers.submit(Job::Transaction {
            statements,
            respond_to,
        }) {
            let err = SqlReactiveError::ConnectionError("worker pool closed".into());
            if let Job::Transaction { statements, .. } = job {
                for mut statement in statements {
                    statement.fail(err.clone());
                }
            }
            return Err(err);
        }
        outcome.await.map_err(|_| {
            SqlReactiveError::ConnectionError("worker dropped while executing transaction".into())
        })?
    }
}

/// Worker-side body: runs the unit, then fans the outcome out to every sink.
pub(crate) fn run_transaction(
    context: &Arc<EngineContext>,
    mut statements: Vec<Statement>,
    respond_to: oneshot::Sender<Result<(), SqlReactiveError>>,
) {
    let result = run_unit(context, &mut statements);
    match &result {
        Ok(()) => {
            for statement in &mut statements {
                statement.deliver_success();
            }
        }
        Err(err) => {
            for statement in &mut statements {
                statement.fail(err.clone());
            }
        }
    }
    let _ = respond_to.send(result);
}

fn run_unit(
    context: &Arc<EngineContext>,
    statements: &mut [Statement],
) -> Result<(), SqlReactiveError> {
    let mut conn = context.provider.get()?;

    let mut tx_open = false;
    let mut primary = match conn.set_auto_commit(false) {
        Ok(()) => {
            tx_open = true;
            walk(conn.as_mut(), statements).err()
        }
        Err(e) => Some(e),
    };

    if tx_open {
        if primary.is_none() {
            if let Err(e) = conn.commit() {
                primary = Some(e);
            }
        } else if let Err(e) = conn.rollback() {
            tracing::warn!(error = %e, "rollback failed after transaction error");
        }
    }

    if let Err(e) = conn.set_auto_commit(true) {
        note_cleanup_failure(&mut primary, e, "restoring auto-commit failed");
    }
    if let Err(e) = conn.close() {
        note_cleanup_failure(&mut primary, e, "connection close failed");
    }

    match primary {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

/// Execute the statement list in order, batching consecutive compatible
/// updates, validating each affected-row count as soon as it is known.
fn walk(conn: &mut dyn Connection, statements: &mut [Statement]) -> Result<(), SqlReactiveError> {
    let total = statements.len();
    let mut index = 0;
    while index < total {
        let mut group_end = index + 1;
        while group_end < total
            && statements[group_end].is_batch_compatible_with(&statements[index])
        {
            group_end += 1;
        }

        if group_end - index > 1 {
            execute_batch_group(conn, &mut statements[index..group_end])?;
        } else {
            let statement = &mut statements[index];
            statement.execute(conn)?;
            statement.check_minimum()?;
        }
        index = group_end;
    }
    Ok(())
}

fn execute_batch_group(
    conn: &mut dyn Connection,
    group: &mut [Statement],
) -> Result<(), SqlReactiveError> {
    let sql = group[0].sql().to_string();
    let mut batch = Batch::new(&sql);
    for statement in group.iter() {
        statement.add_to_batch(&mut batch)?;
    }

    let counts = {
        let mut prepared = conn.prepare(&sql)?;
        let result = prepared.execute_batch(batch.param_sets());
        let close_result = prepared.close();
        let counts = result?;
        close_result?;
        counts
    };

    if counts.len() != group.len() {
        return Err(SqlReactiveError::ExecutionError(format!(
            "batch returned {} result(s) for {} statements",
            counts.len(),
            group.len()
        )));
    }
    for (statement, affected) in group.iter_mut().zip(counts) {
        statement.report_batch_result(affected);
        statement.check_minimum()?;
    }
    Ok(())
}

fn note_cleanup_failure(
    primary: &mut Option<SqlReactiveError>,
    err: SqlReactiveError,
    message: &str,
) {
    if primary.is_none() {
        *primary = Some(err);
    } else {
        tracing::warn!(error = %err, "{message}");
    }
}
