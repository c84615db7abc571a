//! Runs one statement to completion against one connection, publishing into
//! the originating stream's sink.

use std::sync::Arc;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::driver::{Connection, ConnectionProvider};
use crate::error::SqlReactiveError;
use crate::statement::{Statement, StatementEvent, StatementKind};
use crate::types::Cardinality;
use crate::worker::{Job, WorkerPool};

/// What a worker needs to run jobs: the connection source and the settings.
pub(crate) struct EngineContext {
    pub(crate) provider: Arc<dyn ConnectionProvider>,
    pub(crate) config: EngineConfig,
}

pub(crate) struct EngineCore {
    pub(crate) context: Arc<EngineContext>,
    pub(crate) workers: WorkerPool,
}

impl EngineCore {
    pub(crate) fn submit_standalone(&self, statement: Statement) {
        if let Err(job) = self.workers.submit(Job::Statement(Box::new(statement))) {
            if let Job::Statement(mut statement) = job {
                statement
                    .emit_error(SqlReactiveError::ConnectionError("worker pool closed".into()));
            }
        }
    }
}

/// The entry point: owns the worker pool, the connection provider, and the
/// engine configuration. Dispatchers and transaction coordinators are built
/// from it and share its resources.
#[derive(Clone)]
pub struct ExecutionEngine {
    core: Arc<EngineCore>,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(provider: Arc<dyn ConnectionProvider>, config: EngineConfig) -> Self {
        let context = Arc::new(EngineContext {
            provider,
            config: config.clone(),
        });
        let workers = WorkerPool::new(config.worker_threads, Arc::clone(&context));
        Self {
            core: Arc::new(EngineCore { context, workers }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.core.context.config
    }

    pub(crate) fn core(&self) -> &Arc<EngineCore> {
        &self.core
    }

    /// Shut down the connection provider.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if the provider reports a failure.
    pub fn close_provider(&self) -> Result<(), SqlReactiveError> {
        self.core.context.provider.close()
    }
}

/// Run one standalone statement on the calling worker thread.
pub(crate) fn run_statement(context: &Arc<EngineContext>, mut statement: Statement) {
    // Cancelled before the lease did any work: nothing to release.
    if statement.flow().is_cancelled() {
        return;
    }

    let conn = match context.provider.get() {
        Ok(conn) => conn,
        Err(err) => {
            statement.emit_error(err);
            return;
        }
    };

    let started = Instant::now();
    let is_query = matches!(statement.kind(), StatementKind::Query { .. });
    if is_query {
        run_query(conn, &mut statement);
    } else {
        run_update(conn, &mut statement);
    }

    let elapsed = started.elapsed();
    if elapsed > context.config.slow_query_threshold {
        tracing::warn!(
            sql = statement.sql(),
            params = ?statement.params(),
            ?elapsed,
            "slow query"
        );
    }
}

fn run_query(mut conn: Box<dyn Connection>, statement: &mut Statement) {
    let StatementKind::Query { cardinality, paging } = statement.kind().clone() else {
        return;
    };
    let page_limit = paging.as_ref().map(|plan| plan.effective_limit);

    let mut primary: Option<SqlReactiveError> = None;
    let mut delivered: u64 = 0;
    let mut more_available = false;

    {
        match conn.prepare(statement.sql()) {
            Err(e) => primary = Some(e),
            Ok(mut stmt) => {
                let params = statement.params().to_vec();
                match stmt.query(&params) {
                    Err(e) => primary = Some(e),
                    Ok(mut cursor) => {
                        loop {
                            // Fetch no further than outstanding demand; the
                            // sentinel row of a paged query is exempt since
                            // it is never delivered.
                            let demand_gated = cardinality == Cardinality::Many
                                && page_limit.is_none_or(|limit| delivered < limit);
                            if demand_gated {
                                if let Err(e) = statement.flow().wait_for_demand() {
                                    primary = Some(e);
                                    break;
                                }
                            }
                            match cursor.next_row() {
                                Ok(Some(row)) => {
                                    if let Some(limit) = page_limit {
                                        if delivered >= limit {
                                            more_available = true;
                                            break;
                                        }
                                    }
                                    delivered += 1;
                                    if let Err(e) = statement.emit(StatementEvent::Row(row)) {
                                        primary = Some(e);
                                        break;
                                    }
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
            }
        }
    }
    if let Err(e) = conn.close() {
        note_close_failure("connection", &mut primary, e);
    }

    match primary {
        None => {
            if let Some(plan) = &paging {
                plan.options.set_last_record(!more_available);
            }
            statement.emit_completed();
        }
        Some(err) => statement.emit_error(err),
    }
}

fn run_update(mut conn: Box<dyn Connection>, statement: &mut Statement) {
    let mut primary: Option<SqlReactiveError> = None;

    if let Err(e) = statement
        .execute(conn.as_mut())
        .and_then(|()| statement.check_minimum())
    {
        primary = Some(e);
    }
    if let Err(e) = conn.close() {
        note_close_failure("connection", &mut primary, e);
    }

    match primary {
        None => statement.deliver_success(),
        Some(err) => statement.emit_error(err),
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
