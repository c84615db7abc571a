//! The bounded pool of threads dedicated to blocking database calls.
//!
//! Network-facing async code never blocks: every driver call runs on one of
//! these named threads. One in-flight job (a standalone statement or a
//! whole transaction) occupies exactly one thread for its duration, which
//! is the worker lease. Jobs queue when all threads are busy.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::engine::EngineContext;
use crate::error::SqlReactiveError;
use crate::statement::Statement;

pub(crate) enum Job {
    Statement(Box<Statement>),
    Transaction {
        statements: Vec<Statement>,
        respond_to: oneshot::Sender<Result<(), SqlReactiveError>>,
    },
}

pub(crate) struct WorkerPool {
    sender: Sender<Job>,
}

impl WorkerPool {
    pub(crate) fn new(threads: usize, context: Arc<EngineContext>) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        for i in 0..threads.max(1) {
            let receiver = Arc::clone(&receiver);
            let context = Arc::clone(&context);
            let handle = Handle::try_current().ok();
            let spawned = thread::Builder::new()
                .name(format!("sql-worker-{i}"))
                .spawn(move || {
                    let runtime_guard = handle.as_ref().map(Handle::enter);
                    loop {
                        // Hold the receiver lock only while waiting, never
                        // while a job runs.
                        let job = receiver
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .recv();
                        match job {
                            Ok(job) => dispatch(&context, job),
                            Err(_) => break,
                        }
                    }
                    drop(runtime_guard);
                });
            if let Err(err) = spawned {
                tracing::error!(%err, "failed to spawn sql worker thread");
            }
        }
        Self { sender }
    }

    /// Enqueue a job. On a closed pool the job is handed back so the caller
    /// can fail its streams.
    pub(crate) fn submit(&self, job: Job) -> Result<(), Job> {
        self.sender.send(job).map_err(|err| err.0)
    }
}

fn dispatch(context: &Arc<EngineContext>, job: Job) {
    match job {
        Job::Statement(statement) => crate::engine::run_statement(context, *statement),
        Job::Transaction {
            statements,
            respond_to,
        } => crate::transaction::run_transaction(context, statements, respond_to),
    }
}
