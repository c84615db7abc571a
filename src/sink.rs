//! The blocking-to-async bridge.
//!
//! A producer on a worker thread pushes rows through a [`SinkShared`] that a
//! [`RowStream`] consumer drains from async context. Demand flows the other
//! way: the consumer grants it in prefetch batches as it polls, the producer
//! blocks on a condvar until some exists. Deliveries that arrive with zero
//! demand (a transaction fanning results out to a stream nobody polled yet)
//! land in a bounded buffer; overflowing it is a protocol error, never an
//! unbounded allocation.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

use futures_util::Stream;

use crate::error::SqlReactiveError;
use crate::statement::StreamOrigin;
use crate::types::Cardinality;

/// Producer-side protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    /// No terminal signal yet; multi-value sinks stay here for every row.
    WaitingFirst,
    /// Single-value mode only: one row delivered, a second is a violation.
    EmittedOne,
    /// Completion or error delivered; every further signal is dropped.
    Terminated,
}

enum Terminal {
    Completed,
    Failed(SqlReactiveError),
}

struct Inner<T> {
    queue: VecDeque<T>,
    terminal: Option<Terminal>,
    state: SinkState,
    demand: u64,
    cancelled: bool,
    waker: Option<Waker>,
}

/// Shared core between one producer and one consumer.
pub(crate) struct SinkShared<T> {
    inner: Mutex<Inner<T>>,
    demand_available: Condvar,
    cardinality: Cardinality,
    buffer_capacity: usize,
    prefetch: usize,
}

/// The subset of sink behavior the engine needs without knowing the
/// consumer's item type.
pub(crate) trait FlowControl: Send + Sync {
    /// Block until the consumer has outstanding demand.
    ///
    /// Returns `Err(Cancelled)` when the consumer went away or the sink
    /// already reached a terminal state.
    fn wait_for_demand(&self) -> Result<(), SqlReactiveError>;

    fn is_cancelled(&self) -> bool;
}

impl<T: Send + 'static> SinkShared<T> {
    pub(crate) fn new(
        cardinality: Cardinality,
        prefetch: usize,
        buffer_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                terminal: None,
                state: SinkState::WaitingFirst,
                demand: 0,
                cancelled: false,
                waker: None,
            }),
            demand_available: Condvar::new(),
            cardinality,
            buffer_capacity: buffer_capacity.max(1),
            prefetch: prefetch.max(1),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver one value.
    ///
    /// Consumes one unit of demand when some exists, otherwise falls back to
    /// the bounded buffer. The returned error tells the producer to stop; it
    /// has already been recorded as the sink's terminal state.
    pub(crate) fn next(&self, value: T) -> Result<(), SqlReactiveError> {
        let mut inner = self.lock();
        if inner.cancelled {
            return Err(SqlReactiveError::Cancelled);
        }
        match inner.state {
            SinkState::Terminated => Ok(()),
            SinkState::EmittedOne => {
                let err = SqlReactiveError::CardinalityViolation;
                inner.state = SinkState::Terminated;
                inner.terminal = Some(Terminal::Failed(err.clone()));
                wake(&mut inner);
                Err(err)
            }
            SinkState::WaitingFirst => {
                if inner.demand > 0 {
                    inner.demand -= 1;
                } else if inner.queue.len() >= self.buffer_capacity {
                    let err = SqlReactiveError::BackpressureViolation;
                    inner.state = SinkState::Terminated;
                    inner.terminal = Some(Terminal::Failed(err.clone()));
                    wake(&mut inner);
                    return Err(err);
                }
                inner.queue.push_back(value);
                if self.cardinality == Cardinality::One {
                    inner.state = SinkState::EmittedOne;
                }
                wake(&mut inner);
                Ok(())
            }
        }
    }

    /// Deliver completion. Ignored once terminated.
    pub(crate) fn complete(&self) {
        let mut inner = self.lock();
        if inner.state != SinkState::Terminated {
            inner.state = SinkState::Terminated;
            inner.terminal = Some(Terminal::Completed);
            wake(&mut inner);
        }
    }

    /// Deliver an error. Ignored once terminated; in particular an error
    /// arriving after a single-value stream already completed on its first
    /// row is dropped silently.
    pub(crate) fn error(&self, err: SqlReactiveError) {
        let mut inner = self.lock();
        if inner.state != SinkState::Terminated {
            inner.state = SinkState::Terminated;
            inner.terminal = Some(Terminal::Failed(err));
            wake(&mut inner);
        }
    }
}

fn wake<T>(inner: &mut Inner<T>) {
    if let Some(waker) = inner.waker.take() {
        waker.wake();
    }
}

impl<T: Send + 'static> FlowControl for SinkShared<T> {
    fn wait_for_demand(&self) -> Result<(), SqlReactiveError> {
        let mut inner = self.lock();
        loop {
            if inner.cancelled || inner.state == SinkState::Terminated {
                return Err(SqlReactiveError::Cancelled);
            }
            if inner.demand > 0 {
                return Ok(());
            }
            inner = self
                .demand_available
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }
}

/// A bounded multi-value asynchronous stream of query results.
///
/// The stream is lazy: nothing is submitted to the engine until the first
/// poll. Dropping it before completion cancels the execution; the worker
/// observes the cancellation at its next demand wait or delivery and closes
/// cursor, statement, and connection.
pub struct RowStream<T> {
    shared: Arc<SinkShared<T>>,
    origin: Option<Arc<StreamOrigin>>,
    started: bool,
}

impl<T> Unpin for RowStream<T> {}

impl<T: Send + 'static> RowStream<T> {
    pub(crate) fn new(shared: Arc<SinkShared<T>>, origin: Option<Arc<StreamOrigin>>) -> Self {
        Self {
            shared,
            origin,
            started: false,
        }
    }

    /// A detached, already-complete stream over fixed values.
    ///
    /// Useful for stubbing data-access surfaces in tests. Such a stream does
    /// not originate from an engine and is rejected by the transaction
    /// coordinator.
    #[must_use]
    pub fn from_values(values: Vec<T>) -> Self {
        let shared = SinkShared::new(Cardinality::Many, 1, values.len().max(1));
        {
            let mut inner = shared.lock();
            inner.queue = values.into();
            inner.state = SinkState::Terminated;
            inner.terminal = Some(Terminal::Completed);
        }
        Self {
            shared,
            origin: None,
            started: true,
        }
    }

}

impl<T: Send + 'static> Stream for RowStream<T> {
    type Item = Result<T, SqlReactiveError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let mut inner = this.shared.lock();
        if !this.started {
            this.started = true;
            // A sink that already holds a terminal outcome (a transaction
            // delivered this stream's results) has nothing to gain from a
            // cold standalone start; skip it. Polling before that point
            // still executes independently, see the coordinator docs.
            if inner.terminal.is_none() {
                if let Some(origin) = &this.origin {
                    origin.start_standalone();
                }
            }
        }
        if let Some(value) = inner.queue.pop_front() {
            return Poll::Ready(Some(Ok(value)));
        }
        match inner.terminal.take() {
            Some(Terminal::Completed) => {
                inner.terminal = Some(Terminal::Completed);
                Poll::Ready(None)
            }
            Some(Terminal::Failed(err)) => {
                // Yield the failure once; subsequent polls observe the end.
                inner.terminal = Some(Terminal::Completed);
                Poll::Ready(Some(Err(err)))
            }
            None => {
                if inner.demand == 0 {
                    inner.demand = this.shared.prefetch as u64;
                    this.shared.demand_available.notify_all();
                }
                inner.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for RowStream<T> {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.cancelled = true;
        inner.waker = None;
        self.shared.demand_available.notify_all();
    }
}

/// A single-value asynchronous result.
///
/// Resolves only at the stream's terminal signal so that a cardinality
/// violation raised after the first row still surfaces as the failure.
pub struct SingleValue<T> {
    stream: RowStream<T>,
    received: Option<T>,
}

impl<T> Unpin for SingleValue<T> {}

impl<T: Send + 'static> SingleValue<T> {
    pub(crate) fn new(stream: RowStream<T>) -> Self {
        Self {
            stream,
            received: None,
        }
    }
}

impl<T: Send + 'static> Future for SingleValue<T> {
    type Output = Result<Option<T>, SqlReactiveError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    this.received = Some(value);
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(err)),
                Poll::Ready(None) => return Poll::Ready(Ok(this.received.take())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<T: Send + 'static> SingleValue<T> {
    /// Hand the underlying stream to a transaction coordinator.
    #[must_use]
    pub fn tx_member(&self) -> crate::transaction::TxMember {
        self.stream.tx_member()
    }
}

impl<T: Send + 'static> RowStream<T> {
    /// Hand this stream to a transaction coordinator.
    ///
    /// The stream itself stays subscribable; polling it in addition to
    /// bundling it executes the operation twice (see the coordinator docs).
    #[must_use]
    pub fn tx_member(&self) -> crate::transaction::TxMember {
        crate::transaction::TxMember::from_origin(self.origin.clone())
    }
}
