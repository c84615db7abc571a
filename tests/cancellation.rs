//! Resource release on cancellation and on failing providers.

mod common;

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::task::Poll;

use futures_util::{Stream, StreamExt};
use sql_reactive::prelude::*;

use common::{MockProvider, MockState, account_row, wait_until};

fn mock_dispatcher(state: &Arc<MockState>) -> (ExecutionEngine, MethodDispatcher) {
    let engine = ExecutionEngine::new(
        Arc::new(MockProvider(Arc::clone(state))),
        EngineConfig::default(),
    );
    let dispatcher = MethodDispatcher::build(
        &engine,
        vec![MethodDecl::query(
            "accounts.list",
            QueryDecl::new("SELECT id, name FROM accounts"),
        )],
    )
    .expect("dispatcher");
    (engine, dispatcher)
}

#[tokio::test]
async fn cancelling_before_any_row_closes_every_resource() {
    let state = MockState::with_query_rows(vec![account_row(1, "a")]);
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    *state.cursor_gate.lock().unwrap() = Some(gate_rx);
    let (_engine, dispatcher) = mock_dispatcher(&state);

    let mut stream = dispatcher
        .stream::<Row>("accounts.list", &Args::new(), None)
        .unwrap();

    // First poll starts the execution; the cursor is gated, so nothing is
    // delivered yet.
    let pending = futures_util::future::poll_fn(|cx| {
        Poll::Ready(Pin::new(&mut stream).poll_next(cx).is_pending())
    })
    .await;
    assert!(pending);
    wait_until(|| state.connections_opened.load(Ordering::SeqCst) == 1).await;

    // Unsubscribe, then let the worker proceed into the cancellation.
    drop(stream);
    drop(gate_tx);

    wait_until(|| {
        state.cursors_closed.load(Ordering::SeqCst) == 1
            && state.statements_closed.load(Ordering::SeqCst) == 1
            && state.connections_closed.load(Ordering::SeqCst) == 1
    })
    .await;
}

#[tokio::test]
async fn provider_failure_surfaces_on_the_stream() {
    let state = Arc::<MockState>::default();
    state.fail_next_get.store(true, Ordering::SeqCst);
    let (_engine, dispatcher) = mock_dispatcher(&state);

    let mut stream = dispatcher
        .stream::<Row>("accounts.list", &Args::new(), None)
        .unwrap();
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, SqlReactiveError::ConnectionError(_)));
    assert_eq!(state.connections_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn completed_query_releases_its_resources() {
    let state = MockState::with_query_rows(vec![account_row(1, "a"), account_row(2, "b")]);
    let (_engine, dispatcher) = mock_dispatcher(&state);

    let rows: Vec<Row> = dispatcher
        .stream("accounts.list", &Args::new(), None)
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(rows.len(), 2);
    assert_eq!(state.cursors_closed.load(Ordering::SeqCst), 1);
    assert_eq!(state.statements_closed.load(Ordering::SeqCst), 1);
    assert_eq!(state.connections_closed.load(Ordering::SeqCst), 1);
}
