//! Shared test fixtures: an instrumented mock driver whose close/commit
//! hooks the tests observe, plus a small entity type.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sql_reactive::driver::{Connection, ConnectionProvider, PreparedStatement, RowCursor};
use sql_reactive::prelude::*;

/// Counters and scripting shared between a test and its mock driver.
#[derive(Default)]
pub struct MockState {
    pub connections_opened: AtomicUsize,
    pub connections_closed: AtomicUsize,
    pub statements_closed: AtomicUsize,
    pub cursors_closed: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub auto_commit_off: AtomicUsize,
    pub auto_commit_on: AtomicUsize,
    /// SQL of each individually-executed update, in order.
    pub executes: Mutex<Vec<String>>,
    /// Size of each driver batch call, in order.
    pub batch_calls: Mutex<Vec<usize>>,
    /// Affected-row counts handed out per update execution (FIFO; empty
    /// means 1).
    pub update_results: Mutex<Vec<u64>>,
    /// Rows returned to any query.
    pub query_rows: Mutex<Vec<Vec<RowValues>>>,
    /// When set, the first cursor blocks in `next_row` until the sender is
    /// dropped or signals.
    pub cursor_gate: Mutex<Option<Receiver<()>>>,
    /// Fail the next `ConnectionProvider::get`.
    pub fail_next_get: AtomicBool,
}

impl MockState {
    pub fn with_query_rows(rows: Vec<Vec<RowValues>>) -> Arc<Self> {
        let state = Self::default();
        *state.query_rows.lock().unwrap() = rows;
        Arc::new(state)
    }

    pub fn with_update_results(results: Vec<u64>) -> Arc<Self> {
        let state = Self::default();
        *state.update_results.lock().unwrap() = results;
        Arc::new(state)
    }

    fn next_update_result(&self) -> u64 {
        let mut results = self.update_results.lock().unwrap();
        if results.is_empty() { 1 } else { results.remove(0) }
    }
}

pub struct MockProvider(pub Arc<MockState>);

impl ConnectionProvider for MockProvider {
    fn get(&self) -> Result<Box<dyn Connection>, SqlReactiveError> {
        if self.0.fail_next_get.swap(false, Ordering::SeqCst) {
            return Err(SqlReactiveError::ConnectionError(
                "provider exhausted".into(),
            ));
        }
        self.0.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.0),
            closed: false,
        }))
    }

    fn close(&self) -> Result<(), SqlReactiveError> {
        Ok(())
    }
}

struct MockConnection {
    state: Arc<MockState>,
    closed: bool,
}

impl Connection for MockConnection {
    fn prepare<'c>(
        &'c mut self,
        sql: &str,
    ) -> Result<Box<dyn PreparedStatement + 'c>, SqlReactiveError> {
        if self.closed {
            return Err(SqlReactiveError::ConnectionError(
                "connection already closed".into(),
            ));
        }
        Ok(Box::new(MockStatement {
            state: Arc::clone(&self.state),
            sql: sql.to_string(),
        }))
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), SqlReactiveError> {
        if enabled {
            self.state.auto_commit_on.fetch_add(1, Ordering::SeqCst);
        } else {
            self.state.auto_commit_off.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SqlReactiveError> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SqlReactiveError> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SqlReactiveError> {
        if !self.closed {
            self.closed = true;
            self.state.connections_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MockStatement {
    state: Arc<MockState>,
    sql: String,
}

impl PreparedStatement for MockStatement {
    fn query<'s>(
        &'s mut self,
        _params: &[RowValues],
    ) -> Result<Box<dyn RowCursor + 's>, SqlReactiveError> {
        let rows = self.state.query_rows.lock().unwrap().clone();
        let gate = self.state.cursor_gate.lock().unwrap().take();
        Ok(Box::new(MockCursor {
            state: Arc::clone(&self.state),
            rows,
            position: 0,
            gate,
        }))
    }

    fn execute(&mut self, _params: &[RowValues]) -> Result<u64, SqlReactiveError> {
        self.state.executes.lock().unwrap().push(self.sql.clone());
        Ok(self.state.next_update_result())
    }

    fn execute_returning_key(
        &mut self,
        _params: &[RowValues],
    ) -> Result<(u64, Option<RowValues>), SqlReactiveError> {
        self.state.executes.lock().unwrap().push(self.sql.clone());
        Ok((self.state.next_update_result(), Some(RowValues::Int(42))))
    }

    fn execute_batch(
        &mut self,
        param_sets: &[Vec<RowValues>],
    ) -> Result<Vec<u64>, SqlReactiveError> {
        self.state
            .batch_calls
            .lock()
            .unwrap()
            .push(param_sets.len());
        Ok(param_sets
            .iter()
            .map(|_| self.state.next_update_result())
            .collect())
    }

    fn close(&mut self) -> Result<(), SqlReactiveError> {
        self.state.statements_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockCursor {
    state: Arc<MockState>,
    rows: Vec<Vec<RowValues>>,
    position: usize,
    gate: Option<Receiver<()>>,
}

impl RowCursor for MockCursor {
    fn next_row(&mut self) -> Result<Option<Row>, SqlReactiveError> {
        if let Some(gate) = self.gate.take() {
            // Blocks until the test signals or drops the sender.
            let _ = gate.recv();
        }
        if self.position >= self.rows.len() {
            return Ok(None);
        }
        let values = self.rows[self.position].clone();
        self.position += 1;
        Ok(Some(Row::new(
            Arc::new(vec!["id".to_string(), "name".to_string()]),
            values,
        )))
    }

    fn close(&mut self) -> Result<(), SqlReactiveError> {
        self.state.cursors_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Test entity mapped by hand, the way a host application would.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub name: String,
}

impl FromRow for Account {
    fn from_row(row: &Row) -> Result<Self, SqlReactiveError> {
        Ok(Account {
            id: *row.require("id")?.as_int().ok_or_else(|| {
                SqlReactiveError::ExecutionError("`id` is not an integer".into())
            })?,
            name: row
                .require("name")?
                .as_text()
                .ok_or_else(|| SqlReactiveError::ExecutionError("`name` is not text".into()))?
                .to_string(),
        })
    }
}

pub fn account_row(id: i64, name: &str) -> Vec<RowValues> {
    vec![RowValues::Int(id), RowValues::Text(name.to_string())]
}

/// A real sqlite-backed engine with a standard set of account methods.
pub struct SqliteFixture {
    pub engine: ExecutionEngine,
    pub dispatcher: MethodDispatcher,
    _dir: tempfile::TempDir,
}

pub async fn sqlite_fixture(config: EngineConfig) -> SqliteFixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("accounts.db");
    let engine = ExecutionEngine::new(
        Arc::new(SqliteProvider::file(path.to_string_lossy().to_string())),
        config,
    );
    let dispatcher = MethodDispatcher::build(
        &engine,
        vec![
            MethodDecl::update(
                "schema.init",
                UpdateDecl::new(
                    "CREATE TABLE IF NOT EXISTS accounts (\
                     id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                )
                .with_min_affected_rows(0),
            ),
            MethodDecl::update(
                "accounts.insert",
                UpdateDecl::new("INSERT INTO accounts (id, name) VALUES (:id, :name)"),
            )
            .with_args(["id", "name"]),
            MethodDecl::update(
                "accounts.insert_auto",
                UpdateDecl::new("INSERT INTO accounts (name) VALUES (:name)")
                    .with_returning_key(),
            )
            .with_args(["name"]),
            MethodDecl::update(
                "accounts.rename",
                UpdateDecl::new("UPDATE accounts SET name = :name WHERE id = :id"),
            )
            .with_args(["id", "name"]),
            MethodDecl::query(
                "accounts.by_id",
                QueryDecl::new("SELECT id, name FROM accounts WHERE id = :id"),
            )
            .with_returns(ReturnShape::Single)
            .with_args(["id"]),
            MethodDecl::query(
                "accounts.by_name",
                QueryDecl::new("SELECT id, name FROM accounts WHERE name = :name"),
            )
            .with_returns(ReturnShape::Single)
            .with_args(["name"]),
            MethodDecl::query(
                "accounts.list",
                QueryDecl::new("SELECT id, name FROM accounts")
                    .with_sort_columns(["id", "name"])
                    .with_default_sort("id", SortOrder::Asc),
            ),
        ],
    )
    .expect("dispatcher");

    dispatcher
        .execute("schema.init", &Args::new())
        .expect("schema statement")
        .await
        .expect("schema created");

    SqliteFixture {
        engine,
        dispatcher,
        _dir: dir,
    }
}

pub async fn insert_account(fixture: &SqliteFixture, id: i64, name: &str) {
    fixture
        .dispatcher
        .execute(
            "accounts.insert",
            &Args::new().set("id", id).set("name", name),
        )
        .expect("insert statement")
        .await
        .expect("insert");
}

/// Poll `condition` until it holds or the deadline passes.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
