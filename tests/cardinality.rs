//! Single- vs multi-value contracts against a real sqlite database.

mod common;

use futures_util::TryStreamExt;
use sql_reactive::prelude::*;

use common::{Account, insert_account, sqlite_fixture};

#[tokio::test]
async fn single_value_over_one_row_yields_value_then_completion() {
    let fixture = sqlite_fixture(EngineConfig::default()).await;
    insert_account(&fixture, 1, "alice").await;

    let found = fixture
        .dispatcher
        .single::<Account>("accounts.by_id", &Args::new().set("id", 1))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(
        found,
        Some(Account {
            id: 1,
            name: "alice".into()
        })
    );
}

#[tokio::test]
async fn single_value_over_no_rows_is_empty() {
    let fixture = sqlite_fixture(EngineConfig::default()).await;

    let found = fixture
        .dispatcher
        .single::<Account>("accounts.by_id", &Args::new().set("id", 99))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(found, None);
}

#[tokio::test]
async fn single_value_over_many_rows_raises_cardinality_error() {
    let fixture = sqlite_fixture(EngineConfig::default()).await;
    insert_account(&fixture, 1, "dup").await;
    insert_account(&fixture, 2, "dup").await;

    let err = fixture
        .dispatcher
        .single::<Account>("accounts.by_name", &Args::new().set("name", "dup"))
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, SqlReactiveError::CardinalityViolation));
}

#[tokio::test]
async fn multi_value_stream_collects_every_row() {
    let fixture = sqlite_fixture(EngineConfig::default()).await;
    for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
        insert_account(&fixture, id, name).await;
    }

    let accounts: Vec<Account> = fixture
        .dispatcher
        .stream("accounts.list", &Args::new(), None)
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(accounts.len(), 3);
}

#[tokio::test]
async fn update_below_minimum_fails_standalone() {
    let fixture = sqlite_fixture(EngineConfig::default()).await;

    let err = fixture
        .dispatcher
        .execute(
            "accounts.rename",
            &Args::new().set("id", 404).set("name", "nobody"),
        )
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SqlReactiveError::MinimumAffectedRows {
            expected: 1,
            actual: 0
        }
    ));
}

#[tokio::test]
async fn insert_returns_generated_key() {
    let fixture = sqlite_fixture(EngineConfig::default()).await;

    let key = fixture
        .dispatcher
        .execute_returning::<i64>("accounts.insert_auto", &Args::new().set("name", "keyed"))
        .unwrap()
        .await
        .unwrap()
        .expect("a generated key");
    assert!(key.0 > 0);

    let found = fixture
        .dispatcher
        .single::<Account>("accounts.by_id", &Args::new().set("id", key.0))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(found.map(|a| a.name), Some("keyed".to_string()));
}

#[tokio::test]
async fn missing_argument_is_a_parameter_error() {
    let fixture = sqlite_fixture(EngineConfig::default()).await;

    let err = fixture
        .dispatcher
        .execute("accounts.insert", &Args::new().set("id", 1))
        .err()
        .expect("binding should fail");
    assert!(matches!(err, SqlReactiveError::ParameterError(_)));
}
