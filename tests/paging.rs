//! Limit/offset paging and the last-record signal, end to end on sqlite.

mod common;

use std::sync::Arc;

use futures_util::{FutureExt, TryStreamExt};
use sql_reactive::prelude::*;

use common::{Account, insert_account, sqlite_fixture};

#[tokio::test]
async fn limit_three_over_four_rows_leaves_more_data() {
    let fixture = sqlite_fixture(EngineConfig::default()).await;
    for (id, name) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
        insert_account(&fixture, id, name).await;
    }

    let options = CollectionOptions::new().with_limit(3);
    let accounts: Vec<Account> = fixture
        .dispatcher
        .stream("accounts.list", &Args::new(), Some(&options))
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(accounts.len(), 3);
    assert_eq!(options.is_last_record(), Some(false));
}

#[tokio::test]
async fn limit_three_over_three_rows_is_the_last_page() {
    let fixture = sqlite_fixture(EngineConfig::default()).await;
    for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
        insert_account(&fixture, id, name).await;
    }

    let options = CollectionOptions::new().with_limit(3);
    let accounts: Vec<Account> = fixture
        .dispatcher
        .stream("accounts.list", &Args::new(), Some(&options))
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(accounts.len(), 3);
    assert_eq!(options.is_last_record(), Some(true));
}

#[tokio::test]
async fn sort_and_offset_shape_the_page() {
    let fixture = sqlite_fixture(EngineConfig::default()).await;
    for (id, name) in [(1, "carol"), (2, "alice"), (3, "bob"), (4, "dave")] {
        insert_account(&fixture, id, name).await;
    }

    let options = CollectionOptions::new()
        .with_limit(2)
        .with_offset(1)
        .with_sort("name", SortOrder::Asc);
    let names: Vec<String> = fixture
        .dispatcher
        .stream::<Account>("accounts.list", &Args::new(), Some(&options))
        .unwrap()
        .try_collect::<Vec<_>>()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, vec!["bob".to_string(), "carol".to_string()]);
    assert_eq!(options.is_last_record(), Some(false));
}

#[tokio::test]
async fn unknown_sort_column_falls_back_to_default_sort() {
    let fixture = sqlite_fixture(EngineConfig::default()).await;
    for (id, name) in [(2, "b"), (1, "a")] {
        insert_account(&fixture, id, name).await;
    }

    let options = CollectionOptions::new()
        .with_limit(10)
        .with_sort("no_such_column", SortOrder::Desc);
    let ids: Vec<i64> = fixture
        .dispatcher
        .stream::<Account>("accounts.list", &Args::new(), Some(&options))
        .unwrap()
        .try_collect::<Vec<_>>()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    // Declared default sort (id ASC) applies; the unknown column is ignored.
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn chunked_listing_materializes_everything() {
    let fixture = sqlite_fixture(EngineConfig::default()).await;
    for (id, name) in [(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e")] {
        insert_account(&fixture, id, name).await;
    }

    let dispatcher = Arc::new(fixture.dispatcher);
    let source = FnPagedSource({
        let dispatcher = Arc::clone(&dispatcher);
        move |limit: u64, offset: u64| {
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                let options = CollectionOptions::new()
                    .with_limit(limit as i64)
                    .with_offset(offset as i64);
                dispatcher
                    .stream::<Account>("accounts.list", &Args::new(), Some(&options))?
                    .try_collect()
                    .await
            }
            .boxed()
        }
    });

    let all = ChunkIterator::new(&source, 2)
        .collect_all::<Account>()
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(all.last().map(|a| a.id), Some(5));
}
