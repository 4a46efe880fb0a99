//! SQLite storage integration tests.
//!
//! Run with: cargo test --test storage_sqlite --features sqlite
//!
//! Uses in-memory database by default, no external dependencies required.

mod storage;

use std::sync::Arc;

use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;

use logstack::storage::schema::PRIMARY_INDEX;
use logstack::storage::{KeyValueStore, PrimaryKey, Query, SqliteStore, StorageError};
use storage::kv_store_tests::item;

/// Get SQLite connection string (in-memory for tests)
fn sqlite_uri() -> String {
    std::env::var("SQLITE_URI").unwrap_or_else(|_| "sqlite::memory:".to_string())
}

/// Every connection to `sqlite::memory:` opens its own database, so the
/// pool is held to one connection.
async fn connect_and_init() -> SqliteStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&sqlite_uri())
        .await
        .expect("Failed to connect to SQLite");

    let store = SqliteStore::new(pool);
    store.init().await.expect("Failed to create schema");
    store
}

#[tokio::test]
async fn test_sqlite_kv_store() {
    println!("=== SQLite KeyValueStore Tests ===");
    println!("Connecting to: {}", sqlite_uri());

    let store = connect_and_init().await;
    run_kv_store_tests!(&store);

    println!("=== All SQLite KeyValueStore tests PASSED ===");
}

#[tokio::test]
async fn test_sqlite_init_is_idempotent() {
    let store = connect_and_init().await;
    store.init().await.expect("second init should succeed");
}

/// File-backed store shared by several pooled connections.
async fn file_store(dir: &tempfile::TempDir, name: &str) -> Arc<SqliteStore> {
    let path = dir.path().join(name);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&format!("sqlite:{}?mode=rwc", path.display()))
        .await
        .unwrap();
    let store = Arc::new(SqliteStore::new(pool));
    store.init().await.unwrap();
    store
}

#[tokio::test]
async fn test_sqlite_failed_transaction_releases_connection() {
    // One pooled connection: a transaction left open would make the next
    // BEGIN IMMEDIATE fail.
    let store = connect_and_init().await;
    store
        .put(item(json!({"pk": "tx", "sk": "text", "n": "not a number"})))
        .await
        .unwrap();

    let key = PrimaryKey::new("tx", "text");
    assert!(matches!(
        store.increment(&key, "n", 1).await,
        Err(StorageError::NotANumber { .. })
    ));
    assert!(store
        .put_if_greater(item(json!({"pk": "tx", "sk": "text"})), "n")
        .await
        .is_err());

    assert_eq!(store.increment(&PrimaryKey::new("tx", "count"), "n", 1).await.unwrap(), 1);
    assert!(store
        .put_if_greater(item(json!({"pk": "tx", "sk": "seq", "v": "01"})), "v")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_sqlite_concurrent_put_if_greater_keeps_highest() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir, "catalog.db").await;

    let tasks = (1..=20).rev().map(|n| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .put_if_greater(item(json!({"pk": "shard", "sk": "a", "v": format!("{n:02}")})), "v")
                .await
        })
    });
    for joined in futures::future::join_all(tasks).await {
        joined.unwrap().unwrap();
    }

    let page = store.query(Query::new(PRIMARY_INDEX, "shard", 10)).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0]["v"], json!("20"));
}

#[tokio::test]
async fn test_sqlite_concurrent_increments_are_gapless() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir, "counter.db").await;

    let key = PrimaryKey::new("log-sequence", "orders");
    let tasks = (0..20).map(|_| {
        let store = store.clone();
        let key = key.clone();
        tokio::spawn(async move { store.increment(&key, "logSequence", 1).await })
    });

    let mut values: Vec<i64> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    values.sort_unstable();

    assert_eq!(values, (1..=20).collect::<Vec<_>>());
}
