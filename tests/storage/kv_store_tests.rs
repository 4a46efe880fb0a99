//! KeyValueStore interface tests.
//!
//! These tests verify the contract of the KeyValueStore trait.
//! Each storage implementation should run these tests. Every test works in
//! its own partitions so a shared database needs no cleanup between them.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use logstack::storage::schema::{LOG_INDEX, PRIMARY_INDEX, STREAM_INDEX};
use logstack::storage::{Item, KeyValueStore, PrimaryKey, Query, StorageError};

/// Build an item from a JSON object literal.
pub fn item(value: Value) -> Item {
    match value {
        Value::Object(map) => map,
        other => panic!("items are objects, got {other}"),
    }
}

/// An event-like row visible through the `log` and `stream` indexes.
pub fn indexed(partition: &str, sort: &str, log: &str, stream: &str, sequence: &str) -> Item {
    item(json!({
        "pk": partition,
        "sk": sort,
        "logKey": log,
        "streamKey": stream,
        "sequence": sequence,
        "type": "created",
        "payload": {"sort": sort},
    }))
}

fn sorts(items: &[Item]) -> Vec<String> {
    items
        .iter()
        .map(|item| item["sk"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Read every page of a query by following last keys.
async fn drain<S: KeyValueStore>(store: &S, mut query: Query) -> Vec<Item> {
    let mut items = Vec::new();
    loop {
        let page = store.query(query.clone()).await.expect("query should succeed");
        assert!(page.items.len() <= query.limit, "page exceeds limit");
        items.extend(page.items);
        match page.last_key {
            Some(last_key) => query.exclusive_start = Some(last_key),
            None => return items,
        }
    }
}

// =============================================================================
// put / put_if_absent tests
// =============================================================================

pub async fn test_put_and_query<S: KeyValueStore>(store: &S) {
    for sort in ["b", "a", "c"] {
        store
            .put(item(json!({"pk": "test_put", "sk": sort, "n": 1})))
            .await
            .expect("put should succeed");
    }

    let page = store
        .query(Query::new(PRIMARY_INDEX, "test_put", 10))
        .await
        .expect("query should succeed");
    assert_eq!(sorts(&page.items), vec!["a", "b", "c"]);
    assert!(page.last_key.is_none(), "no rows remain");
}

pub async fn test_put_replaces<S: KeyValueStore>(store: &S) {
    store
        .put(item(json!({"pk": "test_replace", "sk": "a", "n": 1})))
        .await
        .expect("put should succeed");
    store
        .put(item(json!({"pk": "test_replace", "sk": "a", "n": 2})))
        .await
        .expect("second put should succeed");

    let page = store
        .query(Query::new(PRIMARY_INDEX, "test_replace", 10))
        .await
        .expect("query should succeed");
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0]["n"], json!(2));
}

pub async fn test_put_if_absent_conflict<S: KeyValueStore>(store: &S) {
    store
        .put_if_absent(item(json!({"pk": "test_absent", "sk": "a", "n": 1})))
        .await
        .expect("first write should succeed");

    let result = store
        .put_if_absent(item(json!({"pk": "test_absent", "sk": "a", "n": 2})))
        .await;
    assert!(
        matches!(result, Err(StorageError::ConditionFailed { .. })),
        "second write should hit the condition"
    );

    let page = store
        .query(Query::new(PRIMARY_INDEX, "test_absent", 10))
        .await
        .expect("query should succeed");
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0]["n"], json!(1), "first write is untouched");
}

pub async fn test_put_if_greater<S: KeyValueStore>(store: &S) {
    let row = |v: &str| item(json!({"pk": "test_greater", "sk": "a", "v": v}));
    async fn stored<S: KeyValueStore>(store: &S) -> Value {
        let page = store
            .query(Query::new(PRIMARY_INDEX, "test_greater", 10))
            .await
            .expect("query should succeed");
        assert_eq!(page.items.len(), 1);
        page.items[0]["v"].clone()
    }

    assert!(store.put_if_greater(row("05"), "v").await.unwrap(), "missing row is written");
    assert!(!store.put_if_greater(row("03"), "v").await.unwrap(), "older value is refused");
    assert_eq!(stored(store).await, json!("05"));

    assert!(!store.put_if_greater(row("05"), "v").await.unwrap(), "equal value is refused");
    assert!(store.put_if_greater(row("08"), "v").await.unwrap(), "newer value is written");
    assert_eq!(stored(store).await, json!("08"));

    let missing = store
        .put_if_greater(item(json!({"pk": "test_greater", "sk": "b"})), "v")
        .await;
    assert!(matches!(missing, Err(StorageError::MissingKeyAttribute(_))));
}

pub async fn test_put_requires_primary_key<S: KeyValueStore>(store: &S) {
    let result = store.put(item(json!({"pk": "test_missing_key"}))).await;
    assert!(matches!(result, Err(StorageError::MissingKeyAttribute(_))));
}

pub async fn test_structured_values_survive<S: KeyValueStore>(store: &S) {
    let payload = json!({"amount": 10, "tags": ["a", "b"], "nested": {"ok": true, "none": null}});
    store
        .put(item(json!({"pk": "test_values", "sk": "a", "payload": payload, "createdAt": 1_700_000_000_000i64})))
        .await
        .expect("put should succeed");

    let page = store
        .query(Query::new(PRIMARY_INDEX, "test_values", 1))
        .await
        .expect("query should succeed");
    assert_eq!(page.items[0]["payload"], payload);
    assert_eq!(page.items[0]["createdAt"], json!(1_700_000_000_000i64));
}

// =============================================================================
// increment tests
// =============================================================================

pub async fn test_increment_counts_from_zero<S: KeyValueStore>(store: &S) {
    let key = PrimaryKey::new("test_increment", "orders");

    for expected in 1..=5 {
        let value = store
            .increment(&key, "logSequence", 1)
            .await
            .expect("increment should succeed");
        assert_eq!(value, expected);
    }

    let value = store
        .increment(&key, "logSequence", 10)
        .await
        .expect("increment should succeed");
    assert_eq!(value, 15);
}

pub async fn test_increment_keys_are_independent<S: KeyValueStore>(store: &S) {
    let a = PrimaryKey::new("test_increment_keys", "a");
    let b = PrimaryKey::new("test_increment_keys", "b");

    store.increment(&a, "n", 1).await.expect("increment a");
    store.increment(&a, "n", 1).await.expect("increment a");
    let b_value = store.increment(&b, "n", 1).await.expect("increment b");

    assert_eq!(b_value, 1);
}

pub async fn test_increment_rejects_non_number<S: KeyValueStore>(store: &S) {
    store
        .put(item(json!({"pk": "test_increment_nan", "sk": "a", "n": "text"})))
        .await
        .expect("put should succeed");

    let result = store
        .increment(&PrimaryKey::new("test_increment_nan", "a"), "n", 1)
        .await;
    assert!(matches!(result, Err(StorageError::NotANumber { .. })));
}

// =============================================================================
// query tests
// =============================================================================

pub async fn test_query_partition_isolation<S: KeyValueStore>(store: &S) {
    store
        .put(item(json!({"pk": "test_iso_a", "sk": "1"})))
        .await
        .expect("put should succeed");
    store
        .put(item(json!({"pk": "test_iso_b", "sk": "1"})))
        .await
        .expect("put should succeed");
    store
        .put(item(json!({"pk": "test_iso_a2", "sk": "1"})))
        .await
        .expect("put should succeed");

    let page = store
        .query(Query::new(PRIMARY_INDEX, "test_iso_a", 10))
        .await
        .expect("query should succeed");
    assert_eq!(page.items.len(), 1);
}

pub async fn test_query_empty_partition<S: KeyValueStore>(store: &S) {
    let page = store
        .query(Query::new(LOG_INDEX, "test_nothing_here", 10))
        .await
        .expect("query should succeed");
    assert!(page.items.is_empty());
    assert!(page.last_key.is_none());
}

pub async fn test_secondary_index_order<S: KeyValueStore>(store: &S) {
    store
        .put(indexed("test_idx\u{1}events", "x\u{1}03", "test_idx", "test_idx\u{1}x", "03"))
        .await
        .expect("put should succeed");
    store
        .put(indexed("test_idx\u{1}events", "y\u{1}01", "test_idx", "test_idx\u{1}y", "01"))
        .await
        .expect("put should succeed");
    store
        .put(indexed("test_idx\u{1}events", "x\u{1}02", "test_idx", "test_idx\u{1}x", "02"))
        .await
        .expect("put should succeed");
    // Not part of any secondary index.
    store
        .put(item(json!({"pk": "test_idx\u{1}events", "sk": "z"})))
        .await
        .expect("put should succeed");

    let forward = store
        .query(Query::new(LOG_INDEX, "test_idx", 10))
        .await
        .expect("query should succeed");
    assert_eq!(sorts(&forward.items), vec!["y\u{1}01", "x\u{1}02", "x\u{1}03"]);

    let mut query = Query::new(LOG_INDEX, "test_idx", 10);
    query.forward = false;
    let reverse = store.query(query).await.expect("query should succeed");
    assert_eq!(sorts(&reverse.items), vec!["x\u{1}03", "x\u{1}02", "y\u{1}01"]);

    let stream = store
        .query(Query::new(STREAM_INDEX, "test_idx\u{1}x", 10))
        .await
        .expect("query should succeed");
    assert_eq!(sorts(&stream.items), vec!["x\u{1}02", "x\u{1}03"]);
}

pub async fn test_index_ties_break_on_primary_key<S: KeyValueStore>(store: &S) {
    for sort in ["c", "a", "b"] {
        store
            .put(indexed("test_tie", sort, "test_tie_log", "s", "07"))
            .await
            .expect("put should succeed");
    }

    let items = drain(store, Query::new(LOG_INDEX, "test_tie_log", 1)).await;
    assert_eq!(sorts(&items), vec!["a", "b", "c"]);
}

pub async fn test_pagination_is_complete<S: KeyValueStore>(store: &S) {
    for n in 0..23 {
        store
            .put(indexed(
                "test_pages",
                &format!("{n:03}"),
                "test_pages_log",
                "s",
                &format!("{n:03}"),
            ))
            .await
            .expect("put should succeed");
    }

    let everything = store
        .query(Query::new(LOG_INDEX, "test_pages_log", 100))
        .await
        .expect("query should succeed");
    assert_eq!(everything.items.len(), 23);

    for limit in [1, 4, 5, 23] {
        let paged = drain(store, Query::new(LOG_INDEX, "test_pages_log", limit)).await;
        assert_eq!(sorts(&paged), sorts(&everything.items), "limit {limit}");

        let mut query = Query::new(LOG_INDEX, "test_pages_log", limit);
        query.forward = false;
        let mut reversed = sorts(&drain(store, query).await);
        reversed.reverse();
        assert_eq!(reversed, sorts(&everything.items), "reverse limit {limit}");
    }
}

pub async fn test_last_key_carries_index_attributes<S: KeyValueStore>(store: &S) {
    for n in 0..3 {
        store
            .put(indexed("test_last_key", &n.to_string(), "test_last_key_log", "s", &n.to_string()))
            .await
            .expect("put should succeed");
    }

    let page = store
        .query(Query::new(LOG_INDEX, "test_last_key_log", 2))
        .await
        .expect("query should succeed");
    let last_key = page.last_key.expect("more rows remain");
    for attribute in LOG_INDEX.key_attributes() {
        assert!(last_key.contains_key(attribute), "last key lacks {attribute}");
    }
    assert_eq!(last_key["sk"], "1");
}

pub async fn test_start_key_between_rows<S: KeyValueStore>(store: &S) {
    for sort in ["a\u{1}00", "a\u{1}01", "b\u{1}00"] {
        store
            .put(item(json!({"pk": "test_between", "sk": sort})))
            .await
            .expect("put should succeed");
    }

    // A start key for a row that does not exist positions the scan.
    let mut query = Query::new(PRIMARY_INDEX, "test_between", 10);
    query.exclusive_start = Some(
        [("pk", "test_between"), ("sk", "b\u{0}")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    let page = store.query(query).await.expect("query should succeed");
    assert_eq!(sorts(&page.items), vec!["b\u{1}00"]);
}

pub async fn test_projection<S: KeyValueStore>(store: &S) {
    store
        .put(indexed("test_projection", "a", "test_projection_log", "s", "1"))
        .await
        .expect("put should succeed");

    let mut query = Query::new(LOG_INDEX, "test_projection_log", 10);
    query.projection = Some(BTreeSet::from(["type".to_string(), "sk".to_string()]));
    let page = store.query(query).await.expect("query should succeed");

    let keys: BTreeSet<&str> = page.items[0].keys().map(String::as_str).collect();
    assert_eq!(keys, BTreeSet::from(["sk", "type"]));
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all KeyValueStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_kv_store_tests {
    ($store:expr) => {
        use $crate::storage::kv_store_tests::*;

        // put tests
        test_put_and_query($store).await;
        println!("  test_put_and_query: PASSED");

        test_put_replaces($store).await;
        println!("  test_put_replaces: PASSED");

        test_put_if_absent_conflict($store).await;
        println!("  test_put_if_absent_conflict: PASSED");

        test_put_if_greater($store).await;
        println!("  test_put_if_greater: PASSED");

        test_put_requires_primary_key($store).await;
        println!("  test_put_requires_primary_key: PASSED");

        test_structured_values_survive($store).await;
        println!("  test_structured_values_survive: PASSED");

        // increment tests
        test_increment_counts_from_zero($store).await;
        println!("  test_increment_counts_from_zero: PASSED");

        test_increment_keys_are_independent($store).await;
        println!("  test_increment_keys_are_independent: PASSED");

        test_increment_rejects_non_number($store).await;
        println!("  test_increment_rejects_non_number: PASSED");

        // query tests
        test_query_partition_isolation($store).await;
        println!("  test_query_partition_isolation: PASSED");

        test_query_empty_partition($store).await;
        println!("  test_query_empty_partition: PASSED");

        test_secondary_index_order($store).await;
        println!("  test_secondary_index_order: PASSED");

        test_index_ties_break_on_primary_key($store).await;
        println!("  test_index_ties_break_on_primary_key: PASSED");

        test_pagination_is_complete($store).await;
        println!("  test_pagination_is_complete: PASSED");

        test_last_key_carries_index_attributes($store).await;
        println!("  test_last_key_carries_index_attributes: PASSED");

        test_start_key_between_rows($store).await;
        println!("  test_start_key_between_rows: PASSED");

        test_projection($store).await;
        println!("  test_projection: PASSED");
    };
}
