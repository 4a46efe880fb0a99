//! In-memory KeyValueStore.
//!
//! Rows live in an ordered map under a `tokio` RwLock. Secondary index
//! scans filter the whole table, which is fine for tests and local runs.
//! Fault toggles let tests exercise storage failure paths.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    project, supersedes, Item, KeyValueStore, PrimaryKey, Query, QueryPage, Result, StorageError,
};

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<PrimaryKey, Item>>,
    fail_on_write: RwLock<bool>,
    fail_on_query: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    pub async fn set_fail_on_query(&self, fail: bool) {
        *self.fail_on_query.write().await = fail;
    }

    /// Fetch a row by primary key.
    pub async fn get(&self, key: &PrimaryKey) -> Option<Item> {
        self.rows.read().await.get(key).cloned()
    }

    /// Number of rows in a partition.
    pub async fn partition_len(&self, partition: &str) -> usize {
        self.rows
            .read()
            .await
            .keys()
            .filter(|key| key.partition == partition)
            .count()
    }

    async fn check_write(&self) -> Result<()> {
        if *self.fail_on_write.read().await {
            return Err(StorageError::Unavailable("write failure injected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn query(&self, query: Query) -> Result<QueryPage> {
        if *self.fail_on_query.read().await {
            return Err(StorageError::Unavailable("query failure injected".to_string()));
        }

        let index = query.index;
        let start = query
            .exclusive_start
            .as_ref()
            .map(|key| index.start_position(key))
            .transpose()?;

        let rows = self.rows.read().await;
        let mut matched: Vec<_> = rows
            .values()
            .filter(|item| {
                item.get(index.partition_key).and_then(Value::as_str) == Some(query.partition.as_str())
            })
            .filter_map(|item| index.position(item).map(|position| (position, item)))
            .filter(|(position, _)| match &start {
                None => true,
                Some(start) if query.forward => position > start,
                Some(start) => position < start,
            })
            .collect();

        matched.sort_by(|(a, _), (b, _)| a.cmp(b));
        if !query.forward {
            matched.reverse();
        }

        let has_more = matched.len() > query.limit;
        matched.truncate(query.limit);

        let last_key = match matched.last() {
            Some((_, item)) if has_more => Some(index.last_key(item)?),
            _ => None,
        };

        let items: Vec<Item> = matched
            .into_iter()
            .map(|(_, item)| project(item.clone(), query.projection.as_ref()))
            .collect();

        debug!(
            index = index.name,
            partition = %query.partition,
            count = items.len(),
            has_more,
            "Queried memory store"
        );

        Ok(QueryPage { items, last_key })
    }

    async fn increment(&self, key: &PrimaryKey, attribute: &str, by: i64) -> Result<i64> {
        self.check_write().await?;

        let mut rows = self.rows.write().await;
        let row = rows.entry(key.clone()).or_insert_with(|| {
            let mut item = Item::new();
            item.insert(super::schema::PK.to_string(), Value::from(key.partition.clone()));
            item.insert(super::schema::SK.to_string(), Value::from(key.sort.clone()));
            item
        });

        let current = match row.get(attribute) {
            None => 0,
            Some(value) => value.as_i64().ok_or_else(|| StorageError::NotANumber {
                attribute: attribute.to_string(),
            })?,
        };
        let next = current + by;
        row.insert(attribute.to_string(), Value::from(next));
        Ok(next)
    }

    async fn put(&self, item: Item) -> Result<()> {
        self.check_write().await?;
        let key = PrimaryKey::of(&item)?;
        self.rows.write().await.insert(key, item);
        Ok(())
    }

    async fn put_if_absent(&self, item: Item) -> Result<()> {
        self.check_write().await?;
        let key = PrimaryKey::of(&item)?;

        let mut rows = self.rows.write().await;
        if rows.contains_key(&key) {
            return Err(StorageError::ConditionFailed {
                partition: key.partition,
                sort: key.sort,
            });
        }
        rows.insert(key, item);
        Ok(())
    }

    async fn put_if_greater(&self, item: Item, attribute: &str) -> Result<bool> {
        self.check_write().await?;
        let key = PrimaryKey::of(&item)?;

        let mut rows = self.rows.write().await;
        if !supersedes(rows.get(&key), &item, attribute)? {
            return Ok(false);
        }
        rows.insert(key, item);
        Ok(true)
    }
}
