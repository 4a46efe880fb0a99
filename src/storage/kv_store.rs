//! KeyValueStore trait definition.
//!
//! The event store never talks to a database directly. Everything it needs
//! is expressed through a handful of primitives of an ordered key-value
//! store: range queries over a partition (on the primary key or a secondary
//! index), an atomic add-and-return, and puts that are unconditional,
//! conditional on absence, or conditional on a newer attribute value.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::schema::{PK, SK};

/// A stored row: attribute name to structured value.
pub type Item = Map<String, Value>;

/// String key attributes identifying the position of the last item of a page.
pub type LastKey = BTreeMap<String, String>;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors raised by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Conditional write failed: pk={partition}, sk={sort} already exists")]
    ConditionFailed { partition: String, sort: String },

    #[error("Item is missing key attribute: {0}")]
    MissingKeyAttribute(String),

    #[error("Exclusive start key is missing attribute: {0}")]
    InvalidStartKey(String),

    #[error("Attribute {attribute} does not hold a number")]
    NotANumber { attribute: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("DynamoDB error: {0}")]
    Dynamo(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Primary key of a row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimaryKey {
    pub partition: String,
    pub sort: String,
}

impl PrimaryKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }

    /// Extract the primary key from an item.
    pub fn of(item: &Item) -> Result<Self> {
        Ok(Self {
            partition: string_attribute(item, PK)?.to_string(),
            sort: string_attribute(item, SK)?.to_string(),
        })
    }
}

/// An access path: the primary key or a secondary index.
///
/// Within an index, rows are ordered by the sort attribute and ties are
/// broken by the primary key, so `(sort, pk, sk)` is a total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Index {
    pub name: &'static str,
    pub partition_key: &'static str,
    pub sort_key: &'static str,
}

impl Index {
    /// Whether this is the table's primary key rather than a secondary index.
    pub fn is_primary(&self) -> bool {
        self.partition_key == PK && self.sort_key == SK
    }

    /// Attributes a continuation key for this index must carry.
    pub fn key_attributes(&self) -> Vec<&'static str> {
        let mut attributes = vec![self.partition_key, self.sort_key];
        for attribute in [PK, SK] {
            if !attributes.contains(&attribute) {
                attributes.push(attribute);
            }
        }
        attributes
    }

    /// Build the continuation key positioned at `item`.
    pub fn last_key(&self, item: &Item) -> Result<LastKey> {
        self.key_attributes()
            .into_iter()
            .map(|attribute| {
                string_attribute(item, attribute)
                    .map(|value| (attribute.to_string(), value.to_string()))
            })
            .collect()
    }

    /// Position of an item in this index, or `None` if it is not indexed here.
    pub fn position(&self, item: &Item) -> Option<Position> {
        Some(Position {
            sort: item.get(self.sort_key)?.as_str()?.to_string(),
            partition: item.get(PK)?.as_str()?.to_string(),
            primary_sort: item.get(SK)?.as_str()?.to_string(),
        })
    }

    /// Position encoded by a continuation key.
    pub fn start_position(&self, start: &LastKey) -> Result<Position> {
        let get = |attribute: &str| {
            start
                .get(attribute)
                .cloned()
                .ok_or_else(|| StorageError::InvalidStartKey(attribute.to_string()))
        };
        Ok(Position {
            sort: get(self.sort_key)?,
            partition: get(PK)?,
            primary_sort: get(SK)?,
        })
    }
}

/// Total order of rows within one index partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub sort: String,
    pub partition: String,
    pub primary_sort: String,
}

/// A range scan over one partition of an index.
#[derive(Debug, Clone)]
pub struct Query {
    pub index: Index,
    pub partition: String,
    /// Resume strictly after this key; `None` starts at the first row.
    pub exclusive_start: Option<LastKey>,
    pub limit: usize,
    /// Ascending by sort key when true.
    pub forward: bool,
    /// Attributes to return; `None` returns every attribute.
    pub projection: Option<BTreeSet<String>>,
}

impl Query {
    pub fn new(index: Index, partition: impl Into<String>, limit: usize) -> Self {
        Self {
            index,
            partition: partition.into(),
            exclusive_start: None,
            limit,
            forward: true,
            projection: None,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    /// Present when the scan stopped at `limit` and more rows may follow.
    pub last_key: Option<LastKey>,
}

/// Interface for the ordered key-value store the event store is built on.
///
/// Implementations:
/// - `MemoryStore`: in-process store, also used as the test double
/// - `SqliteStore`: SQLite storage
/// - `DynamoStore`: DynamoDB single-table storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Scan one partition of an index in sort order.
    async fn query(&self, query: Query) -> Result<QueryPage>;

    /// Atomically add `by` to a numeric attribute and return the new value.
    ///
    /// A missing row or attribute counts as zero.
    async fn increment(&self, key: &PrimaryKey, attribute: &str, by: i64) -> Result<i64>;

    /// Write an item, replacing any row with the same primary key.
    async fn put(&self, item: Item) -> Result<()>;

    /// Write an item only if no row with its primary key exists.
    ///
    /// Fails with `StorageError::ConditionFailed` otherwise.
    async fn put_if_absent(&self, item: Item) -> Result<()>;

    /// Write an item unless the stored row's string `attribute` is already
    /// greater than or equal to the item's. Returns whether it wrote.
    ///
    /// A missing row or attribute never blocks the write.
    async fn put_if_greater(&self, item: Item, attribute: &str) -> Result<bool>;
}

/// Whether `candidate` may replace `stored` under `put_if_greater`.
pub fn supersedes(stored: Option<&Item>, candidate: &Item, attribute: &str) -> Result<bool> {
    let candidate = string_attribute(candidate, attribute)?;
    Ok(match stored.and_then(|row| row.get(attribute)).and_then(Value::as_str) {
        Some(current) => candidate > current,
        None => true,
    })
}

/// Read a string attribute, failing if it is missing or not a string.
pub fn string_attribute<'a>(item: &'a Item, attribute: &str) -> Result<&'a str> {
    item.get(attribute)
        .and_then(Value::as_str)
        .ok_or_else(|| StorageError::MissingKeyAttribute(attribute.to_string()))
}

/// Restrict an item to the projected attributes.
pub fn project(item: Item, projection: Option<&BTreeSet<String>>) -> Item {
    match projection {
        None => item,
        Some(attributes) => item
            .into_iter()
            .filter(|(name, _)| attributes.contains(name))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::{LOG_INDEX, PRIMARY_INDEX, SEQUENCE};
    use serde_json::json;

    fn item(value: Value) -> Item {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test items are objects"),
        }
    }

    #[test]
    fn test_primary_index_key_attributes() {
        assert!(PRIMARY_INDEX.is_primary());
        assert_eq!(PRIMARY_INDEX.key_attributes(), vec![PK, SK]);
    }

    #[test]
    fn test_secondary_index_key_attributes_include_primary_key() {
        assert!(!LOG_INDEX.is_primary());
        assert_eq!(
            LOG_INDEX.key_attributes(),
            vec![LOG_INDEX.partition_key, SEQUENCE, PK, SK]
        );
    }

    #[test]
    fn test_last_key_requires_every_key_attribute() {
        let row = item(json!({"pk": "p", "sk": "s", "type": "t"}));
        assert!(PRIMARY_INDEX.last_key(&row).is_ok());
        assert!(matches!(
            LOG_INDEX.last_key(&row),
            Err(StorageError::MissingKeyAttribute(_))
        ));
    }

    #[test]
    fn test_project_keeps_selected_attributes() {
        let row = item(json!({"pk": "p", "sk": "s", "type": "t", "payload": {"a": 1}}));
        let projection: BTreeSet<String> = ["pk", "type"].iter().map(|s| s.to_string()).collect();

        let projected = project(row.clone(), Some(&projection));
        assert_eq!(projected.len(), 2);
        assert!(projected.contains_key("type"));
        assert_eq!(project(row, None).len(), 4);
    }
}
