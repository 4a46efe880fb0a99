//! Sharded catalog of log names.
//!
//! Every append writes one catalog row for its log into a randomly chosen
//! shard, spreading the write load of a busy log over `shard_count` rows.
//! A log name therefore appears up to `shard_count` times in the catalog
//! partition, with the rows of one name stored contiguously. A shard row
//! only ever moves forward: a late write carrying an older sequence leaves
//! the newer row in place. Listing over-fetches raw rows and reduces them
//! to one entry per name, keeping the highest observed sequence.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CatalogConfig;
use crate::error::Result;
use crate::sequence::SequenceToken;
use crate::storage::schema::{
    catalog_boundary, catalog_name, catalog_sort, CATALOG_PARTITION, LOG_SEQUENCE, NAME, PK,
    PRIMARY_INDEX, SHARD, SK,
};
use crate::storage::{string_attribute, Item, KeyValueStore, LastKey, Query};

/// One logical catalog entry: a log name and the latest sequence seen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub sequence: SequenceToken,
}

/// A page of distinct log names.
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub entries: Vec<CatalogEntry>,
    /// Resume point; `None` once the catalog is exhausted.
    pub last_key: Option<LastKey>,
}

/// Log catalog over a [`KeyValueStore`].
pub struct LogCatalog {
    store: Arc<dyn KeyValueStore>,
    config: CatalogConfig,
}

impl LogCatalog {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CatalogConfig) -> Self {
        if !config.overfetch_covers_shards() {
            warn!(
                shard_count = config.shard_count,
                overfetch_factor = config.overfetch_factor,
                "Catalog overfetch factor is below the shard count; a log name may be listed on two pages"
            );
        }
        Self { store, config }
    }

    /// Record that `log` has an event at `sequence`.
    ///
    /// Writes a random shard row unless that row already holds a sequence
    /// at or past `sequence`.
    pub async fn register(&self, log: &str, sequence: &SequenceToken) -> Result<()> {
        let shard = rand::rng().random_range(0..self.config.shard_count.max(1));
        let written = self
            .store
            .put_if_greater(catalog_row(log, shard, sequence), LOG_SEQUENCE)
            .await?;

        debug!(log = %log, shard, sequence = %sequence, written, "Registered log in catalog");
        Ok(())
    }

    /// List up to `limit` distinct log names after `cursor`.
    ///
    /// Pages can hold fewer than `limit` names while still returning a
    /// cursor. Callers follow cursors until none is returned.
    pub async fn list(
        &self,
        limit: usize,
        cursor: Option<LastKey>,
        projection: Option<BTreeSet<String>>,
    ) -> Result<CatalogPage> {
        let projection = projection.map(|mut attributes| {
            attributes.insert(LOG_SEQUENCE.to_string());
            attributes
        });

        let mut query = Query::new(
            PRIMARY_INDEX,
            CATALOG_PARTITION,
            limit.saturating_mul(self.config.overfetch_factor.max(1)),
        );
        query.exclusive_start = cursor;
        query.projection = projection;

        let page = self.store.query(query).await?;
        let window = page.items.len();

        let mut entries: Vec<CatalogEntry> = Vec::new();
        for item in &page.items {
            let name = catalog_name(string_attribute(item, SK)?);
            let sequence = SequenceToken::from_stored(string_attribute(item, LOG_SEQUENCE)?.to_string());

            if let Some(entry) = entries.last_mut().filter(|entry| entry.name == name) {
                if sequence > entry.sequence {
                    entry.sequence = sequence;
                }
                continue;
            }

            if entries.len() == limit {
                // First row of the name after the page; resume before it.
                debug!(window, names = entries.len(), "Catalog page filled");
                return Ok(CatalogPage {
                    entries,
                    last_key: Some(boundary_key(&name)),
                });
            }

            entries.push(CatalogEntry { name, sequence });
        }

        let Some(raw_last_key) = page.last_key else {
            debug!(window, names = entries.len(), "Catalog exhausted");
            return Ok(CatalogPage {
                entries,
                last_key: None,
            });
        };

        // The window ended with rows left in the store, so the last name may
        // have shard rows past the window. Hold it back unless it is the only
        // name, in which case emit it and resume after the raw row.
        let last_key = if entries.len() > 1 {
            entries.pop().map(|held| boundary_key(&held.name))
        } else {
            Some(raw_last_key)
        };

        debug!(window, names = entries.len(), "Catalog window exhausted");
        Ok(CatalogPage { entries, last_key })
    }
}

/// Catalog row for `log` in `shard`.
fn catalog_row(log: &str, shard: u32, sequence: &SequenceToken) -> Item {
    let mut item = Item::new();
    item.insert(PK.to_string(), Value::from(CATALOG_PARTITION));
    item.insert(SK.to_string(), Value::from(catalog_sort(log, shard)));
    item.insert(NAME.to_string(), Value::from(log));
    item.insert(SHARD.to_string(), Value::from(shard));
    item.insert(LOG_SEQUENCE.to_string(), Value::from(sequence.as_str()));
    item
}

/// Start key positioned just before the first shard row of `name`.
fn boundary_key(name: &str) -> LastKey {
    LastKey::from([
        (PK.to_string(), CATALOG_PARTITION.to_string()),
        (SK.to_string(), catalog_boundary(name)),
    ])
}
