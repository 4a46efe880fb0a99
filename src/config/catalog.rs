//! Catalog sharding configuration.

use serde::Deserialize;

/// Default number of catalog shards per log name.
pub const DEFAULT_SHARD_COUNT: u32 = 26;

/// Default raw-row overfetch multiplier for catalog listing.
pub const DEFAULT_OVERFETCH_FACTOR: usize = 25;

/// Log catalog configuration.
///
/// `overfetch_factor` should be at least `shard_count`; below that a log
/// name can be split across listing pages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Shards a single log name's catalog writes are spread over.
    pub shard_count: u32,
    /// Raw rows fetched per requested log name when listing.
    pub overfetch_factor: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }
}

impl CatalogConfig {
    /// Whether listing can split a log name across pages.
    pub fn overfetch_covers_shards(&self) -> bool {
        self.overfetch_factor >= self.shard_count as usize
    }
}
