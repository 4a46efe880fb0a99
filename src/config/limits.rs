//! Query result limits.

use serde::Deserialize;

/// Default maximum items returned per page.
pub const DEFAULT_QUERY_LIMIT: usize = 1000;

/// Query defaults applied when a request omits them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Page size used when a request has no `limit`.
    pub default_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_QUERY_LIMIT,
        }
    }
}
