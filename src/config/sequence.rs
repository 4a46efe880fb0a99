//! Sequence token configuration.

use serde::Deserialize;

/// How sequence tokens are produced. Chosen once per deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceStrategy {
    /// Per-log atomic counter in the store. Gapless.
    #[default]
    Counter,
    /// Millisecond timestamp plus random tail. No shared counter.
    Time,
}

/// Sequence token configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub strategy: SequenceStrategy,
}
