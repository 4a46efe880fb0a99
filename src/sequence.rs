//! Sequence token generation.
//!
//! Two strategies, chosen once per deployment:
//! - [`CounterSequence`]: per-log atomic counter held by the store.
//! - [`TimeOrderedSequence`]: millisecond timestamp plus an 80 bit random
//!   tail, rendered as 26 Crockford base32 characters.
//!
//! Both render tokens whose lexicographic order is their sequence order,
//! so stores can use them directly as sort keys. Tokens from the two
//! strategies are not comparable with each other.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{SequenceConfig, SequenceStrategy};
use crate::error::{LogStackError, Result};
use crate::storage::schema::{COUNTER_PARTITION, LOG_SEQUENCE};
use crate::storage::{KeyValueStore, PrimaryKey, StorageError};

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const TAIL_BITS: u32 = 80;
const TAIL_MASK: u128 = (1 << TAIL_BITS) - 1;
const TIMESTAMP_MASK: u64 = (1 << 48) - 1;

/// Opaque, totally ordered token assigned to each event at append time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceToken(String);

impl SequenceToken {
    /// Token for a counter value: 20 zero-padded decimal digits.
    pub fn from_counter(value: u64) -> Self {
        Self(format!("{value:020}"))
    }

    /// Token for a 128 bit time-ordered value.
    pub fn from_time_ordered(value: u128) -> Self {
        let mut encoded = [0u8; 26];
        let mut rest = value;
        for slot in encoded.iter_mut().rev() {
            *slot = CROCKFORD[(rest & 0x1f) as usize];
            rest >>= 5;
        }
        // Every byte comes from the ASCII alphabet.
        Self(encoded.iter().map(|&b| b as char).collect())
    }

    /// Wrap a token read back from storage.
    pub(crate) fn from_stored(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces sequence tokens for a log.
#[async_trait]
pub trait SequenceGenerator: Send + Sync {
    async fn next(&self, log: &str) -> Result<SequenceToken>;
}

/// Gapless per-log counter backed by the store's atomic increment.
///
/// Every appender to a log serializes on that log's counter row.
pub struct CounterSequence {
    store: Arc<dyn KeyValueStore>,
}

impl CounterSequence {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SequenceGenerator for CounterSequence {
    async fn next(&self, log: &str) -> Result<SequenceToken> {
        let key = PrimaryKey::new(COUNTER_PARTITION, log);
        let value = self.store.increment(&key, LOG_SEQUENCE, 1).await?;
        let value = u64::try_from(value).map_err(|_| {
            LogStackError::Storage(StorageError::NotANumber {
                attribute: LOG_SEQUENCE.to_string(),
            })
        })?;

        debug!(log = %log, sequence = value, "Allocated counter sequence");
        Ok(SequenceToken::from_counter(value))
    }
}

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

/// Time-ordered tokens: 48 bit millisecond timestamp, 80 bit tail.
///
/// A fresh millisecond gets a random tail. When the clock has not moved
/// past the last issued token, the last token is incremented instead, so
/// tokens from one generator strictly increase.
pub struct TimeOrderedSequence {
    clock: Clock,
    last: Mutex<Option<u128>>,
}

impl TimeOrderedSequence {
    pub fn new() -> Self {
        Self::with_clock(|| chrono::Utc::now().timestamp_millis().max(0) as u64)
    }

    /// Use a custom millisecond clock.
    pub fn with_clock(clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            last: Mutex::new(None),
        }
    }

    fn next_value(&self) -> Result<u128> {
        let now = ((self.clock)() & TIMESTAMP_MASK) as u128;
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let value = match *last {
            Some(previous) if previous >> TAIL_BITS >= now => previous
                .checked_add(1)
                .ok_or_else(|| LogStackError::Unknown("sequence space exhausted".to_string()))?,
            _ => (now << TAIL_BITS) | (rand::rng().random::<u128>() & TAIL_MASK),
        };

        *last = Some(value);
        Ok(value)
    }
}

impl Default for TimeOrderedSequence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SequenceGenerator for TimeOrderedSequence {
    async fn next(&self, log: &str) -> Result<SequenceToken> {
        let token = SequenceToken::from_time_ordered(self.next_value()?);
        debug!(log = %log, sequence = %token, "Allocated time-ordered sequence");
        Ok(token)
    }
}

/// Build the configured generator.
pub fn from_config(
    config: &SequenceConfig,
    store: Arc<dyn KeyValueStore>,
) -> Arc<dyn SequenceGenerator> {
    match config.strategy {
        SequenceStrategy::Counter => Arc::new(CounterSequence::new(store)),
        SequenceStrategy::Time => Arc::new(TimeOrderedSequence::new()),
    }
}
