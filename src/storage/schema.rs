//! Single-table layout shared by every store backend.
//!
//! | Row kind | pk                 | sk                      |
//! |----------|--------------------|-------------------------|
//! | counter  | `log-sequence`     | `{log}`                 |
//! | catalog  | `log-catalog`      | `{log}\x01{shard:02}`   |
//! | event    | `{log}\x01events`  | `{id}\x01{sequence}`    |
//!
//! Event rows are also reachable through the `log` index (`logKey`,
//! `sequence`) and the `stream` index (`streamKey`, `sequence`).
//!
//! Log names and ids are escaped before they go into a composite key.

use super::Index;

/// Partition key attribute.
pub const PK: &str = "pk";
/// Sort key attribute.
pub const SK: &str = "sk";
/// Log name an event belongs to (partition of the `log` index).
pub const LOG_KEY: &str = "logKey";
/// Log name and stream id of an event (partition of the `stream` index).
pub const STREAM_KEY: &str = "streamKey";
/// Sequence token of an event (sort key of both secondary indexes).
pub const SEQUENCE: &str = "sequence";
/// Counter value on counter rows, observed sequence on catalog rows.
pub const LOG_SEQUENCE: &str = "logSequence";
pub const NAME: &str = "name";
pub const SHARD: &str = "shard";
pub const ID: &str = "id";
pub const TYPE: &str = "type";
pub const CREATED_AT: &str = "createdAt";
pub const PAYLOAD: &str = "payload";

/// Separator between components of composite keys.
pub const SEPARATOR: char = '\u{1}';

/// Low sentinel appended to a log name to position a scan just before the
/// first catalog row of that name.
pub const SENTINEL: char = '\u{0}';

/// Escape character for key components.
///
/// Escaped components never contain `SEPARATOR` or `SENTINEL`, so a
/// component followed by the separator is never a prefix of another.
pub const ESCAPE: char = '\u{2}';

/// Partition holding one counter row per log.
pub const COUNTER_PARTITION: &str = "log-sequence";

/// Partition holding the sharded log catalog.
pub const CATALOG_PARTITION: &str = "log-catalog";

pub const PRIMARY_INDEX: Index = Index {
    name: "primary",
    partition_key: PK,
    sort_key: SK,
};

pub const LOG_INDEX: Index = Index {
    name: "log",
    partition_key: LOG_KEY,
    sort_key: SEQUENCE,
};

pub const STREAM_INDEX: Index = Index {
    name: "stream",
    partition_key: STREAM_KEY,
    sort_key: SEQUENCE,
};

/// Escape a key component.
pub fn escape(component: &str) -> String {
    let mut escaped = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            SENTINEL => escaped.extend([ESCAPE, '0']),
            SEPARATOR => escaped.extend([ESCAPE, '1']),
            ESCAPE => escaped.extend([ESCAPE, '2']),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Reverse [`escape`].
pub fn unescape(escaped: &str) -> String {
    let mut component = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != ESCAPE {
            component.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => component.push(SENTINEL),
            Some('1') => component.push(SEPARATOR),
            Some('2') => component.push(ESCAPE),
            Some(other) => component.extend([ESCAPE, other]),
            None => component.push(ESCAPE),
        }
    }
    component
}

/// Partition of the event rows of a log.
pub fn event_partition(log: &str) -> String {
    format!("{}{SEPARATOR}events", escape(log))
}

/// Sort key of an event row: one slot per (id, sequence).
pub fn event_sort(id: &str, sequence: &str) -> String {
    format!("{}{SEPARATOR}{sequence}", escape(id))
}

/// Partition of the `stream` index for one (log, id) pair.
pub fn stream_key(log: &str, id: &str) -> String {
    format!("{}{SEPARATOR}{}", escape(log), escape(id))
}

/// Sort key of a catalog row.
pub fn catalog_sort(log: &str, shard: u32) -> String {
    format!("{}{SEPARATOR}{shard:02}", escape(log))
}

/// Log name of a catalog sort key.
pub fn catalog_name(sort: &str) -> String {
    unescape(sort.split(SEPARATOR).next().unwrap_or(sort))
}

/// Catalog sort key that positions a scan before every shard row of `log`.
pub fn catalog_boundary(log: &str) -> String {
    format!("{}{SENTINEL}", escape(log))
}

#[cfg(feature = "sqlite")]
pub use self::sql::*;

#[cfg(feature = "sqlite")]
mod sql {
    use sea_query::Iden;

    use super::{LOG_KEY, PK, SEQUENCE, SK, STREAM_KEY};

    /// Items table schema.
    ///
    /// Index attributes are materialized as columns; the full item is kept
    /// as JSON in `attributes`.
    #[derive(Iden, Clone, Copy)]
    pub enum Items {
        Table,
        #[iden = "pk"]
        Pk,
        #[iden = "sk"]
        Sk,
        #[iden = "log_key"]
        LogKey,
        #[iden = "stream_key"]
        StreamKey,
        #[iden = "sequence"]
        Sequence,
        #[iden = "attributes"]
        Attributes,
    }

    impl Items {
        /// Column materializing a key attribute.
        pub fn for_attribute(attribute: &str) -> Option<Self> {
            match attribute {
                PK => Some(Self::Pk),
                SK => Some(Self::Sk),
                LOG_KEY => Some(Self::LogKey),
                STREAM_KEY => Some(Self::StreamKey),
                SEQUENCE => Some(Self::Sequence),
                _ => None,
            }
        }
    }

    /// SQL for creating the items table.
    pub const CREATE_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    pk TEXT NOT NULL,
    sk TEXT NOT NULL,
    log_key TEXT,
    stream_key TEXT,
    sequence TEXT,
    attributes TEXT NOT NULL,
    PRIMARY KEY (pk, sk)
);

CREATE INDEX IF NOT EXISTS idx_items_log ON items(log_key, sequence, pk, sk);
CREATE INDEX IF NOT EXISTS idx_items_stream ON items(stream_key, sequence, pk, sk);
"#;
}
