//! Logstack - append-only multi-log event store
//!
//! Events are appended to named logs and grouped into streams by id.
//! Readers list the known logs through a sharded catalog, or page through
//! one log or one stream in sequence order with opaque cursors. All state
//! lives in an ordered key-value store (in-memory, SQLite or DynamoDB).

pub mod append;
pub mod catalog;
pub mod config;
pub mod cursor;
pub mod error;
pub mod event_store;
pub mod model;
pub mod projection;
pub mod sequence;
pub mod service;
pub mod storage;
pub mod utils;

pub use error::{ErrorEnvelope, LogStackError, Result};
pub use model::{
    AppendRequest, LogEvent, LogListPage, LogListRequest, LogStreamPage, LogStreamRequest,
    LogSummary, StreamEvent, StreamPage, StreamRequest,
};
pub use sequence::SequenceToken;
pub use service::LogService;
