//! Request and response types of the query entry points.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::sequence::SequenceToken;

/// Append one event to a log.
#[derive(Debug, Clone, Default)]
pub struct AppendRequest {
    pub log: String,
    pub event_type: String,
    /// Stream id; a fresh id is generated when absent.
    pub id: Option<String>,
    /// Structured payload; defaults to an empty object.
    pub payload: Option<Value>,
}

/// List known log names.
#[derive(Debug, Clone, Default)]
pub struct LogListRequest {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub selection: Option<BTreeSet<String>>,
}

/// Read the events of one stream within a log.
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    pub log: String,
    pub id: String,
    pub reverse: bool,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub selection: Option<BTreeSet<String>>,
}

/// Read every event of a log.
#[derive(Debug, Clone, Default)]
pub struct LogStreamRequest {
    pub log: String,
    pub reverse: bool,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub selection: Option<BTreeSet<String>>,
}

/// A log name with the latest sequence seen for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<SequenceToken>,
}

/// An event as seen from its stream. Unselected fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<SequenceToken>,
    /// Epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// An event as seen from its log, carrying its stream id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub event: StreamEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogListPage {
    pub logs: Vec<LogSummary>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamPage {
    pub streams: Vec<StreamEvent>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogStreamPage {
    pub streams: Vec<LogEvent>,
    pub cursor: Option<String>,
}
