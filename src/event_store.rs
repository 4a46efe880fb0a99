//! Event rows and their two read paths.
//!
//! Each event is written once into its log's event partition. The `stream`
//! index serves reads of one (log, id) stream and the `log` index serves
//! reads of a whole log, both ordered by sequence token.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{LogStackError, Result};
use crate::model::{LogEvent, StreamEvent};
use crate::projection::{ProjectionPlanner, STREAM_FIELDS};
use crate::sequence::SequenceToken;
use crate::storage::schema::{
    event_partition, event_sort, stream_key, CREATED_AT, ID, LOG_INDEX, LOG_KEY, PAYLOAD, PK,
    SEQUENCE, SK, STREAM_INDEX, STREAM_KEY, TYPE,
};
use crate::storage::{Index, Item, KeyValueStore, LastKey, Query, StorageError};

/// A fully resolved event, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub log: String,
    pub id: String,
    pub event_type: String,
    pub sequence: SequenceToken,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub payload: Value,
}

impl NewEvent {
    fn into_item(self) -> Item {
        let mut item = Item::new();
        item.insert(PK.to_string(), Value::from(event_partition(&self.log)));
        item.insert(
            SK.to_string(),
            Value::from(event_sort(&self.id, self.sequence.as_str())),
        );
        item.insert(LOG_KEY.to_string(), Value::from(self.log.as_str()));
        item.insert(
            STREAM_KEY.to_string(),
            Value::from(stream_key(&self.log, &self.id)),
        );
        item.insert(SEQUENCE.to_string(), Value::from(self.sequence.as_str()));
        item.insert(ID.to_string(), Value::from(self.id));
        item.insert(TYPE.to_string(), Value::from(self.event_type));
        item.insert(CREATED_AT.to_string(), Value::from(self.created_at));
        item.insert(PAYLOAD.to_string(), self.payload);
        item
    }
}

/// Parameters of one page read.
#[derive(Debug, Clone, Default)]
pub struct Scan {
    pub reverse: bool,
    pub limit: usize,
    /// Resume after this key.
    pub start: Option<LastKey>,
    /// Logical fields to return; `None` returns all of them.
    pub selection: Option<BTreeSet<String>>,
}

/// One page of events with the key to resume after.
#[derive(Debug, Clone)]
pub struct EventPage<T> {
    pub events: Vec<T>,
    pub last_key: Option<LastKey>,
}

/// Event storage over a [`KeyValueStore`].
pub struct EventStore {
    store: Arc<dyn KeyValueStore>,
}

impl EventStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Write an event into its (id, sequence) slot.
    ///
    /// An occupied slot is a `WriteConflict`; the existing row is untouched.
    pub async fn write_event(&self, event: NewEvent) -> Result<()> {
        let (log, id, sequence) = (
            event.log.clone(),
            event.id.clone(),
            event.sequence.to_string(),
        );

        match self.store.put_if_absent(event.into_item()).await {
            Ok(()) => {
                debug!(log = %log, id = %id, sequence = %sequence, "Wrote event");
                Ok(())
            }
            Err(StorageError::ConditionFailed { .. }) => {
                warn!(log = %log, id = %id, sequence = %sequence, "Event slot already written");
                Err(LogStackError::WriteConflict { log, id, sequence })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Events of one stream, ordered by sequence.
    pub async fn stream_by_id(&self, log: &str, id: &str, scan: Scan) -> Result<EventPage<StreamEvent>> {
        let selection = scan.selection.clone();
        let (items, last_key) = self
            .scan(STREAM_INDEX, stream_key(log, id), scan)
            .await?;

        Ok(EventPage {
            events: items
                .iter()
                .map(|item| stream_event(item, selection.as_ref()))
                .collect(),
            last_key,
        })
    }

    /// Events of a whole log, ordered by sequence.
    pub async fn log_stream(&self, log: &str, scan: Scan) -> Result<EventPage<LogEvent>> {
        let selection = scan.selection.clone();
        let (items, last_key) = self.scan(LOG_INDEX, log.to_string(), scan).await?;

        Ok(EventPage {
            events: items
                .iter()
                .map(|item| LogEvent {
                    id: wanted(item, ID, "id", selection.as_ref())
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    event: stream_event(item, selection.as_ref()),
                })
                .collect(),
            last_key,
        })
    }

    async fn scan(
        &self,
        index: Index,
        partition: String,
        scan: Scan,
    ) -> Result<(Vec<Item>, Option<LastKey>)> {
        let mut query = Query::new(index, partition, scan.limit);
        query.forward = !scan.reverse;
        query.exclusive_start = scan.start;
        query.projection =
            ProjectionPlanner::plan(scan.selection.as_ref(), STREAM_FIELDS, &index);

        let page = self.store.query(query).await?;
        Ok((page.items, page.last_key))
    }
}

fn wanted<'a>(
    item: &'a Item,
    attribute: &str,
    field: &str,
    selection: Option<&BTreeSet<String>>,
) -> Option<&'a Value> {
    if ProjectionPlanner::wants(selection, field) {
        item.get(attribute)
    } else {
        None
    }
}

fn stream_event(item: &Item, selection: Option<&BTreeSet<String>>) -> StreamEvent {
    StreamEvent {
        event_type: wanted(item, TYPE, "type", selection)
            .and_then(Value::as_str)
            .map(str::to_string),
        sequence: wanted(item, SEQUENCE, "sequence", selection)
            .and_then(Value::as_str)
            .map(|token| SequenceToken::from_stored(token.to_string())),
        created_at: wanted(item, CREATED_AT, "createdAt", selection).and_then(Value::as_i64),
        payload: wanted(item, PAYLOAD, "payload", selection).cloned(),
    }
}
