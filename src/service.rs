//! Query and append entry points.
//!
//! `LogService` is what an edge (the CLI, a query-language resolver, an
//! HTTP handler) talks to. It resolves defaults, decodes cursors and plans
//! projections, then hands off to the catalog, the event store or the
//! append coordinator.

use std::sync::Arc;

use tracing::debug;

use crate::append::{AppendCoordinator, IdGenerator};
use crate::catalog::LogCatalog;
use crate::config::Config;
use crate::cursor::CursorCodec;
use crate::error::{LogStackError, Result};
use crate::event_store::{EventStore, Scan};
use crate::model::{
    AppendRequest, LogListPage, LogListRequest, LogStreamPage, LogStreamRequest, LogSummary,
    StreamPage, StreamRequest,
};
use crate::projection::{ProjectionPlanner, LOG_LIST_FIELDS};
use crate::sequence::{self, SequenceGenerator};
use crate::storage::schema::{stream_key, CATALOG_PARTITION, LOG_INDEX, PRIMARY_INDEX, STREAM_INDEX};
use crate::storage::{init_storage, KeyValueStore, LastKey};

/// The log store's public operations.
pub struct LogService {
    appender: AppendCoordinator,
    catalog: Arc<LogCatalog>,
    events: Arc<EventStore>,
    default_limit: usize,
}

impl LogService {
    /// Build the service over `store` with the configured sequence strategy.
    pub fn new(store: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        let sequences = sequence::from_config(&config.sequence, store.clone());
        Self::with_sequence_generator(store, config, sequences)
    }

    /// Build the service with an explicit sequence generator.
    pub fn with_sequence_generator(
        store: Arc<dyn KeyValueStore>,
        config: &Config,
        sequences: Arc<dyn SequenceGenerator>,
    ) -> Self {
        let catalog = Arc::new(LogCatalog::new(store.clone(), config.catalog.clone()));
        let events = Arc::new(EventStore::new(store));
        Self {
            appender: AppendCoordinator::new(sequences, catalog.clone(), events.clone()),
            catalog,
            events,
            default_limit: config.query.default_limit,
        }
    }

    /// Build the configured store and the service on top of it.
    pub async fn from_config(
        config: &Config,
    ) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        let store = init_storage(&config.storage).await?;
        Ok(Self::new(store, config))
    }

    /// Replace the source of generated event ids.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.appender = self.appender.with_id_generator(ids);
        self
    }

    /// Append an event and return its id.
    pub async fn append(&self, request: AppendRequest) -> Result<String> {
        Ok(self.appender.append(request).await?.id)
    }

    /// Distinct log names with their latest sequence.
    pub async fn log_list(&self, request: LogListRequest) -> Result<LogListPage> {
        let limit = self.limit(request.limit)?;
        let start = CursorCodec::decode_for(
            request.cursor.as_deref(),
            &PRIMARY_INDEX,
            CATALOG_PARTITION,
        )?;
        let selection = request.selection.as_ref();
        let projection = ProjectionPlanner::plan(selection, LOG_LIST_FIELDS, &PRIMARY_INDEX);

        let page = self.catalog.list(limit, start, projection).await?;
        debug!(count = page.entries.len(), "Listed logs");

        Ok(LogListPage {
            logs: page
                .entries
                .into_iter()
                .map(|entry| LogSummary {
                    name: ProjectionPlanner::wants(selection, "name").then_some(entry.name),
                    sequence: ProjectionPlanner::wants(selection, "sequence")
                        .then_some(entry.sequence),
                })
                .collect(),
            cursor: encode(page.last_key),
        })
    }

    /// Events of one stream within a log.
    pub async fn stream_by_id(&self, request: StreamRequest) -> Result<StreamPage> {
        require("log", &request.log)?;
        require("id", &request.id)?;
        let limit = self.limit(request.limit)?;
        let start = CursorCodec::decode_for(
            request.cursor.as_deref(),
            &STREAM_INDEX,
            &stream_key(&request.log, &request.id),
        )?;

        let page = self
            .events
            .stream_by_id(
                &request.log,
                &request.id,
                Scan {
                    reverse: request.reverse,
                    limit,
                    start,
                    selection: request.selection,
                },
            )
            .await?;
        debug!(log = %request.log, id = %request.id, count = page.events.len(), "Read stream");

        Ok(StreamPage {
            streams: page.events,
            cursor: encode(page.last_key),
        })
    }

    /// Events of a whole log.
    pub async fn log_stream(&self, request: LogStreamRequest) -> Result<LogStreamPage> {
        require("log", &request.log)?;
        let limit = self.limit(request.limit)?;
        let start = CursorCodec::decode_for(request.cursor.as_deref(), &LOG_INDEX, &request.log)?;

        let page = self
            .events
            .log_stream(
                &request.log,
                Scan {
                    reverse: request.reverse,
                    limit,
                    start,
                    selection: request.selection,
                },
            )
            .await?;
        debug!(log = %request.log, count = page.events.len(), "Read log");

        Ok(LogStreamPage {
            streams: page.events,
            cursor: encode(page.last_key),
        })
    }

    fn limit(&self, requested: Option<usize>) -> Result<usize> {
        match requested {
            None => Ok(self.default_limit),
            Some(0) => Err(LogStackError::validation("limit must be at least 1")),
            Some(limit) => Ok(limit),
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(LogStackError::validation(format!("{field} must be specified")));
    }
    Ok(())
}

fn encode(last_key: Option<LastKey>) -> Option<String> {
    last_key.as_ref().map(CursorCodec::encode)
}
