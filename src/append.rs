//! The append path: identity, sequencing, catalog registration and the
//! conditional event write, in that order.
//!
//! The three store calls are not transactional. A failure after the
//! sequence is allocated leaves a gap; a failure after the catalog write
//! leaves a catalog row for a log with no new event. Neither is retried
//! here.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::catalog::LogCatalog;
use crate::error::{LogStackError, Result};
use crate::event_store::{EventStore, NewEvent};
use crate::model::AppendRequest;
use crate::sequence::{SequenceGenerator, SequenceToken};

/// Source of event ids for appends that omit one.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random UUID v4 ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub id: String,
    pub sequence: SequenceToken,
}

/// Orchestrates a single append.
pub struct AppendCoordinator {
    sequences: Arc<dyn SequenceGenerator>,
    catalog: Arc<LogCatalog>,
    events: Arc<EventStore>,
    ids: Arc<dyn IdGenerator>,
}

impl AppendCoordinator {
    pub fn new(
        sequences: Arc<dyn SequenceGenerator>,
        catalog: Arc<LogCatalog>,
        events: Arc<EventStore>,
    ) -> Self {
        Self {
            sequences,
            catalog,
            events,
            ids: Arc::new(UuidGenerator),
        }
    }

    /// Replace the id source.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub async fn append(&self, request: AppendRequest) -> Result<Appended> {
        let AppendRequest {
            log,
            event_type,
            id,
            payload,
        } = request;

        require("log", &log)?;
        require("type", &event_type)?;
        let payload = structured_payload(payload)?;
        // An empty id is treated as absent.
        let id = id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.ids.generate());

        let sequence = self.sequences.next(&log).await?;
        self.catalog.register(&log, &sequence).await?;
        self.events
            .write_event(NewEvent {
                log: log.clone(),
                id: id.clone(),
                event_type: event_type.clone(),
                sequence: sequence.clone(),
                created_at: chrono::Utc::now().timestamp_millis(),
                payload,
            })
            .await?;

        info!(log = %log, id = %id, event_type = %event_type, sequence = %sequence, "Appended event");
        Ok(Appended { id, sequence })
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(LogStackError::validation(format!("{field} must be specified")));
    }
    Ok(())
}

fn structured_payload(payload: Option<Value>) -> Result<Value> {
    match payload {
        None | Some(Value::Null) => Ok(Value::Object(Default::default())),
        Some(value @ (Value::Object(_) | Value::Array(_))) => Ok(value),
        Some(_) => Err(LogStackError::validation(
            "payload must be a structured value",
        )),
    }
}
