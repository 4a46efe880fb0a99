//! DynamoDB KeyValueStore implementation.
//!
//! Table schema:
//! - Primary key: `pk` (String, HASH), `sk` (String, RANGE)
//! - GSI `log`: `logKey` (String, HASH), `sequence` (String, RANGE)
//! - GSI `stream`: `streamKey` (String, HASH), `sequence` (String, RANGE)
//!
//! Both GSIs project all attributes. Sequence tokens are unique within a
//! GSI partition, so DynamoDB's ordering matches the `(sort, pk, sk)`
//! order the other backends use.

mod attributes;

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use tracing::{debug, info};

use crate::storage::schema::{PK, SK};
use crate::storage::{
    string_attribute, Item, KeyValueStore, LastKey, PrimaryKey, Query, QueryPage, Result,
    StorageError,
};

pub use attributes::{from_attribute, from_item, to_attribute, to_item};

/// DynamoDB implementation of KeyValueStore.
pub struct DynamoStore {
    client: Client,
    table_name: String,
}

impl DynamoStore {
    /// Create a new DynamoDB store.
    ///
    /// # Arguments
    /// * `table_name` - Table holding counters, catalog and events
    /// * `endpoint_url` - Override endpoint (e.g. DynamoDB Local)
    pub async fn new(table_name: impl Into<String>, endpoint_url: Option<&str>) -> Result<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        let client = if let Some(endpoint) = endpoint_url {
            let dynamo_config = aws_sdk_dynamodb::config::Builder::from(&config)
                .endpoint_url(endpoint)
                .build();
            Client::from_conf(dynamo_config)
        } else {
            Client::new(&config)
        };

        let table_name = table_name.into();
        info!(table = %table_name, "Connected to DynamoDB");

        Ok(Self { client, table_name })
    }

    fn key_map(start: &LastKey) -> HashMap<String, AttributeValue> {
        start
            .iter()
            .map(|(name, value)| (name.clone(), AttributeValue::S(value.clone())))
            .collect()
    }

    fn last_key(key: HashMap<String, AttributeValue>) -> Result<LastKey> {
        key.into_iter()
            .map(|(name, value)| match value {
                AttributeValue::S(value) => Ok((name, value)),
                other => Err(StorageError::Dynamo(format!(
                    "non-string key attribute {name}: {other:?}"
                ))),
            })
            .collect()
    }
}

#[async_trait]
impl KeyValueStore for DynamoStore {
    async fn query(&self, query: Query) -> Result<QueryPage> {
        let index = query.index;

        let mut request = self
            .client
            .query()
            .table_name(&self.table_name)
            .key_condition_expression("#p = :p")
            .expression_attribute_names("#p", index.partition_key)
            .expression_attribute_values(":p", AttributeValue::S(query.partition.clone()))
            .scan_index_forward(query.forward)
            .limit(i32::try_from(query.limit).unwrap_or(i32::MAX));

        if !index.is_primary() {
            request = request.index_name(index.name);
        }

        if let Some(start) = &query.exclusive_start {
            request = request.set_exclusive_start_key(Some(Self::key_map(start)));
        }

        if let Some(projection) = &query.projection {
            let mut placeholders = Vec::with_capacity(projection.len());
            for (i, attribute) in projection.iter().enumerate() {
                let placeholder = format!("#a{i}");
                request = request.expression_attribute_names(&placeholder, attribute);
                placeholders.push(placeholder);
            }
            request = request.projection_expression(placeholders.join(", "));
        }

        let output = request.send().await.map_err(|e| {
            StorageError::Dynamo(format!("DynamoDB query failed: {}", DisplayErrorContext(&e)))
        })?;

        let items = output
            .items
            .unwrap_or_default()
            .into_iter()
            .map(from_item)
            .collect::<Result<Vec<Item>>>()?;

        let last_key = output.last_evaluated_key.map(Self::last_key).transpose()?;

        debug!(
            table = %self.table_name,
            index = index.name,
            partition = %query.partition,
            count = items.len(),
            "Queried DynamoDB"
        );

        Ok(QueryPage { items, last_key })
    }

    async fn increment(&self, key: &PrimaryKey, attribute: &str, by: i64) -> Result<i64> {
        let output = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(PK, AttributeValue::S(key.partition.clone()))
            .key(SK, AttributeValue::S(key.sort.clone()))
            .update_expression("ADD #a :incr")
            .expression_attribute_names("#a", attribute)
            .expression_attribute_values(":incr", AttributeValue::N(by.to_string()))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await
            .map_err(|e| {
                StorageError::Dynamo(format!(
                    "DynamoDB update_item failed: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        match output.attributes.as_ref().and_then(|a| a.get(attribute)) {
            Some(AttributeValue::N(value)) => {
                value.parse::<i64>().map_err(|_| StorageError::NotANumber {
                    attribute: attribute.to_string(),
                })
            }
            _ => Err(StorageError::NotANumber {
                attribute: attribute.to_string(),
            }),
        }
    }

    async fn put(&self, item: Item) -> Result<()> {
        PrimaryKey::of(&item)?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_item(&item)))
            .send()
            .await
            .map_err(|e| {
                StorageError::Dynamo(format!(
                    "DynamoDB put_item failed: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(())
    }

    async fn put_if_absent(&self, item: Item) -> Result<()> {
        let key = PrimaryKey::of(&item)?;

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_item(&item)))
            .condition_expression("attribute_not_exists(#sk)")
            .expression_attribute_names("#sk", SK)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false) =>
            {
                Err(StorageError::ConditionFailed {
                    partition: key.partition,
                    sort: key.sort,
                })
            }
            Err(e) => Err(StorageError::Dynamo(format!(
                "DynamoDB put_item failed: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }

    async fn put_if_greater(&self, item: Item, attribute: &str) -> Result<bool> {
        PrimaryKey::of(&item)?;
        let candidate = string_attribute(&item, attribute)?.to_string();

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_item(&item)))
            .condition_expression("attribute_not_exists(#sk) OR attribute_not_exists(#a) OR #a < :v")
            .expression_attribute_names("#sk", SK)
            .expression_attribute_names("#a", attribute)
            .expression_attribute_values(":v", AttributeValue::S(candidate))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e)
                if e.as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false) =>
            {
                Ok(false)
            }
            Err(e) => Err(StorageError::Dynamo(format!(
                "DynamoDB put_item failed: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }
}
