//! SQLite KeyValueStore implementation.
//!
//! One `items` table keyed by `(pk, sk)`. Secondary index attributes are
//! copied into columns so range scans use SQL indexes; the whole item is
//! kept as JSON. Projections are applied after decoding.

use async_trait::async_trait;
use sea_query::{
    Cond, Expr, OnConflict, Order, Query as SqlQuery, SqliteQueryBuilder, Value as SqlValue,
};
use sea_query_binder::SqlxBinder;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::storage::schema::{Items, CREATE_ITEMS_TABLE, LOG_KEY, SEQUENCE, STREAM_KEY};
use crate::storage::{
    project, supersedes, Index, Item, KeyValueStore, PrimaryKey, Query, QueryPage, Result,
    StorageError,
};

/// SQLite implementation of KeyValueStore.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_ITEMS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    fn column(attribute: &str) -> Result<Items> {
        Items::for_attribute(attribute)
            .ok_or_else(|| StorageError::InvalidStartKey(attribute.to_string()))
    }

    /// Optional string attribute copied into an index column.
    fn index_value(item: &Item, attribute: &str) -> SqlValue {
        item.get(attribute)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .into()
    }

    fn insert_statement(item: &Item) -> Result<sea_query::InsertStatement> {
        let key = PrimaryKey::of(item)?;
        let attributes = serde_json::to_string(item)?;

        let mut insert = SqlQuery::insert();
        insert
            .into_table(Items::Table)
            .columns([
                Items::Pk,
                Items::Sk,
                Items::LogKey,
                Items::StreamKey,
                Items::Sequence,
                Items::Attributes,
            ])
            .values_panic([
                key.partition.into(),
                key.sort.into(),
                Self::index_value(item, LOG_KEY).into(),
                Self::index_value(item, STREAM_KEY).into(),
                Self::index_value(item, SEQUENCE).into(),
                attributes.into(),
            ]);
        Ok(insert)
    }

    /// Condition selecting rows strictly after (or before) a position.
    fn after_position(index: &Index, query: &Query) -> Result<Option<Cond>> {
        let Some(start) = query.exclusive_start.as_ref() else {
            return Ok(None);
        };
        let position = index.start_position(start)?;
        let sort = Self::column(index.sort_key)?;

        let beyond = |column: Items, value: String| {
            if query.forward {
                Expr::col(column).gt(value)
            } else {
                Expr::col(column).lt(value)
            }
        };

        // (sort, pk, sk) compared lexicographically
        Ok(Some(
            Cond::any()
                .add(beyond(sort, position.sort.clone()))
                .add(
                    Cond::all()
                        .add(Expr::col(sort).eq(position.sort))
                        .add(
                            Cond::any()
                                .add(beyond(Items::Pk, position.partition.clone()))
                                .add(
                                    Cond::all()
                                        .add(Expr::col(Items::Pk).eq(position.partition))
                                        .add(beyond(Items::Sk, position.primary_sort)),
                                ),
                        ),
                ),
        ))
    }

    async fn fetch_in(conn: &mut SqliteConnection, key: &PrimaryKey) -> Result<Option<Item>> {
        let (sql, values) = SqlQuery::select()
            .column(Items::Attributes)
            .from(Items::Table)
            .and_where(Expr::col(Items::Pk).eq(key.partition.as_str()))
            .and_where(Expr::col(Items::Sk).eq(key.sort.as_str()))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => {
                let attributes: String = row.get("attributes");
                Ok(Some(serde_json::from_str::<Item>(&attributes)?))
            }
            None => Ok(None),
        }
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(conn: &mut SqliteConnection, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(error = %rollback, cause = %e, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn put_if_greater_in(
        conn: &mut SqliteConnection,
        item: &Item,
        attribute: &str,
    ) -> Result<bool> {
        let key = PrimaryKey::of(item)?;
        let stored = Self::fetch_in(conn, &key).await?;
        if !supersedes(stored.as_ref(), item, attribute)? {
            return Ok(false);
        }
        Self::upsert_in(conn, item).await?;
        Ok(true)
    }

    async fn increment_in(
        conn: &mut SqliteConnection,
        key: &PrimaryKey,
        attribute: &str,
        by: i64,
    ) -> Result<i64> {
        let mut item = match Self::fetch_in(conn, key).await? {
            Some(item) => item,
            None => {
                let mut item = Item::new();
                item.insert(crate::storage::schema::PK.to_string(), key.partition.clone().into());
                item.insert(crate::storage::schema::SK.to_string(), key.sort.clone().into());
                item
            }
        };

        let current = match item.get(attribute) {
            None => 0,
            Some(value) => value.as_i64().ok_or_else(|| StorageError::NotANumber {
                attribute: attribute.to_string(),
            })?,
        };
        let next = current + by;
        item.insert(attribute.to_string(), next.into());

        Self::upsert_in(conn, &item).await?;
        Ok(next)
    }

    async fn upsert_in(conn: &mut SqliteConnection, item: &Item) -> Result<()> {
        let (sql, values) = Self::insert_statement(item)?
            .on_conflict(
                OnConflict::columns([Items::Pk, Items::Sk])
                    .update_columns([
                        Items::LogKey,
                        Items::StreamKey,
                        Items::Sequence,
                        Items::Attributes,
                    ])
                    .to_owned(),
            )
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values).execute(&mut *conn).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn query(&self, query: Query) -> Result<QueryPage> {
        let index = query.index;
        let partition_column = Self::column(index.partition_key)?;
        let sort_column = Self::column(index.sort_key)?;
        let order = if query.forward { Order::Asc } else { Order::Desc };

        let mut select = SqlQuery::select();
        select
            .column(Items::Attributes)
            .from(Items::Table)
            .order_by(sort_column, order.clone())
            .order_by(Items::Pk, order.clone())
            .order_by(Items::Sk, order)
            .limit(query.limit.min(i64::MAX as usize - 1) as u64 + 1);

        let mut condition = Cond::all()
            .add(Expr::col(partition_column).eq(query.partition.as_str()))
            .add(Expr::col(sort_column).is_not_null());
        if let Some(after) = Self::after_position(&index, &query)? {
            condition = condition.add(after);
        }
        select.cond_where(condition);

        let (sql, values) = select.build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;

        let has_more = rows.len() > query.limit;
        let mut items = Vec::with_capacity(rows.len().min(query.limit));
        for row in rows.into_iter().take(query.limit) {
            let attributes: String = row.get("attributes");
            items.push(serde_json::from_str::<Item>(&attributes)?);
        }

        let last_key = match items.last() {
            Some(item) if has_more => Some(index.last_key(item)?),
            _ => None,
        };

        let items: Vec<Item> = items
            .into_iter()
            .map(|item| project(item, query.projection.as_ref()))
            .collect();

        debug!(
            index = index.name,
            partition = %query.partition,
            count = items.len(),
            has_more,
            "Queried sqlite store"
        );

        Ok(QueryPage { items, last_key })
    }

    async fn increment(&self, key: &PrimaryKey, attribute: &str, by: i64) -> Result<i64> {
        // BEGIN IMMEDIATE acquires the write lock upfront so concurrent
        // increments serialize instead of racing on the read.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = Self::increment_in(&mut conn, key, attribute, by).await;
        Self::finish(&mut conn, result).await
    }

    async fn put(&self, item: Item) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::upsert_in(&mut conn, &item).await
    }

    async fn put_if_absent(&self, item: Item) -> Result<()> {
        let key = PrimaryKey::of(&item)?;
        let (sql, values) = Self::insert_statement(&item)?.build_sqlx(SqliteQueryBuilder);

        match sqlx::query_with(&sql, values).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::ConditionFailed {
                    partition: key.partition,
                    sort: key.sort,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put_if_greater(&self, item: Item, attribute: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = Self::put_if_greater_in(&mut conn, &item, attribute).await;
        Self::finish(&mut conn, result).await
    }
}
