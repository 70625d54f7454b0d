//! Keyed JSON record tables
//!
//! Tasks, staged facts, and open questions are small documents that are
//! read and rewritten by key. Each lives in its own LanceDB table with a
//! few indexed columns for filtering and the full record as JSON.

use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMicrosecondArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{RecallError, Result};
use crate::storage::filter::escape_sql;
use crate::storage::lance::{open_or_create, string_column};

/// Columns available to `RecordTable::list` filters
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub owner_id: Option<String>,
    pub statuses: Option<Vec<String>>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.statuses = Some(statuses.into_iter().map(Into::into).collect());
        self
    }

    fn to_sql_clause(&self) -> Option<String> {
        let mut conditions = Vec::new();

        if let Some(ref owner_id) = self.owner_id {
            conditions.push(format!("owner_id = '{}'", escape_sql(owner_id)));
        }

        if let Some(ref statuses) = self.statuses {
            let in_clause = statuses
                .iter()
                .map(|s| format!("'{}'", escape_sql(s)))
                .collect::<Vec<_>>()
                .join(", ");
            if in_clause.is_empty() {
                // An empty status set matches nothing
                conditions.push("status = ''".to_string());
            } else {
                conditions.push(format!("status IN ({in_clause})"));
            }
        }

        if conditions.is_empty() {
            None
        } else {
            Some(conditions.join(" AND "))
        }
    }
}

/// A LanceDB table of `(key, owner_id, status, updated_at, payload)` rows
pub struct RecordTable {
    table: Table,
    name: &'static str,
}

impl RecordTable {
    pub(crate) async fn open(connection: &Connection, name: &'static str) -> Result<Self> {
        let schema = Self::schema();
        let empty = Self::to_batch(&[], schema.clone())?;
        let table = open_or_create(connection, name, empty, schema).await?;
        Ok(Self { table, name })
    }

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("key", DataType::Utf8, false),
            Field::new("owner_id", DataType::Utf8, false),
            Field::new("status", DataType::Utf8, false),
            Field::new(
                "updated_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("payload", DataType::Utf8, false),
        ]))
    }

    fn to_batch(rows: &[(&str, &str, &str, String)], schema: SchemaRef) -> Result<RecordBatch> {
        let now = Utc::now().timestamp_micros();
        let keys: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let owners: Vec<&str> = rows.iter().map(|r| r.1).collect();
        let statuses: Vec<&str> = rows.iter().map(|r| r.2).collect();
        let updated: Vec<i64> = rows.iter().map(|_| now).collect();
        let payloads: Vec<&str> = rows.iter().map(|r| r.3.as_str()).collect();

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(keys)),
                Arc::new(StringArray::from(owners)),
                Arc::new(StringArray::from(statuses)),
                Arc::new(TimestampMicrosecondArray::from(updated).with_timezone("UTC")),
                Arc::new(StringArray::from(payloads)),
            ],
        )
        .map_err(|e| RecallError::Storage(format!("Failed to create RecordBatch: {e}")))
    }

    /// Insert or overwrite the record stored under `key`.
    ///
    /// Callers serialize writers for the same key; two concurrent first
    /// writes of one key would both insert.
    pub async fn upsert<T: Serialize>(
        &self,
        key: &str,
        owner_id: &str,
        status: &str,
        record: &T,
    ) -> Result<()> {
        let payload = serde_json::to_string(record)?;

        let update_result = self
            .table
            .update()
            .only_if(format!("key = '{}'", escape_sql(key)))
            .column("owner_id", format!("'{}'", escape_sql(owner_id)))
            .column("status", format!("'{}'", escape_sql(status)))
            .column("updated_at", format!("{}", Utc::now().timestamp_micros()))
            .column("payload", format!("'{}'", escape_sql(&payload)))
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to update {} record: {e}", self.name)))?;

        if update_result.rows_updated > 0 {
            return Ok(());
        }

        let schema = Self::schema();
        let batch = Self::to_batch(&[(key, owner_id, status, payload)], schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to insert {} record: {e}", self.name)))?;

        Ok(())
    }

    /// Fetch the record stored under `key`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut records = self
            .query(Some(format!("key = '{}'", escape_sql(key))), Some(1))
            .await?;
        Ok(records.pop())
    }

    /// All records matching `filter`
    pub async fn list<T: DeserializeOwned>(&self, filter: &RecordFilter) -> Result<Vec<T>> {
        self.query(filter.to_sql_clause(), None).await
    }

    /// Remove the record under `key`. Returns false if there was none
    pub async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.delete_keys(&[key.to_string()]).await? > 0)
    }

    /// Remove the records under `keys`, returning how many existed
    pub async fn delete_keys(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let in_clause = keys
            .iter()
            .map(|k| format!("'{}'", escape_sql(k)))
            .collect::<Vec<_>>()
            .join(", ");
        let clause = format!("key IN ({in_clause})");

        let existing = self
            .table
            .count_rows(Some(clause.clone()))
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to count {} rows: {e}", self.name)))?;

        if existing == 0 {
            return Ok(0);
        }

        self.table
            .delete(&clause)
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to delete {} records: {e}", self.name)))?;

        Ok(existing)
    }

    async fn query<T: DeserializeOwned>(
        &self,
        clause: Option<String>,
        limit: Option<usize>,
    ) -> Result<Vec<T>> {
        let mut query = self.table.query();
        if let Some(clause) = clause {
            query = query.only_if(clause);
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        let stream = query
            .execute()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to query {} table: {e}", self.name)))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| RecallError::Storage(format!("Failed to collect {} rows: {e}", self.name)))?;

        let mut records = Vec::new();
        for batch in &batches {
            let payloads = string_column(batch, "payload")?;
            for row in 0..batch.num_rows() {
                records.push(serde_json::from_str(payloads.value(row))?);
            }
        }
        Ok(records)
    }
}
