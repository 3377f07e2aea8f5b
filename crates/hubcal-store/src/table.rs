//! Key-value table storage.
//!
//! Records are addressed by `(table, partition, row)` and carry a flat map of
//! JSON properties. The scheduler keeps task and lock records here and the
//! collectors keep per-hub summary counts here.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use hubcal_core::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::StoreResult;

/// Property map of a table record.
pub type Properties = BTreeMap<String, Value>;

/// One record in a table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableEntity {
    /// Partition key.
    pub partition: String,
    /// Row key, unique within the partition.
    pub row: String,
    /// Record properties.
    pub properties: Properties,
}

impl TableEntity {
    /// Creates an entity with no properties.
    pub fn new(partition: impl Into<String>, row: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            row: row.into(),
            properties: Properties::new(),
        }
    }

    /// Builder method to set a property.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builder method to set a timestamp property, stored as RFC 3339.
    pub fn with_time(self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.with(key, value.to_rfc3339())
    }

    /// Returns a string property.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Returns a boolean property.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key).and_then(Value::as_bool)
    }

    /// Returns an integer property.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.properties.get(key).and_then(Value::as_u64)
    }

    /// Returns a timestamp property written by [`TableEntity::with_time`].
    pub fn get_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get_str(key)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Outcome of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record did not exist and was written.
    Inserted,
    /// A record with the same key already exists; nothing was written.
    AlreadyExists,
}

/// A table store.
///
/// `insert_if_absent` must be atomic with respect to every other caller of
/// the same backing store, including other processes for shared backends.
pub trait TableStore: Send + Sync {
    /// Inserts or merges a record: existing properties not present in
    /// `entity` are kept.
    fn upsert(&self, table: &str, entity: TableEntity) -> BoxFuture<'_, StoreResult<()>>;

    /// Reads one record.
    fn get(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> BoxFuture<'_, StoreResult<Option<TableEntity>>>;

    /// Reads every record of a partition, ordered by row key.
    fn query(&self, table: &str, partition: &str) -> BoxFuture<'_, StoreResult<Vec<TableEntity>>>;

    /// Writes a record only if no record with its key exists.
    fn insert_if_absent(
        &self,
        table: &str,
        entity: TableEntity,
    ) -> BoxFuture<'_, StoreResult<InsertOutcome>>;

    /// Deletes a record. Returns true if it existed.
    fn delete(&self, table: &str, partition: &str, row: &str) -> BoxFuture<'_, StoreResult<bool>>;
}

type Rows = BTreeMap<(String, String), Properties>;

/// In-process table store.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: RwLock<HashMap<String, Rows>>,
}

impl MemoryTableStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TableStore for MemoryTableStore {
    fn upsert(&self, table: &str, entity: TableEntity) -> BoxFuture<'_, StoreResult<()>> {
        let table = table.to_string();
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            let rows = tables.entry(table).or_default();
            let props = rows
                .entry((entity.partition, entity.row))
                .or_default();
            props.extend(entity.properties);
            Ok(())
        })
    }

    fn get(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> BoxFuture<'_, StoreResult<Option<TableEntity>>> {
        let table = table.to_string();
        let key = (partition.to_string(), row.to_string());
        Box::pin(async move {
            let tables = self.tables.read().await;
            Ok(tables
                .get(&table)
                .and_then(|rows| rows.get(&key))
                .map(|props| TableEntity {
                    partition: key.0.clone(),
                    row: key.1.clone(),
                    properties: props.clone(),
                }))
        })
    }

    fn query(&self, table: &str, partition: &str) -> BoxFuture<'_, StoreResult<Vec<TableEntity>>> {
        let table = table.to_string();
        let partition = partition.to_string();
        Box::pin(async move {
            let tables = self.tables.read().await;
            let Some(rows) = tables.get(&table) else {
                return Ok(Vec::new());
            };
            Ok(rows
                .iter()
                .filter(|((pk, _), _)| *pk == partition)
                .map(|((pk, rk), props)| TableEntity {
                    partition: pk.clone(),
                    row: rk.clone(),
                    properties: props.clone(),
                })
                .collect())
        })
    }

    fn insert_if_absent(
        &self,
        table: &str,
        entity: TableEntity,
    ) -> BoxFuture<'_, StoreResult<InsertOutcome>> {
        let table = table.to_string();
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            let rows = tables.entry(table).or_default();
            let key = (entity.partition, entity.row);
            if rows.contains_key(&key) {
                trace!(partition = %key.0, row = %key.1, "insert_if_absent: exists");
                return Ok(InsertOutcome::AlreadyExists);
            }
            rows.insert(key, entity.properties);
            Ok(InsertOutcome::Inserted)
        })
    }

    fn delete(&self, table: &str, partition: &str, row: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let table = table.to_string();
        let key = (partition.to_string(), row.to_string());
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            Ok(tables
                .get_mut(&table)
                .map(|rows| rows.remove(&key).is_some())
                .unwrap_or(false))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    mod entity {
        use super::*;

        #[test]
        fn typed_getters() {
            let when = Utc.with_ymd_and_hms(2024, 7, 4, 12, 0, 0).unwrap();
            let entity = TableEntity::new("master", "elmcity")
                .with("running", true)
                .with("count", 42)
                .with_time("start", when);

            assert_eq!(entity.get_bool("running"), Some(true));
            assert_eq!(entity.get_u64("count"), Some(42));
            assert_eq!(entity.get_time("start"), Some(when));
            assert!(entity.get_str("missing").is_none());
        }
    }

    mod memory {
        use super::*;

        #[tokio::test]
        async fn upsert_merges_properties() {
            let store = MemoryTableStore::new();
            store
                .upsert("metadata", TableEntity::new("hub", "hub").with("ical_events", 10))
                .await
                .unwrap();
            store
                .upsert("metadata", TableEntity::new("hub", "hub").with("eventful_events", 3))
                .await
                .unwrap();

            let row = store.get("metadata", "hub", "hub").await.unwrap().unwrap();
            assert_eq!(row.get_u64("ical_events"), Some(10));
            assert_eq!(row.get_u64("eventful_events"), Some(3));
        }

        #[tokio::test]
        async fn insert_if_absent_conflicts() {
            let store = MemoryTableStore::new();
            let lock = TableEntity::new("lock", "elmcity").with("owner", "a");

            let first = store.insert_if_absent("tasks", lock.clone()).await.unwrap();
            let second = store.insert_if_absent("tasks", lock.clone()).await.unwrap();
            assert_eq!(first, InsertOutcome::Inserted);
            assert_eq!(second, InsertOutcome::AlreadyExists);

            assert!(store.delete("tasks", "lock", "elmcity").await.unwrap());
            assert!(!store.delete("tasks", "lock", "elmcity").await.unwrap());
            let third = store.insert_if_absent("tasks", lock).await.unwrap();
            assert_eq!(third, InsertOutcome::Inserted);
        }

        #[tokio::test]
        async fn query_filters_by_partition() {
            let store = MemoryTableStore::new();
            for (pk, rk) in [("master", "b"), ("master", "a"), ("lock", "a")] {
                store.upsert("tasks", TableEntity::new(pk, rk)).await.unwrap();
            }

            let rows = store.query("tasks", "master").await.unwrap();
            let keys: Vec<_> = rows.iter().map(|r| r.row.as_str()).collect();
            assert_eq!(keys, vec!["a", "b"]);
            assert!(store.query("nope", "master").await.unwrap().is_empty());
        }
    }
}
