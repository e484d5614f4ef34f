//! SurrealDB-backed store.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use queue_core::ListEnd;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::connection::{Database, DbConfig, connect};
use crate::keys::Keys;
use crate::schema::init_schema;
use crate::store::{
    Datastore, StoreError, format_heartbeat, format_started, parse_heartbeat, parse_started,
};

const LIST: &str = "kv_list";
const SET: &str = "kv_set";
const STRING: &str = "kv_string";
const COUNTER: &str = "kv_counter";

/// Internal record types for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct ListRecord {
    #[serde(default)]
    items: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SetRecord {
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StringRecord {
    data: String,
}

#[derive(Debug, Deserialize)]
struct HashField {
    field: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct CounterRecord {
    #[serde(default)]
    total: i64,
}

const PUSH_TAIL: &str = r#"
BEGIN TRANSACTION;
UPSERT type::thing('kv_set', $queues) SET members = array::union(members ?? [], [$name]);
UPSERT type::thing('kv_list', $key) SET items = array::append(items ?? [], $value);
COMMIT TRANSACTION;
"#;

const PUSH_HEAD: &str = r#"
BEGIN TRANSACTION;
UPSERT type::thing('kv_set', $queues) SET members = array::union(members ?? [], [$name]);
UPSERT type::thing('kv_list', $key) SET items = array::prepend(items ?? [], $value);
COMMIT TRANSACTION;
"#;

const POP: &str = r#"
UPDATE type::thing('kv_list', $key)
    SET items = array::remove(items, $index)
    WHERE array::len(items ?? []) > 0
    RETURN BEFORE;
"#;

const REGISTER_WORKER: &str = r#"
BEGIN TRANSACTION;
UPSERT type::thing('kv_set', $workers) SET members = array::union(members ?? [], [$id]);
UPSERT type::thing('kv_string', $started_key) SET data = $started;
COMMIT TRANSACTION;
"#;

const UNREGISTER_WORKER: &str = r#"
BEGIN TRANSACTION;
UPDATE type::thing('kv_set', $workers) SET members = array::complement(members ?? [], [$id]);
DELETE type::thing('kv_string', $worker_key);
DELETE type::thing('kv_string', $started_key);
DELETE type::thing('kv_hash', [$beats, $id]);
COMMIT TRANSACTION;
"#;

const SET_HASH_FIELD: &str = r#"
UPSERT type::thing('kv_hash', [$key, $field]) SET hash_key = $key, field = $field, data = $value;
"#;

const ACQUIRE_LOCK: &str = r#"
DELETE type::thing('kv_lock', $key) WHERE expires_at <= $now;
CREATE type::thing('kv_lock', $key) SET holder = $holder, expires_at = $expires;
"#;

/// Store on top of any SurrealDB engine.
///
/// Each primitive maps to its own table and uses the namespaced key as the
/// record id, so `resque:queue:mail` becomes `kv_list:⟨resque:queue:mail⟩`.
pub struct SurrealStore {
    config: DbConfig,
    keys: Keys,
    db: RwLock<Database>,
}

impl SurrealStore {
    /// Connect and make sure the schema exists.
    pub async fn connect(config: DbConfig) -> Result<Self, StoreError> {
        let db = connect(&config).await?;
        init_schema(&db).await?;
        Ok(Self {
            keys: Keys::new(config.prefix.clone()),
            config,
            db: RwLock::new(db),
        })
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Handle to the current connection.
    pub async fn database(&self) -> Database {
        self.db.read().await.clone()
    }

    async fn set_members(&self, key: String) -> Result<Vec<String>, StoreError> {
        let record: Option<SetRecord> = self.database().await.select((SET, key)).await?;
        Ok(record.map(|r| r.members).unwrap_or_default())
    }

    async fn string_value(&self, key: String) -> Result<Option<String>, StoreError> {
        let record: Option<StringRecord> = self.database().await.select((STRING, key)).await?;
        Ok(record.map(|r| r.data))
    }

    async fn hash_field(&self, key: String, field: &str) -> Result<Option<String>, StoreError> {
        let mut result = self
            .database()
            .await
            .query("SELECT field, data FROM kv_hash WHERE hash_key = $key AND field = $field")
            .bind(("key", key))
            .bind(("field", field.to_string()))
            .await?;
        let fields: Vec<HashField> = result.take(0)?;
        Ok(fields.into_iter().next().map(|f| f.data))
    }
}

impl Datastore for SurrealStore {
    fn keys(&self) -> &Keys {
        &self.keys
    }

    async fn push(&self, queue: &str, blob: &str, end: ListEnd) -> Result<(), StoreError> {
        let sql = match end {
            ListEnd::Head => PUSH_HEAD,
            ListEnd::Tail => PUSH_TAIL,
        };
        self.database()
            .await
            .query(sql)
            .bind(("queues", self.keys.queues()))
            .bind(("name", queue.to_string()))
            .bind(("key", self.keys.queue(queue)))
            .bind(("value", blob.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn pop(&self, queue: &str, end: ListEnd) -> Result<Option<String>, StoreError> {
        let index: i64 = match end {
            ListEnd::Head => 0,
            ListEnd::Tail => -1,
        };
        let mut result = self
            .database()
            .await
            .query(POP)
            .bind(("key", self.keys.queue(queue)))
            .bind(("index", index))
            .await?;
        let before: Option<ListRecord> = result.take(0)?;
        Ok(before.and_then(|mut record| match end {
            ListEnd::Head if !record.items.is_empty() => Some(record.items.remove(0)),
            ListEnd::Head => None,
            ListEnd::Tail => record.items.pop(),
        }))
    }

    async fn queue_length(&self, queue: &str) -> Result<u64, StoreError> {
        let record: Option<ListRecord> = self
            .database()
            .await
            .select((LIST, self.keys.queue(queue)))
            .await?;
        Ok(record.map_or(0, |r| r.items.len() as u64))
    }

    async fn queues(&self) -> Result<Vec<String>, StoreError> {
        self.set_members(self.keys.queues()).await
    }

    async fn register_worker(&self, id: &str, started_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.database()
            .await
            .query(REGISTER_WORKER)
            .bind(("workers", self.keys.workers()))
            .bind(("id", id.to_string()))
            .bind(("started_key", self.keys.worker_started(id)))
            .bind(("started", format_started(started_at)))
            .await?
            .check()?;
        Ok(())
    }

    async fn unregister_worker(&self, id: &str) -> Result<(), StoreError> {
        self.database()
            .await
            .query(UNREGISTER_WORKER)
            .bind(("workers", self.keys.workers()))
            .bind(("id", id.to_string()))
            .bind(("worker_key", self.keys.worker(id)))
            .bind(("started_key", self.keys.worker_started(id)))
            .bind(("beats", self.keys.heartbeats()))
            .await?
            .check()?;
        Ok(())
    }

    async fn workers(&self) -> Result<Vec<String>, StoreError> {
        self.set_members(self.keys.workers()).await
    }

    async fn worker_started(&self, id: &str) -> Result<Option<DateTime<FixedOffset>>, StoreError> {
        let key = self.keys.worker_started(id);
        let value = self.string_value(key.clone()).await?;
        value.map(|value| parse_started(&key, &value)).transpose()
    }

    async fn set_worker_payload(&self, id: &str, data: &str) -> Result<(), StoreError> {
        self.database()
            .await
            .query("UPSERT type::thing('kv_string', $key) SET data = $value")
            .bind(("key", self.keys.worker(id)))
            .bind(("value", data.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn worker_payload(&self, id: &str) -> Result<Option<String>, StoreError> {
        self.string_value(self.keys.worker(id)).await
    }

    async fn worker_done_working(&self, id: &str) -> Result<(), StoreError> {
        self.database()
            .await
            .query("DELETE type::thing('kv_string', $key)")
            .bind(("key", self.keys.worker(id)))
            .await?
            .check()?;
        Ok(())
    }

    async fn set_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.database()
            .await
            .query(SET_HASH_FIELD)
            .bind(("key", self.keys.heartbeats()))
            .bind(("field", id.to_string()))
            .bind(("value", format_heartbeat(at)))
            .await?
            .check()?;
        Ok(())
    }

    async fn heartbeat(&self, id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let key = self.keys.heartbeats();
        let value = self.hash_field(key.clone(), id).await?;
        value.map(|value| parse_heartbeat(&key, &value)).transpose()
    }

    async fn heartbeats(&self) -> Result<BTreeMap<String, DateTime<Utc>>, StoreError> {
        let key = self.keys.heartbeats();
        let mut result = self
            .database()
            .await
            .query("SELECT field, data FROM kv_hash WHERE hash_key = $key")
            .bind(("key", key.clone()))
            .await?;
        let fields: Vec<HashField> = result.take(0)?;
        Ok(fields
            .into_iter()
            .filter_map(|f| parse_heartbeat(&key, &f.data).ok().map(|at| (f.field, at)))
            .collect())
    }

    async fn remove_heartbeat(&self, id: &str) -> Result<(), StoreError> {
        self.database()
            .await
            .query("DELETE type::thing('kv_hash', [$key, $field])")
            .bind(("key", self.keys.heartbeats()))
            .bind(("field", id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn acquire_pruning_lock(&self, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let mut result = self
            .database()
            .await
            .query(ACQUIRE_LOCK)
            .bind(("key", self.keys.pruning_lock()))
            .bind(("holder", holder.to_string()))
            .bind(("now", now))
            .bind(("expires", now.saturating_add(ttl_ms)))
            .await?;

        let mut errors = result.take_errors();
        if let Some(e) = errors.remove(&0) {
            return Err(e.into());
        }
        // CREATE fails when a live lock record already exists.
        if let Some(e) = errors.remove(&1) {
            debug!(error = %e, "Pruning lock already held");
            return Ok(false);
        }
        Ok(true)
    }

    async fn release_pruning_lock(&self, holder: &str) -> Result<(), StoreError> {
        self.database()
            .await
            .query("DELETE type::thing('kv_lock', $key) WHERE holder = $holder")
            .bind(("key", self.keys.pruning_lock()))
            .bind(("holder", holder.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn increment_stat(&self, name: &str, by: i64) -> Result<i64, StoreError> {
        let mut result = self
            .database()
            .await
            .query("UPSERT type::thing('kv_counter', $key) SET total = (total ?? 0) + $by RETURN AFTER")
            .bind(("key", self.keys.stat(name)))
            .bind(("by", by))
            .await?;
        let record: Option<CounterRecord> = result.take(0)?;
        record
            .map(|r| r.total)
            .ok_or_else(|| StoreError::Query(format!("Counter {name} was not written")))
    }

    async fn stat(&self, name: &str) -> Result<i64, StoreError> {
        let record: Option<CounterRecord> = self
            .database()
            .await
            .select((COUNTER, self.keys.stat(name)))
            .await?;
        Ok(record.map_or(0, |r| r.total))
    }

    async fn clear_stat(&self, name: &str) -> Result<(), StoreError> {
        let _: Option<CounterRecord> = self
            .database()
            .await
            .delete((COUNTER, self.keys.stat(name)))
            .await?;
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        if self.config.is_in_memory() {
            debug!("In-memory engine, keeping the current connection");
            return Ok(());
        }
        let db = connect(&self.config).await?;
        *self.db.write().await = db;
        info!(endpoint = %self.config.endpoint, "Reconnected to database");
        Ok(())
    }
}
