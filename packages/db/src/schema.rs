//! Database schema definitions using SurrealQL.

use crate::{Database, StoreError};

/// Define the tables backing the key-value primitives.
pub async fn init_schema(db: &Database) -> Result<(), StoreError> {
    tracing::info!("Initializing database schema...");

    db.query(KV_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// One table per primitive. The record id is the full store key.
const KV_SCHEMA: &str = r#"
-- Lists: queues of encoded jobs
DEFINE TABLE IF NOT EXISTS kv_list SCHEMALESS;

-- Sets: known queues, registered workers
DEFINE TABLE IF NOT EXISTS kv_set SCHEMALESS;

-- Plain string values: start times, in-flight payloads
DEFINE TABLE IF NOT EXISTS kv_string SCHEMALESS;

-- Hash fields, keyed by [hash key, field]
DEFINE TABLE IF NOT EXISTS kv_hash SCHEMALESS;
DEFINE INDEX IF NOT EXISTS kv_hash_key ON kv_hash FIELDS hash_key;

-- Counters
DEFINE TABLE IF NOT EXISTS kv_counter SCHEMALESS;

-- Expiring locks
DEFINE TABLE IF NOT EXISTS kv_lock SCHEMALESS;
"#;
