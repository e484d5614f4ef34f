//! The store contract the worker relies on.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use queue_core::ListEnd;
use thiserror::Error;

use crate::keys::Keys;

/// Format of `worker:<id>:started` values.
pub const STARTED_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Surreal(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Invalid timestamp at {key}: {value:?}")]
    InvalidTimestamp { key: String, value: String },
}

pub fn format_started(at: DateTime<Utc>) -> String {
    at.format(STARTED_FORMAT).to_string()
}

pub fn parse_started(key: &str, value: &str) -> Result<DateTime<FixedOffset>, StoreError> {
    DateTime::parse_from_str(value, STARTED_FORMAT).map_err(|_| StoreError::InvalidTimestamp {
        key: key.to_string(),
        value: value.to_string(),
    })
}

pub fn format_heartbeat(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

pub fn parse_heartbeat(key: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Queue, registry, heartbeat, lock and stat primitives.
///
/// Each method is atomic with respect to other workers sharing the store.
pub trait Datastore: Send + Sync + 'static {
    fn keys(&self) -> &Keys;

    /// Add a blob at one end of a queue and record the queue name.
    fn push(
        &self,
        queue: &str,
        blob: &str,
        end: ListEnd,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove and return the blob at one end, `None` when empty.
    fn pop(
        &self,
        queue: &str,
        end: ListEnd,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn queue_length(&self, queue: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Names of every queue that has been pushed to.
    fn queues(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Add to the worker set and record the start time, as one unit.
    fn register_worker(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove the worker with its start time, heartbeat and in-flight payload.
    fn unregister_worker(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn workers(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Start time of a worker; `InvalidTimestamp` when the stored value is malformed.
    fn worker_started(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<DateTime<FixedOffset>>, StoreError>> + Send;

    fn set_worker_payload(
        &self,
        id: &str,
        data: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn worker_payload(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Clear the in-flight payload.
    fn worker_done_working(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn set_heartbeat(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Last heartbeat of a worker; `InvalidTimestamp` when malformed.
    fn heartbeat(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, StoreError>> + Send;

    /// Every parsable heartbeat in the fleet. Malformed entries are left out.
    fn heartbeats(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<String, DateTime<Utc>>, StoreError>> + Send;

    fn remove_heartbeat(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Create the pruning lock unless a live one exists.
    ///
    /// Returns `false` when another worker holds it.
    fn acquire_pruning_lock(
        &self,
        holder: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Drop the pruning lock if `holder` still owns it.
    fn release_pruning_lock(
        &self,
        holder: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn increment_stat(
        &self,
        name: &str,
        by: i64,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    fn decrement_stat(
        &self,
        name: &str,
        by: i64,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send {
        self.increment_stat(name, -by)
    }

    fn stat(&self, name: &str) -> impl Future<Output = Result<i64, StoreError>> + Send;

    fn clear_stat(&self, name: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Drop and re-establish the connection. Required in a freshly spawned
    /// child before touching the store.
    fn reconnect(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
