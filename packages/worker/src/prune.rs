//! Dead-worker pruning.

use std::time::Duration;

use chrono::{DateTime, Utc};
use db::{Datastore, StoreError};
use tracing::{debug, info, warn};

use crate::stats;

/// Unregister every other worker whose liveness is unknown or stale.
///
/// A worker's liveness is its heartbeat, or its start time when it never beat.
/// Missing or malformed timestamps count as dead. Runs only while holding the
/// fleet pruning lock; returns the pruned ids, empty when another worker holds
/// the lock.
pub async fn prune_dead_workers<S: Datastore>(
    store: &S,
    self_id: &str,
    max_age: Duration,
    lock_ttl: Duration,
) -> Result<Vec<String>, StoreError> {
    if !store.acquire_pruning_lock(self_id, lock_ttl).await? {
        debug!(worker = self_id, "Another worker is pruning");
        return Ok(Vec::new());
    }

    let result = sweep(store, self_id, max_age).await;

    if let Err(e) = store.release_pruning_lock(self_id).await {
        warn!(worker = self_id, error = %e, "Failed to release pruning lock");
    }
    result
}

async fn sweep<S: Datastore>(
    store: &S,
    self_id: &str,
    max_age: Duration,
) -> Result<Vec<String>, StoreError> {
    let now = Utc::now();
    let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
    let workers = store.workers().await?;
    let mut pruned = Vec::new();

    for id in workers.iter().filter(|id| id.as_str() != self_id) {
        let seen = last_seen(store, id).await?;
        let dead = match seen {
            Some(at) => now.signed_duration_since(at) > max_age,
            None => true,
        };
        if !dead {
            continue;
        }

        warn!(worker = %id, last_seen = ?seen, "Pruning dead worker");
        store.unregister_worker(id).await?;
        stats::clear_worker(store, id).await?;
        pruned.push(id.clone());
    }

    // Heartbeats left behind by workers that are no longer registered.
    for id in store.heartbeats().await?.into_keys() {
        if id != self_id && !workers.contains(&id) {
            debug!(worker = %id, "Removing orphaned heartbeat");
            store.remove_heartbeat(&id).await?;
        }
    }

    if !pruned.is_empty() {
        info!(count = pruned.len(), "Pruned dead workers");
    }
    Ok(pruned)
}

async fn last_seen<S: Datastore>(store: &S, id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    match store.heartbeat(id).await {
        Ok(Some(at)) => return Ok(Some(at)),
        Ok(None) => {}
        Err(StoreError::InvalidTimestamp { value, .. }) => {
            debug!(worker = id, value = %value, "Malformed heartbeat");
            return Ok(None);
        }
        Err(e) => return Err(e),
    }

    match store.worker_started(id).await {
        Ok(started) => Ok(started.map(|at| at.with_timezone(&Utc))),
        Err(StoreError::InvalidTimestamp { value, .. }) => {
            debug!(worker = id, value = %value, "Malformed start time");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    use db::MemoryStore;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn prunes_stale_and_malformed_workers() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.register_worker("me", now).await.unwrap();
        store.register_worker("fresh", now).await.unwrap();
        store.set_heartbeat("fresh", now).await.unwrap();
        store.register_worker("stale", now).await.unwrap();
        store
            .set_heartbeat("stale", now - chrono::Duration::minutes(30))
            .await
            .unwrap();
        store.register_worker("garbled", now).await.unwrap();
        store.set_raw_heartbeat("garbled", "yesterday-ish");
        store.register_worker("silent-old", now - chrono::Duration::hours(2)).await.unwrap();
        store.set_raw_heartbeat("ghost", &db::format_heartbeat(now));

        let mut pruned = prune_dead_workers(&store, "me", 5 * MINUTE, MINUTE)
            .await
            .unwrap();
        pruned.sort();

        assert_eq!(pruned, vec!["garbled", "silent-old", "stale"]);
        let mut left = store.workers().await.unwrap();
        left.sort();
        assert_eq!(left, vec!["fresh", "me"]);
        assert!(!store.heartbeats().await.unwrap().contains_key("ghost"));
    }

    #[tokio::test]
    async fn skips_when_lock_is_held() {
        let store = MemoryStore::new();
        store
            .register_worker("old", Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(store.acquire_pruning_lock("other", MINUTE).await.unwrap());

        let pruned = prune_dead_workers(&store, "me", MINUTE, MINUTE).await.unwrap();
        assert!(pruned.is_empty());
        assert_eq!(store.workers().await.unwrap(), vec!["old"]);
    }

    #[tokio::test]
    async fn releases_lock_after_sweep() {
        let store = MemoryStore::new();
        prune_dead_workers(&store, "me", MINUTE, MINUTE).await.unwrap();
        assert!(store.acquire_pruning_lock("other", MINUTE).await.unwrap());
    }
}
