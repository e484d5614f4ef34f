//! Processed / failed counters.

use db::{Datastore, StoreError};

pub const PROCESSED: &str = "processed";
pub const FAILED: &str = "failed";

fn per_worker(stat: &str, worker_id: &str) -> String {
    format!("{stat}:{worker_id}")
}

pub async fn record_processed<S: Datastore>(store: &S, worker_id: &str) -> Result<(), StoreError> {
    store.increment_stat(PROCESSED, 1).await?;
    store.increment_stat(&per_worker(PROCESSED, worker_id), 1).await?;
    Ok(())
}

pub async fn record_failed<S: Datastore>(store: &S, worker_id: &str) -> Result<(), StoreError> {
    store.increment_stat(FAILED, 1).await?;
    store.increment_stat(&per_worker(FAILED, worker_id), 1).await?;
    Ok(())
}

/// Drop a worker's own counters; fleet totals are kept.
pub async fn clear_worker<S: Datastore>(store: &S, worker_id: &str) -> Result<(), StoreError> {
    store.clear_stat(&per_worker(PROCESSED, worker_id)).await?;
    store.clear_stat(&per_worker(FAILED, worker_id)).await?;
    Ok(())
}

/// `(processed, failed)` for one worker.
pub async fn worker_totals<S: Datastore>(
    store: &S,
    worker_id: &str,
) -> Result<(i64, i64), StoreError> {
    Ok((
        store.stat(&per_worker(PROCESSED, worker_id)).await?,
        store.stat(&per_worker(FAILED, worker_id)).await?,
    ))
}
