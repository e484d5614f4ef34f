#![allow(dead_code)]

use std::error::Error;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use db::{Datastore, DbConfig, StoreError, SurrealStore};
use queue_core::ListEnd;

pub type TestResult = Result<(), Box<dyn Error>>;

/// A fresh embedded SurrealDB instance per call.
pub async fn setup_surreal() -> Result<SurrealStore, StoreError> {
    SurrealStore::connect(DbConfig::memory()).await
}

pub async fn queue_order<S: Datastore>(store: &S) -> TestResult {
    store.push("mail", "a", ListEnd::Tail).await?;
    store.push("mail", "b", ListEnd::Tail).await?;
    store.push("mail", "c", ListEnd::Head).await?;

    assert_eq!(store.queues().await?, vec!["mail".to_string()]);
    assert_eq!(store.queue_length("mail").await?, 3);

    assert_eq!(store.pop("mail", ListEnd::Head).await?.as_deref(), Some("c"));
    assert_eq!(store.pop("mail", ListEnd::Tail).await?.as_deref(), Some("b"));
    assert_eq!(store.pop("mail", ListEnd::Head).await?.as_deref(), Some("a"));
    assert_eq!(store.pop("mail", ListEnd::Head).await?, None);
    assert_eq!(store.queue_length("mail").await?, 0);

    assert_eq!(store.pop("never-pushed", ListEnd::Head).await?, None);
    assert_eq!(store.queue_length("never-pushed").await?, 0);
    Ok(())
}

pub async fn worker_lifecycle<S: Datastore>(store: &S) -> TestResult {
    let started = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    store.register_worker("host:1:a", started).await?;
    store.register_worker("host:2:b", started).await?;

    let mut workers = store.workers().await?;
    workers.sort();
    assert_eq!(workers, vec!["host:1:a".to_string(), "host:2:b".to_string()]);
    assert_eq!(store.worker_started("host:1:a").await?, Some(started.into()));

    store.set_worker_payload("host:1:a", r#"{"queue":"mail"}"#).await?;
    store.set_heartbeat("host:1:a", started).await?;
    assert!(store.worker_payload("host:1:a").await?.is_some());
    assert_eq!(store.heartbeat("host:1:a").await?, Some(started));

    store.unregister_worker("host:1:a").await?;
    assert_eq!(store.workers().await?, vec!["host:2:b".to_string()]);
    assert_eq!(store.worker_started("host:1:a").await?, None);
    assert_eq!(store.worker_payload("host:1:a").await?, None);
    assert_eq!(store.heartbeat("host:1:a").await?, None);

    // Unknown ids are a no-op.
    store.unregister_worker("host:9:z").await?;
    Ok(())
}

pub async fn done_working_clears_payload<S: Datastore>(store: &S) -> TestResult {
    store.set_worker_payload("w", "{}").await?;
    assert_eq!(store.worker_payload("w").await?.as_deref(), Some("{}"));
    store.worker_done_working("w").await?;
    assert_eq!(store.worker_payload("w").await?, None);
    Ok(())
}

pub async fn heartbeat_map<S: Datastore>(store: &S) -> TestResult {
    let first = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2024, 6, 1, 0, 1, 0).unwrap();
    store.set_heartbeat("a", first).await?;
    store.set_heartbeat("b", second).await?;
    store.set_heartbeat("a", second).await?;

    let beats = store.heartbeats().await?;
    assert_eq!(beats.len(), 2);
    assert_eq!(beats.get("a"), Some(&second));

    store.remove_heartbeat("a").await?;
    let beats = store.heartbeats().await?;
    assert_eq!(beats.keys().collect::<Vec<_>>(), vec!["b"]);
    Ok(())
}

pub async fn pruning_lock<S: Datastore>(store: &S) -> TestResult {
    let minute = Duration::from_secs(60);
    assert!(store.acquire_pruning_lock("a", minute).await?);
    assert!(!store.acquire_pruning_lock("b", minute).await?);

    // Only the holder can release.
    store.release_pruning_lock("b").await?;
    assert!(!store.acquire_pruning_lock("b", minute).await?);

    store.release_pruning_lock("a").await?;
    assert!(store.acquire_pruning_lock("b", Duration::ZERO).await?);

    // An expired lock is taken over.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(store.acquire_pruning_lock("c", minute).await?);
    Ok(())
}

pub async fn stats<S: Datastore>(store: &S) -> TestResult {
    assert_eq!(store.stat("processed").await?, 0);
    assert_eq!(store.increment_stat("processed", 1).await?, 1);
    assert_eq!(store.increment_stat("processed", 2).await?, 3);
    assert_eq!(store.decrement_stat("processed", 1).await?, 2);
    assert_eq!(store.stat("processed").await?, 2);

    store.clear_stat("processed").await?;
    assert_eq!(store.stat("processed").await?, 0);
    Ok(())
}
