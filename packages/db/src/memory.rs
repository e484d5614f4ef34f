//! In-process store for tests and single-host use.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, Utc};
use queue_core::ListEnd;

use crate::keys::Keys;
use crate::store::{
    Datastore, StoreError, format_heartbeat, format_started, parse_heartbeat, parse_started,
};

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, BTreeSet<String>>,
    strings: HashMap<String, String>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    counters: HashMap<String, i64>,
    locks: HashMap<String, (String, Instant)>,
}

/// Keeps everything behind one mutex, so every operation is atomic.
///
/// Not shared across OS processes: a spawned child sees an empty store.
#[derive(Default)]
pub struct MemoryStore {
    keys: Keys,
    state: Mutex<State>,
    reconnects: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(keys: Keys) -> Self {
        Self {
            keys,
            ..Self::default()
        }
    }

    /// How many times `reconnect` was called.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Every blob on a queue, head first.
    pub fn queue_items(&self, queue: &str) -> Vec<String> {
        let key = self.keys.queue(queue);
        self.lock()
            .lists
            .get(&key)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Write a raw string value, bypassing the typed operations.
    pub fn set_raw(&self, key: &str, value: &str) {
        self.lock().strings.insert(key.to_string(), value.to_string());
    }

    /// Write a raw heartbeat field.
    pub fn set_raw_heartbeat(&self, id: &str, value: &str) {
        let key = self.keys.heartbeats();
        self.lock()
            .hashes
            .entry(key)
            .or_default()
            .insert(id.to_string(), value.to_string());
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the guard leaves plain data behind, safe to reuse.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Datastore for MemoryStore {
    fn keys(&self) -> &Keys {
        &self.keys
    }

    async fn push(&self, queue: &str, blob: &str, end: ListEnd) -> Result<(), StoreError> {
        let mut state = self.lock();
        state
            .sets
            .entry(self.keys.queues())
            .or_default()
            .insert(queue.to_string());
        let list = state.lists.entry(self.keys.queue(queue)).or_default();
        match end {
            ListEnd::Head => list.push_front(blob.to_string()),
            ListEnd::Tail => list.push_back(blob.to_string()),
        }
        Ok(())
    }

    async fn pop(&self, queue: &str, end: ListEnd) -> Result<Option<String>, StoreError> {
        let mut state = self.lock();
        let Some(list) = state.lists.get_mut(&self.keys.queue(queue)) else {
            return Ok(None);
        };
        Ok(match end {
            ListEnd::Head => list.pop_front(),
            ListEnd::Tail => list.pop_back(),
        })
    }

    async fn queue_length(&self, queue: &str) -> Result<u64, StoreError> {
        let state = self.lock();
        Ok(state
            .lists
            .get(&self.keys.queue(queue))
            .map_or(0, |list| list.len() as u64))
    }

    async fn queues(&self) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        Ok(state
            .sets
            .get(&self.keys.queues())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn register_worker(&self, id: &str, started_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.lock();
        state
            .sets
            .entry(self.keys.workers())
            .or_default()
            .insert(id.to_string());
        state
            .strings
            .insert(self.keys.worker_started(id), format_started(started_at));
        Ok(())
    }

    async fn unregister_worker(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(workers) = state.sets.get_mut(&self.keys.workers()) {
            workers.remove(id);
        }
        state.strings.remove(&self.keys.worker(id));
        state.strings.remove(&self.keys.worker_started(id));
        if let Some(beats) = state.hashes.get_mut(&self.keys.heartbeats()) {
            beats.remove(id);
        }
        Ok(())
    }

    async fn workers(&self) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        Ok(state
            .sets
            .get(&self.keys.workers())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn worker_started(&self, id: &str) -> Result<Option<DateTime<FixedOffset>>, StoreError> {
        let key = self.keys.worker_started(id);
        let value = self.lock().strings.get(&key).cloned();
        value.map(|value| parse_started(&key, &value)).transpose()
    }

    async fn set_worker_payload(&self, id: &str, data: &str) -> Result<(), StoreError> {
        self.lock()
            .strings
            .insert(self.keys.worker(id), data.to_string());
        Ok(())
    }

    async fn worker_payload(&self, id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().strings.get(&self.keys.worker(id)).cloned())
    }

    async fn worker_done_working(&self, id: &str) -> Result<(), StoreError> {
        self.lock().strings.remove(&self.keys.worker(id));
        Ok(())
    }

    async fn set_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.lock()
            .hashes
            .entry(self.keys.heartbeats())
            .or_default()
            .insert(id.to_string(), format_heartbeat(at));
        Ok(())
    }

    async fn heartbeat(&self, id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let key = self.keys.heartbeats();
        let value = self
            .lock()
            .hashes
            .get(&key)
            .and_then(|beats| beats.get(id).cloned());
        value.map(|value| parse_heartbeat(&key, &value)).transpose()
    }

    async fn heartbeats(&self) -> Result<BTreeMap<String, DateTime<Utc>>, StoreError> {
        let key = self.keys.heartbeats();
        let state = self.lock();
        let Some(beats) = state.hashes.get(&key) else {
            return Ok(BTreeMap::new());
        };
        Ok(beats
            .iter()
            .filter_map(|(id, value)| {
                parse_heartbeat(&key, value)
                    .ok()
                    .map(|at| (id.clone(), at))
            })
            .collect())
    }

    async fn remove_heartbeat(&self, id: &str) -> Result<(), StoreError> {
        if let Some(beats) = self.lock().hashes.get_mut(&self.keys.heartbeats()) {
            beats.remove(id);
        }
        Ok(())
    }

    async fn acquire_pruning_lock(&self, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let key = self.keys.pruning_lock();
        let now = Instant::now();
        let mut state = self.lock();
        if state.locks.get(&key).is_some_and(|(_, expires)| *expires > now) {
            return Ok(false);
        }
        state.locks.insert(key, (holder.to_string(), now + ttl));
        Ok(true)
    }

    async fn release_pruning_lock(&self, holder: &str) -> Result<(), StoreError> {
        let key = self.keys.pruning_lock();
        let mut state = self.lock();
        if state.locks.get(&key).is_some_and(|(owner, _)| owner == holder) {
            state.locks.remove(&key);
        }
        Ok(())
    }

    async fn increment_stat(&self, name: &str, by: i64) -> Result<i64, StoreError> {
        let mut state = self.lock();
        let count = state.counters.entry(self.keys.stat(name)).or_insert(0);
        *count += by;
        Ok(*count)
    }

    async fn stat(&self, name: &str) -> Result<i64, StoreError> {
        Ok(self
            .lock()
            .counters
            .get(&self.keys.stat(name))
            .copied()
            .unwrap_or(0))
    }

    async fn clear_stat(&self, name: &str) -> Result<(), StoreError> {
        self.lock().counters.remove(&self.keys.stat(name));
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Memory store reconnect requested, nothing to re-establish");
        Ok(())
    }
}
