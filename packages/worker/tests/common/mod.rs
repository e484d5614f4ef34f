#![allow(dead_code, clippy::disallowed_methods)]

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use db::{Datastore, Keys, MemoryStore, StoreError};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use queue_core::{
    Dispatcher, HandlerError, HandlerRegistry, Hook, HookPayload, Job, JsonSerializer, ListEnd,
    Serializer, job_handler,
};
use tokio::sync::Notify;
use worker::{Child, ChildExit, ChildSignaller, Executor, WorkerConfig};

pub const WORKER_ID: &str = "test-worker";

pub fn handlers() -> Arc<HandlerRegistry> {
    let mut handlers = HandlerRegistry::new();
    handlers.register("Ok", job_handler!(|_args| Ok(())));
    handlers.register("Fail", job_handler!(|_args| Err(HandlerError::failed("declined"))));
    handlers.register("Broken", job_handler!(|_args| Err(HandlerError::broken("bug"))));
    Arc::new(handlers)
}

/// One iteration, fixed id, no OS signal listeners.
pub fn run_once_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_worker_id(WORKER_ID)
        .with_interval(0)
}

pub fn blob(class: &str) -> String {
    let map = match serde_json::json!({"class": class, "args": {"n": 1}}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    JsonSerializer.serialize(&map).unwrap()
}

pub async fn seed(store: &MemoryStore, queue: &str, raw: &str) {
    store.push(queue, raw, queue_core::ListEnd::Tail).await.unwrap();
}

/// Records every dispatch, then delegates.
pub struct Recorder {
    calls: Mutex<Vec<(Hook, HookPayload)>>,
    inner: Option<Arc<dyn Dispatcher>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            inner: None,
        })
    }

    pub fn wrapping(inner: Arc<dyn Dispatcher>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            inner: Some(inner),
        })
    }

    pub fn hooks(&self) -> Vec<Hook> {
        self.calls.lock().unwrap().iter().map(|(hook, _)| *hook).collect()
    }

    pub fn payloads(&self, hook: Hook) -> Vec<HookPayload> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| *h == hook)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl Dispatcher for Recorder {
    fn dispatch(&self, hook: Hook, payload: HookPayload) -> HookPayload {
        self.calls.lock().unwrap().push((hook, payload.clone()));
        match &self.inner {
            Some(inner) => inner.dispatch(hook, payload),
            None => payload,
        }
    }
}

/// What the next spawn does.
pub enum Script {
    SpawnFails,
    Exit(ChildExit),
    /// Blocks until the signaller releases it, then reports SIGTERM.
    Hang(Arc<Notify>),
}

/// Executor that plays back scripted children and records what it was given.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Script>>,
    pub spawned: Mutex<Vec<(String, String)>>,
    /// In-flight record seen by each child while it ran.
    pub observed: Arc<Mutex<Vec<Option<String>>>>,
    store: Option<Arc<MemoryStore>>,
}

impl ScriptedExecutor {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            spawned: Mutex::new(Vec::new()),
            observed: Arc::new(Mutex::new(Vec::new())),
            store: None,
        })
    }

    pub fn observing(script: impl IntoIterator<Item = Script>, store: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            spawned: Mutex::new(Vec::new()),
            observed: Arc::new(Mutex::new(Vec::new())),
            store: Some(store),
        })
    }
}

impl Executor for ScriptedExecutor {
    fn spawn(&self, job: &Job, raw: &str) -> io::Result<Box<dyn Child>> {
        self.spawned
            .lock()
            .unwrap()
            .push((job.queue_name().to_string(), raw.to_string()));

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Exit(ChildExit::exited(0)));

        let behavior = match next {
            Script::SpawnFails => return Err(io::Error::other("fork refused")),
            Script::Exit(exit) => Behavior::Exit(exit),
            Script::Hang(release) => Behavior::Hang(release),
        };
        Ok(Box::new(ScriptedChild {
            behavior,
            store: self.store.clone(),
            observed: self.observed.clone(),
        }))
    }
}

enum Behavior {
    Exit(ChildExit),
    Hang(Arc<Notify>),
}

struct ScriptedChild {
    behavior: Behavior,
    store: Option<Arc<MemoryStore>>,
    observed: Arc<Mutex<Vec<Option<String>>>>,
}

pub const FAKE_PID: u32 = 4242;

impl Child for ScriptedChild {
    fn id(&self) -> Option<u32> {
        Some(FAKE_PID)
    }

    fn wait(self: Box<Self>) -> BoxFuture<'static, io::Result<ChildExit>> {
        async move {
            if let Some(store) = &self.store {
                let record = store.worker_payload(WORKER_ID).await.unwrap();
                self.observed.lock().unwrap().push(record);
            }
            match self.behavior {
                Behavior::Exit(exit) => Ok(exit),
                Behavior::Hang(release) => {
                    release.notified().await;
                    Ok(ChildExit::signaled(15))
                }
            }
        }
        .boxed()
    }
}

/// Signaller that records calls and releases a hanging child on terminate.
#[derive(Clone, Default)]
pub struct RecordingSignaller {
    pub calls: Arc<Mutex<Vec<(&'static str, u32)>>>,
    pub release: Arc<Notify>,
}

impl ChildSignaller for RecordingSignaller {
    fn terminate(&self, pid: u32) -> bool {
        self.calls.lock().unwrap().push(("term", pid));
        self.release.notify_one();
        true
    }

    fn kill(&self, pid: u32) -> bool {
        self.calls.lock().unwrap().push(("kill", pid));
        true
    }
}

/// Memory store whose stat counters are unreachable.
#[derive(Default)]
pub struct StatsDown {
    pub inner: MemoryStore,
}

impl Datastore for StatsDown {
    fn keys(&self) -> &Keys {
        self.inner.keys()
    }

    async fn push(&self, queue: &str, blob: &str, end: ListEnd) -> Result<(), StoreError> {
        self.inner.push(queue, blob, end).await
    }

    async fn pop(&self, queue: &str, end: ListEnd) -> Result<Option<String>, StoreError> {
        self.inner.pop(queue, end).await
    }

    async fn queue_length(&self, queue: &str) -> Result<u64, StoreError> {
        self.inner.queue_length(queue).await
    }

    async fn queues(&self) -> Result<Vec<String>, StoreError> {
        self.inner.queues().await
    }

    async fn register_worker(&self, id: &str, started_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.register_worker(id, started_at).await
    }

    async fn unregister_worker(&self, id: &str) -> Result<(), StoreError> {
        self.inner.unregister_worker(id).await
    }

    async fn workers(&self) -> Result<Vec<String>, StoreError> {
        self.inner.workers().await
    }

    async fn worker_started(&self, id: &str) -> Result<Option<DateTime<FixedOffset>>, StoreError> {
        self.inner.worker_started(id).await
    }

    async fn set_worker_payload(&self, id: &str, data: &str) -> Result<(), StoreError> {
        self.inner.set_worker_payload(id, data).await
    }

    async fn worker_payload(&self, id: &str) -> Result<Option<String>, StoreError> {
        self.inner.worker_payload(id).await
    }

    async fn worker_done_working(&self, id: &str) -> Result<(), StoreError> {
        self.inner.worker_done_working(id).await
    }

    async fn set_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.set_heartbeat(id, at).await
    }

    async fn heartbeat(&self, id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.heartbeat(id).await
    }

    async fn heartbeats(&self) -> Result<BTreeMap<String, DateTime<Utc>>, StoreError> {
        self.inner.heartbeats().await
    }

    async fn remove_heartbeat(&self, id: &str) -> Result<(), StoreError> {
        self.inner.remove_heartbeat(id).await
    }

    async fn acquire_pruning_lock(&self, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.acquire_pruning_lock(holder, ttl).await
    }

    async fn release_pruning_lock(&self, holder: &str) -> Result<(), StoreError> {
        self.inner.release_pruning_lock(holder).await
    }

    async fn increment_stat(&self, _name: &str, _by: i64) -> Result<i64, StoreError> {
        Err(StoreError::Query("stat counters unavailable".into()))
    }

    async fn stat(&self, _name: &str) -> Result<i64, StoreError> {
        Err(StoreError::Query("stat counters unavailable".into()))
    }

    async fn clear_stat(&self, name: &str) -> Result<(), StoreError> {
        self.inner.clear_stat(name).await
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        self.inner.reconnect().await
    }
}
