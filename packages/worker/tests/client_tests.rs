#![allow(clippy::disallowed_methods)]

mod common;

use std::sync::Arc;

use common::Recorder;
use db::{Datastore, MemoryStore};
use queue_core::{Arguments, Hook, HookPayload, HookRegistry, PayloadDispatcher};
use serde_json::json;
use worker::{Client, EnqueueError};

fn args() -> Arguments {
    let mut args = Arguments::new();
    args.insert("user".into(), json!(7));
    args
}

#[tokio::test]
async fn test_enqueue_dispatches_before_then_after() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new();
    let client = Client::new(store.clone()).with_dispatcher(recorder.clone());

    client.enqueue("Welcome", args(), "mail").await.unwrap();

    assert_eq!(
        recorder.hooks(),
        vec![Hook::BeforeEnqueue, Hook::BeforeJobPush, Hook::AfterEnqueue]
    );
    assert_eq!(store.queue_length("mail").await.unwrap(), 1);
    let stored: serde_json::Value =
        serde_json::from_str(&store.queue_items("mail")[0]).unwrap();
    assert_eq!(stored, json!({"class": "Welcome", "args": {"user": 7}}));
}

#[tokio::test]
async fn test_skip_flag_suppresses_push() {
    let mut registry = HookRegistry::new();
    registry.register(Hook::BeforeEnqueue, |_hook: Hook, payload: HookPayload| match payload {
        HookPayload::Job(mut job) => {
            job.skip_queue = true;
            HookPayload::Job(job)
        }
        other => other,
    });
    let recorder = Recorder::wrapping(Arc::new(PayloadDispatcher::new(registry)));
    let store = Arc::new(MemoryStore::new());
    let client = Client::new(store.clone()).with_dispatcher(recorder.clone());

    let payload = client.enqueue("Welcome", args(), "mail").await.unwrap();

    assert!(payload.skip_queue);
    assert_eq!(store.queue_length("mail").await.unwrap(), 0);
    assert_eq!(recorder.hooks(), vec![Hook::BeforeEnqueue, Hook::AfterEnqueue]);
    let HookPayload::Job(after) = &recorder.payloads(Hook::AfterEnqueue)[0] else {
        panic!("AfterEnqueue carries the job payload");
    };
    assert!(after.skip_queue);
}

#[tokio::test]
async fn test_hook_reroutes_and_extends_payload() {
    let mut registry = HookRegistry::new();
    registry.register(Hook::BeforeEnqueue, |_hook: Hook, payload: HookPayload| match payload {
        HookPayload::Job(mut job) => {
            job.queue_name = Some("priority".into());
            job.extra.insert("trace".into(), json!("abc"));
            HookPayload::Job(job)
        }
        other => other,
    });
    let store = Arc::new(MemoryStore::new());
    let client =
        Client::new(store.clone()).with_dispatcher(Arc::new(PayloadDispatcher::new(registry)));

    client.enqueue("Welcome", args(), "mail").await.unwrap();

    assert_eq!(store.queue_length("mail").await.unwrap(), 0);
    let stored: serde_json::Value =
        serde_json::from_str(&store.queue_items("priority")[0]).unwrap();
    assert_eq!(stored["trace"], "abc");
    assert_eq!(stored["class"], "Welcome");
}

#[tokio::test]
async fn test_missing_names_never_reach_store() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new();
    let client = Client::new(store.clone()).with_dispatcher(recorder.clone());

    assert!(matches!(
        client.enqueue("Welcome", args(), "").await,
        Err(EnqueueError::QueueMissing)
    ));
    assert!(matches!(
        client.enqueue("", args(), "mail").await,
        Err(EnqueueError::JobClassMissing)
    ));
    assert!(recorder.hooks().is_empty());
    assert!(store.queues().await.unwrap().is_empty());
}
