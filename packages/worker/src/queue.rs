//! Queue operations routed through the push/pop hooks.

use std::sync::Arc;

use db::Datastore;
use queue_core::{
    DispatchExt, Dispatcher, HandlerRegistry, Hook, Job, JobPayload, ListEnd, PopCommand,
    PushCommand, Serializer,
};
use tracing::debug;

use crate::error::{QueueError, WorkerError};

/// Dead-letter queue for failed or undecodable jobs.
pub const FAILED_QUEUE: &str = "failed";

/// Push an encoded job to the tail of `queue`.
///
/// `BeforeJobPush` may reroute the push or change the list end.
pub async fn push_to_queue<S: Datastore>(
    store: &S,
    dispatcher: &dyn Dispatcher,
    queue: &str,
    json: &str,
) -> Result<(), QueueError> {
    let command = dispatcher.dispatch_as(
        Hook::BeforeJobPush,
        PushCommand {
            queue_name: queue.to_string(),
            json: json.to_string(),
            end: ListEnd::Tail,
        },
    )?;
    debug!(queue = %command.queue_name, end = ?command.end, "Pushing job");
    store
        .push(&command.queue_name, &command.json, command.end)
        .await?;
    Ok(())
}

/// Pop from the head of `queue`, `None` when empty.
pub async fn pop_from_queue<S: Datastore>(
    store: &S,
    dispatcher: &dyn Dispatcher,
    queue: &str,
) -> Result<Option<String>, QueueError> {
    let command = dispatcher.dispatch_as(
        Hook::BeforeJobPop,
        PopCommand {
            queue_name: queue.to_string(),
            end: ListEnd::Head,
        },
    )?;
    Ok(store.pop(&command.queue_name, command.end).await?)
}

pub async fn push_to_failed_queue<S: Datastore>(
    store: &S,
    dispatcher: &dyn Dispatcher,
    json: &str,
) -> Result<(), QueueError> {
    push_to_queue(store, dispatcher, FAILED_QUEUE, json).await
}

/// Decode a popped blob into a [`Job`] bound to `queue`.
pub fn decode_job(
    serializer: &dyn Serializer,
    queue: &str,
    raw: &str,
    handlers: Arc<HandlerRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
) -> Result<Job, WorkerError> {
    let map = serializer.unserialize(raw)?;
    let payload = JobPayload::from_map(map)?;
    Ok(Job::new(queue, payload, handlers).with_dispatcher(dispatcher))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use db::MemoryStore;
    use queue_core::{HookPayload, HookRegistry, JsonSerializer, NoopDispatcher, PayloadDispatcher};

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let store = MemoryStore::new();
        push_to_queue(&store, &NoopDispatcher, "q", "a").await.unwrap();
        push_to_queue(&store, &NoopDispatcher, "q", "b").await.unwrap();

        assert_eq!(
            pop_from_queue(&store, &NoopDispatcher, "q").await.unwrap(),
            Some("a".to_string())
        );
        assert_eq!(
            pop_from_queue(&store, &NoopDispatcher, "q").await.unwrap(),
            Some("b".to_string())
        );
        assert_eq!(pop_from_queue(&store, &NoopDispatcher, "q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn push_hook_can_reroute_and_prepend() {
        let mut registry = HookRegistry::new();
        registry.register(Hook::BeforeJobPush, |_hook: Hook, payload: HookPayload| {
            match payload {
                HookPayload::Push(mut cmd) if cmd.json == "urgent" => {
                    cmd.queue_name = "high".into();
                    cmd.end = ListEnd::Head;
                    HookPayload::Push(cmd)
                }
                other => other,
            }
        });
        let dispatcher = PayloadDispatcher::new(registry);
        let store = MemoryStore::new();

        push_to_queue(&store, &dispatcher, "high", "first").await.unwrap();
        push_to_queue(&store, &dispatcher, "low", "urgent").await.unwrap();

        assert_eq!(store.queue_items("high"), vec!["urgent", "first"]);
        assert!(store.queue_items("low").is_empty());
    }

    #[tokio::test]
    async fn failed_queue_receives_blob() {
        let store = MemoryStore::new();
        push_to_failed_queue(&store, &NoopDispatcher, "{bad").await.unwrap();
        assert_eq!(store.queue_items(FAILED_QUEUE), vec!["{bad"]);
    }

    #[test]
    fn decode_rejects_corrupt_blobs() {
        let handlers = Arc::new(HandlerRegistry::new());
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(NoopDispatcher);

        let job = decode_job(
            &JsonSerializer,
            "q",
            r#"{"class":"Echo","args":{"a":1}}"#,
            handlers.clone(),
            dispatcher.clone(),
        )
        .unwrap();
        assert_eq!(job.queue_name(), "q");
        assert_eq!(job.payload_class_name().unwrap(), "Echo");

        assert!(matches!(
            decode_job(&JsonSerializer, "q", "{nope", handlers.clone(), dispatcher.clone()),
            Err(WorkerError::Serializer(_))
        ));
        assert!(matches!(
            decode_job(&JsonSerializer, "q", r#"{"args":{}}"#, handlers, dispatcher),
            Err(WorkerError::Payload(_))
        ));
    }
}
