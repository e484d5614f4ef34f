//! Enqueue surface.

use std::sync::Arc;

use db::Datastore;
use queue_core::{
    Arguments, DispatchExt, Dispatcher, Hook, JobPayload, JsonSerializer, NoopDispatcher,
    Serializer,
};
use tracing::{debug, info};

use crate::error::EnqueueError;
use crate::queue::push_to_queue;

/// Producer-side handle onto the store.
pub struct Client<S> {
    store: Arc<S>,
    serializer: Arc<dyn Serializer>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl<S: Datastore> Client<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            serializer: Arc::new(JsonSerializer),
            dispatcher: Arc::new(NoopDispatcher),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Build a payload for `class`, run it through `BeforeEnqueue`, push it
    /// unless a hook set `skip_queue`, then run `AfterEnqueue`.
    ///
    /// The push goes to the payload's `queue_name` as left by the hooks.
    /// Returns the payload as `AfterEnqueue` left it.
    pub async fn enqueue(
        &self,
        class: &str,
        args: Arguments,
        queue: &str,
    ) -> Result<JobPayload, EnqueueError> {
        if queue.is_empty() {
            return Err(EnqueueError::QueueMissing);
        }
        if class.is_empty() {
            return Err(EnqueueError::JobClassMissing);
        }

        let payload = JobPayload::new(class, args).with_queue(queue);
        let payload = self.dispatcher.dispatch_as(Hook::BeforeEnqueue, payload)?;

        if payload.skip_queue {
            debug!(class, queue, "Enqueue skipped by hook");
        } else {
            let target = payload.queue_name.as_deref().unwrap_or(queue);
            let json = self.serializer.serialize(&payload.to_map())?;
            push_to_queue(self.store.as_ref(), self.dispatcher.as_ref(), target, &json).await?;
            info!(class = %payload.class, queue = target, "Job enqueued");
        }

        Ok(self.dispatcher.dispatch_as(Hook::AfterEnqueue, payload)?)
    }
}
