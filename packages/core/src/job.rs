//! A popped payload bound to its handler.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, error, warn};

use crate::dispatcher::{DispatchExt, Dispatcher, NoopDispatcher};
use crate::error::{HandlerError, JobError};
use crate::handler::{HandlerFuture, HandlerRegistry};
use crate::hooks::{Hook, JobSnapshot};
use crate::payload::{Arguments, JobPayload};

/// How a single `perform` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The handler reported an expected failure, or could not be resolved.
    Failed,
    /// The handler is defective (returned `Broken` or panicked).
    Broken,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Failed => "failed",
            JobOutcome::Broken => "broken",
        }
    }
}

/// A job popped from a queue.
///
/// Owned by one poll iteration; `perform` is meant to be called once.
#[derive(Clone)]
pub struct Job {
    queue: String,
    payload: JobPayload,
    handlers: Arc<HandlerRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
    failed: bool,
}

impl Job {
    pub fn new(queue: impl Into<String>, payload: JobPayload, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            queue: queue.into(),
            payload,
            handlers,
            dispatcher: Arc::new(NoopDispatcher),
            failed: false,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    pub fn payload(&self) -> &JobPayload {
        &self.payload
    }

    pub fn payload_class_name(&self) -> Result<&str, JobError> {
        self.payload.class_name()
    }

    pub fn payload_arguments(&self) -> Result<&Arguments, JobError> {
        self.payload.arguments()
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Record a failure observed outside `perform`, e.g. by the parent of a
    /// child process that reported one.
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            queue: self.queue.clone(),
            payload: self.payload.clone(),
            failed: self.failed,
        }
    }

    /// Run the handler and classify the result.
    ///
    /// Handler errors never escape: they set the failed flag and are reported
    /// through `FailedUserJobPerform` or `BrokenUserJobPerform`.
    pub async fn perform(&mut self) -> JobOutcome {
        match self
            .dispatcher
            .dispatch_as(Hook::BeforeUserJobPerform, self.payload.clone())
        {
            Ok(payload) => self.payload = payload,
            Err(e) => warn!(error = %e, "Keeping payload after hook mismatch"),
        }

        let outcome = match self.resolve() {
            Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => JobOutcome::Completed,
                Ok(Err(HandlerError::Failed(reason))) => {
                    warn!(queue = %self.queue, class = %self.payload.class, %reason, "Job failed");
                    JobOutcome::Failed
                }
                Ok(Err(HandlerError::Broken(reason))) => {
                    error!(queue = %self.queue, class = %self.payload.class, %reason, "Job broken");
                    JobOutcome::Broken
                }
                Err(panic) => {
                    error!(
                        queue = %self.queue,
                        class = %self.payload.class,
                        reason = panic_message(panic.as_ref()),
                        "Job panicked"
                    );
                    JobOutcome::Broken
                }
            },
            Err(outcome) => outcome,
        };

        let hook = match outcome {
            JobOutcome::Completed => Hook::AfterUserJobPerform,
            JobOutcome::Failed => Hook::FailedUserJobPerform,
            JobOutcome::Broken => Hook::BrokenUserJobPerform,
        };
        if outcome != JobOutcome::Completed {
            self.failed = true;
        }

        match self.dispatcher.dispatch_as(hook, self.payload.clone()) {
            Ok(payload) => self.payload = payload,
            Err(e) => warn!(error = %e, "Keeping payload after hook mismatch"),
        }

        debug!(queue = %self.queue, class = %self.payload.class, outcome = outcome.as_str(), "Job performed");
        outcome
    }

    /// Look up the handler and start it. Lookup problems count as failures.
    fn resolve(&self) -> Result<HandlerFuture, JobOutcome> {
        let class = self.payload_class_name().map_err(|e| {
            warn!(queue = %self.queue, error = %e, "Cannot resolve job handler");
            JobOutcome::Failed
        })?;
        let handler = self.handlers.get(class).ok_or_else(|| {
            warn!(queue = %self.queue, class, "No handler registered");
            JobOutcome::Failed
        })?;
        let args = self.payload_arguments().map_err(|e| {
            warn!(queue = %self.queue, class, error = %e, "Cannot read job arguments");
            JobOutcome::Failed
        })?;

        let args = args.clone();
        std::panic::catch_unwind(AssertUnwindSafe(|| handler.perform(args))).map_err(|panic| {
            error!(queue = %self.queue, class, reason = panic_message(panic.as_ref()), "Job panicked");
            JobOutcome::Broken
        })
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("queue", &self.queue)
            .field("payload", &self.payload)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}
