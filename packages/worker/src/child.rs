//! Child side of the per-job execution protocol.

use std::sync::Arc;

use db::Datastore;
use queue_core::{Dispatcher, HandlerRegistry, Job, JobOutcome, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{error, info};

use crate::executor::JOB_FAILED_EXIT_CODE;
use crate::queue::decode_job;

/// Exit code of a child that could not re-establish its store connection.
pub const RECONNECT_FAILED_EXIT_CODE: i32 = 75;

/// Exit code of a child that could not read or decode the payload it was
/// handed. The job never ran.
pub const PAYLOAD_UNREADABLE_EXIT_CODE: i32 = 65;

/// Perform `job` and return the exit code the parent expects.
///
/// The store, when given, is reconnected first so the child never shares a
/// connection with its parent.
pub async fn run_job<S: Datastore>(store: Option<&S>, mut job: Job) -> i32 {
    if let Some(store) = store
        && let Err(e) = store.reconnect().await
    {
        error!(error = %e, "Child could not reconnect to the store");
        return RECONNECT_FAILED_EXIT_CODE;
    }

    let outcome = job.perform().await;
    info!(queue = job.queue_name(), outcome = outcome.as_str(), "Job finished");
    match outcome {
        JobOutcome::Completed => 0,
        JobOutcome::Failed | JobOutcome::Broken => JOB_FAILED_EXIT_CODE,
    }
}

/// Entry point of a job-runner process: decode the blob handed over on stdin
/// and run it.
pub async fn run_from_stdin<S: Datastore>(
    store: &S,
    serializer: &dyn Serializer,
    handlers: Arc<HandlerRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
    queue: &str,
) -> i32 {
    run_from_reader(tokio::io::stdin(), store, serializer, handlers, dispatcher, queue).await
}

/// Read one payload to the end of `input` and run it as a job of `queue`.
pub async fn run_from_reader<R, S>(
    mut input: R,
    store: &S,
    serializer: &dyn Serializer,
    handlers: Arc<HandlerRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
    queue: &str,
) -> i32
where
    R: AsyncRead + Unpin,
    S: Datastore,
{
    let mut raw = String::new();
    if let Err(e) = input.read_to_string(&mut raw).await {
        error!(error = %e, "Could not read job payload");
        return PAYLOAD_UNREADABLE_EXIT_CODE;
    }

    match decode_job(serializer, queue, &raw, handlers, dispatcher) {
        Ok(job) => run_job(Some(store), job).await,
        Err(e) => {
            error!(queue, error = %e, "Child received an undecodable payload");
            PAYLOAD_UNREADABLE_EXIT_CODE
        }
    }
}
