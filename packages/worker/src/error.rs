//! Worker and enqueue errors.

use db::StoreError;
use queue_core::{HookError, JobError, SerializerError};
use thiserror::Error;

/// Errors from the hook-aware queue helpers.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised synchronously by [`Client::enqueue`](crate::Client::enqueue).
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("Queue name is missing")]
    QueueMissing,
    #[error("Job class is missing")]
    JobClassMissing,
    #[error("Serialization error: {0}")]
    Serializer(#[from] SerializerError),
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<QueueError> for EnqueueError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Hook(e) => Self::Hook(e),
            QueueError::Store(e) => Self::Store(e),
        }
    }
}

/// Errors that stop a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Serialization error: {0}")]
    Serializer(#[from] SerializerError),
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),
    #[error(transparent)]
    Payload(#[from] JobError),
    #[error("Failed to install signal handler: {0}")]
    Signals(#[source] std::io::Error),
    #[error("Heartbeat actor error: {0}")]
    Heartbeat(String),
}

impl From<QueueError> for WorkerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Hook(e) => Self::Hook(e),
            QueueError::Store(e) => Self::Store(e),
        }
    }
}
