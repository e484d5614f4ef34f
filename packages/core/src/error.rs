//! Error types shared across the job queue.

use crate::hooks::{Hook, PayloadKind};

/// Errors raised while reading a job payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("Payload corrupt: {0}")]
    PayloadCorrupt(String),
}

/// Errors raised by a [`Serializer`](crate::Serializer).
#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Encoded payload is not a mapping")]
    NotAMapping,
}

/// Errors raised when a dispatcher hands back the wrong payload shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    #[error("Hook {hook} returned a {found} payload, expected {expected}")]
    UnexpectedPayload {
        hook: Hook,
        expected: PayloadKind,
        found: PayloadKind,
    },
}

/// Outcome of a user job handler that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// An expected, domain-level failure.
    #[error("Job failed: {0}")]
    Failed(String),

    /// A defect in the job code itself (panics are mapped here too).
    #[error("Job broken: {0}")]
    Broken(String),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn broken(reason: impl Into<String>) -> Self {
        Self::Broken(reason.into())
    }
}
