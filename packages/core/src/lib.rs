//! Core domain types for the job queue.
//!
//! This crate has no I/O of its own:
//! - [`JobPayload`] and [`Job`], the unit of work and its outcome
//! - [`HandlerRegistry`], the locator user handlers are resolved through
//! - [`Hook`] names, their [`HookPayload`]s and the [`Dispatcher`]s that run them
//! - the [`Serializer`] used to encode payloads for the store
//! - the default [`SignalTable`]

mod dispatcher;
mod error;
mod handler;
mod hooks;
mod job;
mod payload;
mod serializer;
mod signal;

pub use dispatcher::{DispatchExt, Dispatcher, HookListener, HookRegistry, NoopDispatcher, PayloadDispatcher};
pub use error::{HandlerError, HookError, JobError, SerializerError};
pub use handler::{FnHandler, HandlerFuture, HandlerRegistry, HandlerResult, JobHandler};
pub use hooks::{
    ChildExitReport, ForkFailure, Hook, HookPayload, HookShape, JobSnapshot, ListEnd, PayloadKind,
    PopCommand, PushCommand, WorkerSnapshot,
};
pub use job::{Job, JobOutcome};
pub use payload::{Arguments, JobPayload};
pub use serializer::{JsonSerializer, Serializer};
pub use signal::{Signal, SignalAction, SignalTable};
