//! Worker runtime for the job queue.
//!
//! A [`Worker`] polls its queues in priority order and hands each job to an
//! [`Executor`], which runs it in isolation: a fresh process
//! ([`ProcessExecutor`]) or a supervised task ([`InlineExecutor`]). The
//! parent only sees the child's exit and classifies it. OS signals reach the
//! loop through [`WorkerControl`]; a ractor actor keeps the worker's
//! heartbeat fresh; dead workers are pruned at startup.
//!
//! # Usage
//!
//! ```ignore
//! use worker::{Client, InlineExecutor, Worker, WorkerConfig};
//!
//! let store = Arc::new(MemoryStore::new());
//! Client::new(store.clone()).enqueue("Echo", args, "default").await?;
//!
//! let executor = Arc::new(InlineExecutor::new(store.clone()));
//! let mut worker = Worker::new(store, Arc::new(handlers), executor)
//!     .with_config(WorkerConfig::default().with_run_once(true));
//! worker.work().await?;
//! ```

pub mod child;
mod client;
mod config;
mod control;
mod error;
mod executor;
mod heartbeat;
mod prune;
pub mod queue;
mod signals;
pub mod stats;
mod worker;

pub use child::{
    PAYLOAD_UNREADABLE_EXIT_CODE, RECONNECT_FAILED_EXIT_CODE, run_from_reader, run_from_stdin, run_job,
};
pub use client::Client;
pub use config::{DEFAULT_QUEUE, WorkerConfig, parse_queue_list};
pub use control::{ChildSignaller, NixSignaller, WorkerControl};
pub use error::{EnqueueError, QueueError, WorkerError};
pub use executor::{
    Child, ChildExit, Executor, InlineExecutor, JOB_FAILED_EXIT_CODE, PANIC_EXIT_CODE,
    ProcessExecutor,
};
pub use heartbeat::{Heartbeat, HeartbeatActor, HeartbeatArgs, HeartbeatMessage};
pub use prune::prune_dead_workers;
pub use queue::{FAILED_QUEUE, decode_job, pop_from_queue, push_to_failed_queue, push_to_queue};
pub use signals::{SignalHandler, SignalRegistration};
pub use worker::{RUN_AT_FORMAT, Worker};
