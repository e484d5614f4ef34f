//! Named extension points and the payloads dispatched through them.

use serde::{Deserialize, Serialize};

use crate::payload::JobPayload;
use crate::signal::SignalTable;

/// Every lifecycle transition a dispatcher is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Hook {
    // Worker lifecycle
    WorkerStartup,
    WorkerRegistering,
    WorkerIdle,
    WorkerUnregistering,
    WorkerDoneWorking,
    ParentWaiting,

    // Child outcome, seen by the parent
    ForkFailed,
    JobFailed,
    UnknownChildFailure,

    // User job, seen by whoever performs it
    BeforeUserJobPerform,
    AfterUserJobPerform,
    FailedUserJobPerform,
    BrokenUserJobPerform,

    // Enqueue surface
    BeforeEnqueue,
    AfterEnqueue,

    // Store access
    BeforeJobPush,
    BeforeJobPop,

    // Signal plane
    BeforeSignalsRegister,
}

impl Hook {
    pub const ALL: [Hook; 18] = [
        Hook::WorkerStartup,
        Hook::WorkerRegistering,
        Hook::WorkerIdle,
        Hook::WorkerUnregistering,
        Hook::WorkerDoneWorking,
        Hook::ParentWaiting,
        Hook::ForkFailed,
        Hook::JobFailed,
        Hook::UnknownChildFailure,
        Hook::BeforeUserJobPerform,
        Hook::AfterUserJobPerform,
        Hook::FailedUserJobPerform,
        Hook::BrokenUserJobPerform,
        Hook::BeforeEnqueue,
        Hook::AfterEnqueue,
        Hook::BeforeJobPush,
        Hook::BeforeJobPop,
        Hook::BeforeSignalsRegister,
    ];

    /// Hook name as exposed to listeners and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::WorkerStartup => "WorkerStartup",
            Hook::WorkerRegistering => "WorkerRegistering",
            Hook::WorkerIdle => "WorkerIdle",
            Hook::WorkerUnregistering => "WorkerUnregistering",
            Hook::WorkerDoneWorking => "WorkerDoneWorking",
            Hook::ParentWaiting => "ParentWaiting",
            Hook::ForkFailed => "ForkFailed",
            Hook::JobFailed => "JobFailed",
            Hook::UnknownChildFailure => "UnknownChildFailure",
            Hook::BeforeUserJobPerform => "BeforeUserJobPerform",
            Hook::AfterUserJobPerform => "AfterUserJobPerform",
            Hook::FailedUserJobPerform => "FailedUserJobPerform",
            Hook::BrokenUserJobPerform => "BrokenUserJobPerform",
            Hook::BeforeEnqueue => "BeforeEnqueue",
            Hook::AfterEnqueue => "AfterEnqueue",
            Hook::BeforeJobPush => "BeforeJobPush",
            Hook::BeforeJobPop => "BeforeJobPop",
            Hook::BeforeSignalsRegister => "BeforeSignalsRegister",
        }
    }

    /// The payload shape this hook carries.
    pub fn payload_kind(&self) -> PayloadKind {
        match self {
            Hook::WorkerStartup
            | Hook::WorkerRegistering
            | Hook::WorkerIdle
            | Hook::WorkerUnregistering
            | Hook::WorkerDoneWorking
            | Hook::ParentWaiting => PayloadKind::Worker,
            Hook::ForkFailed => PayloadKind::ForkFailed,
            Hook::JobFailed | Hook::UnknownChildFailure => PayloadKind::ChildExit,
            Hook::BeforeUserJobPerform
            | Hook::AfterUserJobPerform
            | Hook::FailedUserJobPerform
            | Hook::BrokenUserJobPerform
            | Hook::BeforeEnqueue
            | Hook::AfterEnqueue => PayloadKind::Job,
            Hook::BeforeJobPush => PayloadKind::Push,
            Hook::BeforeJobPop => PayloadKind::Pop,
            Hook::BeforeSignalsRegister => PayloadKind::Signals,
        }
    }
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of [`HookPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Worker,
    Job,
    ForkFailed,
    ChildExit,
    Push,
    Pop,
    Signals,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PayloadKind::Worker => "worker",
            PayloadKind::Job => "job",
            PayloadKind::ForkFailed => "fork-failed",
            PayloadKind::ChildExit => "child-exit",
            PayloadKind::Push => "push",
            PayloadKind::Pop => "pop",
            PayloadKind::Signals => "signals",
        };
        f.write_str(name)
    }
}

/// Observable worker state handed to worker hooks.
///
/// The worker applies the returned snapshot: queue names, interval and the
/// pause flag are taken as-is, a shutdown request is sticky.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: String,
    pub queues: Vec<String>,
    pub interval_secs: u64,
    pub paused: bool,
    pub shutdown: bool,
    pub child_id: Option<u32>,
}

/// A job as seen by the parent process.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub queue: String,
    pub payload: JobPayload,
    pub failed: bool,
}

/// Payload of [`Hook::ForkFailed`].
#[derive(Debug, Clone, PartialEq)]
pub struct ForkFailure {
    pub worker: WorkerSnapshot,
    pub job: JobSnapshot,
}

/// Payload of [`Hook::JobFailed`] and [`Hook::UnknownChildFailure`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChildExitReport {
    pub worker: WorkerSnapshot,
    pub job: JobSnapshot,
    /// Raw wait status.
    pub status: i32,
    /// Exit code when the child exited rather than being signalled.
    pub exit_code: Option<i32>,
}

/// Which end of a queue list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListEnd {
    Head,
    #[default]
    Tail,
}

/// Payload of [`Hook::BeforeJobPush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushCommand {
    pub queue_name: String,
    pub json: String,
    pub end: ListEnd,
}

/// Payload of [`Hook::BeforeJobPop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopCommand {
    pub queue_name: String,
    pub end: ListEnd,
}

/// The value passed through a hook.
#[derive(Debug, Clone, PartialEq)]
pub enum HookPayload {
    Worker(WorkerSnapshot),
    Job(JobPayload),
    ForkFailed(ForkFailure),
    ChildExit(ChildExitReport),
    Push(PushCommand),
    Pop(PopCommand),
    Signals(SignalTable),
}

impl HookPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            HookPayload::Worker(_) => PayloadKind::Worker,
            HookPayload::Job(_) => PayloadKind::Job,
            HookPayload::ForkFailed(_) => PayloadKind::ForkFailed,
            HookPayload::ChildExit(_) => PayloadKind::ChildExit,
            HookPayload::Push(_) => PayloadKind::Push,
            HookPayload::Pop(_) => PayloadKind::Pop,
            HookPayload::Signals(_) => PayloadKind::Signals,
        }
    }
}

/// A concrete type carried by one [`HookPayload`] variant.
pub trait HookShape: Sized {
    const KIND: PayloadKind;

    fn into_payload(self) -> HookPayload;

    /// Extract the value, handing the payload back when the variant differs.
    fn from_payload(payload: HookPayload) -> Result<Self, HookPayload>;
}

macro_rules! hook_shape {
    ($ty:ty, $variant:ident) => {
        impl HookShape for $ty {
            const KIND: PayloadKind = PayloadKind::$variant;

            fn into_payload(self) -> HookPayload {
                HookPayload::$variant(self)
            }

            fn from_payload(payload: HookPayload) -> Result<Self, HookPayload> {
                match payload {
                    HookPayload::$variant(value) => Ok(value),
                    other => Err(other),
                }
            }
        }

        impl From<$ty> for HookPayload {
            fn from(value: $ty) -> Self {
                HookPayload::$variant(value)
            }
        }
    };
}

hook_shape!(WorkerSnapshot, Worker);
hook_shape!(JobPayload, Job);
hook_shape!(ForkFailure, ForkFailed);
hook_shape!(ChildExitReport, ChildExit);
hook_shape!(PushCommand, Push);
hook_shape!(PopCommand, Pop);
hook_shape!(SignalTable, Signals);
