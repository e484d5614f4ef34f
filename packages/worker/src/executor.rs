//! Isolated execution of a single job.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use db::Datastore;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use queue_core::Job;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::child::run_job;

/// Exit code of a child whose job ran and reported failure.
pub const JOB_FAILED_EXIT_CODE: i32 = 10;

/// Exit code reported for an inline child that panicked.
pub const PANIC_EXIT_CODE: i32 = 101;

/// How a child ended.
///
/// `status` uses the `wait(2)` encoding: `code << 8` for a normal exit, the
/// signal number for a signalled child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub status: i32,
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ChildExit {
    pub fn exited(code: i32) -> Self {
        Self {
            status: (code & 0xff) << 8,
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            status: signal & 0x7f,
            code: None,
            signal: Some(signal),
        }
    }

    /// The child could not be waited on.
    pub fn unknown() -> Self {
        Self {
            status: -1,
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The job ran and classified itself failed.
    pub fn job_failed(&self) -> bool {
        self.code == Some(JOB_FAILED_EXIT_CODE)
    }
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            Self::exited(code)
        } else if let Some(signal) = status.signal() {
            Self::signaled(signal)
        } else {
            Self {
                status: status.into_raw(),
                code: None,
                signal: None,
            }
        }
    }
}

/// A running child.
pub trait Child: Send {
    /// OS process id, when the child is a process.
    fn id(&self) -> Option<u32>;

    fn wait(self: Box<Self>) -> BoxFuture<'static, io::Result<ChildExit>>;
}

/// Starts the isolated context a job runs in.
pub trait Executor: Send + Sync {
    /// `raw` is the blob exactly as popped from the queue.
    fn spawn(&self, job: &Job, raw: &str) -> io::Result<Box<dyn Child>>;
}

/// Re-invokes a job-runner program per job.
///
/// The child gets `--queue <name>` appended to its arguments and the raw
/// payload on stdin, and must exit with 0 on success or
/// [`JOB_FAILED_EXIT_CODE`] when the job failed.
///
/// Each child leads its own process group, so a signal sent to the worker's
/// group (terminal Ctrl-C, service stop) reaches only the worker, which then
/// lets the running job finish. Force-shutdown still signals the child by pid.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl Executor for ProcessExecutor {
    fn spawn(&self, job: &Job, raw: &str) -> io::Result<Box<dyn Child>> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg("--queue")
            .arg(job.queue_name())
            .stdin(Stdio::piped())
            .process_group(0)
            .spawn()?;
        debug!(pid = child.id(), program = %self.program.display(), "Spawned child");
        Ok(Box::new(ProcessChild {
            child,
            input: raw.to_string(),
        }))
    }
}

struct ProcessChild {
    child: tokio::process::Child,
    input: String,
}

impl Child for ProcessChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn wait(self: Box<Self>) -> BoxFuture<'static, io::Result<ChildExit>> {
        let ProcessChild { mut child, input } = *self;
        async move {
            if let Some(mut stdin) = child.stdin.take() {
                // A child that died early closes the pipe; its exit status tells the rest.
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    warn!(error = %e, "Could not hand payload to child");
                }
                drop(stdin);
            }
            let status = child.wait().await?;
            Ok(ChildExit::from(status))
        }
        .boxed()
    }
}

/// Runs the job as a supervised task in this process.
///
/// Panics are contained and the store is reconnected, but a job that blocks
/// the runtime or aborts the process takes the worker with it.
pub struct InlineExecutor<S> {
    store: Arc<S>,
}

impl<S: Datastore> InlineExecutor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: Datastore> Executor for InlineExecutor<S> {
    fn spawn(&self, job: &Job, _raw: &str) -> io::Result<Box<dyn Child>> {
        let store = self.store.clone();
        let job = job.clone();
        let handle = tokio::spawn(async move { run_job(Some(store.as_ref()), job).await });
        Ok(Box::new(InlineChild { handle }))
    }
}

struct InlineChild {
    handle: JoinHandle<i32>,
}

impl Child for InlineChild {
    fn id(&self) -> Option<u32> {
        None
    }

    fn wait(self: Box<Self>) -> BoxFuture<'static, io::Result<ChildExit>> {
        async move {
            match self.handle.await {
                Ok(code) => Ok(ChildExit::exited(code)),
                Err(e) if e.is_panic() => Ok(ChildExit::exited(PANIC_EXIT_CODE)),
                Err(_) => Ok(ChildExit::signaled(nix::sys::signal::Signal::SIGKILL as i32)),
            }
        }
        .boxed()
    }
}
