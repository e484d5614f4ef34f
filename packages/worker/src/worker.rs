//! The worker supervision loop.

use std::sync::Arc;

use chrono::Utc;
use db::Datastore;
use queue_core::{
    ChildExitReport, DispatchExt, Dispatcher, ForkFailure, HandlerRegistry, Hook, Job,
    JsonSerializer, ListEnd, NoopDispatcher, Serializer, WorkerSnapshot,
};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::control::{ChildSignaller, WorkerControl};
use crate::error::{QueueError, WorkerError};
use crate::executor::{Child, ChildExit, Executor};
use crate::heartbeat::Heartbeat;
use crate::prune::prune_dead_workers;
use crate::queue::{decode_job, pop_from_queue, push_to_failed_queue, push_to_queue};
use crate::signals::SignalHandler;
use crate::stats;

/// Format of `run_at` in the in-flight payload record.
pub const RUN_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Polls queues in priority order and runs each job in its own child.
///
/// One job is in flight at a time. Control requests arrive through
/// [`WorkerControl`], either from the installed signal listeners or from
/// whoever holds [`Worker::control`].
pub struct Worker<S> {
    id: String,
    store: Arc<S>,
    handlers: Arc<HandlerRegistry>,
    executor: Arc<dyn Executor>,
    serializer: Arc<dyn Serializer>,
    dispatcher: Arc<dyn Dispatcher>,
    signals: Option<SignalHandler>,
    config: WorkerConfig,
    control: Arc<WorkerControl>,
}

impl<S: Datastore> Worker<S> {
    pub fn new(store: Arc<S>, handlers: Arc<HandlerRegistry>, executor: Arc<dyn Executor>) -> Self {
        let config = WorkerConfig::default();
        Self {
            id: config.generate_worker_id(),
            store,
            handlers,
            executor,
            serializer: Arc::new(JsonSerializer),
            dispatcher: Arc::new(NoopDispatcher),
            signals: Some(SignalHandler::new()),
            config,
            control: Arc::new(WorkerControl::new()),
        }
    }

    /// Replace the configuration. An explicit `worker_id` in it replaces the
    /// generated id.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        if let Some(id) = &config.worker_id {
            self.id = id.clone();
        }
        self.config = config;
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// `None` runs without OS signal listeners.
    pub fn with_signal_handler(mut self, signals: Option<SignalHandler>) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_child_signaller(mut self, signaller: impl ChildSignaller) -> Self {
        self.control = Arc::new(WorkerControl::with_signaller(signaller));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn control(&self) -> Arc<WorkerControl> {
        self.control.clone()
    }

    /// Takes effect on the next poll.
    pub fn set_interval(&mut self, secs: u64) {
        self.config.interval_secs = secs;
    }

    /// Takes effect on the next poll.
    pub fn set_queue_names<I, Q>(&mut self, queues: I)
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        self.config.queues = queues.into_iter().map(Into::into).collect();
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn shutdown(&self) {
        self.control.shutdown();
    }

    pub fn force_shutdown(&self) {
        self.control.force_shutdown();
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id.clone(),
            queues: self.config.queues.clone(),
            interval_secs: self.config.interval_secs,
            paused: self.control.is_paused(),
            shutdown: self.control.is_shutdown_requested(),
            child_id: self.control.child(),
        }
    }

    /// Take over what a hook changed relative to `before`.
    ///
    /// Only changed flags are written back so a signal that arrived during
    /// dispatch is not undone. Shutdown can be requested, never withdrawn.
    fn apply_snapshot(&mut self, before: &WorkerSnapshot, after: WorkerSnapshot) {
        self.config.queues = after.queues;
        self.config.interval_secs = after.interval_secs;
        if after.paused != before.paused {
            self.control.set_paused(after.paused);
        }
        if after.shutdown && !before.shutdown {
            self.control.shutdown();
        }
    }

    fn dispatch_worker(&mut self, hook: Hook) -> Result<(), WorkerError> {
        let before = self.snapshot();
        let after = self.dispatcher.dispatch_as(hook, before.clone())?;
        self.apply_snapshot(&before, after);
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.config.run_once || self.config.interval_secs == 0 || self.control.is_shutdown_requested()
    }

    /// Run until shutdown.
    ///
    /// With an interval of zero the loop makes exactly one iteration, the
    /// same as `run_once`.
    ///
    /// Signal listeners are removed on return, but the runtime keeps its
    /// handlers for the listened signals installed for the life of the
    /// process. A host that keeps running after `work` returns no longer gets
    /// the default action for SIGINT or SIGTERM and must handle them itself.
    pub async fn work(&mut self) -> Result<(), WorkerError> {
        let _signals = match &self.signals {
            Some(handler) => Some(handler.register(self.control.clone(), self.dispatcher.as_ref())?),
            None => None,
        };

        info!(worker = %self.id, queues = ?self.config.queues, "Worker starting");
        self.dispatch_worker(Hook::WorkerStartup)?;

        match prune_dead_workers(
            self.store.as_ref(),
            &self.id,
            self.config.prune_after(),
            self.config.pruning_lock_ttl(),
        )
        .await
        {
            Ok(pruned) if !pruned.is_empty() => info!(worker = %self.id, ?pruned, "Pruned dead workers"),
            Ok(_) => {}
            Err(e) => warn!(worker = %self.id, error = %e, "Pruning dead workers failed"),
        }

        self.dispatch_worker(Hook::WorkerRegistering)?;
        self.store.register_worker(&self.id, Utc::now()).await?;
        info!(worker = %self.id, "Worker registered");

        let heartbeat = match Heartbeat::start(
            self.store.clone(),
            self.id.clone(),
            self.config.heartbeat_interval(),
        )
        .await
        {
            Ok(heartbeat) => Some(heartbeat),
            Err(e) => {
                warn!(worker = %self.id, error = %e, "Running without heartbeat");
                None
            }
        };

        let outcome = self.run_loop().await;

        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }
        let teardown = self.unregister().await;

        info!(worker = %self.id, "Worker stopped");
        outcome.and(teardown)
    }

    async fn run_loop(&mut self) -> Result<(), WorkerError> {
        loop {
            let worked = if self.control.is_paused() {
                false
            } else {
                self.work_one_job().await?
            };

            if !worked {
                self.dispatch_worker(Hook::WorkerIdle)?;
                if !self.should_stop() {
                    debug!(worker = %self.id, secs = self.config.interval_secs, "Idle");
                    self.control.sleep(self.config.interval()).await;
                }
            }

            if self.should_stop() {
                return Ok(());
            }
        }
    }

    async fn unregister(&mut self) -> Result<(), WorkerError> {
        self.dispatch_worker(Hook::WorkerUnregistering)?;
        self.store.unregister_worker(&self.id).await?;
        stats::clear_worker(self.store.as_ref(), &self.id).await?;
        info!(worker = %self.id, "Worker unregistered");
        Ok(())
    }

    /// Pop one job and run it. Returns `false` when every queue was empty.
    async fn work_one_job(&mut self) -> Result<bool, WorkerError> {
        let Some((queue, raw)) = self.fetch().await? else {
            return Ok(false);
        };

        let job = match decode_job(
            self.serializer.as_ref(),
            &queue,
            &raw,
            self.handlers.clone(),
            self.dispatcher.clone(),
        ) {
            Ok(job) => job,
            Err(e @ (WorkerError::Payload(_) | WorkerError::Serializer(_))) => {
                error!(worker = %self.id, queue = %queue, error = %e, "Dead-lettering undecodable job");
                push_to_failed_queue(self.store.as_ref(), self.dispatcher.as_ref(), &raw).await?;
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        self.perform(job, &raw).await?;
        Ok(true)
    }

    /// First non-empty queue wins, in configured order.
    async fn fetch(&self) -> Result<Option<(String, String)>, WorkerError> {
        for queue in &self.config.queues {
            if let Some(raw) =
                pop_from_queue(self.store.as_ref(), self.dispatcher.as_ref(), queue).await?
            {
                debug!(worker = %self.id, queue = %queue, "Found job");
                return Ok(Some((queue.clone(), raw)));
            }
        }
        Ok(None)
    }

    /// Run `job` in a child. `WorkerDoneWorking` is dispatched whatever the
    /// branch did; the first error is returned after it.
    async fn perform(&mut self, mut job: Job, raw: &str) -> Result<(), WorkerError> {
        if let Err(e) = self.set_working_on(&job).await {
            warn!(worker = %self.id, queue = job.queue_name(), error = %e, "Could not record in-flight job");
        }

        let outcome = match self.executor.spawn(&job, raw) {
            Err(e) => {
                error!(worker = %self.id, queue = job.queue_name(), error = %e, "Could not start child");
                self.fork_failed(&job, raw).await
            }
            Ok(child) => self.supervise(&mut job, child).await,
        };

        let done = self.dispatch_worker(Hook::WorkerDoneWorking);
        if let Err(e) = self.store.worker_done_working(&self.id).await {
            warn!(worker = %self.id, error = %e, "Could not clear in-flight job");
        }
        outcome.and(done)
    }

    /// Requeue the popped blob verbatim and stop.
    async fn fork_failed(&mut self, job: &Job, raw: &str) -> Result<(), WorkerError> {
        let before = self.snapshot();
        match self.dispatcher.dispatch_as(
            Hook::ForkFailed,
            ForkFailure {
                worker: before.clone(),
                job: job.snapshot(),
            },
        ) {
            Ok(failure) => self.apply_snapshot(&before, failure.worker),
            Err(e) => warn!(worker = %self.id, error = %e, "Keeping worker state after hook mismatch"),
        }
        self.control.shutdown();

        match push_to_queue(self.store.as_ref(), self.dispatcher.as_ref(), job.queue_name(), raw).await {
            Ok(()) => {}
            Err(QueueError::Hook(e)) => {
                warn!(worker = %self.id, error = %e, "Push hook rejected requeue, pushing directly");
                self.store.push(job.queue_name(), raw, ListEnd::Tail).await?;
            }
            Err(e) => return Err(e.into()),
        }
        warn!(worker = %self.id, queue = job.queue_name(), "Job requeued, shutting down");
        Ok(())
    }

    /// Parent branch: wait for the child and classify how it ended.
    async fn supervise(&mut self, job: &mut Job, child: Box<dyn Child>) -> Result<(), WorkerError> {
        self.control.set_child(child.id());
        let waiting = self.dispatch_worker(Hook::ParentWaiting);

        let exit = child.wait().await.unwrap_or_else(|e| {
            error!(worker = %self.id, error = %e, "Lost track of child");
            ChildExit::unknown()
        });
        self.control.set_child(None);
        if let Err(e) = stats::record_processed(self.store.as_ref(), &self.id).await {
            warn!(worker = %self.id, error = %e, "Could not count processed job");
        }

        let reported = if exit.success() {
            Ok(())
        } else {
            self.report_child_failure(job, exit).await
        };
        waiting.and(reported)
    }

    async fn report_child_failure(&mut self, job: &mut Job, exit: ChildExit) -> Result<(), WorkerError> {
        if exit.job_failed() {
            job.mark_failed();
        }

        let hook = if job.has_failed() {
            warn!(worker = %self.id, queue = job.queue_name(), status = exit.status, "Job failed");
            Hook::JobFailed
        } else {
            error!(
                worker = %self.id,
                queue = job.queue_name(),
                status = exit.status,
                code = ?exit.code,
                signal = ?exit.signal,
                "Child exited abnormally"
            );
            Hook::UnknownChildFailure
        };

        if let Err(e) = stats::record_failed(self.store.as_ref(), &self.id).await {
            warn!(worker = %self.id, error = %e, "Could not count failed job");
        }

        let before = self.snapshot();
        let report = self.dispatcher.dispatch_as(
            hook,
            ChildExitReport {
                worker: before.clone(),
                job: job.snapshot(),
                status: exit.status,
                exit_code: exit.code,
            },
        )?;
        self.apply_snapshot(&before, report.worker);
        Ok(())
    }

    /// Record `{queue, run_at, payload}` as this worker's in-flight job.
    async fn set_working_on(&self, job: &Job) -> Result<(), WorkerError> {
        let mut record = Map::new();
        record.insert("queue".into(), Value::String(job.queue_name().to_string()));
        record.insert(
            "run_at".into(),
            Value::String(Utc::now().format(RUN_AT_FORMAT).to_string()),
        );
        record.insert("payload".into(), Value::Object(job.payload().to_map()));

        let data = self.serializer.serialize(&record)?;
        self.store.set_worker_payload(&self.id, &data).await?;
        Ok(())
    }
}
