//! Worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Queue used when none is configured.
pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Queues to poll, highest priority first.
    pub queues: Vec<String>,
    /// Idle sleep between polls. Zero means a single iteration.
    pub interval_secs: u64,
    /// Stop after one loop iteration regardless of the interval.
    pub run_once: bool,
    pub heartbeat_interval_secs: u64,
    /// Workers silent for longer than this are pruned at startup.
    pub prune_after_secs: u64,
    pub pruning_lock_secs: u64,
    /// Explicit worker id, generated when `None`.
    pub worker_id: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: vec![DEFAULT_QUEUE.to_string()],
            interval_secs: 10,
            run_once: false,
            heartbeat_interval_secs: 60,
            prune_after_secs: 300,
            pruning_lock_secs: 60,
            worker_id: None,
        }
    }
}

impl WorkerConfig {
    /// Read `QUEUES` (or `QUEUE`), `INTERVAL`, `RUN_ONCE`,
    /// `HEARTBEAT_INTERVAL` and `PRUNE_AFTER` from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(queues) = lookup("QUEUES").or_else(|| lookup("QUEUE")) {
            let queues = parse_queue_list(&queues);
            if !queues.is_empty() {
                config.queues = queues;
            }
        }
        if let Some(secs) = parse_secs(&lookup, "INTERVAL") {
            config.interval_secs = secs;
        }
        if let Some(flag) = lookup("RUN_ONCE") {
            config.run_once = matches!(flag.trim(), "1" | "true" | "yes");
        }
        if let Some(secs) = parse_secs(&lookup, "HEARTBEAT_INTERVAL") {
            config.heartbeat_interval_secs = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "PRUNE_AFTER") {
            config.prune_after_secs = secs;
        }
        config
    }

    pub fn with_queues<I, Q>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_run_once(mut self, run_once: bool) -> Self {
        self.run_once = run_once;
        self
    }

    pub fn with_heartbeat_interval(mut self, secs: u64) -> Self {
        self.heartbeat_interval_secs = secs;
        self
    }

    pub fn with_prune_after(mut self, secs: u64) -> Self {
        self.prune_after_secs = secs;
        self
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = Some(id.into());
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn prune_after(&self) -> Duration {
        Duration::from_secs(self.prune_after_secs)
    }

    pub fn pruning_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.pruning_lock_secs)
    }

    /// The configured id, or `<host>-<pid>-<random>`.
    pub fn generate_worker_id(&self) -> String {
        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let pid = std::process::id();
        let random = ulid::Ulid::new().to_string().to_lowercase();

        format!("{}-{}-{}", hostname, pid, &random[random.len() - 8..])
    }
}

/// Split a comma separated queue list, dropping blanks.
pub fn parse_queue_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(String::from)
        .collect()
}

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(secs) => Some(secs),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring non-numeric setting");
            None
        }
    }
}
