//! Key naming shared by every store backend.

/// Builds namespaced store keys.
///
/// With the default `resque` prefix a queue named `mail` lives at
/// `resque:queue:mail`, matching existing deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    prefix: String,
}

impl Default for Keys {
    fn default() -> Self {
        Self::new(crate::DEFAULT_PREFIX)
    }
}

impl Keys {
    /// An empty prefix yields bare keys.
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        while prefix.ends_with(':') {
            prefix.pop();
        }
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", self.prefix, name)
        }
    }

    pub fn queue(&self, name: &str) -> String {
        self.key(&format!("queue:{name}"))
    }

    /// Set of every queue name ever pushed to.
    pub fn queues(&self) -> String {
        self.key("queues")
    }

    /// Set of registered worker ids.
    pub fn workers(&self) -> String {
        self.key("workers")
    }

    /// In-flight payload of a worker.
    pub fn worker(&self, id: &str) -> String {
        self.key(&format!("worker:{id}"))
    }

    pub fn worker_started(&self, id: &str) -> String {
        self.key(&format!("worker:{id}:started"))
    }

    /// Fleet-wide hash of worker id to last heartbeat.
    pub fn heartbeats(&self) -> String {
        self.key("workers:heartbeat")
    }

    pub fn pruning_lock(&self) -> String {
        self.key("pruning_dead_workers_in_progress")
    }

    pub fn stat(&self, name: &str) -> String {
        self.key(&format!("stat:{name}"))
    }
}
