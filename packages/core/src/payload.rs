//! Job payload: the decoded form of a queued blob.

use serde_json::{Map, Value};

use crate::error::JobError;

/// Arguments passed to a job handler.
pub type Arguments = Map<String, Value>;

const CLASS: &str = "class";
const ARGS: &str = "args";
const QUEUE_NAME: &str = "queue_name";
const SKIP_QUEUE: &str = "skip_queue";

/// A decoded job description.
///
/// `class` and `args` are the stored fields. `queue_name` and `skip_queue` are
/// routing fields consumed by the enqueue path: hooks may set them, but they
/// are never written to the store. Unknown keys are kept in `extra` and
/// survive every hook and round trip unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPayload {
    /// Handler identifier.
    pub class: String,
    /// Handler arguments.
    pub args: Arguments,
    /// Target queue for enqueue routing.
    pub queue_name: Option<String>,
    /// When set, enqueue skips the store push.
    pub skip_queue: bool,
    /// Any other keys.
    pub extra: Map<String, Value>,
}

impl JobPayload {
    /// Create a payload for the given handler and arguments.
    pub fn new(class: impl Into<String>, args: Arguments) -> Self {
        Self {
            class: class.into(),
            args,
            queue_name: None,
            skip_queue: false,
            extra: Map::new(),
        }
    }

    /// Set the queue this payload is routed to.
    pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    /// Decode a payload from a mapping.
    ///
    /// Fails with [`JobError::PayloadCorrupt`] when `class` is not a string or
    /// `args` is not a mapping.
    pub fn from_map(mut map: Map<String, Value>) -> Result<Self, JobError> {
        let class = match map.remove(CLASS) {
            Some(Value::String(class)) => class,
            Some(other) => {
                return Err(JobError::PayloadCorrupt(format!(
                    "`class` must be a string, got {other}"
                )));
            }
            None => return Err(JobError::PayloadCorrupt("missing `class`".into())),
        };

        let args = match map.remove(ARGS) {
            Some(Value::Object(args)) => args,
            // Some producers encode "no arguments" as an empty list.
            Some(Value::Array(list)) if list.is_empty() => Map::new(),
            Some(other) => {
                return Err(JobError::PayloadCorrupt(format!(
                    "`args` must be a mapping, got {other}"
                )));
            }
            None => return Err(JobError::PayloadCorrupt("missing `args`".into())),
        };

        let queue_name = match map.remove(QUEUE_NAME) {
            Some(Value::String(name)) => Some(name),
            _ => None,
        };
        let skip_queue = matches!(map.remove(SKIP_QUEUE), Some(Value::Bool(true)));

        Ok(Self {
            class,
            args,
            queue_name,
            skip_queue,
            extra: map,
        })
    }

    /// The mapping written to the store: `class`, `args` and any extra keys.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        map.insert(CLASS.into(), Value::String(self.class.clone()));
        map.insert(ARGS.into(), Value::Object(self.args.clone()));
        map
    }

    /// Handler identifier, failing when absent or empty.
    pub fn class_name(&self) -> Result<&str, JobError> {
        if self.class.is_empty() {
            return Err(JobError::PayloadCorrupt("empty `class`".into()));
        }
        Ok(&self.class)
    }

    /// Handler arguments, failing when absent or empty.
    pub fn arguments(&self) -> Result<&Arguments, JobError> {
        if self.args.is_empty() {
            return Err(JobError::PayloadCorrupt("empty `args`".into()));
        }
        Ok(&self.args)
    }
}
