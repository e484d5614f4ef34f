//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::payload::Arguments;

/// Result type for job handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// User code run for a job class.
///
/// Return [`HandlerError::Failed`] for expected failures and
/// [`HandlerError::Broken`] for defects. A panic is treated as broken.
pub trait JobHandler: Send + Sync + 'static {
    fn perform(&self, args: Arguments) -> HandlerFuture;
}

/// Locator mapping class names to handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under a class name, replacing any previous one.
    pub fn register<H: JobHandler>(&mut self, class: impl Into<String>, handler: H) {
        self.handlers.insert(class.into(), Arc::new(handler));
    }

    pub fn get(&self, class: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(class).cloned()
    }

    pub fn has_handler(&self, class: &str) -> bool {
        self.handlers.contains_key(class)
    }

    /// List all registered class names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(Arguments) -> HandlerFuture + Send + Sync + 'static,
{
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Arguments) -> HandlerFuture + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(Arguments) -> HandlerFuture + Send + Sync + 'static,
{
    fn perform(&self, args: Arguments) -> HandlerFuture {
        (self.handler)(args)
    }
}

/// Build a [`FnHandler`] from an async body.
///
/// ```ignore
/// registry.register("Echo", job_handler!(|args| {
///     tracing::info!(?args, "echo");
///     Ok(())
/// }));
/// ```
#[macro_export]
macro_rules! job_handler {
    (|$args:ident| $body:expr) => {
        $crate::FnHandler::new(|$args: $crate::Arguments| -> $crate::HandlerFuture {
            Box::pin(async move {
                let result: $crate::HandlerResult = $body;
                result
            })
        })
    };
}
