//! Hook dispatch strategies.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::HookError;
use crate::hooks::{Hook, HookPayload, HookShape};

/// Runs a named hook over a payload and returns the payload to use next.
///
/// Callers must treat the returned value as authoritative.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, hook: Hook, payload: HookPayload) -> HookPayload;
}

/// Returns every payload unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDispatcher;

impl Dispatcher for NoopDispatcher {
    fn dispatch(&self, _hook: Hook, payload: HookPayload) -> HookPayload {
        payload
    }
}

/// Behavior attached to a hook.
pub trait HookListener: Send + Sync + 'static {
    fn handle(&self, hook: Hook, payload: HookPayload) -> HookPayload;
}

impl<F> HookListener for F
where
    F: Fn(Hook, HookPayload) -> HookPayload + Send + Sync + 'static,
{
    fn handle(&self, hook: Hook, payload: HookPayload) -> HookPayload {
        self(hook, payload)
    }
}

/// Listeners keyed by hook.
#[derive(Default, Clone)]
pub struct HookRegistry {
    listeners: HashMap<Hook, Vec<Arc<dyn HookListener>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a listener. Listeners on the same hook run in registration order.
    pub fn register<L: HookListener>(&mut self, hook: Hook, listener: L) {
        self.listeners
            .entry(hook)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Attach the same listener to several hooks.
    pub fn register_all<L: HookListener>(&mut self, hooks: &[Hook], listener: L) {
        let listener: Arc<dyn HookListener> = Arc::new(listener);
        for hook in hooks {
            self.listeners
                .entry(*hook)
                .or_default()
                .push(Arc::clone(&listener));
        }
    }

    pub fn listeners(&self, hook: Hook) -> &[Arc<dyn HookListener>] {
        self.listeners.get(&hook).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_listeners(&self, hook: Hook) -> bool {
        !self.listeners(hook).is_empty()
    }
}

/// Resolves listeners by hook name and threads the payload through each.
#[derive(Default, Clone)]
pub struct PayloadDispatcher {
    registry: HookRegistry,
}

impl PayloadDispatcher {
    pub fn new(registry: HookRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }
}

impl Dispatcher for PayloadDispatcher {
    fn dispatch(&self, hook: Hook, payload: HookPayload) -> HookPayload {
        let expected = hook.payload_kind();
        let mut current = payload;

        for listener in self.registry.listeners(hook) {
            let next = listener.handle(hook, current.clone());
            if next.kind() == current.kind() {
                current = next;
            } else {
                warn!(
                    hook = %hook,
                    expected = %expected,
                    found = %next.kind(),
                    "Hook listener returned a foreign payload, discarding it"
                );
            }
        }

        debug!(hook = %hook, "Dispatched hook");
        current
    }
}

/// Typed dispatch on top of [`Dispatcher`].
pub trait DispatchExt {
    /// Dispatch a concrete payload and get the same type back.
    fn dispatch_as<T: HookShape>(&self, hook: Hook, value: T) -> Result<T, HookError>;
}

impl<D: Dispatcher + ?Sized> DispatchExt for D {
    fn dispatch_as<T: HookShape>(&self, hook: Hook, value: T) -> Result<T, HookError> {
        let returned = self.dispatch(hook, value.into_payload());
        T::from_payload(returned).map_err(|other| HookError::UnexpectedPayload {
            hook,
            expected: T::KIND,
            found: other.kind(),
        })
    }
}
