//! OS signal listeners feeding [`WorkerControl`].

use std::sync::Arc;

use queue_core::{DispatchExt, Dispatcher, Hook, Signal, SignalAction, SignalTable};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::control::WorkerControl;
use crate::error::WorkerError;

fn to_nix(signal: Signal) -> nix::sys::signal::Signal {
    use nix::sys::signal::Signal as Nix;
    match signal {
        Signal::Terminate => Nix::SIGTERM,
        Signal::Interrupt => Nix::SIGINT,
        Signal::Quit => Nix::SIGQUIT,
        Signal::User1 => Nix::SIGUSR1,
        Signal::Continue => Nix::SIGCONT,
        Signal::User2 => Nix::SIGUSR2,
    }
}

fn from_raw(raw: i32) -> Option<Signal> {
    let wanted = nix::sys::signal::Signal::try_from(raw).ok()?;
    Signal::ALL.into_iter().find(|s| to_nix(*s) == wanted)
}

/// Maps signals to worker actions and installs listeners for them.
#[derive(Debug, Clone, Default)]
pub struct SignalHandler {
    table: SignalTable,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override actions by raw signal number.
    ///
    /// Only signals already in the default table can be overridden; anything
    /// else is ignored.
    pub fn with_overrides<I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (i32, SignalAction)>,
    {
        let mut table = SignalTable::default();
        for (raw, action) in overrides {
            match from_raw(raw) {
                Some(signal) if table.set(signal, action) => {}
                _ => debug!(signal = raw, "Ignoring override for unhandled signal"),
            }
        }
        Self { table }
    }

    pub fn table(&self) -> &SignalTable {
        &self.table
    }

    /// Run `BeforeSignalsRegister`, then listen for every signal left in the
    /// returned table.
    ///
    /// Listeners only call into `control`. They stop when the returned guard
    /// is dropped.
    pub fn register(
        &self,
        control: Arc<WorkerControl>,
        dispatcher: &dyn Dispatcher,
    ) -> Result<SignalRegistration, WorkerError> {
        let table = dispatcher.dispatch_as(Hook::BeforeSignalsRegister, self.table.clone())?;

        let mut listeners = Vec::with_capacity(table.len());
        for (sig, action) in table.iter() {
            let kind = SignalKind::from_raw(to_nix(sig) as i32);
            let mut stream = signal(kind).map_err(WorkerError::Signals)?;
            let control = control.clone();
            listeners.push(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!(signal = %sig, %action, "Received signal");
                    control.apply(action);
                }
            }));
        }

        debug!(count = listeners.len(), "Signal listeners installed");
        Ok(SignalRegistration { listeners })
    }
}

/// Keeps signal listeners alive; aborts them on drop.
///
/// Dropping only stops the listener tasks. The runtime's process-wide
/// handlers for these signals stay installed, so afterwards SIGINT, SIGTERM
/// and the rest are swallowed instead of taking their default action.
#[derive(Debug)]
pub struct SignalRegistration {
    listeners: Vec<JoinHandle<()>>,
}

impl SignalRegistration {
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl Drop for SignalRegistration {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use queue_core::HookPayload;

    #[test]
    fn overrides_apply_to_known_signals_only() {
        let handler = SignalHandler::with_overrides([
            (libc_sig(nix::sys::signal::Signal::SIGQUIT), SignalAction::Pause),
            (libc_sig(nix::sys::signal::Signal::SIGHUP), SignalAction::Shutdown),
            (9999, SignalAction::Shutdown),
        ]);
        let table = handler.table();
        assert_eq!(table.get(Signal::Quit), Some(SignalAction::Pause));
        assert_eq!(table.get(Signal::Terminate), Some(SignalAction::Shutdown));
        assert_eq!(table.len(), Signal::ALL.len());
    }

    fn libc_sig(signal: nix::sys::signal::Signal) -> i32 {
        signal as i32
    }

    struct DropUserSignals;

    impl Dispatcher for DropUserSignals {
        fn dispatch(&self, _hook: Hook, payload: HookPayload) -> HookPayload {
            match payload {
                HookPayload::Signals(mut table) => {
                    table.remove(Signal::User1);
                    table.remove(Signal::User2);
                    HookPayload::Signals(table)
                }
                other => other,
            }
        }
    }

    #[tokio::test]
    async fn hook_rewrites_table_before_install() {
        let control = Arc::new(WorkerControl::new());
        let registration = SignalHandler::new()
            .register(control, &DropUserSignals)
            .unwrap();
        assert_eq!(registration.len(), Signal::ALL.len() - 2);
    }

    #[tokio::test]
    async fn dropping_registration_stops_listeners() {
        let registration = SignalHandler::new()
            .register(Arc::new(WorkerControl::new()), &queue_core::NoopDispatcher)
            .unwrap();
        let handles: Vec<_> = registration
            .listeners
            .iter()
            .map(|listener| listener.abort_handle())
            .collect();
        assert!(handles.iter().all(|handle| !handle.is_finished()));

        drop(registration);
        for _ in 0..100 {
            if handles.iter().all(|handle| handle.is_finished()) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(handles.iter().all(|handle| handle.is_finished()));
    }
}
