//! Flags shared between the supervision loop and signal listeners.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use queue_core::SignalAction;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Delivers termination signals to a running child.
pub trait ChildSignaller: Send + Sync + 'static {
    /// Ask the child to stop. Returns `false` when the signal was not delivered.
    fn terminate(&self, pid: u32) -> bool;

    /// Stop the child unconditionally.
    fn kill(&self, pid: u32) -> bool;
}

/// Sends SIGTERM / SIGKILL through `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NixSignaller;

impl NixSignaller {
    fn send(pid: u32, signal: Signal) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), signal) {
            Ok(()) => true,
            Err(e) => {
                warn!(pid, signal = signal.as_str(), error = %e, "Failed to signal child");
                false
            }
        }
    }
}

impl ChildSignaller for NixSignaller {
    fn terminate(&self, pid: u32) -> bool {
        Self::send(pid, Signal::SIGTERM)
    }

    fn kill(&self, pid: u32) -> bool {
        Self::send(pid, Signal::SIGKILL)
    }
}

/// Pause/shutdown flags and the current child id.
///
/// Every method only touches atomics or sends a signal, so it is safe to call
/// from a signal listener at any point of the loop.
pub struct WorkerControl {
    paused: AtomicBool,
    shutdown: AtomicBool,
    /// 0 when no child is running.
    child: AtomicU32,
    wake: Notify,
    signaller: Box<dyn ChildSignaller>,
}

impl Default for WorkerControl {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerControl {
    pub fn new() -> Self {
        Self::with_signaller(NixSignaller)
    }

    pub fn with_signaller(signaller: impl ChildSignaller) -> Self {
        Self {
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            child: AtomicU32::new(0),
            wake: Notify::new(),
            signaller: Box::new(signaller),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn child(&self) -> Option<u32> {
        match self.child.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn set_child(&self, pid: Option<u32>) {
        self.child.store(pid.unwrap_or(0), Ordering::SeqCst);
    }

    /// Stop picking up jobs; the loop keeps idling.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("Worker paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        info!("Worker resumed");
    }

    /// Finish the current iteration and stop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        info!("Worker shutdown requested");
    }

    /// Shut down and stop a running child: SIGTERM first, SIGKILL if that
    /// could not be delivered.
    pub fn force_shutdown(&self) {
        self.shutdown();
        if let Some(pid) = self.child() {
            warn!(pid, "Force shutdown, stopping child");
            if !self.signaller.terminate(pid) {
                self.signaller.kill(pid);
            }
        }
    }

    pub fn apply(&self, action: SignalAction) {
        match action {
            SignalAction::Shutdown => self.shutdown(),
            SignalAction::Pause => self.pause(),
            SignalAction::Continue => self.resume(),
            SignalAction::ForceShutdown => self.force_shutdown(),
            SignalAction::Ignore => {}
        }
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Sleep for `duration`, returning early on resume or shutdown.
    pub async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recording {
        calls: Arc<Mutex<Vec<(&'static str, u32)>>>,
        terminate_works: bool,
    }

    impl ChildSignaller for Recording {
        fn terminate(&self, pid: u32) -> bool {
            self.calls.lock().unwrap().push(("term", pid));
            self.terminate_works
        }

        fn kill(&self, pid: u32) -> bool {
            self.calls.lock().unwrap().push(("kill", pid));
            true
        }
    }

    #[test]
    fn force_shutdown_without_child_only_sets_flag() {
        let signaller = Recording::default();
        let control = WorkerControl::with_signaller(signaller.clone());
        control.force_shutdown();
        assert!(control.is_shutdown_requested());
        assert!(signaller.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn force_shutdown_terminates_child() {
        let signaller = Recording {
            terminate_works: true,
            ..Default::default()
        };
        let control = WorkerControl::with_signaller(signaller.clone());
        control.set_child(Some(4242));
        control.force_shutdown();
        assert_eq!(*signaller.calls.lock().unwrap(), vec![("term", 4242)]);
    }

    #[test]
    fn force_shutdown_escalates_to_kill() {
        let signaller = Recording::default();
        let control = WorkerControl::with_signaller(signaller.clone());
        control.set_child(Some(7));
        control.force_shutdown();
        assert_eq!(
            *signaller.calls.lock().unwrap(),
            vec![("term", 7), ("kill", 7)]
        );
    }

    #[test]
    fn actions_toggle_flags() {
        let control = WorkerControl::with_signaller(Recording::default());
        control.apply(SignalAction::Pause);
        assert!(control.is_paused());
        control.apply(SignalAction::Continue);
        assert!(!control.is_paused());
        control.apply(SignalAction::Ignore);
        assert!(!control.is_shutdown_requested());
        control.apply(SignalAction::Shutdown);
        assert!(control.is_shutdown_requested());
    }

    #[tokio::test]
    async fn shutdown_wakes_idle_sleep() {
        let control = Arc::new(WorkerControl::with_signaller(Recording::default()));
        let sleeper = {
            let control = control.clone();
            tokio::spawn(async move { control.sleep(Duration::from_secs(3600)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.shutdown();
        tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .unwrap()
            .unwrap();
    }
}
