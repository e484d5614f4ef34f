//! Process-control signals and the worker actions they map to.

use std::collections::BTreeMap;

/// Signals a worker responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Signal {
    Terminate,
    Interrupt,
    Quit,
    User1,
    Continue,
    User2,
}

impl Signal {
    pub const ALL: [Signal; 6] = [
        Signal::Terminate,
        Signal::Interrupt,
        Signal::Quit,
        Signal::User1,
        Signal::Continue,
        Signal::User2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Terminate => "SIGTERM",
            Signal::Interrupt => "SIGINT",
            Signal::Quit => "SIGQUIT",
            Signal::User1 => "SIGUSR1",
            Signal::Continue => "SIGCONT",
            Signal::User2 => "SIGUSR2",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker lifecycle action triggered by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalAction {
    Shutdown,
    Pause,
    Continue,
    ForceShutdown,
    /// Receive the signal and do nothing.
    Ignore,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::Shutdown => write!(f, "shutdown"),
            SignalAction::Pause => write!(f, "pause"),
            SignalAction::Continue => write!(f, "continue"),
            SignalAction::ForceShutdown => write!(f, "force shutdown"),
            SignalAction::Ignore => write!(f, "ignore"),
        }
    }
}

/// Signal to action mapping installed by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalTable {
    actions: BTreeMap<Signal, SignalAction>,
}

impl SignalTable {
    /// A table with no signals.
    pub fn empty() -> Self {
        Self {
            actions: BTreeMap::new(),
        }
    }

    /// Override the action for a signal already present in the table.
    ///
    /// Returns `false` and leaves the table untouched for signals it does not
    /// contain.
    pub fn set(&mut self, signal: Signal, action: SignalAction) -> bool {
        match self.actions.get_mut(&signal) {
            Some(slot) => {
                *slot = action;
                true
            }
            None => false,
        }
    }

    /// Remove a signal so it is not registered at all.
    pub fn remove(&mut self, signal: Signal) -> Option<SignalAction> {
        self.actions.remove(&signal)
    }

    pub fn get(&self, signal: Signal) -> Option<SignalAction> {
        self.actions.get(&signal).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Signal, SignalAction)> + '_ {
        self.actions.iter().map(|(s, a)| (*s, *a))
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for SignalTable {
    /// TERM/INT/QUIT shut down, USR1 pauses, CONT resumes, USR2 force-shuts down.
    fn default() -> Self {
        let actions = BTreeMap::from([
            (Signal::Terminate, SignalAction::Shutdown),
            (Signal::Interrupt, SignalAction::Shutdown),
            (Signal::Quit, SignalAction::Shutdown),
            (Signal::User1, SignalAction::Pause),
            (Signal::Continue, SignalAction::Continue),
            (Signal::User2, SignalAction::ForceShutdown),
        ]);
        Self { actions }
    }
}
