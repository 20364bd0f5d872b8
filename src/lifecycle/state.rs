//! Lifecycle state machine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    ShuttingDown = 3,
}

impl From<u8> for LifecycleState {
    fn from(val: u8) -> Self {
        match val {
            1 => LifecycleState::Starting,
            2 => LifecycleState::Running,
            3 => LifecycleState::ShuttingDown,
            _ => LifecycleState::Stopped,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting down",
        };
        f.write_str(s)
    }
}

/// Atomic holder for a `LifecycleState`.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: LifecycleState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> LifecycleState {
        LifecycleState::from(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move from `from` to `to`. On failure returns the actual state.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), LifecycleState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(LifecycleState::from)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(LifecycleState::Stopped)
    }
}
