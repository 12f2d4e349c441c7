//! One-directional lifecycle flag.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of the server. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Accepting connections and work.
    Running,
    /// A stop sequence is in progress.
    ShuttingDown,
    /// The stop sequence finished.
    Stopped,
}

impl ServerState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::ShuttingDown => 1,
            Self::Stopped => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        })
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(ServerState::Running.as_u8()))
    }

    pub(crate) fn get(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Moves from `from` to `to`; fails when another caller got there first.
    pub(crate) fn advance(&self, from: ServerState, to: ServerState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
