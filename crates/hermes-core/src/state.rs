//! Process run state.
//!
//! The dispatcher fails fast with [`HermesError::NotReady`] when the
//! process is not accepting work; the handle is a cheap atomic shared
//! across components.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{HermesError, HermesResult};

/// Coarse process lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    /// Starting up; not yet accepting requests.
    Starting = 0,
    /// Accepting requests.
    Running = 1,
    /// Draining; no new requests accepted.
    Draining = 2,
    /// Stopped.
    Stopped = 3,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Draining,
            3 => Self::Stopped,
            _ => Self::Starting,
        }
    }
}

/// Shared, atomically updated run state.
#[derive(Debug, Clone)]
pub struct RunStateHandle {
    state: Arc<AtomicU8>,
}

impl RunStateHandle {
    /// Creates a handle in the [`RunState::Starting`] state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RunState::Starting as u8)),
        }
    }

    /// Creates a handle already in the [`RunState::Running`] state.
    #[must_use]
    pub fn running() -> Self {
        let handle = Self::new();
        handle.set(RunState::Running);
        handle
    }

    /// Returns the current state.
    #[must_use]
    pub fn current(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transitions to a new state.
    pub fn set(&self, state: RunState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Returns `true` when requests are being accepted.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current() == RunState::Running
    }

    /// Fails with [`HermesError::NotReady`] unless running.
    pub fn ensure_running(&self) -> HermesResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(HermesError::NotReady)
        }
    }
}

impl Default for RunStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_not_running() {
        let handle = RunStateHandle::new();
        assert_eq!(handle.current(), RunState::Starting);
        assert!(handle.ensure_running().is_err());
    }

    #[test]
    fn test_transitions() {
        let handle = RunStateHandle::new();
        handle.set(RunState::Running);
        assert!(handle.ensure_running().is_ok());

        handle.set(RunState::Draining);
        assert!(matches!(
            handle.ensure_running().unwrap_err(),
            HermesError::NotReady
        ));
    }

    #[test]
    fn test_clones_share_state() {
        let a = RunStateHandle::running();
        let b = a.clone();
        a.set(RunState::Stopped);
        assert_eq!(b.current(), RunState::Stopped);
    }
}
