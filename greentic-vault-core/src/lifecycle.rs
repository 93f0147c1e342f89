use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Created = 0,
    Started = 1,
    Stopped = 2,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => State::Created,
            1 => State::Started,
            _ => State::Stopped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("{0} has already been started")]
    AlreadyStarted(String),
    #[error("{0} has already been stopped")]
    AlreadyStopped(String),
    #[error("{0} cannot be stopped before it is started")]
    NotStarted(String),
    #[error("{0} is not running")]
    NotRunning(String),
}

/// `Created -> Started -> Stopped`, each transition applied at most once.
#[derive(Debug)]
pub struct StateMachine {
    state: AtomicU8,
}

impl StateMachine {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(State::Created as u8),
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `Started` and runs `f`. A failing `f` leaves the service stopped.
    pub fn start_once<F, E>(&self, name: &str, f: F) -> Result<(), E>
    where
        F: FnOnce() -> Result<(), E>,
        E: From<LifecycleError>,
    {
        self.state
            .compare_exchange(
                State::Created as u8,
                State::Started as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| LifecycleError::AlreadyStarted(name.to_string()))?;
        f().inspect_err(|_| self.state.store(State::Stopped as u8, Ordering::Release))
    }

    /// Claims the `Started -> Stopped` transition. The caller performs the shutdown work.
    pub fn begin_stop(&self, name: &str) -> Result<(), LifecycleError> {
        match self.state.compare_exchange(
            State::Started as u8,
            State::Stopped as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(current) if current == State::Created as u8 => {
                Err(LifecycleError::NotStarted(name.to_string()))
            }
            Err(_) => Err(LifecycleError::AlreadyStopped(name.to_string())),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == State::Started
    }

    pub fn ensure_running(&self, name: &str) -> Result<(), LifecycleError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(LifecycleError::NotRunning(name.to_string()))
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
