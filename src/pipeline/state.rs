//! Driver state machine
//!
//! IDLE → RUNNING(0) → RUNNING(1) → ... → {COMPLETED | ABORTED}

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverState {
    /// Nothing started yet
    Idle,
    /// Executing the stage at this position in the run's stage list
    Running { stage: usize },
    /// Every selected stage ran
    Completed,
    /// A required stage failed, or the run was cancelled
    Aborted,
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DriverState::Completed | DriverState::Aborted)
    }

    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: DriverState) -> bool {
        match (self, target) {
            (DriverState::Idle, DriverState::Running { stage: 0 }) => true,
            (DriverState::Idle, DriverState::Completed) => true, // no stages selected
            (DriverState::Idle, DriverState::Aborted) => true,   // cancelled before start

            (DriverState::Running { stage }, DriverState::Running { stage: next }) => next == stage + 1,
            (DriverState::Running { .. }, DriverState::Completed) => true,
            (DriverState::Running { .. }, DriverState::Aborted) => true,

            // Terminal states cannot transition
            _ => false,
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Idle => write!(f, "IDLE"),
            DriverState::Running { stage } => write!(f, "RUNNING({})", stage),
            DriverState::Completed => write!(f, "COMPLETED"),
            DriverState::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: DriverState, to: DriverState },
}

/// Tracks the current state and enforces legal transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    state: DriverState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: DriverState::Idle,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn transition(&mut self, to: DriverState) -> Result<(), DriverError> {
        if !self.state.can_transition_to(to) {
            return Err(DriverError::InvalidTransition { from: self.state, to });
        }
        tracing::debug!(from = %self.state, to = %to, "driver transition");
        self.state = to;
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
