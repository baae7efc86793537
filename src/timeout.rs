//! Timeout enforcement for external tool invocations
//!
//! Every subprocess started by the invoker is bounded by `tool_seconds` of
//! wall-clock time. When the bound is exceeded the invoker sends SIGTERM,
//! waits `grace_seconds` for the process to exit, then kills it.

use std::time::{Duration, Instant};

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum wall-clock time per invocation (default: 600 = 10 min)
    pub tool_seconds: u64,

    /// Time between SIGTERM and SIGKILL (default: 5)
    pub grace_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tool_seconds: 600,
            grace_seconds: 5,
        }
    }
}

impl TimeoutConfig {
    /// Validate bounds
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        // tool_seconds must be in (0, 86400]
        if self.tool_seconds == 0 || self.tool_seconds > 86400 {
            return Err(TimeoutValidationError::ToolOutOfBounds {
                value: self.tool_seconds,
            });
        }

        // grace_seconds must be in (0, 300]
        if self.grace_seconds == 0 || self.grace_seconds > 300 {
            return Err(TimeoutValidationError::GraceOutOfBounds {
                value: self.grace_seconds,
            });
        }

        Ok(())
    }

    /// Invocation bound as a duration
    pub fn tool_limit(&self) -> Duration {
        Duration::from_secs(self.tool_seconds)
    }

    /// Grace period as a duration
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_seconds)
    }
}

/// Timeout validation errors
#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("tool_seconds must be in (0, 86400], got {value}")]
    ToolOutOfBounds { value: u64 },

    #[error("grace_seconds must be in (0, 300], got {value}")]
    GraceOutOfBounds { value: u64 },
}

/// Timeout check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStatus {
    /// Still within bounds
    Ok,
    /// Wall-clock bound exceeded
    Expired,
}

impl TimeoutStatus {
    /// Returns true if a timeout occurred
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimeoutStatus::Expired)
    }
}

/// Tracks elapsed time for one invocation
///
/// The enforcer only reports; terminating the process is the caller's job.
#[derive(Debug)]
pub struct TimeoutEnforcer {
    limit: Duration,
    start_time: Instant,
}

impl TimeoutEnforcer {
    /// Start tracking now
    pub fn new(config: TimeoutConfig) -> Self {
        Self::with_limit(config.tool_limit())
    }

    fn with_limit(limit: Duration) -> Self {
        Self {
            limit,
            start_time: Instant::now(),
        }
    }

    /// Check whether the bound has been exceeded
    pub fn check(&self) -> TimeoutStatus {
        if self.start_time.elapsed() > self.limit {
            TimeoutStatus::Expired
        } else {
            TimeoutStatus::Ok
        }
    }
}
