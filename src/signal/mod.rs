//! Signal handling for CI aborts (SIGINT/SIGTERM)
//!
//! On the first signal the shared [`CancelToken`] fires: the running tool is
//! terminated, the driver moves to `Aborted` and no report is written.
//! A second signal exits the process immediately.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Exit code used when the run is cancelled
pub const EXIT_CODE_CANCELLED: i32 = 1;

/// Cloneable cancellation flag shared between the driver, the invoker and
/// the signal handler
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an unfired token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Signal handler state
#[derive(Debug, Default)]
pub struct SignalState {
    cancel: CancelToken,
    immediate_exit: AtomicBool,
    signal_count: AtomicU8,
    current_stage: Mutex<Option<String>>,
}

impl SignalState {
    /// Create a new signal state
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state that fires an existing token
    pub fn with_token(cancel: CancelToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    /// Token fired by the first signal
    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Check if cancellation has been requested
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Check if immediate exit has been requested (second signal)
    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    /// Number of signals received
    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Handle a signal and return the action to take
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        if count == 0 {
            self.cancel.cancel();
            SignalAction::InitiateCancellation
        } else if count == 1 {
            self.immediate_exit.store(true, Ordering::SeqCst);
            SignalAction::ImmediateExit
        } else {
            SignalAction::Ignore
        }
    }

    /// Record the stage currently running, for the abort message
    pub fn set_current_stage(&self, stage: Option<String>) {
        if let Ok(mut current) = self.current_stage.lock() {
            *current = stage;
        }
    }

    /// Stage running when the signal arrived
    pub fn current_stage(&self) -> Option<String> {
        self.current_stage.lock().ok().and_then(|s| s.clone())
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: terminate the running tool and abort
    InitiateCancellation,
    /// Second signal: exit without waiting
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Installs the process signal handler over a shared [`SignalState`]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Create a handler with fresh state
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    /// Shared state
    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install handlers for SIGINT and SIGTERM. Call once at startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateCancellation => {
                let stage = state.current_stage().unwrap_or_else(|| "pipeline".to_string());
                tracing::warn!(%stage, "received interrupt, aborting");
            }
            SignalAction::ImmediateExit => {
                tracing::error!("received second interrupt, exiting immediately");
                std::process::exit(EXIT_CODE_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
