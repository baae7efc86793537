//! Pipeline orchestration
//!
//! The driver runs the selected stages strictly one after another:
//! - Preflight the stage (tool lookup)
//! - Execute it and turn the result into a stage record
//! - Stop when a required stage fails, or carry on for tolerant stages
//! - Hand back the finished report
//!
//! Cancellation aborts the run without producing a report.

mod gate;
mod state;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use ulid::Ulid;

use gate_discovery::{Discovery, DiscoveryError};

use crate::config::ConfigError;
use crate::report::{Report, StageRecord};
use crate::signal::{SignalState, EXIT_CODE_CANCELLED};
use crate::stage::{Stage, StageContext, StageKind};
use crate::tool::ToolInvoker;

pub use gate::{Gate, ToolStatus};
pub use state::{DriverError, DriverState, StateMachine};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cancelled")]
    Cancelled,

    #[error("state error: {0}")]
    State(#[from] DriverError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Cancelled => EXIT_CODE_CANCELLED,
            PipelineError::State(_)
            | PipelineError::Config(_)
            | PipelineError::Discovery(_)
            | PipelineError::Io(_)
            | PipelineError::Serialization(_) => 1,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Runs stages in order and collects their records
pub struct PipelineDriver {
    root: PathBuf,
    invoker: ToolInvoker,
    discovery: Discovery,
    stages: Vec<Box<dyn Stage>>,
    jobs: usize,
    machine: StateMachine,
    signals: Option<Arc<SignalState>>,
}

impl PipelineDriver {
    pub fn new(root: impl Into<PathBuf>, invoker: ToolInvoker, discovery: Discovery) -> Self {
        Self {
            root: root.into(),
            invoker,
            discovery,
            stages: Vec::new(),
            jobs: 1,
            machine: StateMachine::new(),
            signals: None,
        }
    }

    /// Append a stage; stages run in the order they were added
    pub fn with_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Publish the running stage's name to the signal handler
    pub fn with_signal_state(mut self, signals: Arc<SignalState>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> DriverState {
        self.machine.state()
    }

    /// Kinds of the stages this driver will run, in order
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    /// Run every stage and return the finished report
    ///
    /// A driver runs once; calling this again fails with an invalid
    /// transition out of the terminal state.
    pub fn run(&mut self) -> PipelineResult<Report> {
        let started_at = Utc::now();
        let run_id = Ulid::new().to_string();
        let total = self.stages.len();
        tracing::info!(run_id = %run_id, stages = total, root = %self.root.display(), "pipeline started");

        let ctx = StageContext {
            root: &self.root,
            invoker: &self.invoker,
            discovery: &self.discovery,
            jobs: self.jobs,
        };

        let mut records: Vec<StageRecord> = Vec::with_capacity(total);
        let mut skipped = Vec::new();

        for (index, stage) in self.stages.iter().enumerate() {
            if self.invoker.cancel_token().is_cancelled() {
                return Err(abort_cancelled(&mut self.machine, stage.kind()));
            }
            self.machine.transition(DriverState::Running { stage: index })?;
            if let Some(signals) = &self.signals {
                signals.set_current_stage(Some(stage.name().to_string()));
            }

            tracing::info!(stage = stage.name(), index, total, "stage started");
            let result = stage.preflight(&ctx).and_then(|()| stage.execute(&ctx));
            let record = match result {
                Ok(run) => StageRecord::from_run(stage.spec(), run),
                Err(err) if err.is_cancelled() => {
                    return Err(abort_cancelled(&mut self.machine, stage.kind()));
                }
                Err(err) => {
                    tracing::error!(stage = stage.name(), error = %err, "stage could not complete");
                    StageRecord::from_error(stage.spec(), &err)
                }
            };

            let fatal = record.is_fatal();
            tracing::info!(
                stage = stage.name(),
                code = record.outcome.code,
                elapsed_ms = record.outcome.elapsed_ms,
                failed = record.failed(),
                "stage finished"
            );
            records.push(record);

            if fatal {
                skipped = self.stages[index + 1..].iter().map(|s| s.kind()).collect();
                tracing::warn!(stage = stage.name(), skipped = skipped.len(), "required stage failed, aborting");
                self.machine.transition(DriverState::Aborted)?;
                break;
            }
        }

        if let Some(signals) = &self.signals {
            signals.set_current_stage(None);
        }

        if self.invoker.cancel_token().is_cancelled() {
            if !self.machine.state().is_terminal() {
                self.machine.transition(DriverState::Aborted)?;
            }
            return Err(PipelineError::Cancelled);
        }

        if !self.machine.state().is_terminal() {
            self.machine.transition(DriverState::Completed)?;
        }

        let report = Report::new(run_id, self.root.clone(), started_at, records, skipped);
        tracing::info!(
            state = %self.machine.state(),
            exit_code = report.exit_code(),
            duration_ms = report.duration_ms(),
            "pipeline finished"
        );
        Ok(report)
    }
}

fn abort_cancelled(machine: &mut StateMachine, stage: StageKind) -> PipelineError {
    tracing::warn!(stage = %stage, "run cancelled");
    if let Err(err) = machine.transition(DriverState::Aborted) {
        return err.into();
    }
    PipelineError::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ErrorKind, ExitCode, FileOutcome};
    use crate::signal::CancelToken;
    use crate::stage::{StageError, StageRun, StageSpec};
    use crate::timeout::TimeoutConfig;
    use crate::tool::{ExitOutcome, InvokeError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Stage returning a fixed exit code without running anything
    struct FixedStage {
        spec: StageSpec,
        code: i32,
        calls: Arc<AtomicUsize>,
    }

    impl FixedStage {
        fn boxed(kind: StageKind, code: i32, calls: &Arc<AtomicUsize>) -> Box<dyn Stage> {
            Box::new(Self {
                spec: StageSpec::new(kind, Vec::new()),
                code,
                calls: Arc::clone(calls),
            })
        }
    }

    impl Stage for FixedStage {
        fn spec(&self) -> &StageSpec {
            &self.spec
        }

        fn execute(&self, _ctx: &StageContext<'_>) -> Result<StageRun, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = ExitOutcome::synthetic(self.code, "", Duration::ZERO);
            Ok(StageRun::new(outcome).with_files(vec![FileOutcome::pass("base/a.yaml")]))
        }
    }

    /// Stage that trips the cancel token and reports cancellation
    struct CancellingStage {
        spec: StageSpec,
        token: CancelToken,
    }

    impl Stage for CancellingStage {
        fn spec(&self) -> &StageSpec {
            &self.spec
        }

        fn execute(&self, _ctx: &StageContext<'_>) -> Result<StageRun, StageError> {
            self.token.cancel();
            Err(StageError::Invoke(InvokeError::Cancelled {
                command: "yamllint .".to_string(),
            }))
        }
    }

    fn driver(dir: &Path, token: CancelToken) -> PipelineDriver {
        let invoker = ToolInvoker::new(dir, TimeoutConfig::default()).with_cancel_token(token);
        let discovery = Discovery::with_defaults(dir).unwrap();
        PipelineDriver::new(dir, invoker, discovery)
    }

    #[test]
    fn test_all_stages_pass() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut driver = StageKind::ALL
            .into_iter()
            .fold(driver(dir.path(), CancelToken::new()), |d, kind| {
                d.with_stage(FixedStage::boxed(kind, 0, &calls))
            });

        let report = driver.run().unwrap();

        assert_eq!(driver.state(), DriverState::Completed);
        assert_eq!(report.stages().len(), 5);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_required_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut driver = driver(dir.path(), CancelToken::new())
            .with_stage(FixedStage::boxed(StageKind::ManifestLint, 1, &calls))
            .with_stage(FixedStage::boxed(StageKind::YamlLint, 0, &calls));

        let report = driver.run().unwrap();

        assert_eq!(driver.state(), DriverState::Aborted);
        assert_eq!(report.stages().len(), 1);
        assert_eq!(report.skipped(), &[StageKind::YamlLint]);
        assert_eq!(report.exit_code_enum(), Some(ExitCode::Failure));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tolerant_failure_continues() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut driver = driver(dir.path(), CancelToken::new())
            .with_stage(FixedStage::boxed(StageKind::SecretScan, 1, &calls))
            .with_stage(FixedStage::boxed(StageKind::ArgoValidate, 1, &calls));

        let report = driver.run().unwrap();

        assert_eq!(driver.state(), DriverState::Completed);
        assert!(!report.aborted());
        assert_eq!(report.stages().len(), 2);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_missing_tool_exits_two() {
        let dir = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        let invoker = ToolInvoker::new(dir.path(), TimeoutConfig::default()).with_provisioner(
            crate::tool::ToolProvisioner::default().with_search_path(empty.path().as_os_str()),
        );
        let discovery = Discovery::with_defaults(dir.path()).unwrap();
        let stage = crate::stage::YamlLintStage::from_settings(&crate::config::YamlLintSettings::default(), false);
        let mut driver = PipelineDriver::new(dir.path(), invoker, discovery).with_stage(Box::new(stage));

        let report = driver.run().unwrap();

        assert_eq!(report.exit_code_enum(), Some(ExitCode::ToolMissing));
        let record = report.stage(StageKind::YamlLint).unwrap();
        assert_eq!(record.error, Some(ErrorKind::ToolNotFound));
    }

    #[test]
    fn test_cancel_before_start_produces_no_report() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let token = CancelToken::new();
        token.cancel();
        let mut driver = driver(dir.path(), token)
            .with_stage(FixedStage::boxed(StageKind::ManifestLint, 0, &calls));

        let err = driver.run().unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(driver.state(), DriverState::Aborted);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_mid_stage_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let token = CancelToken::new();
        let mut driver = driver(dir.path(), token.clone())
            .with_stage(Box::new(CancellingStage {
                spec: StageSpec::new(StageKind::YamlLint, Vec::new()),
                token,
            }))
            .with_stage(FixedStage::boxed(StageKind::SecretScan, 0, &calls));

        assert!(matches!(driver.run(), Err(PipelineError::Cancelled)));
        assert_eq!(driver.state(), DriverState::Aborted);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_driver_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut driver = driver(dir.path(), CancelToken::new())
            .with_stage(FixedStage::boxed(StageKind::ManifestLint, 0, &calls));

        driver.run().unwrap();
        assert!(matches!(driver.run(), Err(PipelineError::State(_))));
    }
}
