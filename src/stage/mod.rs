//! Validation stages
//!
//! Each stage wraps one concern of the gate (schema validation, lint, secret
//! scanning, changelog, ArgoCD checks). Stages are run in a fixed order by
//! the pipeline driver; a stage never decides whether the run continues.

pub mod argo;
pub mod changelog;
pub mod manifest_lint;
pub mod secret_scan;
pub mod yaml_lint;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use gate_discovery::{Discovery, DiscoveryError};

use crate::report::{ErrorKind, FileOutcome};
use crate::tool::{CommandTemplate, ExitOutcome, InvokeError, TemplateError, TemplateVars, ToolInvoker};

pub use argo::ArgoValidateStage;
pub use changelog::ChangelogStage;
pub use manifest_lint::ManifestLintStage;
pub use secret_scan::{SecretPolicy, SecretScanStage};
pub use yaml_lint::YamlLintStage;

/// The five stages, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    ManifestLint,
    YamlLint,
    SecretScan,
    #[serde(rename = "changelog")]
    ChangelogGen,
    ArgoValidate,
}

impl StageKind {
    /// Pipeline order
    pub const ALL: [StageKind; 5] = [
        StageKind::ManifestLint,
        StageKind::YamlLint,
        StageKind::SecretScan,
        StageKind::ChangelogGen,
        StageKind::ArgoValidate,
    ];

    /// Stable name used on the command line, in config and in reports
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::ManifestLint => "manifest-lint",
            StageKind::YamlLint => "yaml-lint",
            StageKind::SecretScan => "secret-scan",
            StageKind::ChangelogGen => "changelog",
            StageKind::ArgoValidate => "argo-validate",
        }
    }

    /// Whether a failure of this stage is tolerated unless configured otherwise
    pub fn default_continue_on_failure(&self) -> bool {
        matches!(self, StageKind::SecretScan | StageKind::ArgoValidate)
    }

    /// Error kind recorded when the stage's tools report failure
    pub fn failure_kind(&self) -> ErrorKind {
        match self {
            StageKind::ManifestLint | StageKind::ArgoValidate => ErrorKind::ValidationFailure,
            StageKind::YamlLint => ErrorKind::LintFailure,
            StageKind::SecretScan => ErrorKind::SecretsFound,
            StageKind::ChangelogGen => ErrorKind::ChangelogGenFailure,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage '{0}' (expected manifest-lint, yaml-lint, secret-scan, changelog or argo-validate)")]
pub struct ParseStageError(pub String);

impl FromStr for StageKind {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| ParseStageError(s.to_string()))
    }
}

/// Static description of a configured stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub kind: StageKind,
    /// Templates for every tool the stage may run; empty for in-process stages
    pub commands: Vec<CommandTemplate>,
    pub continue_on_failure: bool,
}

impl StageSpec {
    pub fn new(kind: StageKind, commands: Vec<CommandTemplate>) -> Self {
        Self {
            kind,
            commands,
            continue_on_failure: kind.default_continue_on_failure(),
        }
    }

    pub fn continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = value;
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Distinct tool names referenced by the templates, in template order
    pub fn tools(&self) -> Vec<&str> {
        let mut tools: Vec<&str> = Vec::new();
        for template in &self.commands {
            if !tools.contains(&template.program()) {
                tools.push(template.program());
            }
        }
        tools
    }
}

/// Everything a stage needs while executing
pub struct StageContext<'a> {
    pub root: &'a Path,
    pub invoker: &'a ToolInvoker,
    pub discovery: &'a Discovery,
    /// Upper bound on concurrent per-file invocations
    pub jobs: usize,
}

/// What a stage produced
#[derive(Debug)]
pub struct StageRun {
    pub outcome: ExitOutcome,
    pub files: Vec<FileOutcome>,
    pub error: Option<ErrorKind>,
    pub findings: Option<usize>,
}

impl StageRun {
    pub fn new(outcome: ExitOutcome) -> Self {
        Self {
            outcome,
            files: Vec::new(),
            error: None,
            findings: None,
        }
    }

    pub fn with_files(mut self, files: Vec<FileOutcome>) -> Self {
        self.files = files;
        self
    }

    pub fn with_error(mut self, error: Option<ErrorKind>) -> Self {
        self.error = error;
        self
    }

    pub fn with_findings(mut self, findings: usize) -> Self {
        self.findings = Some(findings);
        self
    }
}

/// Errors that stop a stage before it can produce a result
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    /// Error kind implied by the error itself, if any
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            StageError::Invoke(InvokeError::ToolNotFound { .. }) => Some(ErrorKind::ToolNotFound),
            StageError::Invoke(InvokeError::Timeout { .. }) => Some(ErrorKind::Timeout),
            StageError::Invoke(InvokeError::Cancelled { .. }) => Some(ErrorKind::Cancelled),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageError::Invoke(InvokeError::Cancelled { .. }))
    }
}

/// A single pipeline stage
pub trait Stage: Send + Sync {
    /// Static description
    fn spec(&self) -> &StageSpec;

    /// Check preconditions before `execute`. The default makes sure every
    /// tool the stage's templates reference can be located.
    fn preflight(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
        for tool in self.spec().tools() {
            ctx.invoker.ensure_available(tool)?;
        }
        Ok(())
    }

    /// Do the stage's work
    fn execute(&self, ctx: &StageContext<'_>) -> Result<StageRun, StageError>;

    fn kind(&self) -> StageKind {
        self.spec().kind
    }

    fn name(&self) -> &'static str {
        self.spec().name()
    }
}

/// Relative path rendered with forward slashes for tool arguments
pub(crate) fn arg_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Template variables every invocation gets
pub(crate) fn base_vars(root: &Path) -> TemplateVars {
    TemplateVars::new().with("root", root.to_string_lossy())
}

/// Stop early when the run has been cancelled between invocations
pub(crate) fn check_cancelled(ctx: &StageContext<'_>, stage: StageKind) -> Result<(), StageError> {
    if ctx.invoker.cancel_token().is_cancelled() {
        return Err(StageError::Invoke(InvokeError::Cancelled {
            command: stage.name().to_string(),
        }));
    }
    Ok(())
}
