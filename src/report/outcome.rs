//! Per-file verdicts, error taxonomy and stable exit codes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Verdict for a single file (or overlay directory)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Warning,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Warning => "WARN",
        }
    }
}

/// Outcome for one file checked by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FileOutcome {
    pub fn pass(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            verdict: Verdict::Pass,
            detail: None,
        }
    }

    pub fn fail(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            verdict: Verdict::Fail,
            detail: Some(detail.into()),
        }
    }

    pub fn warning(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            verdict: Verdict::Warning,
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verdict.label(), self.path.display())?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

/// What went wrong in a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Required executable absent and not installable
    ToolNotFound,
    /// Invocation exceeded its wall-clock bound
    Timeout,
    /// Schema validation or kustomize rendering failed
    ValidationFailure,
    /// yamllint reported errors
    LintFailure,
    /// The secret scanner reported findings
    SecretsFound,
    /// git-cliff failed or produced no changelog
    ChangelogGenFailure,
    /// Run aborted by a signal
    Cancelled,
}

impl ErrorKind {
    /// Whether this kind on its own marks the stage as failed
    ///
    /// Secret findings are reported without failing the stage unless the
    /// stage itself turned them into a non-zero exit code.
    pub fn is_failure(&self) -> bool {
        !matches!(self, ErrorKind::SecretsFound)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::ToolNotFound => "Required tool not found",
            ErrorKind::Timeout => "Tool timed out",
            ErrorKind::ValidationFailure => "Manifest validation failed",
            ErrorKind::LintFailure => "YAML lint failed",
            ErrorKind::SecretsFound => "Secrets found",
            ErrorKind::ChangelogGenFailure => "Changelog generation failed",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    /// Every required stage passed
    #[default]
    Success = 0,
    /// A required stage failed, or the run was cancelled or misconfigured
    Failure = 1,
    /// A required tool was missing
    ToolMissing = 2,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::Failure),
            2 => Some(ExitCode::ToolMissing),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::ToolNotFound).unwrap(),
            r#""TOOL_NOT_FOUND""#
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::ChangelogGenFailure).unwrap(),
            r#""CHANGELOG_GEN_FAILURE""#
        );
    }

    #[test]
    fn test_secrets_found_is_not_a_failure_by_itself() {
        assert!(!ErrorKind::SecretsFound.is_failure());
        assert!(ErrorKind::LintFailure.is_failure());
        assert!(ErrorKind::Cancelled.is_failure());
    }

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::Failure.as_i32(), 1);
        assert_eq!(ExitCode::ToolMissing.as_i32(), 2);
        assert_eq!(ExitCode::from_i32(2), Some(ExitCode::ToolMissing));
        assert_eq!(ExitCode::from_i32(3), None);
    }

    #[test]
    fn test_file_outcome_display() {
        let ok = FileOutcome::pass("base/deployment.yaml");
        assert_eq!(ok.to_string(), "PASS base/deployment.yaml");

        let bad = FileOutcome::fail("overlays/prod", "kustomize build failed");
        assert_eq!(bad.to_string(), "FAIL overlays/prod: kustomize build failed");
    }

    #[test]
    fn test_verdict_serialization() {
        assert_eq!(serde_json::to_string(&Verdict::Warning).unwrap(), r#""warning""#);
    }
}
