//! One stage's entry in the report

use serde::{Deserialize, Serialize};

use crate::stage::{StageError, StageKind, StageRun, StageSpec};
use crate::tool::{ExitOutcome, EXIT_CODE_NOT_FOUND};

use super::outcome::{ErrorKind, FileOutcome, Verdict};

/// Result of running a single stage
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageKind,
    pub continue_on_failure: bool,
    /// Aggregated over all of the stage's invocations
    pub outcome: ExitOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Secret findings, for the secret scan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings: Option<usize>,
}

impl StageRecord {
    /// Record for a stage that ran to completion
    pub fn from_run(spec: &StageSpec, run: StageRun) -> Self {
        Self {
            stage: spec.kind,
            continue_on_failure: spec.continue_on_failure,
            outcome: run.outcome,
            files: run.files,
            error: run.error,
            error_message: None,
            findings: run.findings,
        }
    }

    /// Record for a stage that could not produce a result
    pub fn from_error(spec: &StageSpec, err: &StageError) -> Self {
        let kind = err.error_kind().unwrap_or_else(|| spec.kind.failure_kind());
        let code = match kind {
            ErrorKind::ToolNotFound => EXIT_CODE_NOT_FOUND,
            _ => 1,
        };
        Self {
            stage: spec.kind,
            continue_on_failure: spec.continue_on_failure,
            outcome: ExitOutcome::failed(code, err.to_string()),
            files: Vec::new(),
            error: Some(kind),
            error_message: Some(err.to_string()),
            findings: None,
        }
    }

    /// Nonzero exit or a failing error kind
    pub fn failed(&self) -> bool {
        self.outcome.code != 0 || self.error.is_some_and(|e| e.is_failure())
    }

    /// Failed and not allowed to
    pub fn is_fatal(&self) -> bool {
        self.failed() && !self.continue_on_failure
    }

    /// Stage-level label for the human report
    pub fn verdict(&self) -> Verdict {
        if !self.failed() {
            let warned = self.error.is_some() || self.files.iter().any(|f| f.verdict != Verdict::Pass);
            return if warned { Verdict::Warning } else { Verdict::Pass };
        }
        if self.continue_on_failure {
            Verdict::Warning
        } else {
            Verdict::Fail
        }
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.files.iter().filter(|f| f.verdict == verdict).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::InvokeError;
    use std::time::Duration;

    fn spec(kind: StageKind) -> StageSpec {
        StageSpec::new(kind, Vec::new())
    }

    #[test]
    fn test_clean_run_passes() {
        let run = StageRun::new(ExitOutcome::synthetic(0, "ok\n", Duration::from_millis(5)))
            .with_files(vec![FileOutcome::pass("base/deployment.yaml")]);
        let record = StageRecord::from_run(&spec(StageKind::ManifestLint), run);

        assert!(!record.failed());
        assert!(!record.is_fatal());
        assert_eq!(record.verdict(), Verdict::Pass);
        assert_eq!(record.count(Verdict::Pass), 1);
    }

    #[test]
    fn test_secret_findings_are_a_warning() {
        let run = StageRun::new(ExitOutcome::synthetic(0, "", Duration::ZERO))
            .with_error(Some(ErrorKind::SecretsFound))
            .with_findings(2);
        let record = StageRecord::from_run(&spec(StageKind::SecretScan), run);

        assert!(!record.failed());
        assert_eq!(record.verdict(), Verdict::Warning);
        assert_eq!(record.findings, Some(2));
    }

    #[test]
    fn test_tolerated_failure_is_not_fatal() {
        let run = StageRun::new(ExitOutcome::failed(1, "boom"));
        let record = StageRecord::from_run(&spec(StageKind::ArgoValidate), run);

        assert!(record.failed());
        assert!(!record.is_fatal());
        assert_eq!(record.verdict(), Verdict::Warning);
    }

    #[test]
    fn test_missing_tool_record() {
        let err = StageError::Invoke(InvokeError::ToolNotFound {
            tool: "kubeconform".to_string(),
            reason: "not found on PATH".to_string(),
        });
        let record = StageRecord::from_error(&spec(StageKind::ManifestLint), &err);

        assert_eq!(record.outcome.code, EXIT_CODE_NOT_FOUND);
        assert_eq!(record.error, Some(ErrorKind::ToolNotFound));
        assert!(record.is_fatal());
        assert_eq!(record.verdict(), Verdict::Fail);
    }

    #[test]
    fn test_other_errors_use_stage_failure_kind() {
        let err = StageError::Io {
            path: "CHANGELOG.md".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let record = StageRecord::from_error(&spec(StageKind::ChangelogGen), &err);

        assert_eq!(record.outcome.code, 1);
        assert_eq!(record.error, Some(ErrorKind::ChangelogGenFailure));
    }
}
