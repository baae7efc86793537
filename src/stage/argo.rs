//! ArgoCD application checks
//!
//! Runs in-process: every manifest under `apps/` is parsed (all documents)
//! and at least one document must declare the required kind. Other
//! documents in the same file, such as an AppProject next to its
//! Application, are allowed. Problems are reported as warnings only.

use serde::Deserialize;
use std::path::Path;
use std::time::Instant;

use gate_discovery::ManifestGroup;

use crate::config::ArgoSettings;
use crate::report::{FileOutcome, Verdict};
use crate::tool::ExitOutcome;

use super::{check_cancelled, Stage, StageContext, StageError, StageKind, StageRun, StageSpec};

pub struct ArgoValidateStage {
    spec: StageSpec,
    required_kind: String,
}

impl ArgoValidateStage {
    pub fn new(required_kind: impl Into<String>) -> Self {
        Self {
            spec: StageSpec::new(StageKind::ArgoValidate, Vec::new()),
            required_kind: required_kind.into(),
        }
    }

    pub fn from_settings(settings: &ArgoSettings, continue_on_failure: bool) -> Self {
        let mut stage = Self::new(settings.required_kind.clone());
        stage.spec = stage.spec.continue_on_failure(continue_on_failure);
        stage
    }

    /// Check one file's contents
    fn check_content(&self, path: &Path, content: &str) -> FileOutcome {
        let mut kinds = Vec::new();
        for document in serde_yaml::Deserializer::from_str(content) {
            let value = match serde_yaml::Value::deserialize(document) {
                Ok(value) => value,
                Err(err) => return FileOutcome::warning(path, format!("invalid YAML: {}", err)),
            };
            if value.is_null() {
                continue;
            }
            kinds.push(value.get("kind").and_then(serde_yaml::Value::as_str).map(str::to_string));
        }

        if kinds.is_empty() {
            return FileOutcome::warning(path, "empty document");
        }
        if kinds.iter().flatten().any(|kind| *kind == self.required_kind) {
            return FileOutcome::pass(path);
        }
        match kinds.into_iter().flatten().next() {
            Some(kind) => FileOutcome::warning(path, format!("kind {} is not {}", kind, self.required_kind)),
            None => FileOutcome::warning(path, "missing kind"),
        }
    }
}

impl Stage for ArgoValidateStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    fn execute(&self, ctx: &StageContext<'_>) -> Result<StageRun, StageError> {
        let start = Instant::now();
        let apps = ctx.discovery.group(ManifestGroup::App)?;

        let mut files = Vec::with_capacity(apps.len());
        for app in &apps {
            check_cancelled(ctx, StageKind::ArgoValidate)?;
            let outcome = match std::fs::read_to_string(app.absolute(ctx.root)) {
                Ok(content) => self.check_content(app.path(), &content),
                Err(err) => FileOutcome::warning(app.path(), format!("unreadable: {}", err)),
            };
            if outcome.verdict == Verdict::Warning {
                tracing::warn!(file = %app.path().display(), "{}", outcome.detail.as_deref().unwrap_or(""));
            }
            files.push(outcome);
        }

        let warnings = files.iter().filter(|f| f.verdict == Verdict::Warning).count();
        let summary = format!(
            "{} application manifest(s) checked, {} warning(s)\n",
            files.len(),
            warnings
        );
        tracing::info!(checked = files.len(), warnings, "argo application check finished");

        Ok(StageRun::new(ExitOutcome::synthetic(0, summary, start.elapsed())).with_files(files))
    }
}
