//! Kubernetes schema validation of base and overlay manifests
//!
//! Every base and overlay file is validated on its own, fanned out over the
//! invoker's worker threads. Each overlay directory is then rendered with
//! kustomize and the rendered stream is validated through stdin.

use std::path::PathBuf;

use gate_discovery::{overlay_dirs, ManifestFile, ManifestGroup};

use crate::config::ManifestLintSettings;
use crate::report::{ErrorKind, FileOutcome, Verdict};
use crate::tool::{CommandTemplate, ExitOutcome, InvokeError};

use super::{arg_path, base_vars, check_cancelled, Stage, StageContext, StageError, StageKind, StageRun, StageSpec};

pub struct ManifestLintStage {
    spec: StageSpec,
    validate: CommandTemplate,
    render: CommandTemplate,
    stream: CommandTemplate,
}

impl ManifestLintStage {
    pub fn new(validate: CommandTemplate, render: CommandTemplate, stream: CommandTemplate) -> Self {
        let spec = StageSpec::new(
            StageKind::ManifestLint,
            vec![validate.clone(), render.clone(), stream.clone()],
        );
        Self {
            spec,
            validate,
            render,
            stream,
        }
    }

    pub fn from_settings(settings: &ManifestLintSettings, continue_on_failure: bool) -> Self {
        let mut stage = Self::new(
            settings.command.clone(),
            settings.render_command.clone(),
            settings.stream_command.clone(),
        );
        stage.spec = stage.spec.continue_on_failure(continue_on_failure);
        stage
    }

    fn inputs(&self, ctx: &StageContext<'_>) -> Result<(Vec<ManifestFile>, Vec<PathBuf>), StageError> {
        let mut files = Vec::new();
        for file in ctx.discovery.iter() {
            let file = file?;
            if matches!(file.group(), ManifestGroup::Base | ManifestGroup::Overlay) {
                files.push(file);
            }
        }
        // Base files sort before overlay files, matching validation order
        files.sort_by_key(|f| (f.group() != ManifestGroup::Base, f.path().to_path_buf()));

        let overlays = overlay_dirs(ctx.root)?;
        Ok((files, overlays))
    }
}

/// Turn one invocation result into a file outcome, keeping the exit outcome
fn record(
    path: PathBuf,
    result: Result<ExitOutcome, InvokeError>,
    outcomes: &mut Vec<ExitOutcome>,
    timed_out: &mut bool,
) -> Result<FileOutcome, StageError> {
    match result {
        Ok(outcome) => {
            let file = if outcome.success() {
                FileOutcome::pass(path)
            } else {
                let detail = outcome
                    .first_line()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("exit code {}", outcome.code));
                FileOutcome::fail(path, detail)
            };
            outcomes.push(outcome);
            Ok(file)
        }
        Err(err @ InvokeError::Cancelled { .. }) => Err(err.into()),
        Err(err @ InvokeError::Timeout { .. }) => {
            *timed_out = true;
            Ok(FileOutcome::fail(path, err.to_string()))
        }
        Err(err) => Ok(FileOutcome::fail(path, err.to_string())),
    }
}

impl Stage for ManifestLintStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    /// Only the tools needed for the inputs present are required
    fn preflight(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
        let (files, overlays) = self.inputs(ctx)?;
        if !files.is_empty() {
            ctx.invoker.ensure_available(self.validate.program())?;
        }
        if !overlays.is_empty() {
            ctx.invoker.ensure_available(self.render.program())?;
            ctx.invoker.ensure_available(self.stream.program())?;
        }
        Ok(())
    }

    fn execute(&self, ctx: &StageContext<'_>) -> Result<StageRun, StageError> {
        let (files, overlays) = self.inputs(ctx)?;
        if files.is_empty() && overlays.is_empty() {
            tracing::info!("no base or overlay manifests found");
            return Ok(StageRun::new(ExitOutcome::synthetic(
                0,
                "no manifests found\n",
                std::time::Duration::ZERO,
            )));
        }

        let vars = base_vars(ctx.root);
        let commands = files
            .iter()
            .map(|f| self.validate.render(&vars.clone().with("file", arg_path(f.path()))))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(files = files.len(), jobs = ctx.jobs, "validating manifests");
        let results = ctx.invoker.run_all(&commands, ctx.jobs);

        let mut outcomes = Vec::with_capacity(files.len() + overlays.len());
        let mut file_outcomes = Vec::with_capacity(files.len() + overlays.len());
        let mut timed_out = false;

        for (file, result) in files.iter().zip(results) {
            let outcome = record(file.path().to_path_buf(), result, &mut outcomes, &mut timed_out)?;
            file_outcomes.push(outcome);
        }

        let stream = self.stream.render(&vars)?;
        for dir in overlays {
            check_cancelled(ctx, StageKind::ManifestLint)?;
            tracing::info!(overlay = %dir.display(), "rendering overlay");
            let render = self.render.render(&vars.clone().with("dir", arg_path(&dir)))?;
            let result = ctx.invoker.pipe(&render, &stream);
            let outcome = record(dir, result, &mut outcomes, &mut timed_out)?;
            file_outcomes.push(outcome);
        }

        let failed = file_outcomes.iter().filter(|f| f.verdict == Verdict::Fail).count();
        let mut outcome = ExitOutcome::combine(outcomes);
        if failed > 0 && outcome.success() {
            outcome.code = 1;
        }

        let error = if timed_out {
            Some(ErrorKind::Timeout)
        } else if failed > 0 {
            Some(ErrorKind::ValidationFailure)
        } else {
            None
        };

        tracing::info!(checked = file_outcomes.len(), failed, "manifest validation finished");
        Ok(StageRun::new(outcome).with_files(file_outcomes).with_error(error))
    }
}
