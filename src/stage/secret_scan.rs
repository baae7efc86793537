//! Secret scanning of the working tree and recent history

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::config::SecretScanSettings;
use crate::report::{ErrorKind, FileOutcome};
use crate::tool::{CommandTemplate, ExitOutcome};

use super::{base_vars, check_cancelled, Stage, StageContext, StageError, StageKind, StageRun, StageSpec};

/// Flag that makes the scanner exit zero even when it finds secrets
const EXIT_ZERO_FLAG: &str = "--exit-zero";

/// What secret findings mean for the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretPolicy {
    /// Record findings; the scanner runs with `--exit-zero`
    #[default]
    Report,
    /// Findings fail the stage
    Enforce,
}

pub struct SecretScanStage {
    spec: StageSpec,
    policy: SecretPolicy,
    path_scan: CommandTemplate,
    history_scan: Option<CommandTemplate>,
    commit_range: String,
}

impl SecretScanStage {
    pub fn new(
        policy: SecretPolicy,
        path_scan: CommandTemplate,
        history_scan: Option<CommandTemplate>,
        commit_range: impl Into<String>,
    ) -> Self {
        let path_scan = apply_policy(path_scan, policy);
        let history_scan = history_scan.map(|t| apply_policy(t, policy));

        let mut commands = vec![path_scan.clone()];
        commands.extend(history_scan.iter().cloned());

        Self {
            spec: StageSpec::new(StageKind::SecretScan, commands),
            policy,
            path_scan,
            history_scan,
            commit_range: commit_range.into(),
        }
    }

    pub fn from_settings(settings: &SecretScanSettings, continue_on_failure: bool) -> Self {
        let history = settings
            .scan_history
            .then(|| settings.history_command.clone());
        let mut stage = Self::new(
            settings.policy,
            settings.command.clone(),
            history,
            settings.commit_range.clone(),
        );
        stage.spec = stage.spec.continue_on_failure(continue_on_failure);
        stage
    }

    pub fn policy(&self) -> SecretPolicy {
        self.policy
    }
}

fn apply_policy(mut template: CommandTemplate, policy: SecretPolicy) -> CommandTemplate {
    match policy {
        SecretPolicy::Report => {
            if !template.argv().iter().any(|a| a == EXIT_ZERO_FLAG) {
                template.push_arg(EXIT_ZERO_FLAG);
            }
        }
        SecretPolicy::Enforce => template.remove_arg(EXIT_ZERO_FLAG),
    }
    template
}

impl Stage for SecretScanStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    fn execute(&self, ctx: &StageContext<'_>) -> Result<StageRun, StageError> {
        let vars = base_vars(ctx.root).with("range", self.commit_range.clone());

        let mut outcomes = Vec::new();
        tracing::info!(policy = ?self.policy, "scanning working tree for secrets");
        outcomes.push(ctx.invoker.run(&self.path_scan.render(&vars)?)?);

        if let Some(history) = &self.history_scan {
            check_cancelled(ctx, StageKind::SecretScan)?;
            tracing::info!(range = %self.commit_range, "scanning recent history for secrets");
            outcomes.push(ctx.invoker.run(&history.render(&vars)?)?);
        }

        let mut findings = 0;
        let mut files = Vec::new();
        for outcome in &outcomes {
            let scanned = parse_findings(&outcome.stdout);
            findings += scanned.total;
            for (location, count) in scanned.locations {
                let detail = format!("{} incident(s) detected", count);
                files.push(match self.policy {
                    SecretPolicy::Report => FileOutcome::warning(location, detail),
                    SecretPolicy::Enforce => FileOutcome::fail(location, detail),
                });
            }
        }

        let mut outcome = ExitOutcome::combine(outcomes);
        if findings > 0 {
            tracing::warn!(findings, "secret scanner reported findings");
            if self.policy == SecretPolicy::Enforce && outcome.success() {
                outcome.code = 1;
            }
        }

        let error = (findings > 0).then_some(ErrorKind::SecretsFound);
        Ok(StageRun::new(outcome)
            .with_files(files)
            .with_error(error)
            .with_findings(findings))
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ScanFindings {
    total: usize,
    locations: Vec<(String, usize)>,
}

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:>\s*)?(.+?):\s+(\d+)\s+incidents?\s+detected").expect("location pattern compiles")
    })
}

fn incident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^>>>\s*Incident\s+\d+").expect("incident pattern compiles"))
}

/// Count findings in scanner text output
///
/// Per-location summary lines (`path: N incidents detected`) are preferred;
/// when there are none, individual incident headers are counted.
fn parse_findings(output: &str) -> ScanFindings {
    let mut found = ScanFindings::default();
    let mut incidents = 0;

    for line in output.lines().map(str::trim) {
        if let Some(caps) = location_re().captures(line) {
            let count: usize = caps[2].parse().unwrap_or(0);
            if count > 0 {
                found.total += count;
                found.locations.push((caps[1].trim().to_string(), count));
            }
        } else if incident_re().is_match(line) {
            incidents += 1;
        }
    }

    if found.locations.is_empty() {
        found.total = incidents;
    }
    found
}
