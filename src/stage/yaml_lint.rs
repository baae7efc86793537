//! YAML style lint over the whole tree

use regex_lite::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::config::YamlLintSettings;
use crate::report::{ErrorKind, FileOutcome};
use crate::tool::CommandTemplate;

use super::{base_vars, Stage, StageContext, StageError, StageKind, StageRun, StageSpec};

pub struct YamlLintStage {
    spec: StageSpec,
    command: CommandTemplate,
    config: String,
}

impl YamlLintStage {
    pub fn new(command: CommandTemplate, config: impl Into<String>) -> Self {
        Self {
            spec: StageSpec::new(StageKind::YamlLint, vec![command.clone()]),
            command,
            config: config.into(),
        }
    }

    pub fn from_settings(settings: &YamlLintSettings, continue_on_failure: bool) -> Self {
        let mut stage = Self::new(settings.command.clone(), settings.inline_config());
        stage.spec = stage.spec.continue_on_failure(continue_on_failure);
        stage
    }
}

impl Stage for YamlLintStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    fn execute(&self, ctx: &StageContext<'_>) -> Result<StageRun, StageError> {
        let vars = base_vars(ctx.root).with("config", self.config.clone());
        let command = self.command.render(&vars)?;

        tracing::info!(config = %self.config, "linting YAML");
        let outcome = ctx.invoker.run(&command)?;

        let files = parse_problems(&outcome.stdout);
        let error = (!outcome.success()).then_some(ErrorKind::LintFailure);
        tracing::info!(code = outcome.code, files_with_problems = files.len(), "yamllint finished");

        Ok(StageRun::new(outcome).with_files(files).with_error(error))
    }
}

fn problem_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.+?):(\d+):(\d+): \[(error|warning)\] (.*)$").expect("problem pattern compiles")
    })
}

#[derive(Default)]
struct FileProblems {
    errors: usize,
    warnings: usize,
    first: Option<String>,
}

/// Group yamllint `parsable` output into one outcome per file
///
/// A file with any error fails; a file with only warnings gets a warning.
/// Files without problems are not listed.
fn parse_problems(output: &str) -> Vec<FileOutcome> {
    let mut by_file: BTreeMap<PathBuf, FileProblems> = BTreeMap::new();

    for line in output.lines() {
        let Some(caps) = problem_re().captures(line.trim_end()) else {
            continue;
        };
        let path = caps[1].strip_prefix("./").unwrap_or(&caps[1]);
        let entry = by_file.entry(PathBuf::from(path)).or_default();
        if &caps[4] == "error" {
            entry.errors += 1;
        } else {
            entry.warnings += 1;
        }
        entry
            .first
            .get_or_insert_with(|| format!("{}:{} {}", &caps[2], &caps[3], &caps[5]));
    }

    by_file
        .into_iter()
        .map(|(path, problems)| {
            let total = problems.errors + problems.warnings;
            let mut detail = problems.first.unwrap_or_default();
            if total > 1 {
                detail.push_str(&format!(" (+{} more)", total - 1));
            }
            if problems.errors > 0 {
                FileOutcome::fail(path, detail)
            } else {
                FileOutcome::warning(path, detail)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Verdict;

    #[test]
    fn test_parse_groups_by_file() {
        let output = "\
./base/deployment.yaml:3:1: [error] wrong indentation: expected 2 but found 0 (indentation)
./base/deployment.yaml:9:121: [error] line too long (130 > 120 characters) (line-length)
apps/guestbook.yaml:1:1: [warning] missing document start \"---\" (document-start)
";
        let files = parse_problems(output);

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, PathBuf::from("apps/guestbook.yaml"));
        assert_eq!(files[0].verdict, Verdict::Warning);

        assert_eq!(files[1].path, PathBuf::from("base/deployment.yaml"));
        assert_eq!(files[1].verdict, Verdict::Fail);
        assert_eq!(
            files[1].detail.as_deref(),
            Some("3:1 wrong indentation: expected 2 but found 0 (indentation) (+1 more)")
        );
    }

    #[test]
    fn test_unrelated_lines_ignored() {
        let files = parse_problems("yamllint 1.35.1\n\n");
        assert!(files.is_empty());
    }

    #[test]
    fn test_config_comes_from_settings() {
        let settings = YamlLintSettings {
            max_line_length: 80,
            ..YamlLintSettings::default()
        };
        let stage = YamlLintStage::from_settings(&settings, false);
        assert!(stage.config.contains("max: 80"));
        assert_eq!(stage.spec().tools(), vec!["yamllint"]);
    }
}
