//! Changelog generation with git-cliff

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::config::ChangelogSettings;
use crate::report::{ErrorKind, FileOutcome};
use crate::tool::CommandTemplate;

use super::{arg_path, base_vars, Stage, StageContext, StageError, StageKind, StageRun, StageSpec};

pub struct ChangelogStage {
    spec: StageSpec,
    command: CommandTemplate,
    config: PathBuf,
    output: PathBuf,
    preview_lines: usize,
}

impl ChangelogStage {
    pub fn new(
        command: CommandTemplate,
        config: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        preview_lines: usize,
    ) -> Self {
        Self {
            spec: StageSpec::new(StageKind::ChangelogGen, vec![command.clone()]),
            command,
            config: config.into(),
            output: output.into(),
            preview_lines,
        }
    }

    pub fn from_settings(settings: &ChangelogSettings, continue_on_failure: bool) -> Self {
        let mut stage = Self::new(
            settings.command.clone(),
            settings.config.clone(),
            settings.output.clone(),
            settings.preview_lines,
        );
        stage.spec = stage.spec.continue_on_failure(continue_on_failure);
        stage
    }
}

/// Identity of the output file, to tell a fresh write from a stale file
#[derive(Debug, PartialEq, Eq)]
struct Snapshot {
    modified: Option<SystemTime>,
    digest: String,
}

impl Snapshot {
    fn of(bytes: &[u8], metadata: &fs::Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            digest: hex::encode(Sha256::digest(bytes)),
        }
    }
}

/// Contents and snapshot of `path`, or `None` if it does not exist
fn read_output(path: &Path) -> Result<Option<(String, Snapshot)>, StageError> {
    let io_err = |source: io::Error| StageError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(err)),
    };
    let metadata = fs::metadata(path).map_err(io_err)?;
    let snapshot = Snapshot::of(&bytes, &metadata);
    Ok(Some((String::from_utf8_lossy(&bytes).into_owned(), snapshot)))
}

/// First `lines` lines of the generated changelog
fn preview(content: &str, lines: usize) -> String {
    content.lines().take(lines).collect::<Vec<_>>().join("\n")
}

impl Stage for ChangelogStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    fn execute(&self, ctx: &StageContext<'_>) -> Result<StageRun, StageError> {
        let vars = base_vars(ctx.root)
            .with("config", arg_path(&self.config))
            .with("output", arg_path(&self.output));
        let command = self.command.render(&vars)?;

        let path = ctx.root.join(&self.output);
        let before = read_output(&path)?.map(|(_, snapshot)| snapshot);

        tracing::info!(output = %self.output.display(), "generating changelog");
        let mut outcome = ctx.invoker.run(&command)?;

        if !outcome.success() {
            let detail = outcome
                .first_line()
                .map(str::to_string)
                .unwrap_or_else(|| format!("exit code {}", outcome.code));
            return Ok(StageRun::new(outcome)
                .with_files(vec![FileOutcome::fail(&self.output, detail)])
                .with_error(Some(ErrorKind::ChangelogGenFailure)));
        }

        let written = match read_output(&path)? {
            None => Err("changelog was not written"),
            Some((_, after)) if before.as_ref() == Some(&after) => Err("changelog was not updated"),
            Some((content, _)) => Ok(content),
        };
        let content = match written {
            Ok(content) => content,
            Err(detail) => {
                tracing::warn!(path = %path.display(), detail, "changelog tool succeeded without writing output");
                outcome.code = 1;
                return Ok(StageRun::new(outcome)
                    .with_files(vec![FileOutcome::fail(&self.output, detail)])
                    .with_error(Some(ErrorKind::ChangelogGenFailure)));
            }
        };

        if self.preview_lines > 0 {
            tracing::info!(
                "changelog preview ({} lines):\n{}",
                self.preview_lines,
                preview(&content, self.preview_lines)
            );
        }

        Ok(StageRun::new(outcome).with_files(vec![FileOutcome::pass(&self.output)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates() {
        let content = "# Changelog\n\n## [1.2.0]\n- feat: overlays\n- fix: lint\n";
        assert_eq!(preview(content, 3), "# Changelog\n\n## [1.2.0]");
        assert_eq!(preview(content, 50), content.trim_end());
    }

    #[test]
    fn test_snapshot_tracks_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("CHANGELOG.md");
        assert!(read_output(&path).unwrap().is_none());

        fs::write(&path, "# Changelog\n").unwrap();
        let (content, first) = read_output(&path).unwrap().unwrap();
        assert_eq!(content, "# Changelog\n");
        let (_, again) = read_output(&path).unwrap().unwrap();
        assert_eq!(first, again);

        fs::write(&path, "# Changelog\n\n## [0.2.0]\n").unwrap();
        let (_, changed) = read_output(&path).unwrap().unwrap();
        assert_ne!(first.digest, changed.digest);
    }

    #[test]
    fn test_defaults_from_settings() {
        let stage = ChangelogStage::from_settings(&ChangelogSettings::default(), false);
        assert_eq!(stage.spec().tools(), vec!["git-cliff"]);
        assert_eq!(stage.output, PathBuf::from("CHANGELOG.md"));
        assert_eq!(stage.preview_lines, 50);
        assert!(!stage.spec().continue_on_failure);
    }
}
