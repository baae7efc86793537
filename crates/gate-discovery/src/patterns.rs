//! Include and exclude rules for manifest discovery
//!
//! Patterns are matched against paths relative to the discovery root.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Files picked up when no include patterns are configured
pub const DEFAULT_INCLUDES: &[&str] = &["**/*.yaml", "**/*.yml"];

/// Always excluded: hidden files and directories (`.git`, `.github`, ...)
pub const DEFAULT_EXCLUDES: &[&str] = &["**/.*", "**/.*/**"];

/// Errors for pattern compilation
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to build glob set: {0}")]
    Build(#[from] globset::Error),
}

/// Compiled include/exclude rules
#[derive(Debug, Clone)]
pub struct PatternSet {
    include: GlobSet,
    exclude: GlobSet,
}

impl PatternSet {
    /// Compile rules; an empty include list falls back to [`DEFAULT_INCLUDES`].
    /// The default excludes are always active.
    pub fn new<S: AsRef<str>>(includes: &[S], excludes: &[S]) -> Result<Self, PatternError> {
        let include = if includes.is_empty() {
            build(DEFAULT_INCLUDES.iter().copied())?
        } else {
            build(includes.iter().map(AsRef::as_ref))?
        };

        let exclude = build(
            DEFAULT_EXCLUDES
                .iter()
                .copied()
                .chain(excludes.iter().map(AsRef::as_ref)),
        )?;

        Ok(Self { include, exclude })
    }

    /// Rules with only the built-in patterns
    pub fn with_defaults() -> Result<Self, PatternError> {
        Self::new::<&str>(&[], &[])
    }

    /// Whether a path (file or directory) is pruned from the walk
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.is_match(path)
    }

    /// Whether a file should be yielded as a manifest
    pub fn is_included(&self, path: &Path) -> bool {
        self.include.is_match(path) && !self.exclude.is_match(path)
    }
}

fn build<'a>(patterns: impl Iterator<Item = &'a str>) -> Result<GlobSet, PatternError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }
        let glob = Glob::new(pattern).map_err(|source| PatternError::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        })?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_includes_yaml_and_yml() {
        let rules = PatternSet::with_defaults().unwrap();

        assert!(rules.is_included(Path::new("base/deployment.yaml")));
        assert!(rules.is_included(Path::new("overlays/prod/kustomization.yml")));
        assert!(!rules.is_included(Path::new("base/README.md")));
        assert!(!rules.is_included(Path::new("base/values.json")));
    }

    #[test]
    fn test_hidden_paths_excluded() {
        let rules = PatternSet::with_defaults().unwrap();

        assert!(rules.is_excluded(Path::new(".git")));
        assert!(rules.is_excluded(Path::new(".git/config")));
        assert!(rules.is_excluded(Path::new("apps/.cache")));
        assert!(!rules.is_included(Path::new("apps/.cache/app.yaml")));
        assert!(!rules.is_excluded(Path::new("base/deployment.yaml")));
        assert!(!rules.is_excluded(Path::new("base/my.app.yaml")));
    }

    #[test]
    fn test_custom_includes_replace_defaults() {
        let rules = PatternSet::new(&["**/*.yaml"], &[]).unwrap();

        assert!(rules.is_included(Path::new("base/a.yaml")));
        assert!(!rules.is_included(Path::new("base/a.yml")));
    }

    #[test]
    fn test_custom_excludes_extend_defaults() {
        let rules = PatternSet::new(&[], &["**/templates/**"]).unwrap();

        assert!(!rules.is_included(Path::new("apps/templates/app.yaml")));
        assert!(rules.is_included(Path::new("apps/app.yaml")));
        assert!(rules.is_excluded(Path::new(".github")));
    }

    #[test]
    fn test_blank_patterns_ignored() {
        let rules = PatternSet::new(&["  ", "**/*.yaml"], &[""]).unwrap();
        assert!(rules.is_included(Path::new("base/a.yaml")));
    }

    #[test]
    fn test_invalid_pattern_reported() {
        let err = PatternSet::new(&["base/[unclosed"], &[]).unwrap_err();
        assert!(matches!(err, PatternError::InvalidGlob { .. }));
        assert!(err.to_string().contains("base/[unclosed"));
    }
}
