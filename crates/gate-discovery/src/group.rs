//! Manifest groups and discovered manifest files

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Logical group a manifest belongs to, derived from its top-level directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestGroup {
    /// Shared resources under `base/`
    Base,
    /// Kustomize overlays under `overlays/<env>/`
    Overlay,
    /// ArgoCD applications under `apps/`
    App,
}

impl ManifestGroup {
    /// All groups in walk order (sorted by directory name)
    pub const ALL: [ManifestGroup; 3] = [ManifestGroup::App, ManifestGroup::Base, ManifestGroup::Overlay];

    /// Top-level directory holding this group
    pub fn dir_name(&self) -> &'static str {
        match self {
            ManifestGroup::Base => "base",
            ManifestGroup::Overlay => "overlays",
            ManifestGroup::App => "apps",
        }
    }

    /// Map a top-level directory name back to its group
    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "base" => Some(ManifestGroup::Base),
            "overlays" => Some(ManifestGroup::Overlay),
            "apps" => Some(ManifestGroup::App),
            _ => None,
        }
    }

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestGroup::Base => "base",
            ManifestGroup::Overlay => "overlay",
            ManifestGroup::App => "app",
        }
    }
}

impl fmt::Display for ManifestGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a group name is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown manifest group '{0}' (expected base, overlay or app)")]
pub struct ParseGroupError(pub String);

impl FromStr for ManifestGroup {
    type Err = ParseGroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(ManifestGroup::Base),
            "overlay" | "overlays" => Ok(ManifestGroup::Overlay),
            "app" | "apps" => Ok(ManifestGroup::App),
            other => Err(ParseGroupError(other.to_string())),
        }
    }
}

/// A discovered manifest
///
/// Paths are relative to the discovery root. Fields are private so a
/// discovered file cannot be altered after the walk produced it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ManifestFile {
    path: PathBuf,
    group: ManifestGroup,
    #[serde(skip_serializing_if = "Option::is_none")]
    overlay: Option<String>,
}

impl ManifestFile {
    /// Create a manifest entry for a root-relative path
    pub fn new(path: impl Into<PathBuf>, group: ManifestGroup) -> Self {
        let path = path.into();
        let overlay = match group {
            ManifestGroup::Overlay => overlay_name(&path),
            _ => None,
        };
        Self { path, group, overlay }
    }

    /// Path relative to the discovery root
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Group tag
    pub fn group(&self) -> ManifestGroup {
        self.group
    }

    /// Overlay (environment) name for overlay manifests
    pub fn overlay(&self) -> Option<&str> {
        self.overlay.as_deref()
    }

    /// Resolve against the discovery root
    pub fn absolute(&self, root: &Path) -> PathBuf {
        root.join(&self.path)
    }
}

impl fmt::Display for ManifestFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// `overlays/<name>/...` -> `<name>`; files directly in `overlays/` have none
fn overlay_name(path: &Path) -> Option<String> {
    let mut components = path.components().filter_map(|c| match c {
        Component::Normal(s) => Some(s),
        _ => None,
    });
    components.next()?;
    let name = components.next()?;
    components.next()?;
    Some(name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_dir_names_round_trip() {
        for group in ManifestGroup::ALL {
            assert_eq!(ManifestGroup::from_dir_name(group.dir_name()), Some(group));
        }
        assert_eq!(ManifestGroup::from_dir_name("charts"), None);
    }

    #[test]
    fn test_walk_order_is_sorted_by_dir_name() {
        let names: Vec<_> = ManifestGroup::ALL.iter().map(|g| g.dir_name()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_group_from_str() {
        assert_eq!("base".parse::<ManifestGroup>().unwrap(), ManifestGroup::Base);
        assert_eq!("overlays".parse::<ManifestGroup>().unwrap(), ManifestGroup::Overlay);
        assert_eq!("app".parse::<ManifestGroup>().unwrap(), ManifestGroup::App);
        assert!("helm".parse::<ManifestGroup>().is_err());
    }

    #[test]
    fn test_overlay_name_extracted() {
        let file = ManifestFile::new("overlays/prod/kustomization.yaml", ManifestGroup::Overlay);
        assert_eq!(file.overlay(), Some("prod"));

        let nested = ManifestFile::new("overlays/staging/patches/replicas.yaml", ManifestGroup::Overlay);
        assert_eq!(nested.overlay(), Some("staging"));
    }

    #[test]
    fn test_file_directly_in_overlays_has_no_name() {
        let file = ManifestFile::new("overlays/README.yaml", ManifestGroup::Overlay);
        assert_eq!(file.overlay(), None);
    }

    #[test]
    fn test_base_file_has_no_overlay() {
        let file = ManifestFile::new("base/deployment.yaml", ManifestGroup::Base);
        assert_eq!(file.overlay(), None);
        assert_eq!(file.group(), ManifestGroup::Base);
        assert_eq!(file.absolute(Path::new("/repo")), PathBuf::from("/repo/base/deployment.yaml"));
    }

    #[test]
    fn test_serialization() {
        let file = ManifestFile::new("overlays/prod/svc.yaml", ManifestGroup::Overlay);
        let json = serde_json::to_string(&file).unwrap();
        assert!(json.contains(r#""group":"overlay""#));
        assert!(json.contains(r#""overlay":"prod""#));

        let base = ManifestFile::new("base/svc.yaml", ManifestGroup::Base);
        let json = serde_json::to_string(&base).unwrap();
        assert!(!json.contains("overlay\":"));
    }
}
