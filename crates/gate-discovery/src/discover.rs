//! Lazy, ordered walk over the manifest groups

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::group::{ManifestFile, ManifestGroup};
use crate::patterns::{PatternError, PatternSet};

/// Errors during discovery
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Discovery settings
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Include globs; empty means `**/*.yaml` and `**/*.yml`
    pub include: Vec<String>,

    /// Extra exclude globs on top of the hidden-path defaults
    pub exclude: Vec<String>,

    /// Groups to walk
    pub groups: Vec<ManifestGroup>,

    /// Follow symbolic links while walking
    pub follow_links: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            groups: ManifestGroup::ALL.to_vec(),
            follow_links: false,
        }
    }
}

/// A configured discovery over one repository root
///
/// Calling [`Discovery::iter`] starts a fresh walk each time, so the
/// sequence can be restarted as often as needed.
#[derive(Debug, Clone)]
pub struct Discovery {
    root: PathBuf,
    patterns: PatternSet,
    groups: Vec<ManifestGroup>,
    follow_links: bool,
}

impl Discovery {
    /// Create a discovery for `root`
    pub fn new(root: impl Into<PathBuf>, config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let patterns = PatternSet::new(&config.include, &config.exclude)?;

        // Walking groups in directory-name order keeps the whole sequence
        // sorted by path.
        let mut groups = config.groups.clone();
        groups.sort_by_key(|g| g.dir_name());
        groups.dedup();

        Ok(Self {
            root: root.into(),
            patterns,
            groups,
            follow_links: config.follow_links,
        })
    }

    /// Discovery with default patterns over all groups
    pub fn with_defaults(root: impl Into<PathBuf>) -> Result<Self, DiscoveryError> {
        Self::new(root, &DiscoveryConfig::default())
    }

    /// Repository root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a new walk
    pub fn iter(&self) -> ManifestIter<'_> {
        ManifestIter {
            discovery: self,
            pending: self.groups.clone().into_iter(),
            current: None,
        }
    }

    /// Collect the whole walk, failing on the first error
    pub fn collect_all(&self) -> Result<Vec<ManifestFile>, DiscoveryError> {
        let files = self.iter().collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(root = %self.root.display(), count = files.len(), "discovered manifests");
        Ok(files)
    }

    /// Collect the manifests of a single group
    pub fn group(&self, group: ManifestGroup) -> Result<Vec<ManifestFile>, DiscoveryError> {
        Ok(self
            .collect_all()?
            .into_iter()
            .filter(|f| f.group() == group)
            .collect())
    }
}

impl<'a> IntoIterator for &'a Discovery {
    type Item = Result<ManifestFile, DiscoveryError>;
    type IntoIter = ManifestIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

type EntryWalk<'a> = Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + 'a>;

/// Iterator over discovered manifests, in path order
pub struct ManifestIter<'a> {
    discovery: &'a Discovery,
    pending: std::vec::IntoIter<ManifestGroup>,
    current: Option<(ManifestGroup, EntryWalk<'a>)>,
}

impl<'a> ManifestIter<'a> {
    fn open_group(&self, group: ManifestGroup) -> Option<EntryWalk<'a>> {
        let discovery = self.discovery;
        let dir = discovery.root.join(group.dir_name());
        if !dir.is_dir() {
            return None;
        }

        let walker = WalkDir::new(dir)
            .follow_links(discovery.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                match entry.path().strip_prefix(&discovery.root) {
                    Ok(rel) => !discovery.patterns.is_excluded(rel),
                    Err(_) => true,
                }
            });

        Some(Box::new(walker))
    }
}

impl Iterator for ManifestIter<'_> {
    type Item = Result<ManifestFile, DiscoveryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((group, walker)) = self.current.as_mut() {
                let group = *group;
                match walker.next() {
                    Some(Ok(entry)) => {
                        if !entry.file_type().is_file() {
                            continue;
                        }
                        let Ok(rel) = entry.path().strip_prefix(&self.discovery.root) else {
                            continue;
                        };
                        if self.discovery.patterns.is_included(rel) {
                            return Some(Ok(ManifestFile::new(rel.to_path_buf(), group)));
                        }
                        continue;
                    }
                    Some(Err(source)) => {
                        let path = source
                            .path()
                            .map(Path::to_path_buf)
                            .unwrap_or_else(|| self.discovery.root.clone());
                        return Some(Err(DiscoveryError::Walk { path, source }));
                    }
                    None => {
                        self.current = None;
                    }
                }
            }

            let group = self.pending.next()?;
            if let Some(walker) = self.open_group(group) {
                self.current = Some((group, walker));
            }
        }
    }
}

/// Immediate subdirectories of `overlays/`, sorted, relative to `root`
///
/// Each one is a kustomize overlay to be rendered. A missing `overlays/`
/// directory yields an empty list.
pub fn overlay_dirs(root: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let overlays = root.join(ManifestGroup::Overlay.dir_name());
    if !overlays.is_dir() {
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(&overlays)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        dirs.push(Path::new(ManifestGroup::Overlay.dir_name()).join(name));
    }
    dirs.sort();
    Ok(dirs)
}
