//! Locating (and optionally installing) external tools
//!
//! Resolution order: explicit path from configuration, then the cache, then
//! `PATH`, then the injected [`ToolInstaller`]. The default installer never
//! downloads anything, so a tool absent from the system yields
//! `ToolNotFound` instead of a network fetch.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Installer errors
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("no installer configured for '{0}'")]
    Unsupported(String),

    #[error("installing '{tool}' failed: {reason}")]
    Failed { tool: String, reason: String },
}

/// Provisioning errors
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("configured path for '{tool}' is not executable: {}", path.display())]
    NotExecutable { tool: String, path: PathBuf },

    #[error("'{tool}' not found on PATH: {source}")]
    NotFound {
        tool: String,
        #[source]
        source: InstallError,
    },
}

impl ProvisionError {
    pub fn tool(&self) -> &str {
        match self {
            ProvisionError::NotExecutable { tool, .. } | ProvisionError::NotFound { tool, .. } => tool,
        }
    }
}

/// Fetches a tool that is not present on the system
///
/// Implementations own any network or package-manager access.
pub trait ToolInstaller: Send + Sync {
    /// Install `tool` and return the path of its executable
    fn install(&self, tool: &str) -> Result<PathBuf, InstallError>;
}

/// Installer that installs nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInstaller;

impl ToolInstaller for NoInstaller {
    fn install(&self, tool: &str) -> Result<PathBuf, InstallError> {
        Err(InstallError::Unsupported(tool.to_string()))
    }
}

/// Resolves tool names to executables and remembers the answer
pub struct ToolProvisioner {
    explicit: BTreeMap<String, PathBuf>,
    search_path: Option<OsString>,
    cache: Mutex<HashMap<String, PathBuf>>,
    installer: Box<dyn ToolInstaller>,
}

impl std::fmt::Debug for ToolProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolProvisioner")
            .field("explicit", &self.explicit)
            .field("search_path", &self.search_path)
            .finish_non_exhaustive()
    }
}

impl Default for ToolProvisioner {
    fn default() -> Self {
        Self::new(Box::new(NoInstaller))
    }
}

impl ToolProvisioner {
    pub fn new(installer: Box<dyn ToolInstaller>) -> Self {
        Self {
            explicit: BTreeMap::new(),
            search_path: None,
            cache: Mutex::new(HashMap::new()),
            installer,
        }
    }

    /// Pin a tool to an explicit executable path
    pub fn with_explicit(mut self, tool: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.explicit.insert(tool.into(), path.into());
        self
    }

    /// Search this `PATH`-style value instead of the process environment
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Previously resolved location, if any
    pub fn cached(&self, tool: &str) -> Option<PathBuf> {
        self.cache.lock().ok().and_then(|c| c.get(tool).cloned())
    }

    /// Resolve `tool`, installing it if an installer is configured
    pub fn ensure_available(&self, tool: &str) -> Result<PathBuf, ProvisionError> {
        if let Some(path) = self.explicit.get(tool) {
            if is_executable(path) {
                return Ok(path.clone());
            }
            return Err(ProvisionError::NotExecutable {
                tool: tool.to_string(),
                path: path.clone(),
            });
        }

        if let Some(path) = self.cached(tool) {
            return Ok(path);
        }

        let resolved = match self.lookup(tool) {
            Some(path) => path,
            None => {
                tracing::debug!(tool, "not on PATH, trying installer");
                self.installer
                    .install(tool)
                    .map_err(|source| ProvisionError::NotFound {
                        tool: tool.to_string(),
                        source,
                    })?
            }
        };

        tracing::debug!(tool, path = %resolved.display(), "resolved tool");
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(tool.to_string(), resolved.clone());
        }
        Ok(resolved)
    }

    fn lookup(&self, tool: &str) -> Option<PathBuf> {
        // Names with a separator are paths, not PATH entries
        if tool.contains(std::path::MAIN_SEPARATOR) || tool.contains('/') {
            let path = PathBuf::from(tool);
            return is_executable(&path).then_some(path);
        }

        let search = match &self.search_path {
            Some(p) => p.clone(),
            None => env::var_os("PATH")?,
        };
        env::split_paths(&search)
            .map(|dir| dir.join(tool))
            .find(|candidate| is_executable(candidate))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_tool(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    struct CountingInstaller {
        calls: Arc<AtomicUsize>,
        target: PathBuf,
    }

    impl ToolInstaller for CountingInstaller {
        fn install(&self, _tool: &str) -> Result<PathBuf, InstallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.target.clone())
        }
    }

    #[test]
    fn test_found_on_search_path() {
        let tmp = TempDir::new().unwrap();
        let expected = write_tool(tmp.path(), "kubeconform", 0o755);

        let provisioner = ToolProvisioner::default().with_search_path(tmp.path());
        assert_eq!(provisioner.ensure_available("kubeconform").unwrap(), expected);
        assert_eq!(provisioner.cached("kubeconform"), Some(expected));
    }

    #[test]
    fn test_non_executable_skipped() {
        let tmp = TempDir::new().unwrap();
        write_tool(tmp.path(), "yamllint", 0o644);

        let provisioner = ToolProvisioner::default().with_search_path(tmp.path());
        let err = provisioner.ensure_available("yamllint").unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound { .. }));
        assert_eq!(err.tool(), "yamllint");
    }

    #[test]
    fn test_missing_tool_without_installer() {
        let tmp = TempDir::new().unwrap();
        let provisioner = ToolProvisioner::default().with_search_path(tmp.path());

        let err = provisioner.ensure_available("git-cliff").unwrap_err();
        match err {
            ProvisionError::NotFound { source, .. } => {
                assert!(matches!(source, InstallError::Unsupported(_)))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_explicit_path_wins() {
        let tmp = TempDir::new().unwrap();
        let pinned = write_tool(tmp.path(), "custom-kustomize", 0o755);

        let provisioner = ToolProvisioner::default()
            .with_search_path("")
            .with_explicit("kustomize", &pinned);
        assert_eq!(provisioner.ensure_available("kustomize").unwrap(), pinned);
    }

    #[test]
    fn test_explicit_path_not_executable() {
        let tmp = TempDir::new().unwrap();
        let provisioner = ToolProvisioner::default().with_explicit("kustomize", tmp.path().join("nope"));
        assert!(matches!(
            provisioner.ensure_available("kustomize"),
            Err(ProvisionError::NotExecutable { .. })
        ));
    }

    #[test]
    fn test_installer_called_once_then_cached() {
        let tmp = TempDir::new().unwrap();
        let target = write_tool(tmp.path(), "ggshield", 0o755);
        let calls = Arc::new(AtomicUsize::new(0));
        let installer = CountingInstaller {
            calls: Arc::clone(&calls),
            target: target.clone(),
        };

        let empty = TempDir::new().unwrap();
        let provisioner = ToolProvisioner::new(Box::new(installer)).with_search_path(empty.path());

        assert_eq!(provisioner.ensure_available("ggshield").unwrap(), target);
        assert_eq!(provisioner.ensure_available("ggshield").unwrap(), target);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_path_like_name_checked_directly() {
        let tmp = TempDir::new().unwrap();
        let tool = write_tool(tmp.path(), "lint.sh", 0o755);

        let provisioner = ToolProvisioner::default().with_search_path("");
        let name = tool.to_string_lossy().into_owned();
        assert_eq!(provisioner.ensure_available(&name).unwrap(), tool);
    }
}
