//! Built-in defaults (layer 1)

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::stage::SecretPolicy;
use crate::tool::CommandTemplate;

use super::settings::{
    ArgoSettings, ChangelogSettings, DiscoverySettings, GateConfig, ManifestLintSettings,
    SecretScanSettings, TimeoutSettings, YamlLintSettings,
};

/// Repo config file looked up at the root when `--config` is not given
pub const REPO_CONFIG_FILE: &str = ".manifest-gate.toml";

/// Environment variable holding the GitGuardian API key
pub const DEFAULT_API_KEY_ENV: &str = "GITGUARDIAN_API_KEY";

/// Built-in configuration values
#[derive(Debug, Clone, Default)]
pub struct BuiltinDefaults {
    config: GateConfig,
}

impl BuiltinDefaults {
    /// Typed defaults
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Convert to a JSON value for merging
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(&self.config)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            jobs: 0,
            timeouts: TimeoutSettings::default(),
            discovery: DiscoverySettings::default(),
            tools: BTreeMap::new(),
            manifest_lint: ManifestLintSettings::default(),
            yamllint: YamlLintSettings::default(),
            secret_scan: SecretScanSettings::default(),
            changelog: ChangelogSettings::default(),
            argo: ArgoSettings::default(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            tool_seconds: 600,
            grace_seconds: 5,
        }
    }
}

impl Default for ManifestLintSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            continue_on_failure: None,
            command: CommandTemplate::builtin(&[
                "kubeconform",
                "-strict",
                "-ignore-missing-schemas",
                "{file}",
            ]),
            render_command: CommandTemplate::builtin(&["kustomize", "build", "{dir}"]),
            stream_command: CommandTemplate::builtin(&[
                "kubeconform",
                "-strict",
                "-ignore-missing-schemas",
                "-",
            ]),
        }
    }
}

impl Default for YamlLintSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            continue_on_failure: None,
            max_line_length: 120,
            config: None,
            command: CommandTemplate::builtin(&["yamllint", "-f", "parsable", "-d", "{config}", "."]),
        }
    }
}

impl Default for SecretScanSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            continue_on_failure: None,
            policy: SecretPolicy::Report,
            scan_history: true,
            commit_range: "HEAD~10..HEAD".to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            api_key: None,
            command: CommandTemplate::builtin(&["ggshield", "secret", "scan", "path", ".", "--recursive"]),
            history_command: CommandTemplate::builtin(&[
                "ggshield",
                "secret",
                "scan",
                "commit-range",
                "{range}",
            ]),
        }
    }
}

impl Default for ChangelogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            continue_on_failure: None,
            config: PathBuf::from("cliff.toml"),
            output: PathBuf::from("CHANGELOG.md"),
            preview_lines: 50,
            command: CommandTemplate::builtin(&[
                "git-cliff",
                "--config",
                "{config}",
                "--output",
                "{output}",
            ]),
        }
    }
}

impl Default for ArgoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            continue_on_failure: None,
            required_kind: "Application".to_string(),
        }
    }
}
