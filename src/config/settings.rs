//! Typed view of the merged configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::stage::{SecretPolicy, StageKind};
use crate::timeout::TimeoutConfig;
use crate::tool::CommandTemplate;

use super::ConfigError;

/// Complete gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    /// Repository root; relative paths resolve against the working directory
    pub root: PathBuf,

    /// Concurrent per-file invocations; 0 means available parallelism
    pub jobs: usize,

    pub timeouts: TimeoutSettings,
    pub discovery: DiscoverySettings,

    /// Explicit executable paths, keyed by tool name
    pub tools: BTreeMap<String, PathBuf>,

    pub manifest_lint: ManifestLintSettings,
    pub yamllint: YamlLintSettings,
    pub secret_scan: SecretScanSettings,
    pub changelog: ChangelogSettings,
    pub argo: ArgoSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSettings {
    pub tool_seconds: u64,
    pub grace_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoverySettings {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub follow_links: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManifestLintSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_failure: Option<bool>,
    /// Per-file schema validation
    pub command: CommandTemplate,
    /// Overlay rendering
    pub render_command: CommandTemplate,
    /// Validation of a rendered stream read from stdin
    pub stream_command: CommandTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct YamlLintSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_failure: Option<bool>,
    pub max_line_length: u32,
    /// Inline yamllint configuration replacing the generated one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    pub command: CommandTemplate,
}

impl YamlLintSettings {
    /// Inline configuration passed as `{config}`
    pub fn inline_config(&self) -> String {
        match &self.config {
            Some(config) => config.clone(),
            None => format!(
                "{{extends: default, rules: {{line-length: {{max: {}}}, document-start: disable}}}}",
                self.max_line_length
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecretScanSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_failure: Option<bool>,
    pub policy: SecretPolicy,
    /// Scan recent history in addition to the working tree
    pub scan_history: bool,
    pub commit_range: String,
    /// Environment variable the CLI reads the API key from
    pub api_key_env: String,
    /// API key given directly; takes precedence over `api_key_env`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub command: CommandTemplate,
    pub history_command: CommandTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangelogSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_failure: Option<bool>,
    pub config: PathBuf,
    pub output: PathBuf,
    pub preview_lines: usize,
    pub command: CommandTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArgoSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_failure: Option<bool>,
    pub required_kind: String,
}

impl GateConfig {
    /// Timeout bounds for the invoker
    pub fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig {
            tool_seconds: self.timeouts.tool_seconds,
            grace_seconds: self.timeouts.grace_seconds,
        }
    }

    /// Worker count with `0` resolved to available parallelism
    pub fn effective_jobs(&self) -> usize {
        if self.jobs > 0 {
            return self.jobs;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Whether a stage runs as part of a full run
    pub fn is_enabled(&self, kind: StageKind) -> bool {
        match kind {
            StageKind::ManifestLint => self.manifest_lint.enabled,
            StageKind::YamlLint => self.yamllint.enabled,
            StageKind::SecretScan => self.secret_scan.enabled,
            StageKind::ChangelogGen => self.changelog.enabled,
            StageKind::ArgoValidate => self.argo.enabled,
        }
    }

    /// Continue-on-failure flag after applying per-stage defaults
    pub fn continue_on_failure(&self, kind: StageKind) -> bool {
        let configured = match kind {
            StageKind::ManifestLint => self.manifest_lint.continue_on_failure,
            StageKind::YamlLint => self.yamllint.continue_on_failure,
            StageKind::SecretScan => self.secret_scan.continue_on_failure,
            StageKind::ChangelogGen => self.changelog.continue_on_failure,
            StageKind::ArgoValidate => self.argo.continue_on_failure,
        };
        match (configured, kind) {
            (Some(value), _) => value,
            // Enforcing secrets policy makes the scan blocking unless told otherwise
            (None, StageKind::SecretScan) => self.secret_scan.policy == SecretPolicy::Report,
            (None, kind) => kind.default_continue_on_failure(),
        }
    }

    /// Check value bounds the type system cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timeout_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("timeouts: {}", e)))?;

        if self.yamllint.max_line_length == 0 {
            return Err(ConfigError::Invalid(
                "yamllint.max_line_length must be greater than 0".to_string(),
            ));
        }

        if self.secret_scan.scan_history && self.secret_scan.commit_range.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "secret_scan.commit_range must not be empty when scan_history is set".to_string(),
            ));
        }

        if self.secret_scan.api_key_env.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "secret_scan.api_key_env must not be empty".to_string(),
            ));
        }

        if self.changelog.output.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "changelog.output must not be empty".to_string(),
            ));
        }

        if self.argo.required_kind.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "argo.required_kind must not be empty".to_string(),
            ));
        }

        for (tool, path) in &self.tools {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("tools.{} has an empty path", tool)));
            }
        }

        Ok(())
    }
}
