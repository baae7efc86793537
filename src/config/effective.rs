//! Effective configuration with full provenance
//!
//! Captures the merged configuration, the typed settings derived from it
//! and where every layer came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::settings::GateConfig;

/// Schema version for the effective config document
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "manifest-gate/effective_config@1";

/// Origin of a configuration source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Repo,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,

    /// Merged configuration object, secrets redacted
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,

    /// Redacted key paths
    pub redactions: Vec<String>,

    /// Typed settings, secrets intact
    #[serde(skip)]
    settings: GateConfig,
}

/// Key fragments marking a value as secret
const SECRET_KEYS: &[&str] = &["password", "token", "secret_key", "api_key", "credential"];

const REDACTED: &str = "[REDACTED]";

impl EffectiveConfig {
    /// Build effective config from layers
    ///
    /// A repo config path that does not exist is skipped; the repo file is
    /// optional.
    pub fn build(repo_config_path: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()?];
        let mut sources = vec![ConfigSource::unfiled(ConfigOrigin::Builtin)];

        if let Some(path) = repo_config_path.filter(|p| p.exists()) {
            let (value, digest) = load_repo_file(path)?;
            tracing::debug!(path = %path.display(), %digest, "loaded repo config");
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Repo,
                path: Some(path.to_string_lossy().into_owned()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource::unfiled(ConfigOrigin::Cli));
        }

        let mut merged = merge_layers(layers);
        let settings: GateConfig =
            serde_json::from_value(merged.clone()).map_err(|e| ConfigError::Settings(e.to_string()))?;
        settings.validate()?;

        let mut redactions = Vec::new();
        redact(&mut merged, "", &mut redactions);

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
            redactions,
            settings,
        })
    }

    /// Typed settings
    pub fn settings(&self) -> &GateConfig {
        &self.settings
    }

    pub fn into_settings(self) -> GateConfig {
        self.settings
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Merged value at a dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.config, |node, key| node.get(key))
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(Value::as_u64)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }
}

impl ConfigSource {
    fn unfiled(origin: ConfigOrigin) -> Self {
        Self {
            origin,
            path: None,
            digest: None,
        }
    }
}

/// Read the repo TOML file, returning it as a JSON layer plus the SHA-256 of
/// its raw bytes
fn load_repo_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let text = std::str::from_utf8(&bytes).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("invalid UTF-8: {}", e),
    })?;
    let value: Value = toml::from_str(text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok((value, digest))
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    // `api_key_env` names the variable holding the key
    !key.ends_with("_env") && SECRET_KEYS.iter().any(|s| key.contains(s))
}

/// Replace secret scalars with a marker, recording their dotted paths
fn redact(value: &mut Value, prefix: &str, redacted: &mut Vec<String>) {
    let Value::Object(map) = value else {
        return;
    };
    for (key, child) in map.iter_mut() {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match child {
            Value::Object(_) => redact(child, &path, redacted),
            Value::Null | Value::Array(_) => {}
            _ if is_secret_key(key) => {
                *child = Value::String(REDACTED.to_string());
                redacted.push(path);
            }
            _ => {}
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// Merged layers do not form valid settings
    #[error("invalid configuration: {0}")]
    Settings(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Settings(err.to_string())
    }
}
