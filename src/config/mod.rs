//! Configuration merge system
//!
//! Three layers, later ones winning:
//! 1. Built-in defaults
//! 2. Repo config (`.manifest-gate.toml` at the root, or `--config`)
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::{BuiltinDefaults, DEFAULT_API_KEY_ENV, REPO_CONFIG_FILE};
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers, set_path};
pub use settings::{
    ArgoSettings, ChangelogSettings, DiscoverySettings, GateConfig, ManifestLintSettings,
    SecretScanSettings, TimeoutSettings, YamlLintSettings,
};
