//! manifest-gate - validation pipeline for Kubernetes manifest repositories
//!
//! Discovers base, overlay and ArgoCD application manifests and runs them
//! through a fixed sequence of checks: schema validation, YAML lint, secret
//! scanning, changelog generation and ArgoCD application checks. External
//! tools do the checking; this crate sequences them, bounds them in time
//! and folds their outcomes into one report and exit code.

pub mod config;
pub mod pipeline;
pub mod report;
pub mod signal;
pub mod stage;
pub mod timeout;
pub mod tool;

pub use gate_discovery as discovery;

pub use config::{EffectiveConfig, GateConfig};
pub use pipeline::{Gate, PipelineDriver, PipelineError};
pub use report::{ExitCode, Report, ResultAggregator, StageRecord};
pub use stage::{Stage, StageKind};
pub use tool::{ExitOutcome, ToolInvoker};
