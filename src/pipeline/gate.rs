//! Wiring from configuration to a ready-to-run driver

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gate_discovery::{Discovery, DiscoveryConfig, DiscoveryError};

use crate::config::GateConfig;
use crate::signal::{CancelToken, SignalState};
use crate::stage::{
    ArgoValidateStage, ChangelogStage, ManifestLintStage, SecretScanStage, Stage, StageKind,
    YamlLintStage,
};
use crate::tool::{NoInstaller, ToolInstaller, ToolInvoker, ToolProvisioner};

use super::{PipelineDriver, PipelineResult};

/// Everything needed to build drivers and invokers for one repository
pub struct Gate {
    settings: GateConfig,
    api_key: Option<String>,
    cancel: CancelToken,
    signals: Option<Arc<SignalState>>,
    search_path: Option<OsString>,
}

impl Gate {
    pub fn new(settings: GateConfig) -> Self {
        Self {
            settings,
            api_key: None,
            cancel: CancelToken::new(),
            signals: None,
            search_path: None,
        }
    }

    /// Secret scanner API key, passed to tools through the invoker's environment
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    /// Share the signal handler's token and stage tracking
    pub fn with_signal_state(mut self, signals: Arc<SignalState>) -> Self {
        self.cancel = signals.token();
        self.signals = Some(signals);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Look tools up on this `PATH` value instead of the process's
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn settings(&self) -> &GateConfig {
        &self.settings
    }

    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    /// Invoker configured with tool paths, timeouts, API key and cancel token
    pub fn invoker(&self, installer: Box<dyn ToolInstaller>) -> ToolInvoker {
        let mut provisioner = ToolProvisioner::new(installer);
        for (tool, path) in &self.settings.tools {
            provisioner = provisioner.with_explicit(tool.clone(), path.clone());
        }
        if let Some(search_path) = &self.search_path {
            provisioner = provisioner.with_search_path(search_path.clone());
        }

        let mut invoker = ToolInvoker::new(self.settings.root.clone(), self.settings.timeout_config())
            .with_provisioner(provisioner)
            .with_cancel_token(self.cancel.clone());
        if let Some(key) = &self.api_key {
            invoker = invoker.with_env(self.settings.secret_scan.api_key_env.clone(), key.clone());
        }
        invoker
    }

    pub fn discovery(&self) -> Result<Discovery, DiscoveryError> {
        let config = DiscoveryConfig {
            include: self.settings.discovery.include.clone(),
            exclude: self.settings.discovery.exclude.clone(),
            follow_links: self.settings.discovery.follow_links,
            ..DiscoveryConfig::default()
        };
        Discovery::new(self.settings.root.clone(), &config)
    }

    /// Stages to run, in pipeline order
    ///
    /// An empty selection means every enabled stage. Explicitly selected
    /// stages run even when disabled in configuration.
    pub fn selection(&self, requested: &[StageKind]) -> Vec<StageKind> {
        StageKind::ALL
            .into_iter()
            .filter(|kind| {
                if requested.is_empty() {
                    self.settings.is_enabled(*kind)
                } else {
                    requested.contains(kind)
                }
            })
            .collect()
    }

    /// Build the stage implementation for `kind` from configuration
    pub fn stage(&self, kind: StageKind) -> Box<dyn Stage> {
        let s = &self.settings;
        let cof = s.continue_on_failure(kind);
        match kind {
            StageKind::ManifestLint => Box::new(ManifestLintStage::from_settings(&s.manifest_lint, cof)),
            StageKind::YamlLint => Box::new(YamlLintStage::from_settings(&s.yamllint, cof)),
            StageKind::SecretScan => Box::new(SecretScanStage::from_settings(&s.secret_scan, cof)),
            StageKind::ChangelogGen => Box::new(ChangelogStage::from_settings(&s.changelog, cof)),
            StageKind::ArgoValidate => Box::new(ArgoValidateStage::from_settings(&s.argo, cof)),
        }
    }

    /// Driver for the selected stages, with no tool installer
    pub fn driver(&self, requested: &[StageKind]) -> PipelineResult<PipelineDriver> {
        self.driver_with_installer(requested, Box::new(NoInstaller))
    }

    pub fn driver_with_installer(
        &self,
        requested: &[StageKind],
        installer: Box<dyn ToolInstaller>,
    ) -> PipelineResult<PipelineDriver> {
        let selection = self.selection(requested);
        if selection.contains(&StageKind::SecretScan) && self.api_key.is_none() {
            tracing::warn!(
                env = %self.settings.secret_scan.api_key_env,
                "no secret scanner API key configured"
            );
        }

        let mut driver = PipelineDriver::new(self.settings.root.clone(), self.invoker(installer), self.discovery()?)
            .with_jobs(self.settings.effective_jobs());
        for kind in selection {
            driver = driver.with_stage(self.stage(kind));
        }
        if let Some(signals) = &self.signals {
            driver = driver.with_signal_state(Arc::clone(signals));
        }
        Ok(driver)
    }

    /// Where each tool referenced by the selected stages resolves
    pub fn tool_report(&self, requested: &[StageKind]) -> Vec<ToolStatus> {
        let invoker = self.invoker(Box::new(NoInstaller));
        let mut tools: Vec<ToolStatus> = Vec::new();
        for kind in self.selection(requested) {
            let stage = self.stage(kind);
            let required = !stage.spec().continue_on_failure;
            for tool in stage.spec().tools() {
                if let Some(seen) = tools.iter_mut().find(|t| t.tool == tool) {
                    seen.required |= required;
                    continue;
                }
                let resolved = invoker.ensure_available(tool);
                tools.push(ToolStatus {
                    tool: tool.to_string(),
                    stage: kind,
                    required,
                    path: resolved.as_ref().ok().cloned(),
                    error: resolved.err().map(|e| e.to_string()),
                });
            }
        }
        tools
    }
}

/// Resolution result for one external tool
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ToolStatus {
    pub tool: String,
    /// First stage needing the tool
    pub stage: StageKind,
    /// Needed by at least one stage whose failure stops the run
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolStatus {
    pub fn found(&self) -> bool {
        self.path.is_some()
    }

    /// A run over the same stages would exit with `ToolMissing`
    pub fn blocks_run(&self) -> bool {
        self.required && !self.found()
    }
}
