//! manifest-gate CLI
//!
//! Entry point for the `manifest-gate` command-line tool.

use clap::{ArgAction, Parser, Subcommand};
use manifest_gate::config::{set_path, EffectiveConfig, REPO_CONFIG_FILE};
use manifest_gate::discovery::ManifestGroup;
use manifest_gate::pipeline::{Gate, PipelineError, ToolStatus};
use manifest_gate::signal::SignalHandler;
use manifest_gate::stage::StageKind;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "manifest-gate")]
#[command(about = "Validation pipeline for Kubernetes manifest repositories", version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Repository root (default: current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Repo config file (default: <root>/.manifest-gate.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all enabled stages, or the ones named with --stage
    Run {
        /// Stage to run (repeatable): manifest-lint, yaml-lint, secret-scan, changelog, argo-validate
        #[arg(long = "stage")]
        stages: Vec<StageKind>,

        /// Concurrent per-file tool invocations (0 = available parallelism)
        #[arg(long, short = 'j')]
        jobs: Option<usize>,

        /// Per-invocation timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,

        /// Also write the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Run exactly one stage, even if disabled in configuration
    Stage {
        /// Stage name
        name: StageKind,

        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,

        /// Also write the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List discovered manifests
    Discover {
        /// Only this group (base, overlay, app)
        #[arg(long)]
        group: Option<ManifestGroup>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show where each required external tool resolves
    Tools {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration with provenance
    Config,
}

struct RunOptions {
    stages: Vec<StageKind>,
    json: bool,
    report: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut overrides = Value::Object(serde_json::Map::new());
    if let Some(root) = &cli.root {
        set_path(&mut overrides, "root", Value::String(root.to_string_lossy().into_owned()));
    }
    let root = cli.root.as_deref();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            stages,
            jobs,
            timeout,
            json,
            report,
        } => {
            if let Some(jobs) = jobs {
                set_path(&mut overrides, "jobs", Value::from(jobs));
            }
            if let Some(timeout) = timeout {
                set_path(&mut overrides, "timeouts.tool_seconds", Value::from(timeout));
            }
            let effective = load_config_or_exit(root, config, overrides);
            run_pipeline(effective, RunOptions { stages, json, report });
        }
        Commands::Stage { name, json, report } => {
            let effective = load_config_or_exit(root, config, overrides);
            run_pipeline(
                effective,
                RunOptions {
                    stages: vec![name],
                    json,
                    report,
                },
            );
        }
        Commands::Discover { group, json } => {
            run_discover(load_config_or_exit(root, config, overrides), group, json);
        }
        Commands::Tools { json } => {
            run_tools(load_config_or_exit(root, config, overrides), json);
        }
        Commands::Config => {
            run_config(&load_config_or_exit(root, config, overrides));
        }
    }
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "manifest_gate=info,gate_discovery=info",
        1 => "manifest_gate=debug,gate_discovery=debug",
        _ => "manifest_gate=trace,gate_discovery=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(root: Option<&Path>, config: Option<&Path>, overrides: Value) -> Result<EffectiveConfig, String> {
    let path = match config {
        Some(path) => {
            if !path.exists() {
                return Err(format!("config file not found: {}", path.display()));
            }
            path.to_path_buf()
        }
        None => root.unwrap_or_else(|| Path::new(".")).join(REPO_CONFIG_FILE),
    };
    EffectiveConfig::build(Some(&path), Some(overrides)).map_err(|e| e.to_string())
}

fn load_config_or_exit(root: Option<&Path>, config: Option<&Path>, overrides: Value) -> EffectiveConfig {
    match load_config(root, config, overrides) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    }
}

/// API key from the configured value or, failing that, the environment
fn api_key(effective: &EffectiveConfig) -> Option<String> {
    let settings = &effective.settings().secret_scan;
    settings
        .api_key
        .clone()
        .or_else(|| std::env::var(&settings.api_key_env).ok())
}

fn run_pipeline(effective: EffectiveConfig, options: RunOptions) {
    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        tracing::warn!(error = %e, "could not install signal handler");
    }

    let api_key = api_key(&effective);
    let gate = Gate::new(effective.into_settings())
        .with_api_key(api_key)
        .with_signal_state(handler.state());

    let result = gate.driver(&options.stages).and_then(|mut driver| driver.run());
    let report = match result {
        Ok(report) => report,
        Err(PipelineError::Cancelled) => {
            eprintln!("Run cancelled; no report written");
            process::exit(PipelineError::Cancelled.exit_code());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    };

    if let Some(path) = &options.report {
        if let Err(e) = report.write_to_file(path) {
            eprintln!("Error writing report to {}: {}", path.display(), e);
            process::exit(1);
        }
        tracing::info!(path = %path.display(), "report written");
    }

    if options.json {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!("{}", report);
    }

    process::exit(report.exit_code());
}

fn run_discover(effective: EffectiveConfig, group: Option<ManifestGroup>, json_output: bool) {
    let gate = Gate::new(effective.into_settings());
    let files = gate.discovery().and_then(|discovery| match group {
        Some(group) => discovery.group(group),
        None => discovery.collect_all(),
    });
    let files = match files {
        Ok(files) => files,
        Err(e) => {
            eprintln!("Discovery error: {}", e);
            process::exit(1);
        }
    };

    if json_output {
        match serde_json::to_string_pretty(&files) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    if files.is_empty() {
        println!("No manifests found under {}", gate.root().display());
        return;
    }
    for file in &files {
        match file.overlay() {
            Some(overlay) => println!("{:<8} {} ({})", file.group().as_str(), file.path().display(), overlay),
            None => println!("{:<8} {}", file.group().as_str(), file.path().display()),
        }
    }
}

fn run_tools(effective: EffectiveConfig, json_output: bool) {
    let gate = Gate::new(effective.into_settings());
    let tools = gate.tool_report(&[]);

    if json_output {
        match serde_json::to_string_pretty(&tools) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        for tool in &tools {
            match (&tool.path, &tool.error) {
                (Some(path), _) => println!("  {:<12} {} ({})", tool.tool, path.display(), tool.stage),
                (None, _) if !tool.required => println!("  {:<12} MISSING, optional ({})", tool.tool, tool.stage),
                (None, Some(error)) => println!("  {:<12} MISSING: {} ({})", tool.tool, error, tool.stage),
                (None, None) => println!("  {:<12} MISSING ({})", tool.tool, tool.stage),
            }
        }
    }

    if tools.iter().any(ToolStatus::blocks_run) {
        process::exit(manifest_gate::ExitCode::ToolMissing.as_i32());
    }
}

fn run_config(effective: &EffectiveConfig) {
    match effective.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}
