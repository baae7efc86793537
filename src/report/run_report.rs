//! Run report (report.json) and its human rendering

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::stage::StageKind;

use super::aggregate::ResultAggregator;
use super::outcome::{ExitCode, Status};
use super::record::StageRecord;

/// Schema version for report.json
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for report.json
pub const REPORT_SCHEMA_ID: &str = "manifest-gate/report@1";

/// Finished run
///
/// Holds one record per executed stage, in execution order. There is no
/// way to change a report once built.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    schema_version: u32,
    schema_id: String,
    run_id: String,
    root: PathBuf,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_ms: u64,
    status: Status,
    exit_code: i32,
    /// A required stage failed and the run stopped there
    aborted: bool,
    stages: Vec<StageRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<StageKind>,
    human_summary: String,
}

impl Report {
    /// Build the final report from the executed stages
    pub fn new(
        run_id: impl Into<String>,
        root: impl Into<PathBuf>,
        started_at: DateTime<Utc>,
        stages: Vec<StageRecord>,
        skipped: Vec<StageKind>,
    ) -> Self {
        let mut aggregator = ResultAggregator::new();
        for record in &stages {
            aggregator.add(record);
        }
        let status = aggregator.status();
        let exit_code = aggregator.exit_code();
        let aborted = stages.iter().any(StageRecord::is_fatal);

        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        let human_summary = Self::generate_human_summary(status, &aggregator, stages.len(), skipped.len());

        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            schema_id: REPORT_SCHEMA_ID.to_string(),
            run_id: run_id.into(),
            root: root.into(),
            started_at,
            finished_at,
            duration_ms,
            status,
            exit_code: exit_code.as_i32(),
            aborted,
            stages,
            skipped,
            human_summary,
        }
    }

    fn generate_human_summary(
        status: Status,
        aggregator: &ResultAggregator,
        executed: usize,
        skipped: usize,
    ) -> String {
        let mut summary = match status {
            Status::Success if executed == 0 => "Gate passed: no stages run".to_string(),
            Status::Success if aggregator.tolerated() > 0 => format!(
                "Gate passed: {}/{} stages passed, {} failed but tolerated",
                aggregator.passed(),
                executed,
                aggregator.tolerated()
            ),
            Status::Success => format!("Gate passed: {}/{} stages passed", aggregator.passed(), executed),
            Status::Failure => format!(
                "Gate failed: {} passed, {} failed",
                aggregator.passed(),
                executed - aggregator.passed()
            ),
        };
        if skipped > 0 {
            summary.push_str(&format!(", {} skipped", skipped));
        }
        summary
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn exit_code_enum(&self) -> Option<ExitCode> {
        ExitCode::from_i32(self.exit_code)
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }

    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == kind)
    }

    pub fn skipped(&self) -> &[StageKind] {
        &self.skipped
    }

    pub fn human_summary(&self) -> &str {
        &self.human_summary
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))?;
        fs::write(path, json)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.stages {
            write!(
                f,
                "[{}] {} ({:.1}s)",
                record.verdict().label(),
                record.stage,
                record.outcome.elapsed().as_secs_f64()
            )?;
            if let Some(findings) = record.findings.filter(|n| *n > 0) {
                write!(f, " {} finding(s)", findings)?;
            }
            writeln!(f)?;
            if let Some(message) = &record.error_message {
                writeln!(f, "    {}", message)?;
            }
            for file in &record.files {
                writeln!(f, "    {}", file)?;
            }
        }
        for kind in &self.skipped {
            writeln!(f, "[SKIP] {}", kind)?;
        }
        write!(f, "{}", self.human_summary)
    }
}
