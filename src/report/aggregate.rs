//! Overall status and exit code from stage records

use super::outcome::{ErrorKind, ExitCode, Status};
use super::record::StageRecord;

/// Folds stage records into an overall status and exit code
///
/// Only fatal records (failed, not continue-on-failure) count. A missing
/// required tool wins over any other failure.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultAggregator {
    tool_missing: bool,
    required_failed: bool,
    passed: usize,
    tolerated: usize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: &StageRecord) {
        if record.is_fatal() {
            if record.error == Some(ErrorKind::ToolNotFound) {
                self.tool_missing = true;
            } else {
                self.required_failed = true;
            }
        } else if record.failed() {
            self.tolerated += 1;
        } else {
            self.passed += 1;
        }
    }

    /// Aggregate a whole record list; same input, same answer
    pub fn aggregate(records: &[StageRecord]) -> (Status, ExitCode) {
        let mut aggregator = Self::new();
        for record in records {
            aggregator.add(record);
        }
        (aggregator.status(), aggregator.exit_code())
    }

    pub fn status(&self) -> Status {
        if self.tool_missing || self.required_failed {
            Status::Failure
        } else {
            Status::Success
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.tool_missing {
            ExitCode::ToolMissing
        } else if self.required_failed {
            ExitCode::Failure
        } else {
            ExitCode::Success
        }
    }

    /// Stages that passed outright
    pub fn passed(&self) -> usize {
        self.passed
    }

    /// Stages that failed but were allowed to
    pub fn tolerated(&self) -> usize {
        self.tolerated
    }
}
