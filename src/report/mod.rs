//! Stage records, aggregation and the run report

mod aggregate;
mod outcome;
mod record;
mod run_report;

pub use aggregate::ResultAggregator;
pub use outcome::{ErrorKind, ExitCode, FileOutcome, Status, Verdict};
pub use record::StageRecord;
pub use run_report::{Report, REPORT_SCHEMA_ID, REPORT_SCHEMA_VERSION};
