//! Report schema and writers.
//!
//! This module handles writing analysis results to disk:
//! - The versioned JSON report schema
//! - Pretty JSON output and read-back

pub mod json;
pub mod schema;

// Re-export main types and functions
pub use json::{read_report, report_to_string, write_report};
pub use schema::{AnalysisReport, TraceSummary};
