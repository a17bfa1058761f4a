//! Output JSON schema definitions for analysis reports.
//!
//! This module defines the structure of JSON files we write to disk.
//! Schema is versioned to allow future evolution.

use crate::comm::{CommMatrix, Histogram, ProcessComm};
use crate::metrics::{FlatProfile, HotPath, ImbalanceRow, TimeProfile};
use serde::{Deserialize, Serialize};

/// Top-level report structure written to JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Schema version for compatibility checking
    pub version: String,

    /// Timestamp when the report was generated (RFC 3339)
    pub generated_at: String,

    /// Metric used for hot paths and imbalance
    pub metric: String,

    pub summary: TraceSummary,

    pub flat_profile: FlatProfile,

    /// Heaviest call paths by exclusive metric
    pub hot_paths: Vec<HotPath>,

    #[serde(default)]
    pub load_imbalance: Vec<ImbalanceRow>,

    /// Exclusive time per function over time bins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_profile: Option<TimeProfile>,

    /// Bytes per sender/receiver pair, absent when the trace has no messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comm_matrix: Option<CommMatrix>,

    #[serde(default)]
    pub comm_by_process: Vec<ProcessComm>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_histogram: Option<Histogram>,

    /// Bytes sent per time bin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comm_over_time: Option<Histogram>,
}

/// Size of the analysed trace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub streams: usize,
    pub events: usize,
    pub processes: usize,
    /// Observed time span across all streams, in nanoseconds
    pub duration_ns: i64,
}
