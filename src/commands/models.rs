use crate::metrics::GroupBy;
use crate::utils::config::{
    EngineConfig, DEFAULT_HISTOGRAM_BINS, DEFAULT_TIME_BINS, DEFAULT_TOP_PATHS, TIME_METRIC,
};
use std::path::PathBuf;

/// Arguments for the analyze command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct AnalyzeArgs {
    /// Normalized event JSON to load
    pub input: PathBuf,

    /// Output path for the JSON report
    pub output_json: PathBuf,

    /// Metric used for hot paths and load imbalance
    pub metric: String,

    /// Flat profile row key
    pub groupby: GroupBy,

    /// One flat profile row per (key, process)
    pub per_process: bool,

    /// Number of top hot paths to include in the report
    pub top_paths: usize,

    /// Bins of the message size histogram
    pub histogram_bins: usize,

    /// Bins of the time profile and communication over time
    pub time_bins: usize,

    /// One stream per thread instead of per process
    pub partition_threads: bool,

    /// Print text summary to stdout
    pub print_summary: bool,

    /// Execution mode, worker threads and name checking
    pub engine: EngineConfig,
}

impl Default for AnalyzeArgs {
    fn default() -> Self {
        Self {
            input: PathBuf::from("events.json"),
            output_json: PathBuf::from("report.json"),
            metric: TIME_METRIC.to_string(),
            groupby: GroupBy::Name,
            per_process: false,
            top_paths: DEFAULT_TOP_PATHS,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            time_bins: DEFAULT_TIME_BINS,
            partition_threads: false,
            print_summary: false,
            engine: EngineConfig::default(),
        }
    }
}

/// Formats metric values for terminal output
pub struct MetricDisplay {
    pub metric: String,
}

impl MetricDisplay {
    pub fn new(metric: &str) -> Self {
        Self {
            metric: metric.to_string(),
        }
    }

    /// Time values get a readable unit, other metrics print as-is
    pub fn format(&self, value: f64) -> String {
        if self.metric != TIME_METRIC {
            return format!("{:.2}", value);
        }
        let abs = value.abs();
        if abs >= 1e9 {
            format!("{:.3} s", value / 1e9)
        } else if abs >= 1e6 {
            format!("{:.3} ms", value / 1e6)
        } else if abs >= 1e3 {
            format!("{:.3} us", value / 1e3)
        } else {
            format!("{:.0} ns", value)
        }
    }
}
