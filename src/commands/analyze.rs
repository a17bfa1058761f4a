//! Analyze command implementation.
//!
//! The analyze command:
//! 1. Loads normalized events into a dataset
//! 2. Matches Enter/Leave pairs and builds call trees
//! 3. Derives inclusive and exclusive metrics
//! 4. Aggregates the flat profile
//! 5. Extracts hot paths, load imbalance and the time profile
//! 6. Builds communication tables
//! 7. Writes the report

use super::models::{AnalyzeArgs, MetricDisplay};
use crate::comm::CommOutput;
use crate::dataset::Dataset;
use crate::metrics::{calculate_distribution, calculate_hot_paths, Columns};
use crate::output::{write_report, AnalysisReport, TraceSummary};
use crate::trace::{load_file, LoadOptions};
use crate::utils::config::{MAX_TOP_PATHS, SCHEMA_VERSION};
use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info};
use std::collections::BTreeSet;
use std::time::Instant;

/// Execute the analyze command
///
/// **Public** - main entry point called from main.rs
///
/// # Arguments
/// * `args` - Analyze command arguments
///
/// # Returns
/// The report that was written
///
/// # Errors
/// * Input read or parse failures
/// * Malformed streams and metric errors
/// * File write errors
pub fn execute_analyze(args: AnalyzeArgs) -> Result<AnalysisReport> {
    let start_time = Instant::now();

    info!("Starting analysis of {}", args.input.display());

    // Step 1: Load events
    info!("Step 1/7: Loading events...");
    let options = LoadOptions::default()
        .with_partition_threads(args.partition_threads)
        .with_engine(args.engine.clone());
    let mut dataset = load_file(&args.input, &options)
        .with_context(|| format!("Failed to load events from {}", args.input.display()))?;

    let report = analyze_dataset(&mut dataset, &args)?;

    // Step 7: Write outputs
    info!("Step 7/7: Writing report...");
    write_report(&report, &args.output_json).context("Failed to write report JSON")?;
    info!("✓ Report written to: {}", args.output_json.display());

    if args.print_summary {
        print_summary(&report);
    }

    let elapsed = start_time.elapsed();
    info!("Analysis completed in {:.2}s", elapsed.as_secs_f64());

    Ok(report)
}

/// Run steps 2-6 on an already loaded dataset
///
/// **Public** - lets callers with their own reader produce the same report
pub fn analyze_dataset(dataset: &mut Dataset, args: &AnalyzeArgs) -> Result<AnalysisReport> {
    // Step 2: Matching
    info!("Step 2/7: Matching events...");
    dataset.match_events().context("Failed to match events")?;
    dataset
        .match_caller_callee()
        .context("Failed to build call trees")?;

    // Step 3: Metrics
    info!("Step 3/7: Deriving metrics...");
    dataset
        .calc_exc_metrics(&Columns::All)
        .context("Failed to derive metrics")?;

    // Step 4: Flat profile
    info!("Step 4/7: Aggregating flat profile by {}...", args.groupby);
    let flat_profile = dataset
        .flat_profile(&Columns::All, &args.groupby, args.per_process)
        .context("Failed to aggregate flat profile")?;

    // Step 5: Hot paths, imbalance and time profile
    info!("Step 5/7: Calculating top {} hot paths...", args.top_paths);
    let stacks = dataset
        .collapsed_stacks(&args.metric)
        .with_context(|| format!("Failed to build call paths for '{}'", args.metric))?;
    let distribution = calculate_distribution(&stacks);
    info!("Path distribution: {}", distribution.summary());
    if distribution.is_highly_concentrated() {
        info!(
            "Top 10% of call paths hold {:.1}% of {}",
            distribution.top_10_percent_percentage, args.metric
        );
    }

    let hot_paths = calculate_hot_paths(&stacks, distribution.total, args.top_paths);
    debug!("Top 3 hot paths:");
    for (i, path) in hot_paths.iter().take(3).enumerate() {
        debug!(
            "  {}. {:.0} ({:.1}%): {}",
            i + 1,
            path.weight,
            path.percentage,
            path.stack
        );
    }

    let load_imbalance = dataset
        .load_imbalance(&args.metric, 5)
        .context("Failed to compute load imbalance")?;

    let time_profile = dataset
        .time_profile(args.time_bins, false)
        .context("Failed to bin exclusive time")?;

    // Step 6: Communication
    info!("Step 6/7: Building communication tables...");
    let message_count = dataset
        .comm_matrix(CommOutput::Count)
        .context("Failed to build message count matrix")?
        .total();

    let (comm_matrix, comm_by_process, message_histogram, comm_over_time) = if message_count > 0 {
        let matrix = dataset
            .comm_matrix(CommOutput::Size)
            .context("Failed to build communication matrix")?;
        let totals = dataset
            .comm_by_process()
            .context("Failed to compute per-process totals")?;
        let histogram = dataset
            .message_histogram(args.histogram_bins)
            .context("Failed to build message histogram")?;
        let over_time = dataset
            .comm_over_time(CommOutput::Size, args.time_bins)
            .context("Failed to bin communication over time")?;
        (Some(matrix), totals, Some(histogram), Some(over_time))
    } else {
        info!("No point-to-point messages found, skipping communication tables");
        (None, Vec::new(), None, None)
    };

    Ok(AnalysisReport {
        version: SCHEMA_VERSION.to_string(),
        generated_at: Utc::now().to_rfc3339(),
        metric: args.metric.clone(),
        summary: summarize(dataset),
        flat_profile,
        hot_paths,
        load_imbalance,
        time_profile: Some(time_profile),
        comm_matrix,
        comm_by_process,
        message_histogram,
        comm_over_time,
    })
}

fn summarize(dataset: &Dataset) -> TraceSummary {
    let processes: BTreeSet<u32> = dataset.streams().flat_map(|s| s.process_ids()).collect();
    let start = dataset.streams().filter_map(|s| s.time_range()).map(|r| r.0).min();
    let end = dataset.streams().filter_map(|s| s.time_range()).map(|r| r.1).max();

    TraceSummary {
        streams: dataset.stream_count(),
        events: dataset.event_count(),
        processes: processes.len(),
        duration_ns: match (start, end) {
            (Some(s), Some(e)) => e - s,
            _ => 0,
        },
    }
}

/// **Private** - text summary for `--summary`
fn print_summary(report: &AnalysisReport) {
    let display = MetricDisplay::new(&report.metric);

    println!("\n{}", "=".repeat(80));
    println!("ANALYSIS SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Streams:   {}", report.summary.streams);
    println!("Events:    {}", report.summary.events);
    println!("Processes: {}", report.summary.processes);
    println!("Duration:  {}", MetricDisplay::new("time").format(report.summary.duration_ns as f64));

    println!("\nTop functions by exclusive {}:", report.metric);
    let exc_key = format!("{}.exc", report.metric);
    for row in report.flat_profile.rows.iter().take(10) {
        let value = row.values.get(&exc_key).copied().unwrap_or(0.0);
        let process = row.process.map(|p| format!(" [{}]", p)).unwrap_or_default();
        println!("  {:>14}  {}{}", display.format(value), row.key, process);
    }

    println!("\nHot paths:");
    for path in report.hot_paths.iter().take(10) {
        println!("  {:>6.1}%  {}", path.percentage, path.stack);
    }

    if let Some(worst) = report.load_imbalance.first() {
        println!(
            "\nMost imbalanced: {} (max/mean {:.2})",
            worst.name, worst.imbalance
        );
    }

    if !report.comm_by_process.is_empty() {
        let bytes: u64 = report.comm_by_process.iter().map(|p| p.sent).sum();
        let messages: u64 = report.comm_by_process.iter().map(|p| p.messages_sent).sum();
        println!("\nMessages: {} ({} bytes)", messages, bytes);
    }
    println!("{}", "=".repeat(80));
}

/// Validate analyze arguments
///
/// **Public** - can be called before execute_analyze for early validation
pub fn validate_args(args: &AnalyzeArgs) -> Result<()> {
    if args.input.as_os_str().is_empty() {
        anyhow::bail!("Input path cannot be empty");
    }

    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {}", args.input.display());
    }

    if args.metric.trim().is_empty() {
        anyhow::bail!("Metric name cannot be empty");
    }

    if args.top_paths == 0 {
        anyhow::bail!("top_paths must be greater than 0");
    }

    if args.top_paths > MAX_TOP_PATHS {
        anyhow::bail!("top_paths is too large (max {})", MAX_TOP_PATHS);
    }

    if args.histogram_bins == 0 {
        anyhow::bail!("histogram bins must be greater than 0");
    }

    if args.time_bins == 0 {
        anyhow::bail!("time bins must be greater than 0");
    }

    if args.engine.worker_threads == Some(0) {
        anyhow::bail!("threads must be greater than 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn args_with_input() -> (NamedTempFile, AnalyzeArgs) {
        let input = NamedTempFile::new().unwrap();
        let args = AnalyzeArgs {
            input: input.path().to_path_buf(),
            ..Default::default()
        };
        (input, args)
    }

    #[test]
    fn test_validate_args_valid() {
        let (_input, args) = args_with_input();
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn test_validate_args_missing_input() {
        let args = AnalyzeArgs {
            input: "does/not/exist.json".into(),
            ..Default::default()
        };
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_validate_args_top_paths() {
        let (_input, mut args) = args_with_input();
        args.top_paths = 0;
        assert!(validate_args(&args).is_err());
        args.top_paths = 2000;
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_validate_args_zero_threads() {
        let (_input, mut args) = args_with_input();
        args.engine = args.engine.with_worker_threads(0);
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_validate_args_empty_metric() {
        let (_input, mut args) = args_with_input();
        args.metric = " ".to_string();
        assert!(validate_args(&args).is_err());
    }
}
