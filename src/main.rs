//! trace-metrics CLI
//!
//! Matches events, builds calling-context trees and derives performance
//! metrics from parallel program execution traces.

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

use trace_metrics::commands::{
    display_schema, display_version, execute_analyze, validate_args, validate_report_file,
    AnalyzeArgs,
};
use trace_metrics::metrics::GroupBy;
use trace_metrics::utils::config::{
    EngineConfig, ExecutionMode, NameCheck, DEFAULT_HISTOGRAM_BINS, DEFAULT_TIME_BINS,
    DEFAULT_TOP_PATHS, TIME_METRIC,
};

/// trace-metrics - performance metrics for parallel program traces
#[derive(Parser, Debug)]
#[command(name = "trace-metrics")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a normalized event trace
    Analyze {
        /// Event JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Output path for the JSON report
        #[arg(short, long, default_value = "report.json")]
        output: PathBuf,

        /// Flat profile key: "name" or an attribute name
        #[arg(long, default_value = "name")]
        groupby: GroupBy,

        /// One flat profile row per (key, process)
        #[arg(long)]
        per_process: bool,

        /// Metric used for hot paths and load imbalance
        #[arg(long, default_value = TIME_METRIC)]
        metric: String,

        /// Number of top hot paths to include
        #[arg(long, default_value_t = DEFAULT_TOP_PATHS)]
        top_paths: usize,

        /// Bins of the message size histogram
        #[arg(long, default_value_t = DEFAULT_HISTOGRAM_BINS)]
        bins: usize,

        /// Bins of the time profile and communication over time
        #[arg(long, default_value_t = DEFAULT_TIME_BINS)]
        time_bins: usize,

        /// Worker threads (defaults to one per core)
        #[arg(long, env = "TRACE_METRICS_THREADS")]
        threads: Option<usize>,

        /// Process streams one at a time on the calling thread
        #[arg(long)]
        sequential: bool,

        /// One stream per thread instead of per process
        #[arg(long)]
        partition_threads: bool,

        /// Leave name check: off, strict or recover
        #[arg(long, default_value = "off")]
        name_check: NameCheck,

        /// Print text summary to stdout
        #[arg(long)]
        summary: bool,
    },

    /// Validate a report JSON file
    Validate {
        /// Path to report JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Display schema information
    Schema {
        /// Show full schema details
        #[arg(long)]
        show: bool,
    },

    /// Display version information
    Version,
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Analyze {
            input,
            output,
            groupby,
            per_process,
            metric,
            top_paths,
            bins,
            time_bins,
            threads,
            sequential,
            partition_threads,
            name_check,
            summary,
        } => {
            let mut engine = EngineConfig::new()
                .with_execution(if sequential {
                    ExecutionMode::Sequential
                } else {
                    ExecutionMode::Parallel
                })
                .with_name_check(name_check);
            if let Some(threads) = threads {
                engine = engine.with_worker_threads(threads);
            }

            let args = AnalyzeArgs {
                input,
                output_json: output,
                metric,
                groupby,
                per_process,
                top_paths,
                histogram_bins: bins,
                time_bins,
                partition_threads,
                print_summary: summary,
                engine,
            };

            // Validate args first
            validate_args(&args)?;

            execute_analyze(args)?;
        }

        Commands::Validate { file } => {
            validate_report_file(&file)?;
        }

        Commands::Schema { show } => {
            display_schema(show);
        }

        Commands::Version => {
            display_version();
        }
    }

    Ok(())
}
