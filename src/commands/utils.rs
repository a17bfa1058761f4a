use crate::output::read_report;
use crate::utils::config::SCHEMA_VERSION;
use anyhow::{Context, Result};
use std::path::Path;

/// Validate a report JSON file
pub fn validate_report_file(file_path: &Path) -> Result<()> {
    println!("Validating report: {}", file_path.display());

    let report = read_report(file_path)
        .with_context(|| format!("Failed to read report {}", file_path.display()))?;

    if report.version != SCHEMA_VERSION {
        anyhow::bail!(
            "Unsupported report version {} (expected {})",
            report.version,
            SCHEMA_VERSION
        );
    }

    println!("✓ Valid report JSON");
    println!("  Version: {}", report.version);
    println!("  Generated: {}", report.generated_at);
    println!("  Streams: {}", report.summary.streams);
    println!("  Events: {}", report.summary.events);
    println!("  Profile Rows: {}", report.flat_profile.rows.len());
    println!("  Hot Paths: {}", report.hot_paths.len());
    println!(
        "  Comm Matrix: {}",
        report
            .comm_matrix
            .as_ref()
            .map(|m| format!("{0}x{0}", m.len()))
            .unwrap_or_else(|| "none".to_string())
    );

    Ok(())
}

/// Display schema information
pub fn display_schema(show_details: bool) {
    println!("trace-metrics Report Schema");
    println!("Current Version: {}", SCHEMA_VERSION);
    println!();

    if show_details {
        println!("Schema Structure:");
        println!("  version: string            - Schema version (e.g., '1.0.0')");
        println!("  generated_at: string       - RFC 3339 timestamp");
        println!("  metric: string             - Metric used for hot paths");
        println!("  summary: object            - Streams, events, processes, duration_ns");
        println!("  flat_profile: object       - Aggregated metrics per key");
        println!("    groupby: string|object   - 'name' or {{\"attribute\": key}}");
        println!("    per_process: bool        - One row per (key, process)");
        println!("    rows: array              - key, process?, calls, values");
        println!("  hot_paths: array           - Heaviest call paths");
        println!("    stack: string            - Semicolon-separated call path");
        println!("    weight: number           - Summed exclusive metric");
        println!("    percentage: number       - Share of the total");
        println!("  load_imbalance: array      - name, mean, max, imbalance, top_processes");
        println!("  time_profile: object?      - edges, functions, idle_time per time bin");
        println!("  comm_matrix: object?       - processes, values[sender][receiver] (bytes)");
        println!("  comm_by_process: array     - sent, received, messages_sent, messages_received");
        println!("  message_histogram: object? - counts, edges");
        println!("  comm_over_time: object?    - bytes sent per time bin");
    } else {
        println!("Use --show for detailed schema information");
    }
}

/// Display version information
pub fn display_version() {
    println!("trace-metrics v{}", env!("CARGO_PKG_VERSION"));
    println!("Report Schema: v{}", SCHEMA_VERSION);
    println!();
    println!("Performance metrics for parallel program execution traces.");
}
