//! JSON report output writer.
//!
//! Writes AnalysisReport structs to JSON files with proper formatting.

use super::schema::AnalysisReport;
use crate::utils::error::OutputError;
use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Write a report to a JSON file
///
/// **Public** - main entry point for JSON output
///
/// # Arguments
/// * `report` - Report data to write
/// * `output_path` - Path to output JSON file
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::SerializationFailed` - JSON serialization error
/// * `OutputError::InvalidPath` - Path cannot be created or is invalid
pub fn write_report(
    report: &AnalysisReport,
    output_path: impl AsRef<Path>,
) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();

    info!("Writing report to: {}", output_path.display());

    validate_output_path(output_path)?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!("Creating parent directories: {}", parent.display());
            std::fs::create_dir_all(parent).map_err(|e| {
                OutputError::InvalidPath(format!(
                    "Cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let file = File::create(output_path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, report)?;

    info!(
        "Report written successfully ({} bytes)",
        calculate_file_size(output_path)
    );

    Ok(())
}

/// Serialize a report to a pretty JSON string
pub fn report_to_string(report: &AnalysisReport) -> Result<String, OutputError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Validate that output path is writable
///
/// **Private** - internal validation
fn validate_output_path(path: &Path) -> Result<(), OutputError> {
    if path.as_os_str().is_empty() {
        return Err(OutputError::InvalidPath("Path is empty".to_string()));
    }

    if path.is_dir() {
        return Err(OutputError::InvalidPath(format!(
            "Path is a directory: {}",
            path.display()
        )));
    }

    Ok(())
}

/// **Private** - internal utility
fn calculate_file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Read a report from a JSON file
///
/// **Public** - used by `validate` and tests
///
/// # Errors
/// * `OutputError::WriteFailed` - File read error (I/O errors share this variant)
/// * `OutputError::SerializationFailed` - JSON parse error
pub fn read_report(input_path: impl AsRef<Path>) -> Result<AnalysisReport, OutputError> {
    let input_path = input_path.as_ref();

    debug!("Reading report from: {}", input_path.display());

    let file = File::open(input_path)?;
    let report: AnalysisReport = serde_json::from_reader(BufReader::new(file))?;

    debug!(
        "Report loaded: version {}, {} streams",
        report.version, report.summary.streams
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{FlatProfile, FlatProfileRow, GroupBy, HotPath};
    use crate::output::schema::TraceSummary;
    use std::collections::BTreeMap;
    use tempfile::NamedTempFile;

    fn create_test_report() -> AnalysisReport {
        let mut values = BTreeMap::new();
        values.insert("time.exc".to_string(), 30.0);
        values.insert("time.inc".to_string(), 50.0);

        AnalysisReport {
            version: "1.0.0".to_string(),
            generated_at: "2024-01-01T00:00:00Z".to_string(),
            metric: "time".to_string(),
            summary: TraceSummary {
                streams: 2,
                events: 8,
                processes: 2,
                duration_ns: 50,
            },
            flat_profile: FlatProfile {
                groupby: GroupBy::Name,
                per_process: false,
                metrics: vec!["time".to_string()],
                rows: vec![FlatProfileRow {
                    key: "main".to_string(),
                    process: None,
                    calls: 1.0,
                    values,
                }],
            },
            hot_paths: vec![HotPath {
                stack: "main".to_string(),
                weight: 30.0,
                percentage: 100.0,
            }],
            load_imbalance: Vec::new(),
            time_profile: None,
            comm_matrix: None,
            comm_by_process: Vec::new(),
            message_histogram: None,
            comm_over_time: None,
        }
    }

    #[test]
    fn test_write_and_read_report() {
        let report = create_test_report();
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        write_report(&report, path).unwrap();
        let loaded = read_report(path).unwrap();

        assert_eq!(loaded, report);
    }

    #[test]
    fn test_report_to_string_omits_absent_sections() {
        let json = report_to_string(&create_test_report()).unwrap();
        assert!(json.contains("\"time.exc\": 30.0"));
        assert!(!json.contains("comm_matrix"));
    }

    #[test]
    fn test_validate_output_path_empty() {
        assert!(validate_output_path(Path::new("")).is_err());
    }

    #[test]
    fn test_validate_output_path_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(validate_output_path(temp_dir.path()).is_err());
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let nested_path = temp_dir.path().join("nested/dirs/report.json");

        write_report(&create_test_report(), &nested_path).unwrap();

        assert!(nested_path.exists());
    }

    #[test]
    fn test_read_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = read_report(temp_dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, OutputError::WriteFailed(_)));
    }
}
