//! Error types for the entire application.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs and commands.

use crate::trace::StreamId;
use thiserror::Error;

/// Errors raised by matching, metric derivation and dataset aggregation
///
/// Every variant that can be traced back to a single stream names it, so a
/// malformed rank can be isolated without re-running the whole dataset.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    #[error("malformed stream {stream} at event {index}: {reason}")]
    MalformedStream {
        stream: StreamId,
        index: usize,
        reason: String,
    },

    #[error("missing column '{column}'{}", on_stream(.stream))]
    MissingColumn {
        stream: Option<StreamId>,
        column: String,
    },

    #[error("column '{column}' is not numeric{}", on_stream(.stream))]
    InvalidColumn {
        stream: Option<StreamId>,
        column: String,
    },

    #[error("schema mismatch on '{column}' between {first} and {second}: {detail}")]
    SchemaMismatch {
        column: String,
        first: StreamId,
        second: StreamId,
        detail: String,
    },

    #[error("dataset already contains {0}")]
    DuplicateStream(StreamId),

    #[error("dataset contains no streams")]
    EmptyDataset,

    #[error("operation cancelled before all streams completed")]
    Cancelled,
}

fn on_stream(stream: &Option<StreamId>) -> String {
    match stream {
        Some(id) => format!(" on {}", id),
        None => String::new(),
    }
}

impl TraceError {
    /// Shorthand for a missing column on a known stream
    pub fn missing(stream: StreamId, column: impl Into<String>) -> Self {
        Self::MissingColumn {
            stream: Some(stream),
            column: column.into(),
        }
    }

    /// Shorthand for a non-numeric column on a known stream
    pub fn invalid(stream: StreamId, column: impl Into<String>) -> Self {
        Self::InvalidColumn {
            stream: Some(stream),
            column: column.into(),
        }
    }
}

/// Errors that can occur while loading normalized events from JSON
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("JSON deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to read input: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid event format: {0}")]
    InvalidFormat(String),

    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// Errors that can occur during file output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write file: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),
}
