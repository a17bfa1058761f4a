//! Configuration and constants for the analysis engine and CLI.

use serde::{Deserialize, Serialize};

/// Current output schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Built-in metric derived from timestamps
pub const TIME_METRIC: &str = "time";

/// Default number of bins for message size histograms
pub const DEFAULT_HISTOGRAM_BINS: usize = 20;

/// Default number of bins for communication-over-time histograms
pub const DEFAULT_TIME_BINS: usize = 50;

/// Default number of hot paths in reports
pub const DEFAULT_TOP_PATHS: usize = 20;
pub const MAX_TOP_PATHS: usize = 1000;

// Attribute names for communication parsing (trace sources use different names)
pub const MESSAGE_SIZE_FIELD_NAMES: &[&str] = &["msg_length", "message_size", "size", "bytes"];
pub const DESTINATION_FIELD_NAMES: &[&str] = &["receiver", "destination", "dest"];
pub const SOURCE_FIELD_NAMES: &[&str] = &["sender", "source", "src"];

// Field names for event loading (readers emit different column spellings)
pub const EVENT_LIST_FIELD_NAMES: &[&str] = &["events", "Events", "trace"];
pub const STREAM_MAP_FIELD_NAMES: &[&str] = &["streams", "ranks"];

/// How Leave names are checked against the Enter they close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameCheck {
    /// Pure LIFO pairing, names are ignored
    #[default]
    Off,
    /// A name mismatch is a malformed stream
    Strict,
    /// Pop until an Enter with the same name is found
    Recover,
}

impl std::str::FromStr for NameCheck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "strict" => Ok(Self::Strict),
            "recover" => Ok(Self::Recover),
            other => Err(format!("unknown name check mode '{}'", other)),
        }
    }
}

/// Options shared by both matcher traversals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchOptions {
    pub name_check: NameCheck,
}

impl MatchOptions {
    pub fn with_name_check(mut self, name_check: NameCheck) -> Self {
        self.name_check = name_check;
        self
    }
}

/// Whether per-stream work runs on the worker pool or inline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Parallel,
    Sequential,
}

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub execution: ExecutionMode,
    /// Dedicated pool size; `None` uses the global pool (one worker per core)
    pub worker_threads: Option<usize>,
    pub match_options: MatchOptions,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn with_name_check(mut self, name_check: NameCheck) -> Self {
        self.match_options.name_check = name_check;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_check_parsing() {
        assert_eq!("strict".parse::<NameCheck>().unwrap(), NameCheck::Strict);
        assert_eq!("RECOVER".parse::<NameCheck>().unwrap(), NameCheck::Recover);
        assert_eq!("off".parse::<NameCheck>().unwrap(), NameCheck::Off);
        assert!("sometimes".parse::<NameCheck>().is_err());
    }

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::new()
            .with_execution(ExecutionMode::Sequential)
            .with_worker_threads(4)
            .with_name_check(NameCheck::Strict);

        assert_eq!(config.execution, ExecutionMode::Sequential);
        assert_eq!(config.worker_threads, Some(4));
        assert_eq!(config.match_options.name_check, NameCheck::Strict);
    }
}
