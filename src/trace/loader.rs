//! Loader for normalized event JSON.
//!
//! Accepts the shapes readers commonly dump: a bare array of event objects,
//! an object with an event list, or an object mapping ranks to event lists.
//! Column spellings from dataframe exports ("Timestamp (ns)", "Event Type",
//! "Process", ...) are accepted as aliases.

use super::event::{AttrValue, Event, EventKind};
use super::stream::{EventStream, StreamId};
use crate::dataset::Dataset;
use crate::utils::config::{EngineConfig, EVENT_LIST_FIELD_NAMES, STREAM_MAP_FIELD_NAMES};
use crate::utils::error::LoadError;
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Options for turning loaded events into a dataset
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// One stream per (process, thread) instead of one per process
    pub partition_threads: bool,
    pub engine: EngineConfig,
}

impl LoadOptions {
    pub fn with_partition_threads(mut self, partition: bool) -> Self {
        self.partition_threads = partition;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

/// Raw event row as found in JSON
#[derive(Debug, Clone, Deserialize)]
struct RawEvent {
    #[serde(alias = "Timestamp (ns)", alias = "Timestamp", alias = "ts")]
    timestamp: serde_json::Number,

    #[serde(alias = "Event Type", alias = "event_type", alias = "type")]
    kind: String,

    #[serde(default, alias = "Name")]
    name: Option<String>,

    #[serde(default, alias = "Process", alias = "process", alias = "rank")]
    process_id: Option<u32>,

    #[serde(default, alias = "Thread", alias = "thread")]
    thread_id: Option<u32>,

    #[serde(default, alias = "Attributes")]
    attributes: Option<BTreeMap<String, serde_json::Value>>,
}

impl RawEvent {
    fn into_event(self, default_process: u32) -> Result<Event, String> {
        let kind: EventKind = self.kind.parse()?;
        let timestamp = self
            .timestamp
            .as_i64()
            .or_else(|| self.timestamp.as_f64().map(|t| t.round() as i64))
            .ok_or_else(|| format!("unrepresentable timestamp {}", self.timestamp))?;

        let mut event = Event::new(kind, timestamp, self.name.as_deref());
        event.process_id = self.process_id.unwrap_or(default_process);
        event.thread_id = self.thread_id.unwrap_or(0);

        for (key, value) in self.attributes.unwrap_or_default() {
            match attr_from_json(&value) {
                Some(v) => {
                    event.attributes.insert(key, v);
                }
                None if value.is_null() => {}
                None => debug!("Dropping non-scalar attribute '{}'", key),
            }
        }

        Ok(event)
    }
}

fn attr_from_json(value: &serde_json::Value) -> Option<AttrValue> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(AttrValue::Int)
            .or_else(|| n.as_f64().map(AttrValue::Float)),
        serde_json::Value::String(s) => Some(AttrValue::Text(s.clone())),
        serde_json::Value::Bool(b) => Some(AttrValue::Int(*b as i64)),
        _ => None,
    }
}

/// Parse events from any supported JSON shape
///
/// **Public** - main entry point for parsing
///
/// # Errors
/// * `LoadError::InvalidFormat` - unsupported top-level shape, or every row failed
pub fn parse_events(raw: &serde_json::Value) -> Result<Vec<Event>, LoadError> {
    match raw {
        serde_json::Value::Array(rows) => parse_rows(rows, 0),

        serde_json::Value::Object(obj) => {
            if let Some(rows) = find_field(obj, EVENT_LIST_FIELD_NAMES).and_then(|v| v.as_array()) {
                return parse_rows(rows, 0);
            }

            if let Some(map) = find_field(obj, STREAM_MAP_FIELD_NAMES).and_then(|v| v.as_object()) {
                debug!("Event JSON is a stream map with {} entries", map.len());
                let mut events = Vec::new();
                for (key, rows) in map {
                    let rank: u32 = key.parse().map_err(|_| {
                        LoadError::InvalidFormat(format!("stream key '{}' is not a rank", key))
                    })?;
                    let rows = rows.as_array().ok_or_else(|| {
                        LoadError::InvalidFormat(format!("stream {} is not an event list", key))
                    })?;
                    events.extend(parse_rows(rows, rank)?);
                }
                return Ok(events);
            }

            Err(LoadError::InvalidFormat(format!(
                "object has none of the fields {:?} or {:?}",
                EVENT_LIST_FIELD_NAMES, STREAM_MAP_FIELD_NAMES
            )))
        }

        _ => Err(LoadError::InvalidFormat(
            "Events must be a JSON array or object".to_string(),
        )),
    }
}

fn find_field<'a>(
    obj: &'a serde_json::Map<String, serde_json::Value>,
    names: &[&str],
) -> Option<&'a serde_json::Value> {
    names.iter().find_map(|name| obj.get(*name))
}

/// Parse event rows, skipping malformed ones
///
/// **Private** - internal parsing logic
fn parse_rows(rows: &[serde_json::Value], default_process: u32) -> Result<Vec<Event>, LoadError> {
    let mut events = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let parsed = serde_json::from_value::<RawEvent>(row.clone())
            .map_err(|e| e.to_string())
            .and_then(|raw| raw.into_event(default_process));

        match parsed {
            Ok(event) => events.push(event),
            // Log but don't fail - some rows may be malformed
            Err(e) => warn!("Failed to parse event {}: {}", index, e),
        }
    }

    if events.is_empty() && !rows.is_empty() {
        return Err(LoadError::InvalidFormat(
            "All event rows failed to parse".to_string(),
        ));
    }

    Ok(events)
}

/// Split events into per-stream vectors, preserving record order
pub fn split_streams(
    events: Vec<Event>,
    partition_threads: bool,
) -> BTreeMap<StreamId, Vec<Event>> {
    let mut streams: BTreeMap<StreamId, Vec<Event>> = BTreeMap::new();
    for event in events {
        let id = if partition_threads {
            StreamId::thread(event.process_id, event.thread_id)
        } else {
            StreamId::rank(event.process_id)
        };
        streams.entry(id).or_default().push(event);
    }
    streams
}

/// Build a dataset from parsed JSON
///
/// # Errors
/// * `LoadError::InvalidFormat` - see [`parse_events`]
/// * `LoadError::Trace` - a stream failed validation
pub fn load_dataset(raw: &serde_json::Value, options: &LoadOptions) -> Result<Dataset, LoadError> {
    let events = parse_events(raw)?;
    let total = events.len();

    let streams = split_streams(events, options.partition_threads)
        .into_iter()
        .map(|(id, events)| EventStream::new(id, events))
        .collect::<Result<Vec<_>, _>>()?;

    let dataset = Dataset::from_streams(streams, options.engine.clone())?;
    info!(
        "Loaded {} events into {} streams",
        total,
        dataset.stream_count()
    );
    Ok(dataset)
}

/// Read and load a JSON event file
pub fn load_file(path: impl AsRef<Path>, options: &LoadOptions) -> Result<Dataset, LoadError> {
    let path = path.as_ref();
    debug!("Reading events from {}", path.display());
    let contents = fs::read_to_string(path)?;
    let raw: serde_json::Value = serde_json::from_str(&contents)?;
    load_dataset(&raw, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_array_with_aliases() {
        let raw = json!([
            {"Timestamp (ns)": 0, "Event Type": "Enter", "Name": "main", "Process": 1},
            {"Timestamp (ns)": 12.6, "Event Type": "Leave", "Name": "main", "Process": 1,
             "Attributes": {"flops": 3, "note": null}}
        ]);
        let events = parse_events(&raw).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].process_id, 1);
        assert_eq!(events[1].timestamp, 13);
        assert_eq!(events[1].attributes.get("flops"), Some(&AttrValue::Int(3)));
        assert!(!events[1].attributes.contains_key("note"));
    }

    #[test]
    fn test_parse_stream_map_defaults_process() {
        let raw = json!({
            "streams": {
                "0": [{"timestamp": 0, "kind": "Enter", "name": "a"}],
                "3": [{"timestamp": 5, "kind": "Instant", "name": "MpiSend"}]
            }
        });
        let events = parse_events(&raw).unwrap();
        assert_eq!(events[1].process_id, 3);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let raw = json!({"events": [
            {"timestamp": 0, "kind": "Enter", "name": "a"},
            {"timestamp": 1, "kind": "Sideways", "name": "a"},
            {"kind": "Leave"}
        ]});
        assert_eq!(parse_events(&raw).unwrap().len(), 1);
    }

    #[test]
    fn test_all_rows_failing_is_an_error() {
        let raw = json!([{"kind": "Enter"}]);
        assert!(matches!(
            parse_events(&raw).unwrap_err(),
            LoadError::InvalidFormat(_)
        ));
        assert!(parse_events(&json!(42)).is_err());
    }

    #[test]
    fn test_split_streams_by_thread() {
        let events = vec![
            Event::enter(0, "a").on(0, 0),
            Event::enter(1, "b").on(0, 1),
            Event::enter(2, "c").on(1, 0),
        ];
        assert_eq!(split_streams(events.clone(), false).len(), 2);

        let by_thread = split_streams(events, true);
        assert_eq!(by_thread.len(), 3);
        assert!(by_thread.contains_key(&StreamId::thread(0, 1)));
    }

    #[test]
    fn test_load_dataset() {
        let raw = json!([
            {"timestamp": 0, "kind": "Enter", "name": "main", "process_id": 0},
            {"timestamp": 9, "kind": "Leave", "name": "main", "process_id": 0},
            {"timestamp": 0, "kind": "Enter", "name": "main", "process_id": 1}
        ]);
        let dataset = load_dataset(&raw, &LoadOptions::default()).unwrap();
        assert_eq!(dataset.stream_count(), 2);
        assert_eq!(dataset.stream(StreamId::rank(0)).map(EventStream::len), Some(2));
    }
}
