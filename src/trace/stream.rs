//! Ordered event storage for one rank (optionally one thread).
//!
//! An [`EventStream`] owns its events outright. Transformations (filter, map)
//! produce new independent streams; structural edits bump the stream's
//! version so every derived column computed before the edit reads as absent.

use super::columns::{CallTree, DerivedColumn, DerivedStore, MatchColumns, MetricColumn};
use super::event::{AttrValue, Event, EventKind};
use crate::utils::config::{NameCheck, TIME_METRIC};
use crate::utils::error::TraceError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifies a stream within a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    pub rank: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<u32>,
}

impl StreamId {
    pub fn rank(rank: u32) -> Self {
        Self { rank, thread: None }
    }

    pub fn thread(rank: u32, thread: u32) -> Self {
        Self {
            rank,
            thread: Some(thread),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.thread {
            Some(t) => write!(f, "rank {} thread {}", self.rank, t),
            None => write!(f, "rank {}", self.rank),
        }
    }
}

/// Value type of an attribute as observed in a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    Numeric,
    Text,
}

/// Events of one stream plus their derived columns
#[derive(Debug, Clone)]
pub struct EventStream {
    id: StreamId,
    events: Vec<Event>,
    version: u64,
    derived: DerivedStore,
}

impl EventStream {
    /// Build a stream from events in record order
    ///
    /// Events are stably sorted by timestamp (ties keep record order) and
    /// re-indexed by position.
    ///
    /// # Errors
    /// * `TraceError::MalformedStream` - negative timestamp, or an Enter/Leave
    ///   without a name
    pub fn new(id: StreamId, mut events: Vec<Event>) -> Result<Self, TraceError> {
        for (i, event) in events.iter().enumerate() {
            validate_event(id, i, event)?;
        }

        events.sort_by_key(|e| e.timestamp);
        reindex(&mut events);

        Ok(Self {
            id,
            events,
            version: 0,
            derived: DerivedStore::default(),
        })
    }

    /// A well-formed stream with no events
    pub fn empty(id: StreamId) -> Self {
        Self {
            id,
            events: Vec::new(),
            version: 0,
            derived: DerivedStore::default(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    /// Structural version; advances on every edit
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Insert one event at its time-ordered position (after equal timestamps)
    pub fn push(&mut self, event: Event) -> Result<(), TraceError> {
        validate_event(self.id, self.events.len(), &event)?;
        let pos = self.events.partition_point(|e| e.timestamp <= event.timestamp);
        self.events.insert(pos, event);
        reindex(&mut self.events);
        self.invalidate();
        Ok(())
    }

    /// Remove events in place
    pub fn retain(&mut self, mut keep: impl FnMut(&Event) -> bool) {
        let before = self.events.len();
        self.events.retain(|e| keep(e));
        if self.events.len() != before {
            reindex(&mut self.events);
            self.invalidate();
        }
    }

    /// Transform into an independent copy, dropping events mapped to `None`
    ///
    /// The new stream starts without derived columns.
    pub fn map_events(
        &self,
        mut f: impl FnMut(&Event) -> Option<Event>,
    ) -> Result<EventStream, TraceError> {
        let events = self.events.iter().filter_map(|e| f(e)).collect();
        EventStream::new(self.id, events)
    }

    /// Drop every derived column
    pub fn invalidate(&mut self) {
        self.version += 1;
        self.derived.clear();
    }

    /// Attribute name -> observed value type
    ///
    /// An attribute is numeric when every occurrence is a number.
    pub fn attribute_schema(&self) -> BTreeMap<String, AttrType> {
        let mut schema = BTreeMap::new();
        for event in &self.events {
            for (key, value) in &event.attributes {
                let ty = if value.is_numeric() {
                    AttrType::Numeric
                } else {
                    AttrType::Text
                };
                schema
                    .entry(key.clone())
                    .and_modify(|t| {
                        if ty == AttrType::Text {
                            *t = AttrType::Text;
                        }
                    })
                    .or_insert(ty);
            }
        }
        schema
    }

    /// Metrics derivable on this stream: `time` plus numeric Enter/Leave attributes
    pub fn numeric_metrics(&self) -> Vec<String> {
        let schema = self.attribute_schema();
        let mut on_calls: BTreeSet<&str> = BTreeSet::new();
        for event in self.events.iter().filter(|e| e.kind != EventKind::Instant) {
            on_calls.extend(event.attributes.keys().map(String::as_str));
        }

        let mut metrics = vec![TIME_METRIC.to_string()];
        metrics.extend(
            on_calls
                .into_iter()
                .filter(|k| *k != TIME_METRIC && schema.get(*k) == Some(&AttrType::Numeric))
                .map(str::to_string),
        );
        metrics
    }

    /// Numeric value of a metric on one event (`time` is the timestamp)
    pub fn metric_value(&self, index: usize, metric: &str) -> Option<f64> {
        let event = self.events.get(index)?;
        if metric == TIME_METRIC {
            Some(event.timestamp as f64)
        } else {
            event.attributes.get(metric).and_then(AttrValue::as_f64)
        }
    }

    /// First and last timestamp
    pub fn time_range(&self) -> Option<(i64, i64)> {
        Some((self.events.first()?.timestamp, self.events.last()?.timestamp))
    }

    pub fn duration(&self) -> i64 {
        self.time_range().map(|(a, b)| b - a).unwrap_or(0)
    }

    /// Distinct (process, thread) pairs
    pub fn locations(&self) -> BTreeSet<(u32, u32)> {
        self.events.iter().map(Event::location).collect()
    }

    pub fn process_ids(&self) -> BTreeSet<u32> {
        self.events.iter().map(|e| e.process_id).collect()
    }

    // Derived column access

    pub fn is_fresh(&self, column: &DerivedColumn) -> bool {
        self.derived.is_fresh(column, self.version)
    }

    /// Fresh and built from a pairing made under `mode`
    pub fn is_fresh_for(&self, column: &DerivedColumn, mode: NameCheck) -> bool {
        self.derived.is_fresh_for(column, self.version, mode)
    }

    pub fn matching(&self) -> Option<&MatchColumns> {
        self.derived.matching(self.version)
    }

    pub fn call_tree(&self) -> Option<&CallTree> {
        self.derived.call_tree(self.version)
    }

    pub fn inclusive_column(&self, metric: &str) -> Option<&MetricColumn> {
        self.derived.inclusive(metric, self.version)
    }

    pub fn exclusive_column(&self, metric: &str) -> Option<&MetricColumn> {
        self.derived.exclusive(metric, self.version)
    }

    /// Metrics that currently have a fresh exclusive column
    pub fn exclusive_metrics(&self) -> Vec<String> {
        self.derived.exclusive_metrics(self.version)
    }

    pub fn matching_index(&self, index: usize) -> Option<usize> {
        self.matching()?.matching_index.get(index).copied().flatten()
    }

    pub fn matching_timestamp(&self, index: usize) -> Option<i64> {
        self.matching()?.matching_timestamp.get(index).copied().flatten()
    }

    pub fn parent_index(&self, index: usize) -> Option<usize> {
        self.call_tree()?.parent.get(index).copied().flatten()
    }

    pub fn children_indices(&self, index: usize) -> Option<&[usize]> {
        self.call_tree()?.children.get(index)?.as_deref()
    }

    pub fn depth(&self, index: usize) -> Option<u32> {
        self.call_tree()?.depth.get(index).copied().flatten()
    }

    pub fn inclusive(&self, metric: &str, index: usize) -> Option<f64> {
        self.inclusive_column(metric)?.values.get(index).copied().flatten()
    }

    pub fn exclusive(&self, metric: &str, index: usize) -> Option<f64> {
        self.exclusive_column(metric)?.values.get(index).copied().flatten()
    }

    pub(crate) fn store_matching(&mut self, columns: MatchColumns, mode: NameCheck) {
        self.derived.set_matching(columns, self.version, mode);
    }

    pub(crate) fn store_call_tree(&mut self, tree: CallTree, mode: NameCheck) {
        self.derived.set_call_tree(tree, self.version, mode);
    }

    pub(crate) fn store_inclusive(&mut self, metric: &str, column: MetricColumn, mode: NameCheck) {
        self.derived.set_inclusive(metric, column, self.version, mode);
    }

    pub(crate) fn store_exclusive(&mut self, metric: &str, column: MetricColumn, mode: NameCheck) {
        self.derived.set_exclusive(metric, column, self.version, mode);
    }

    /// Number of stored derived column sets
    pub fn derived_column_count(&self) -> usize {
        self.derived.len()
    }
}

fn validate_event(id: StreamId, index: usize, event: &Event) -> Result<(), TraceError> {
    if event.timestamp < 0 {
        return Err(TraceError::MalformedStream {
            stream: id,
            index,
            reason: format!("negative timestamp {}", event.timestamp),
        });
    }
    if event.kind != EventKind::Instant && event.name.is_none() {
        return Err(TraceError::MalformedStream {
            stream: id,
            index,
            reason: format!("{} event without a name", event.kind),
        });
    }
    Ok(())
}

fn reindex(events: &mut [Event]) {
    for (i, event) in events.iter_mut().enumerate() {
        event.index = i;
    }
}
