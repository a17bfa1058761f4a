//! A collection of independent streams and the dataset-level operations on it.

use super::dispatch::{CancellationToken, Dispatcher};
use crate::comm::histogram::{size_counts, size_range, time_counts};
use crate::comm::{CommMatrix, CommOutput, CommPartial, Direction, Histogram, ProcessComm};
use crate::matcher::{match_caller_callee_with, match_events_with};
use crate::metrics::derive::{derive_exclusive, derive_inclusive};
use crate::metrics::{
    build_collapsed_stacks, ensure_with, load_imbalance, merge_stacks, timeline_partial,
    CollapsedStack, Columns, FlatProfile, GroupBy, ImbalanceRow, ProfilePartial, TimeProfile,
    TimelinePartial,
};
use crate::trace::{AttrType, DerivedColumn, EventStream, Predicate, StreamId};
use crate::utils::config::{EngineConfig, MatchOptions, TIME_METRIC};
use crate::utils::error::TraceError;
use log::{debug, info};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Streams keyed by id, plus the dispatcher that runs work over them
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    streams: BTreeMap<StreamId, EventStream>,
    dispatcher: Dispatcher,
    match_options: MatchOptions,
}

impl Dataset {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            streams: BTreeMap::new(),
            dispatcher: Dispatcher::new(&config),
            match_options: config.match_options,
        }
    }

    /// Build a dataset from streams with unique ids
    ///
    /// # Errors
    /// * `TraceError::DuplicateStream` - two streams share an id
    pub fn from_streams(
        streams: impl IntoIterator<Item = EventStream>,
        config: EngineConfig,
    ) -> Result<Self, TraceError> {
        let mut dataset = Self::new(config);
        for stream in streams {
            dataset.insert(stream)?;
        }
        Ok(dataset)
    }

    pub fn insert(&mut self, stream: EventStream) -> Result<(), TraceError> {
        match self.streams.entry(stream.id()) {
            Entry::Occupied(_) => Err(TraceError::DuplicateStream(stream.id())),
            Entry::Vacant(slot) => {
                slot.insert(stream);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, id: StreamId) -> Option<EventStream> {
        self.streams.remove(&id)
    }

    pub fn stream(&self, id: StreamId) -> Option<&EventStream> {
        self.streams.get(&id)
    }

    pub fn stream_mut(&mut self, id: StreamId) -> Option<&mut EventStream> {
        self.streams.get_mut(&id)
    }

    /// Streams in id order
    pub fn streams(&self) -> impl Iterator<Item = &EventStream> + '_ {
        self.streams.values()
    }

    pub fn stream_ids(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.streams.keys().copied()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn event_count(&self) -> usize {
        self.streams.values().map(EventStream::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Token that cancels in-flight and future calls on this dataset
    pub fn cancellation_token(&self) -> CancellationToken {
        self.dispatcher.token()
    }

    pub fn match_options(&self) -> MatchOptions {
        self.match_options
    }

    // Orchestration

    /// Apply `op` to every stream independently
    pub fn map_streams<R, F>(&self, op: F) -> Result<BTreeMap<StreamId, R>, TraceError>
    where
        R: Send,
        F: Fn(&EventStream) -> R + Sync + Send,
    {
        self.dispatcher.try_map(&self.streams, |s| Ok(op(s)))
    }

    /// Fallible [`Dataset::map_streams`]; fails with the first error in stream order
    pub fn try_map_streams<R, F>(&self, op: F) -> Result<BTreeMap<StreamId, R>, TraceError>
    where
        R: Send,
        F: Fn(&EventStream) -> Result<R, TraceError> + Sync + Send,
    {
        self.dispatcher.try_map(&self.streams, op)
    }

    /// Run `op` in place on each stream's own storage
    pub fn map_streams_mut<R, F>(&mut self, op: F) -> Result<BTreeMap<StreamId, R>, TraceError>
    where
        R: Send,
        F: Fn(&mut EventStream) -> Result<R, TraceError> + Sync + Send,
    {
        self.dispatcher.try_map_mut(&mut self.streams, op)
    }

    /// New dataset of filtered, independent streams without derived columns
    ///
    /// Time windows pair calls under the dataset's name-check mode.
    pub fn filter(&self, predicate: &Predicate) -> Result<Dataset, TraceError> {
        let options = self.match_options;
        let streams = self.try_map_streams(|s| s.filter_with(predicate, &options))?;
        debug!("Filtered dataset keeps {} streams", streams.len());
        Ok(Self {
            streams,
            dispatcher: self.dispatcher.clone(),
            match_options: self.match_options,
        })
    }

    /// Union attribute schema across streams
    ///
    /// # Errors
    /// * `TraceError::SchemaMismatch` - an attribute is numeric in one stream and text in another
    pub fn check_schema(&self) -> Result<BTreeMap<String, AttrType>, TraceError> {
        let schemas = self.map_streams(EventStream::attribute_schema)?;
        let mut union: BTreeMap<String, (AttrType, StreamId)> = BTreeMap::new();

        for (id, schema) in schemas {
            for (column, ty) in schema {
                match union.get(&column) {
                    Some(&(seen, first)) if seen != ty => {
                        return Err(TraceError::SchemaMismatch {
                            column,
                            first,
                            second: id,
                            detail: format!("{:?} vs {:?}", seen, ty).to_lowercase(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        union.insert(column, (ty, id));
                    }
                }
            }
        }
        Ok(union.into_iter().map(|(k, (ty, _))| (k, ty)).collect())
    }

    fn require_streams(&self) -> Result<(), TraceError> {
        if self.streams.is_empty() {
            return Err(TraceError::EmptyDataset);
        }
        Ok(())
    }

    // Derivation

    /// Pair Enter/Leave events on every stream
    pub fn match_events(&mut self) -> Result<(), TraceError> {
        let options = self.match_options;
        self.map_streams_mut(|s| match_events_with(s, &options))?;
        Ok(())
    }

    /// Build calling-context trees on every stream
    pub fn match_caller_callee(&mut self) -> Result<(), TraceError> {
        let options = self.match_options;
        self.map_streams_mut(|s| match_caller_callee_with(s, &options))?;
        Ok(())
    }

    /// Inclusive metrics on every stream, resolved against the union schema
    pub fn calc_inc_metrics(&mut self, columns: &Columns) -> Result<(), TraceError> {
        let metrics = self.resolve(columns)?;
        let options = self.match_options;
        self.map_streams_mut(|s| derive_inclusive(s, &metrics, &options))?;
        info!("Derived inclusive {:?} on {} streams", metrics, self.streams.len());
        Ok(())
    }

    /// Exclusive metrics on every stream, resolved against the union schema
    pub fn calc_exc_metrics(&mut self, columns: &Columns) -> Result<(), TraceError> {
        let metrics = self.resolve(columns)?;
        let options = self.match_options;
        self.map_streams_mut(|s| derive_exclusive(s, &metrics, &options))?;
        info!("Derived exclusive {:?} on {} streams", metrics, self.streams.len());
        Ok(())
    }

    fn resolve(&self, columns: &Columns) -> Result<Vec<String>, TraceError> {
        self.check_schema()?;
        columns.resolve_across(self.streams.values())
    }

    // Aggregation

    /// Metrics a profile covers: the requested ones, or the exclusive metrics
    /// every stream agrees on
    fn profile_metrics(&self, columns: &Columns) -> Result<Vec<String>, TraceError> {
        if let Columns::Only(_) = columns {
            return self.resolve(columns);
        }

        let sets = self.map_streams(EventStream::exclusive_metrics)?;
        let mut iter = sets.into_iter();
        let Some((first_id, first)) = iter.next() else {
            return Err(TraceError::EmptyDataset);
        };
        if first.is_empty() {
            return Err(TraceError::missing(first_id, "time.exc"));
        }

        for (id, metrics) in iter {
            if metrics != first {
                let column = first
                    .iter()
                    .find(|m| !metrics.contains(*m))
                    .or_else(|| metrics.iter().find(|m| !first.contains(*m)))
                    .cloned()
                    .unwrap_or_default();
                return Err(TraceError::SchemaMismatch {
                    column,
                    first: first_id,
                    second: id,
                    detail: "exclusive metrics differ".to_string(),
                });
            }
        }

        // Rows are ordered by the first metric, so keep `time` in front
        let mut metrics = first;
        if let Some(pos) = metrics.iter().position(|m| m == TIME_METRIC) {
            let time = metrics.remove(pos);
            metrics.insert(0, time);
        }
        Ok(metrics)
    }

    fn merged_profile_partial(
        &self,
        metrics: &[String],
        groupby: &GroupBy,
    ) -> Result<ProfilePartial, TraceError> {
        let partials = self.try_map_streams(|s| ProfilePartial::from_stream(s, metrics, groupby))?;
        let mut merged = ProfilePartial::default();
        for partial in partials.into_values() {
            merged.merge(partial);
        }
        Ok(merged)
    }

    /// Flat profile over the dataset
    ///
    /// **Public** - main entry point for profile aggregation
    ///
    /// # Arguments
    /// * `columns` - Metrics to report (exclusive metrics must be derived)
    /// * `groupby` - Row key
    /// * `per_process` - One row per (key, process) instead of the mean over processes
    ///
    /// # Errors
    /// * `TraceError::EmptyDataset` - no streams
    /// * `TraceError::MissingColumn` - exclusive metrics not derived
    /// * `TraceError::SchemaMismatch` - streams derived different metric sets
    pub fn flat_profile(
        &self,
        columns: &Columns,
        groupby: &GroupBy,
        per_process: bool,
    ) -> Result<FlatProfile, TraceError> {
        self.require_streams()?;
        let metrics = self.profile_metrics(columns)?;
        let merged = self.merged_profile_partial(&metrics, groupby)?;
        let profile = FlatProfile::from_partial(merged, metrics, groupby.clone(), per_process);
        debug!("Flat profile has {} rows", profile.len());
        Ok(profile)
    }

    /// Per-function spread of `exclusive[metric]` across processes
    pub fn load_imbalance(&self, metric: &str, top_n: usize) -> Result<Vec<ImbalanceRow>, TraceError> {
        self.require_streams()?;
        let merged = self.merged_profile_partial(&[metric.to_string()], &GroupBy::Name)?;
        Ok(load_imbalance(&merged, metric, top_n))
    }

    /// Collapsed call-path stacks summed across streams
    pub fn collapsed_stacks(&self, metric: &str) -> Result<Vec<CollapsedStack>, TraceError> {
        self.require_streams()?;
        let stacks = self.try_map_streams(|s| build_collapsed_stacks(s, metric))?;
        Ok(merge_stacks(stacks.into_values()))
    }

    fn comm_partial(&self) -> Result<CommPartial, TraceError> {
        self.require_streams()?;
        let partials = self.map_streams(CommPartial::from_stream)?;
        let mut merged = CommPartial::default();
        for partial in partials.into_values() {
            merged.merge(partial);
        }
        Ok(merged)
    }

    /// `[sender][receiver]` matrix over every observed process
    pub fn comm_matrix(&self, output: CommOutput) -> Result<CommMatrix, TraceError> {
        let matrix = self.comm_partial()?.to_matrix(output);
        debug!("Comm matrix over {} processes, total {}", matrix.len(), matrix.total());
        Ok(matrix)
    }

    /// Bytes and messages sent/received per process
    pub fn comm_by_process(&self) -> Result<Vec<ProcessComm>, TraceError> {
        Ok(self.comm_partial()?.by_process())
    }

    fn comm_direction(&self) -> Result<Direction, TraceError> {
        let has_sends = self.map_streams(|s| {
            crate::comm::messages(s).any(|m| m.direction == Direction::Send)
        })?;
        Ok(if has_sends.values().any(|&b| b) {
            Direction::Send
        } else {
            Direction::Receive
        })
    }

    /// Equal-width histogram of message sizes
    ///
    /// Two passes: the global size range, then per-stream counts against
    /// shared edges.
    pub fn message_histogram(&self, bins: usize) -> Result<Histogram, TraceError> {
        self.require_streams()?;
        let direction = self.comm_direction()?;

        let ranges = self.map_streams(|s| size_range(s, direction))?;
        let range = ranges
            .into_values()
            .flatten()
            .reduce(|(lo, hi), (l, h)| (lo.min(l), hi.max(h)));
        let template = match range {
            Some((lo, hi)) => Histogram::with_range(lo as f64, hi as f64, bins),
            None => Histogram::empty(bins),
        };

        let counts = self.map_streams(|s| size_counts(s, direction, &template))?;
        let mut hist = template.cleared();
        for partial in counts.values() {
            hist.merge(partial);
        }
        Ok(hist)
    }

    /// Bytes or messages sent per equal-width time bin
    pub fn comm_over_time(&self, output: CommOutput, bins: usize) -> Result<Histogram, TraceError> {
        self.require_streams()?;
        let direction = self.comm_direction()?;

        let template = match self.time_span() {
            Some((start, end)) => Histogram::with_range(start as f64, end as f64, bins),
            None => Histogram::empty(bins),
        };

        let counts = self.map_streams(|s| time_counts(s, direction, output, &template))?;
        let mut hist = template.cleared();
        for partial in counts.values() {
            hist.merge(partial);
        }
        Ok(hist)
    }

    /// Exclusive time per function in `bins` equal-width bins over the
    /// dataset's time range, with idle time filling each bin's capacity
    ///
    /// Pairing and call trees are derived first when not already fresh.
    /// `normalized` divides every value by the bin capacity.
    pub fn time_profile(&mut self, bins: usize, normalized: bool) -> Result<TimeProfile, TraceError> {
        self.require_streams()?;
        let options = self.match_options;
        self.map_streams_mut(|s| {
            ensure_with(s, &DerivedColumn::Matching, &options)?;
            ensure_with(s, &DerivedColumn::CallTree, &options)
        })?;

        let template = match self.time_span() {
            Some((start, end)) => Histogram::with_range(start as f64, end as f64, bins),
            None => Histogram::empty(bins),
        };
        let partials = self.try_map_streams(|s| timeline_partial(s, &template.edges))?;
        let mut merged = TimelinePartial::default();
        for partial in partials.into_values() {
            merged.merge(partial);
        }

        let profile = TimeProfile::from_partial(merged, template.edges, normalized);
        debug!(
            "Time profile: {} functions over {} bins",
            profile.functions.len(),
            profile.bins()
        );
        Ok(profile)
    }

    /// Earliest and latest timestamp across all streams
    fn time_span(&self) -> Option<(i64, i64)> {
        self.streams
            .values()
            .filter_map(EventStream::time_range)
            .reduce(|(lo, hi), (l, h)| (lo.min(l), hi.max(h)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Event;

    fn rank(r: u32, events: Vec<Event>) -> EventStream {
        let events = events.into_iter().map(|e| e.on(r, 0)).collect();
        EventStream::new(StreamId::rank(r), events).unwrap()
    }

    #[test]
    fn test_duplicate_stream_rejected() {
        let err = Dataset::from_streams(
            vec![rank(0, vec![]), rank(0, vec![])],
            EngineConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, TraceError::DuplicateStream(StreamId::rank(0)));
    }

    #[test]
    fn test_schema_mismatch() {
        let dataset = Dataset::from_streams(
            vec![
                rank(0, vec![Event::enter(0, "f").with_attr("tag", 1), Event::leave(1, "f")]),
                rank(1, vec![Event::enter(0, "f").with_attr("tag", "x"), Event::leave(1, "f")]),
            ],
            EngineConfig::default(),
        )
        .unwrap();

        let err = dataset.check_schema().unwrap_err();
        assert!(matches!(
            err,
            TraceError::SchemaMismatch { ref column, first, second, .. }
                if column == "tag" && first == StreamId::rank(0) && second == StreamId::rank(1)
        ));

        let mut dataset = dataset;
        assert!(matches!(
            dataset.calc_inc_metrics(&Columns::All),
            Err(TraceError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_dataset_aggregations() {
        let dataset = Dataset::new(EngineConfig::default());
        assert_eq!(
            dataset.comm_matrix(CommOutput::Size).unwrap_err(),
            TraceError::EmptyDataset
        );
        assert!(dataset.map_streams(EventStream::len).unwrap().is_empty());
    }
}
