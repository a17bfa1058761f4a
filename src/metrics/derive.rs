//! Inclusive and exclusive metric derivation.
//!
//! `inclusive[c]` is the Leave value minus the Enter value of a matched call
//! (the timestamp difference for `time`). `exclusive[c]` subtracts the
//! inclusive values of the direct children. Both live on Enter rows only.

use crate::matcher::{match_caller_callee_with, match_events_with};
use crate::trace::{AttrType, CallTree, DerivedColumn, EventStream, MatchColumns, MetricColumn};
use crate::utils::config::{MatchOptions, TIME_METRIC};
use crate::utils::error::TraceError;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Metric selection for derivation and profiles
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Columns {
    /// `time` plus every numeric attribute found on Enter/Leave rows
    #[default]
    All,
    Only(Vec<String>),
}

impl Columns {
    pub fn only<S: AsRef<str>>(names: &[S]) -> Self {
        Self::Only(names.iter().map(|n| n.as_ref().to_string()).collect())
    }

    /// Resolve against a single stream's schema
    ///
    /// # Errors
    /// * `TraceError::MissingColumn` - name not present in the stream
    /// * `TraceError::InvalidColumn` - attribute is not numeric
    pub fn resolve(&self, stream: &EventStream) -> Result<Vec<String>, TraceError> {
        match self {
            Self::All => Ok(stream.numeric_metrics()),
            Self::Only(names) => {
                let schema = stream.attribute_schema();
                names
                    .iter()
                    .map(|name| check_metric(name, schema.get(name), Some(stream)))
                    .collect()
            }
        }
    }

    /// Resolve against the union schema of several streams
    ///
    /// A metric present in any stream is accepted; streams that lack it
    /// derive absent values instead of failing.
    pub fn resolve_across<'a>(
        &self,
        streams: impl IntoIterator<Item = &'a EventStream>,
    ) -> Result<Vec<String>, TraceError> {
        let streams: Vec<&EventStream> = streams.into_iter().collect();
        match self {
            Self::All => {
                let mut metrics = vec![TIME_METRIC.to_string()];
                let mut seen = BTreeSet::new();
                for stream in &streams {
                    for metric in stream.numeric_metrics() {
                        if metric != TIME_METRIC && seen.insert(metric.clone()) {
                            metrics.push(metric);
                        }
                    }
                }
                metrics[1..].sort();
                Ok(metrics)
            }
            Self::Only(names) => {
                let mut union: BTreeMap<String, AttrType> = BTreeMap::new();
                for stream in &streams {
                    for (key, ty) in stream.attribute_schema() {
                        let entry = union.entry(key).or_insert(ty);
                        if ty == AttrType::Text {
                            *entry = AttrType::Text;
                        }
                    }
                }
                names
                    .iter()
                    .map(|name| check_metric(name, union.get(name), None))
                    .collect()
            }
        }
    }
}

fn check_metric(
    name: &str,
    ty: Option<&AttrType>,
    stream: Option<&EventStream>,
) -> Result<String, TraceError> {
    if name == TIME_METRIC {
        return Ok(name.to_string());
    }
    let id = stream.map(EventStream::id);
    match ty {
        Some(AttrType::Numeric) => Ok(name.to_string()),
        Some(AttrType::Text) => Err(TraceError::InvalidColumn {
            stream: id,
            column: name.to_string(),
        }),
        None => Err(TraceError::MissingColumn {
            stream: id,
            column: name.to_string(),
        }),
    }
}

/// Make `column` fresh, computing missing prerequisites first
///
/// **Public** - single entry point of the derived-column dependency graph
pub fn ensure(stream: &mut EventStream, column: &DerivedColumn) -> Result<(), TraceError> {
    ensure_with(stream, column, &MatchOptions::default())
}

/// [`ensure`] with explicit matcher options
pub fn ensure_with(
    stream: &mut EventStream,
    column: &DerivedColumn,
    options: &MatchOptions,
) -> Result<(), TraceError> {
    if stream.is_fresh_for(column, options.name_check) {
        return Ok(());
    }

    for prerequisite in column.prerequisites() {
        ensure_with(stream, &prerequisite, options)?;
    }

    match column {
        DerivedColumn::Matching => match_events_with(stream, options),
        DerivedColumn::CallTree => match_caller_callee_with(stream, options),
        DerivedColumn::Inclusive(metric) => {
            let matching = stream
                .matching()
                .ok_or_else(|| TraceError::missing(stream.id(), DerivedColumn::Matching.to_string()))?;
            let values = inclusive_column(stream, matching, metric);
            stream.store_inclusive(metric, values, options.name_check);
            Ok(())
        }
        DerivedColumn::Exclusive(metric) => {
            let inclusive = stream
                .inclusive_column(metric)
                .ok_or_else(|| TraceError::missing(stream.id(), format!("{}.inc", metric)))?;
            let tree = stream
                .call_tree()
                .ok_or_else(|| TraceError::missing(stream.id(), DerivedColumn::CallTree.to_string()))?;
            let values = exclusive_column(inclusive, tree);
            stream.store_exclusive(metric, values, options.name_check);
            Ok(())
        }
    }
}

fn inclusive_column(stream: &EventStream, matching: &MatchColumns, metric: &str) -> MetricColumn {
    let mut column = MetricColumn::with_len(stream.len());
    for event in stream.events().iter().filter(|e| e.is_enter()) {
        let Some(leave) = matching.matching_index[event.index] else {
            continue;
        };
        if let (Some(start), Some(end)) = (
            stream.metric_value(event.index, metric),
            stream.metric_value(leave, metric),
        ) {
            column.values[event.index] = Some(end - start);
        }
    }
    column
}

fn exclusive_column(inclusive: &MetricColumn, tree: &CallTree) -> MetricColumn {
    let mut column = MetricColumn::with_len(inclusive.values.len());
    for (index, value) in inclusive.values.iter().enumerate() {
        let Some(total) = value else {
            continue;
        };
        let mut children_total = 0.0;
        for &child in tree.children[index].as_deref().unwrap_or_default() {
            match inclusive.values[child] {
                Some(v) => children_total += v,
                None => column.partial[index] = true,
            }
        }
        column.values[index] = Some(total - children_total);
    }
    column
}

/// Compute inclusive metrics, matching the stream first if needed
///
/// **Public** - main entry point for inclusive derivation
///
/// # Arguments
/// * `stream` - Stream to derive on; results are stored on it
/// * `columns` - Metrics to derive
///
/// # Errors
/// * `TraceError::MissingColumn` - unknown metric
/// * `TraceError::InvalidColumn` - non-numeric metric
pub fn calc_inc_metrics(stream: &mut EventStream, columns: &Columns) -> Result<(), TraceError> {
    let metrics = columns.resolve(stream)?;
    derive_inclusive(stream, &metrics, &MatchOptions::default())
}

/// Compute exclusive metrics, deriving inclusive metrics and the call tree if needed
///
/// **Public** - main entry point for exclusive derivation
///
/// # Errors
/// Same as [`calc_inc_metrics`]
pub fn calc_exc_metrics(stream: &mut EventStream, columns: &Columns) -> Result<(), TraceError> {
    let metrics = columns.resolve(stream)?;
    derive_exclusive(stream, &metrics, &MatchOptions::default())
}

/// Inclusive derivation for already-resolved metric names
pub(crate) fn derive_inclusive(
    stream: &mut EventStream,
    metrics: &[String],
    options: &MatchOptions,
) -> Result<(), TraceError> {
    for metric in metrics {
        ensure_with(stream, &DerivedColumn::Inclusive(metric.clone()), options)?;
    }
    debug!("{}: inclusive metrics {:?} ready", stream.id(), metrics);
    Ok(())
}

/// Exclusive derivation for already-resolved metric names
pub(crate) fn derive_exclusive(
    stream: &mut EventStream,
    metrics: &[String],
    options: &MatchOptions,
) -> Result<(), TraceError> {
    for metric in metrics {
        ensure_with(stream, &DerivedColumn::Exclusive(metric.clone()), options)?;
    }
    debug!("{}: exclusive metrics {:?} ready", stream.id(), metrics);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{Event, StreamId};

    fn scenario_a() -> EventStream {
        EventStream::new(
            StreamId::rank(0),
            vec![
                Event::enter(0, "A"),
                Event::enter(10, "B"),
                Event::leave(30, "B"),
                Event::leave(50, "A"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_scenario_a_metrics() {
        let mut s = scenario_a();
        calc_exc_metrics(&mut s, &Columns::All).unwrap();

        assert_eq!(s.inclusive("time", 0), Some(50.0));
        assert_eq!(s.inclusive("time", 1), Some(20.0));
        assert_eq!(s.exclusive("time", 0), Some(30.0));
        assert_eq!(s.exclusive("time", 1), Some(20.0));
        assert_eq!(s.inclusive("time", 2), None);
    }

    #[test]
    fn test_ensure_resolves_prerequisites() {
        let mut s = scenario_a();
        ensure(&mut s, &DerivedColumn::Exclusive("time".into())).unwrap();

        assert!(s.is_fresh(&DerivedColumn::Matching));
        assert!(s.is_fresh(&DerivedColumn::CallTree));
        assert!(s.is_fresh(&DerivedColumn::Inclusive("time".into())));
    }

    #[test]
    fn test_unmatched_child_marks_parent_partial() {
        let mut s = EventStream::new(
            StreamId::rank(0),
            vec![
                Event::enter(0, "main"),
                Event::enter(5, "lost"),
                Event::leave(20, "main"),
            ],
        )
        .unwrap();
        // LIFO pairing closes "lost" with main's Leave, so name recovery is needed
        let options = MatchOptions::default()
            .with_name_check(crate::utils::config::NameCheck::Recover);
        ensure_with(&mut s, &DerivedColumn::Exclusive("time".into()), &options).unwrap();

        assert_eq!(s.inclusive("time", 1), None);
        assert_eq!(s.exclusive("time", 0), Some(20.0));
        assert!(s.exclusive_column("time").unwrap().partial[0]);
        assert_eq!(s.exclusive("time", 1), None);
    }

    #[test]
    fn test_columns_from_another_mode_are_recomputed() {
        use crate::matcher::match_events;
        use crate::utils::config::NameCheck;

        let mut s = EventStream::new(
            StreamId::rank(0),
            vec![
                Event::enter(0, "main"),
                Event::enter(5, "lost"),
                Event::leave(20, "main"),
            ],
        )
        .unwrap();
        match_events(&mut s).unwrap();
        calc_inc_metrics(&mut s, &Columns::All).unwrap();
        assert_eq!(s.matching_index(0), None);
        assert_eq!(s.inclusive("time", 1), Some(15.0));

        let strict = MatchOptions::default().with_name_check(NameCheck::Strict);
        let err = ensure_with(&mut s, &DerivedColumn::Matching, &strict).unwrap_err();
        assert!(matches!(err, TraceError::MalformedStream { index: 2, .. }));

        let recover = MatchOptions::default().with_name_check(NameCheck::Recover);
        ensure_with(&mut s, &DerivedColumn::Matching, &recover).unwrap();
        assert_eq!(s.matching_index(0), Some(2));
        assert!(s.is_fresh_for(&DerivedColumn::Matching, NameCheck::Recover));
        assert!(!s.is_fresh_for(&DerivedColumn::Matching, NameCheck::Off));

        ensure_with(&mut s, &DerivedColumn::Inclusive("time".into()), &recover).unwrap();
        assert_eq!(s.inclusive("time", 0), Some(20.0));
        assert_eq!(s.inclusive("time", 1), None);
    }

    #[test]
    fn test_attribute_metric() {
        let mut s = EventStream::new(
            StreamId::rank(0),
            vec![
                Event::enter(0, "A").with_attr("flops", 100),
                Event::enter(1, "B").with_attr("flops", 120),
                Event::leave(2, "B").with_attr("flops", 150),
                Event::leave(3, "A").with_attr("flops", 200),
            ],
        )
        .unwrap();
        calc_exc_metrics(&mut s, &Columns::only(&["flops"])).unwrap();

        assert_eq!(s.inclusive("flops", 0), Some(100.0));
        assert_eq!(s.exclusive("flops", 0), Some(70.0));
        assert!(s.inclusive_column("time").is_none());
    }

    #[test]
    fn test_column_errors() {
        let mut s = EventStream::new(
            StreamId::rank(2),
            vec![Event::enter(0, "A").with_attr("label", "x"), Event::leave(1, "A")],
        )
        .unwrap();

        let err = calc_inc_metrics(&mut s, &Columns::only(&["label"])).unwrap_err();
        assert_eq!(err, TraceError::invalid(StreamId::rank(2), "label"));

        let err = calc_inc_metrics(&mut s, &Columns::only(&["bytes"])).unwrap_err();
        assert_eq!(err, TraceError::missing(StreamId::rank(2), "bytes"));
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let mut s = scenario_a();
        calc_exc_metrics(&mut s, &Columns::All).unwrap();
        let first = s.exclusive_column("time").cloned();
        let count = s.derived_column_count();

        calc_exc_metrics(&mut s, &Columns::All).unwrap();
        calc_inc_metrics(&mut s, &Columns::All).unwrap();
        assert_eq!(s.exclusive_column("time").cloned(), first);
        assert_eq!(s.derived_column_count(), count);
    }

    #[test]
    fn test_empty_stream_is_noop() {
        let mut s = EventStream::empty(StreamId::rank(0));
        calc_exc_metrics(&mut s, &Columns::All).unwrap();
        assert_eq!(s.exclusive_metrics(), vec!["time".to_string()]);
    }

    #[test]
    fn test_resolve_across_union() {
        let a = EventStream::new(
            StreamId::rank(0),
            vec![Event::enter(0, "A").with_attr("flops", 1), Event::leave(1, "A")],
        )
        .unwrap();
        let b = EventStream::new(
            StreamId::rank(1),
            vec![Event::enter(0, "A").with_attr("bytes", 1), Event::leave(1, "A")],
        )
        .unwrap();

        let all = Columns::All.resolve_across([&a, &b]).unwrap();
        assert_eq!(all, vec!["time", "bytes", "flops"]);

        let err = Columns::only(&["nothing"]).resolve_across([&a, &b]).unwrap_err();
        assert!(matches!(err, TraceError::MissingColumn { stream: None, .. }));
    }
}
