//! Flat profiles and load imbalance.
//!
//! Each stream produces a [`ProfilePartial`] of per-(key, process) sums.
//! Partials merge additively; the flat profile is built from the merged
//! partial exactly once, so streams that share a process (thread-partitioned
//! datasets) are summed before any averaging happens.

use super::derive::Columns;
use crate::trace::{EventStream, MetricColumn};
use crate::utils::error::TraceError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Key flat profile rows are grouped by
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Name,
    Attribute(String),
}

impl std::str::FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err("empty group key".to_string()),
            "name" | "Name" => Ok(Self::Name),
            other => Ok(Self::Attribute(other.to_string())),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => f.write_str("name"),
            Self::Attribute(key) => f.write_str(key),
        }
    }
}

/// Summed values of one (key, process) cell
#[derive(Debug, Clone, Default, PartialEq)]
struct Cell {
    calls: u64,
    inclusive: BTreeMap<String, f64>,
    exclusive: BTreeMap<String, f64>,
}

impl Cell {
    fn merge(&mut self, other: Cell) {
        self.calls += other.calls;
        for (metric, v) in other.inclusive {
            *self.inclusive.entry(metric).or_insert(0.0) += v;
        }
        for (metric, v) in other.exclusive {
            *self.exclusive.entry(metric).or_insert(0.0) += v;
        }
    }
}

/// Per-stream sums awaiting reduction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilePartial {
    cells: BTreeMap<(String, u32), Cell>,
}

impl ProfilePartial {
    /// Sum exclusive and inclusive values of `metrics` over Enter rows
    ///
    /// # Errors
    /// * `TraceError::MissingColumn` - exclusive (or inclusive) metric not derived yet
    pub fn from_stream(
        stream: &EventStream,
        metrics: &[String],
        groupby: &GroupBy,
    ) -> Result<Self, TraceError> {
        let mut columns: Vec<(&str, &MetricColumn, &MetricColumn)> = Vec::new();
        for metric in metrics {
            let exclusive = stream
                .exclusive_column(metric)
                .ok_or_else(|| TraceError::missing(stream.id(), format!("{}.exc", metric)))?;
            let inclusive = stream
                .inclusive_column(metric)
                .ok_or_else(|| TraceError::missing(stream.id(), format!("{}.inc", metric)))?;
            columns.push((metric.as_str(), inclusive, exclusive));
        }

        let mut partial = Self::default();
        for event in stream.events().iter().filter(|e| e.is_enter()) {
            let key = match groupby {
                GroupBy::Name => event.name.clone(),
                GroupBy::Attribute(attr) => event.attributes.get(attr).map(|v| v.to_string()),
            };
            let Some(key) = key else {
                continue;
            };

            let cell = partial.cells.entry((key, event.process_id)).or_default();
            cell.calls += 1;
            for (metric, inclusive, exclusive) in &columns {
                if let Some(v) = inclusive.values[event.index] {
                    *cell.inclusive.entry(metric.to_string()).or_insert(0.0) += v;
                }
                if let Some(v) = exclusive.values[event.index] {
                    *cell.exclusive.entry(metric.to_string()).or_insert(0.0) += v;
                }
            }
        }
        Ok(partial)
    }

    /// Add another partial into this one
    pub fn merge(&mut self, other: ProfilePartial) {
        for (key, cell) in other.cells {
            self.cells.entry(key).or_default().merge(cell);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Per-process exclusive sums of `metric` for every key
    fn exclusive_by_key(&self, metric: &str) -> BTreeMap<&str, Vec<(u32, f64)>> {
        let mut by_key: BTreeMap<&str, Vec<(u32, f64)>> = BTreeMap::new();
        for ((key, process), cell) in &self.cells {
            let value = cell.exclusive.get(metric).copied().unwrap_or(0.0);
            by_key.entry(key.as_str()).or_default().push((*process, value));
        }
        by_key
    }
}

/// One row of a flat profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatProfileRow {
    pub key: String,

    /// Set only for per-process profiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<u32>,

    /// Invocation count (mean across processes unless per-process)
    pub calls: f64,

    /// `<metric>.inc` / `<metric>.exc` -> value
    pub values: BTreeMap<String, f64>,
}

impl FlatProfileRow {
    pub fn inclusive(&self, metric: &str) -> Option<f64> {
        self.values.get(&format!("{}.inc", metric)).copied()
    }

    pub fn exclusive(&self, metric: &str) -> Option<f64> {
        self.values.get(&format!("{}.exc", metric)).copied()
    }
}

/// Aggregated metrics per group key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatProfile {
    pub groupby: GroupBy,
    pub per_process: bool,
    pub metrics: Vec<String>,
    pub rows: Vec<FlatProfileRow>,
}

impl FlatProfile {
    /// Reduce merged partials into the final table
    ///
    /// With `per_process` every (key, process) cell is a row. Otherwise each
    /// value is the mean, over the processes in which the key occurs, of that
    /// process's sum. Rows are ordered by the first metric's exclusive value,
    /// heaviest first.
    pub fn from_partial(
        partial: ProfilePartial,
        metrics: Vec<String>,
        groupby: GroupBy,
        per_process: bool,
    ) -> Self {
        let mut rows = if per_process {
            partial
                .cells
                .into_iter()
                .map(|((key, process), cell)| FlatProfileRow {
                    key,
                    process: Some(process),
                    calls: cell.calls as f64,
                    values: cell_values(&metrics, &cell),
                })
                .collect::<Vec<_>>()
        } else {
            mean_rows(partial, &metrics)
        };

        let order_key = metrics.first().map(|m| format!("{}.exc", m));
        rows.sort_by(|a, b| {
            let weight = |row: &FlatProfileRow| {
                order_key
                    .as_ref()
                    .and_then(|k| row.values.get(k))
                    .copied()
                    .unwrap_or(0.0)
            };
            weight(b)
                .partial_cmp(&weight(a))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
                .then_with(|| a.process.cmp(&b.process))
        });

        Self {
            groupby,
            per_process,
            metrics,
            rows,
        }
    }

    pub fn row(&self, key: &str) -> Option<&FlatProfileRow> {
        self.rows.iter().find(|r| r.key == key)
    }

    pub fn rows_for(&self, key: &str) -> impl Iterator<Item = &FlatProfileRow> + '_ {
        let key = key.to_string();
        self.rows.iter().filter(move |r| r.key == key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn cell_values(metrics: &[String], cell: &Cell) -> BTreeMap<String, f64> {
    let mut values = BTreeMap::new();
    for metric in metrics {
        values.insert(
            format!("{}.inc", metric),
            cell.inclusive.get(metric).copied().unwrap_or(0.0),
        );
        values.insert(
            format!("{}.exc", metric),
            cell.exclusive.get(metric).copied().unwrap_or(0.0),
        );
    }
    values
}

fn mean_rows(partial: ProfilePartial, metrics: &[String]) -> Vec<FlatProfileRow> {
    let mut grouped: BTreeMap<String, Vec<Cell>> = BTreeMap::new();
    for ((key, _), cell) in partial.cells {
        grouped.entry(key).or_default().push(cell);
    }

    grouped
        .into_iter()
        .map(|(key, cells)| {
            let n = cells.len() as f64;
            let mut values: BTreeMap<String, f64> = BTreeMap::new();
            let mut calls = 0.0;
            for cell in &cells {
                calls += cell.calls as f64;
                for (name, v) in cell_values(metrics, cell) {
                    *values.entry(name).or_insert(0.0) += v;
                }
            }
            values.values_mut().for_each(|v| *v /= n);
            FlatProfileRow {
                key,
                process: None,
                calls: calls / n,
                values,
            }
        })
        .collect()
}

/// Flat profile of a single stream
///
/// **Public** - per-stream counterpart of `Dataset::flat_profile`
///
/// # Errors
/// * `TraceError::MissingColumn` - exclusive metrics not derived
/// * `TraceError::InvalidColumn` - non-numeric metric requested
pub fn flat_profile(
    stream: &EventStream,
    columns: &Columns,
    groupby: &GroupBy,
    per_process: bool,
) -> Result<FlatProfile, TraceError> {
    let metrics = columns.resolve(stream)?;
    let partial = ProfilePartial::from_stream(stream, &metrics, groupby)?;
    Ok(FlatProfile::from_partial(
        partial,
        metrics,
        groupby.clone(),
        per_process,
    ))
}

/// Imbalance of one function across processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImbalanceRow {
    pub name: String,
    pub mean: f64,
    pub max: f64,
    /// `max / mean`; 1.0 when nothing was spent anywhere
    pub imbalance: f64,
    /// Heaviest processes first
    pub top_processes: Vec<(u32, f64)>,
}

/// Rank functions by how unevenly `metric` is spread across processes
///
/// Only processes in which a function occurs count towards its mean.
/// Rows are ordered by imbalance, highest first.
pub fn load_imbalance(partial: &ProfilePartial, metric: &str, top_n: usize) -> Vec<ImbalanceRow> {
    let mut rows: Vec<ImbalanceRow> = partial
        .exclusive_by_key(metric)
        .into_iter()
        .map(|(name, mut per_process)| {
            let total: f64 = per_process.iter().map(|(_, v)| v).sum();
            let mean = total / per_process.len() as f64;
            let max = per_process
                .iter()
                .map(|(_, v)| *v)
                .fold(f64::NEG_INFINITY, f64::max);
            let imbalance = if mean > 0.0 { max / mean } else { 1.0 };

            per_process.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            per_process.truncate(top_n);

            ImbalanceRow {
                name: name.to_string(),
                mean,
                max,
                imbalance,
                top_processes: per_process,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.imbalance
            .partial_cmp(&a.imbalance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::derive::calc_exc_metrics;
    use crate::trace::{Event, StreamId};

    fn derived(rank: u32, events: Vec<Event>) -> EventStream {
        let events = events.into_iter().map(|e| e.on(rank, 0)).collect();
        let mut s = EventStream::new(StreamId::rank(rank), events).unwrap();
        calc_exc_metrics(&mut s, &Columns::All).unwrap();
        s
    }

    fn foo_call(start: i64, len: i64) -> Vec<Event> {
        vec![Event::enter(start, "foo"), Event::leave(start + len, "foo")]
    }

    #[test]
    fn test_stream_profile_sums_calls() {
        let mut events = foo_call(0, 10);
        events.extend(foo_call(20, 5));
        let s = derived(0, events);

        let profile = flat_profile(&s, &Columns::All, &GroupBy::Name, false).unwrap();
        let row = profile.row("foo").unwrap();
        assert_eq!(row.calls, 2.0);
        assert_eq!(row.exclusive("time"), Some(15.0));
        assert_eq!(row.inclusive("time"), Some(15.0));
    }

    #[test]
    fn test_mean_of_per_process_sums() {
        let a = derived(0, foo_call(0, 10));
        let b = derived(1, foo_call(0, 30));
        let metrics = vec!["time".to_string()];

        let mut partial = ProfilePartial::from_stream(&a, &metrics, &GroupBy::Name).unwrap();
        partial.merge(ProfilePartial::from_stream(&b, &metrics, &GroupBy::Name).unwrap());

        let mean = FlatProfile::from_partial(partial.clone(), metrics.clone(), GroupBy::Name, false);
        assert_eq!(mean.row("foo").unwrap().exclusive("time"), Some(20.0));

        let per = FlatProfile::from_partial(partial, metrics, GroupBy::Name, true);
        let rows: Vec<_> = per.rows_for("foo").map(|r| (r.process, r.exclusive("time"))).collect();
        assert_eq!(rows, vec![(Some(1), Some(30.0)), (Some(0), Some(10.0))]);
    }

    #[test]
    fn test_requires_exclusive_metrics() {
        let s = EventStream::new(StreamId::rank(5), foo_call(0, 1)).unwrap();
        let err = flat_profile(&s, &Columns::All, &GroupBy::Name, false).unwrap_err();
        assert_eq!(err, TraceError::missing(StreamId::rank(5), "time.exc"));
    }

    #[test]
    fn test_group_by_attribute_skips_missing_key() {
        let s = derived(
            0,
            vec![
                Event::enter(0, "a").with_attr("region", "solver"),
                Event::leave(4, "a"),
                Event::enter(5, "b"),
                Event::leave(6, "b"),
            ],
        );
        let profile = flat_profile(
            &s,
            &Columns::only(&["time"]),
            &GroupBy::Attribute("region".into()),
            false,
        )
        .unwrap();
        assert_eq!(profile.len(), 1);
        assert_eq!(profile.rows[0].key, "solver");
    }

    #[test]
    fn test_load_imbalance() {
        let metrics = vec!["time".to_string()];
        let mut partial = ProfilePartial::default();
        for (rank, len) in [(0, 10), (1, 10), (2, 40)] {
            let s = derived(rank, foo_call(0, len));
            partial.merge(ProfilePartial::from_stream(&s, &metrics, &GroupBy::Name).unwrap());
        }

        let rows = load_imbalance(&partial, "time", 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mean, 20.0);
        assert_eq!(rows[0].max, 40.0);
        assert_eq!(rows[0].imbalance, 2.0);
        assert_eq!(rows[0].top_processes, vec![(2, 40.0), (0, 10.0)]);
    }

    #[test]
    fn test_groupby_parsing() {
        assert_eq!("name".parse::<GroupBy>().unwrap(), GroupBy::Name);
        assert_eq!(
            "region".parse::<GroupBy>().unwrap(),
            GroupBy::Attribute("region".into())
        );
    }
}
