//! Exclusive time per function over equal-width time bins.
//!
//! Every matched call contributes the parts of its `[enter, leave]` interval
//! not covered by matched callees, split across the bins it overlaps. Each
//! location (process, thread) is one timeline, so a bin holds
//! `width * locations` of capacity; whatever no function occupies is idle.

use crate::trace::{DerivedColumn, EventStream};
use crate::utils::error::TraceError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Column name used for unoccupied time
pub const IDLE_TIME: &str = "idle_time";

/// Busy time of one or more streams, not yet turned into a profile
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelinePartial {
    functions: BTreeMap<String, Vec<f64>>,
    locations: BTreeSet<(u32, u32)>,
}

impl TimelinePartial {
    /// Add `other` into `self`; bins are assumed to share the same edges
    pub fn merge(&mut self, other: TimelinePartial) {
        for (name, bins) in other.functions {
            match self.functions.get_mut(&name) {
                Some(acc) => acc.iter_mut().zip(bins).for_each(|(a, b)| *a += b),
                None => {
                    self.functions.insert(name, bins);
                }
            }
        }
        self.locations.extend(other.locations);
    }
}

/// Exclusive time per function per bin, plus idle time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeProfile {
    /// `bins + 1` edges in nanoseconds
    pub edges: Vec<f64>,
    pub functions: BTreeMap<String, Vec<f64>>,
    pub idle_time: Vec<f64>,
    /// Timelines the capacity of a bin is counted over
    pub locations: usize,
    /// Values are fractions of bin capacity instead of nanoseconds
    pub normalized: bool,
}

impl TimeProfile {
    /// Finish a merged partial over `edges`
    pub fn from_partial(partial: TimelinePartial, edges: Vec<f64>, normalized: bool) -> Self {
        let locations = partial.locations.len();
        let capacity: Vec<f64> = edges
            .windows(2)
            .map(|w| (w[1] - w[0]) * locations as f64)
            .collect();

        let mut functions = partial.functions;
        let mut idle_time: Vec<f64> = capacity
            .iter()
            .enumerate()
            .map(|(bin, cap)| cap - functions.values().map(|f| f[bin]).sum::<f64>())
            .collect();

        if normalized {
            let scale = |values: &mut Vec<f64>| {
                for (v, cap) in values.iter_mut().zip(&capacity) {
                    *v = if *cap > 0.0 { *v / cap } else { 0.0 };
                }
            };
            functions.values_mut().for_each(&scale);
            scale(&mut idle_time);
        }

        Self {
            edges,
            functions,
            idle_time,
            locations,
            normalized,
        }
    }

    pub fn bins(&self) -> usize {
        self.idle_time.len()
    }

    /// Start and end of `bin`
    pub fn bin_bounds(&self, bin: usize) -> Option<(f64, f64)> {
        Some((*self.edges.get(bin)?, *self.edges.get(bin + 1)?))
    }

    /// Sum of every function plus idle time in `bin`
    pub fn bin_total(&self, bin: usize) -> f64 {
        self.functions.values().filter_map(|f| f.get(bin)).sum::<f64>()
            + self.idle_time.get(bin).copied().unwrap_or(0.0)
    }

    /// Time of `name` summed over all bins
    pub fn function_total(&self, name: &str) -> Option<f64> {
        if name == IDLE_TIME {
            return Some(self.idle_time.iter().sum());
        }
        self.functions.get(name).map(|bins| bins.iter().sum())
    }
}

/// Busy time of one stream per bin of `edges`
///
/// **Public** - map step of the dataset time profile
///
/// # Errors
/// * `TraceError::MissingColumn` - matching or call tree not derived
pub fn timeline_partial(stream: &EventStream, edges: &[f64]) -> Result<TimelinePartial, TraceError> {
    let matching = stream
        .matching()
        .ok_or_else(|| TraceError::missing(stream.id(), DerivedColumn::Matching.to_string()))?;
    let tree = stream
        .call_tree()
        .ok_or_else(|| TraceError::missing(stream.id(), DerivedColumn::CallTree.to_string()))?;

    let bins = edges.len().saturating_sub(1);
    let mut partial = TimelinePartial {
        functions: BTreeMap::new(),
        locations: stream.locations(),
    };

    let span = |index: usize| -> Option<(f64, f64)> {
        let leave = matching.matching_index[index]?;
        Some((
            stream.events()[index].timestamp as f64,
            stream.events()[leave].timestamp as f64,
        ))
    };

    for event in stream.events().iter().filter(|e| e.is_enter()) {
        let Some((start, end)) = span(event.index) else {
            continue;
        };
        let name = event.name.as_deref().unwrap_or("unknown");
        let row = partial
            .functions
            .entry(name.to_string())
            .or_insert_with(|| vec![0.0; bins]);

        let mut cursor = start;
        for &child in tree.children[event.index].as_deref().unwrap_or_default() {
            let Some((child_start, child_end)) = span(child) else {
                continue;
            };
            if child_start > cursor {
                spread(row, edges, cursor, child_start);
            }
            cursor = cursor.max(child_end);
        }
        if end > cursor {
            spread(row, edges, cursor, end);
        }
    }

    debug!(
        "{}: time profile over {} functions",
        stream.id(),
        partial.functions.len()
    );
    Ok(partial)
}

/// Add the overlap of `[from, to]` with each bin
fn spread(row: &mut [f64], edges: &[f64], from: f64, to: f64) {
    for (bin, slot) in row.iter_mut().enumerate() {
        let (low, high) = (edges[bin], edges[bin + 1]);
        if low >= to {
            break;
        }
        let overlap = to.min(high) - from.max(low);
        if overlap > 0.0 {
            *slot += overlap;
        }
    }
}
