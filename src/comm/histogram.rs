//! Message size and communication-over-time histograms.
//!
//! Histograms are built in two phases so they reduce across streams: first
//! the global value range, then per-stream counts against shared edges.

use super::matrix::{messages, CommOutput, Direction};
use crate::trace::EventStream;
use serde::{Deserialize, Serialize};

/// Equal-width histogram; `edges.len() == counts.len() + 1`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub counts: Vec<u64>,
    pub edges: Vec<f64>,
}

impl Histogram {
    /// Empty histogram over `[low, high]`
    ///
    /// A degenerate range is widened to `[low - 0.5, high + 0.5]`; at least
    /// one bin is always created.
    pub fn with_range(low: f64, high: f64, bins: usize) -> Self {
        let bins = bins.max(1);
        let (low, high) = if high > low {
            (low, high)
        } else {
            (low - 0.5, high + 0.5)
        };
        let width = (high - low) / bins as f64;
        let mut edges: Vec<f64> = (0..bins).map(|i| low + width * i as f64).collect();
        edges.push(high);

        Self {
            counts: vec![0; bins],
            edges,
        }
    }

    /// Histogram for a dataset without any values, over `[0, 1]`
    pub fn empty(bins: usize) -> Self {
        Self::with_range(0.0, 1.0, bins)
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    /// Bin index of `value`; the last bin is closed on the right
    pub fn bin_of(&self, value: f64) -> Option<usize> {
        let low = *self.edges.first()?;
        let high = *self.edges.last()?;
        if value < low || value > high {
            return None;
        }
        let width = (high - low) / self.bins() as f64;
        let bin = ((value - low) / width) as usize;
        Some(bin.min(self.bins() - 1))
    }

    pub fn add(&mut self, value: f64, weight: u64) {
        if let Some(bin) = self.bin_of(value) {
            self.counts[bin] += weight;
        }
    }

    /// Add counts of a histogram built over the same edges
    pub fn merge(&mut self, other: &Histogram) {
        for (count, more) in self.counts.iter_mut().zip(&other.counts) {
            *count += more;
        }
    }

    /// Same edges, zeroed counts
    pub fn cleared(&self) -> Self {
        Self {
            counts: vec![0; self.counts.len()],
            edges: self.edges.clone(),
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Smallest and largest message size recorded in `direction`
pub fn size_range(stream: &EventStream, direction: Direction) -> Option<(u64, u64)> {
    messages(stream)
        .filter(|m| m.direction == direction)
        .filter_map(|m| m.bytes)
        .fold(None, |range, bytes| match range {
            None => Some((bytes, bytes)),
            Some((lo, hi)) => Some((lo.min(bytes), hi.max(bytes))),
        })
}

/// Count message sizes of one stream into a copy of `template`
pub fn size_counts(stream: &EventStream, direction: Direction, template: &Histogram) -> Histogram {
    let mut hist = template.cleared();
    for bytes in messages(stream)
        .filter(|m| m.direction == direction)
        .filter_map(|m| m.bytes)
    {
        hist.add(bytes as f64, 1);
    }
    hist
}

/// Bytes or messages of one stream per time bin of `template`
pub fn time_counts(
    stream: &EventStream,
    direction: Direction,
    output: CommOutput,
    template: &Histogram,
) -> Histogram {
    let mut hist = template.cleared();
    for message in messages(stream).filter(|m| m.direction == direction) {
        let weight = match output {
            CommOutput::Count => 1,
            CommOutput::Size => match message.bytes {
                Some(bytes) => bytes,
                None => continue,
            },
        };
        hist.add(message.timestamp as f64, weight);
    }
    hist
}

fn stream_direction(stream: &EventStream) -> Direction {
    if messages(stream).any(|m| m.direction == Direction::Send) {
        Direction::Send
    } else {
        Direction::Receive
    }
}

/// Message size histogram of a single stream
pub fn message_histogram(stream: &EventStream, bins: usize) -> Histogram {
    let direction = stream_direction(stream);
    let template = match size_range(stream, direction) {
        Some((lo, hi)) => Histogram::with_range(lo as f64, hi as f64, bins),
        None => Histogram::empty(bins),
    };
    size_counts(stream, direction, &template)
}

/// Communication volume over a single stream's time range
pub fn comm_over_time(stream: &EventStream, output: CommOutput, bins: usize) -> Histogram {
    let template = match stream.time_range() {
        Some((start, end)) => Histogram::with_range(start as f64, end as f64, bins),
        None => Histogram::empty(bins),
    };
    time_counts(stream, stream_direction(stream), output, &template)
}
