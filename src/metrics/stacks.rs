//! Collapsed call-path stacks and hot paths.
//!
//! Collapsed stacks aggregate an exclusive metric per calling context.
//! Format: "parent;child;grandchild weight"
//!
//! Example: "main;solve;MPI_Send 1200"
//! This means: main called solve which called MPI_Send, spending 1200 ns in it.

use crate::trace::{DerivedColumn, EventStream};
use crate::utils::error::TraceError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// A single collapsed stack entry
///
/// **Public** - consumed by hot path reports
#[derive(Debug, Clone, PartialEq)]
pub struct CollapsedStack {
    /// Call path as semicolon-separated names
    pub stack: String,

    /// Summed exclusive value of the path
    pub weight: f64,
}

impl CollapsedStack {
    pub fn new(stack: impl Into<String>, weight: f64) -> Self {
        Self {
            stack: stack.into(),
            weight,
        }
    }
}

/// Build collapsed stacks from a stream's calling-context tree
///
/// **Public** - main entry point for stack building
///
/// # Arguments
/// * `stream` - Stream with a call tree and `exclusive[metric]` derived
/// * `metric` - Metric to weight paths by
///
/// # Returns
/// One stack per unique call path, heaviest first
///
/// # Algorithm
/// 1. Walk Enter rows in time order (callers precede callees)
/// 2. Extend the caller's path with the callee name
/// 3. Aggregate exclusive values by path
pub fn build_collapsed_stacks(
    stream: &EventStream,
    metric: &str,
) -> Result<Vec<CollapsedStack>, TraceError> {
    let tree = stream
        .call_tree()
        .ok_or_else(|| TraceError::missing(stream.id(), DerivedColumn::CallTree.to_string()))?;
    let exclusive = stream
        .exclusive_column(metric)
        .ok_or_else(|| TraceError::missing(stream.id(), format!("{}.exc", metric)))?;

    debug!(
        "Building collapsed stacks from {} events on {}",
        stream.len(),
        stream.id()
    );

    let mut paths: Vec<Option<String>> = vec![None; stream.len()];
    let mut stack_map: HashMap<String, f64> = HashMap::new();

    for event in stream.events().iter().filter(|e| e.is_enter()) {
        let name = event.name.as_deref().unwrap_or("unknown");
        let path = match tree.parent[event.index].and_then(|p| paths[p].as_deref()) {
            Some(caller) => format!("{};{}", caller, name),
            None => name.to_string(),
        };

        if let Some(weight) = exclusive.values[event.index] {
            *stack_map.entry(path.clone()).or_insert(0.0) += weight;
        }
        paths[event.index] = Some(path);
    }

    let stacks = sorted(stack_map);
    debug!("Built {} unique collapsed stacks", stacks.len());
    Ok(stacks)
}

/// Sum stacks from several streams by path
pub fn merge_stacks(groups: impl IntoIterator<Item = Vec<CollapsedStack>>) -> Vec<CollapsedStack> {
    let mut stack_map: HashMap<String, f64> = HashMap::new();
    for stack in groups.into_iter().flatten() {
        *stack_map.entry(stack.stack).or_insert(0.0) += stack.weight;
    }
    sorted(stack_map)
}

fn sorted(stack_map: HashMap<String, f64>) -> Vec<CollapsedStack> {
    let mut stacks: Vec<CollapsedStack> = stack_map
        .into_iter()
        .map(|(stack, weight)| CollapsedStack::new(stack, weight))
        .collect();

    stacks.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.stack.cmp(&b.stack))
    });
    stacks
}

/// Heavy call path in a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotPath {
    pub stack: String,
    pub weight: f64,
    /// Share of the total, in percent
    pub percentage: f64,
}

/// Calculate hot paths from collapsed stacks
///
/// **Public** - main entry point for hot path extraction
///
/// # Arguments
/// * `stacks` - Collapsed stacks, heaviest first
/// * `total` - Total weight the percentages refer to
/// * `top_n` - Number of paths to return
pub fn calculate_hot_paths(stacks: &[CollapsedStack], total: f64, top_n: usize) -> Vec<HotPath> {
    debug!("Calculating top {} hot paths from {} stacks", top_n, stacks.len());

    stacks
        .iter()
        .take(top_n)
        .map(|stack| create_hot_path(stack, total))
        .collect()
}

/// **Private** - internal conversion
fn create_hot_path(stack: &CollapsedStack, total: f64) -> HotPath {
    let percentage = if total > 0.0 {
        (stack.weight / total) * 100.0
    } else {
        0.0
    };

    HotPath {
        stack: stack.stack.clone(),
        weight: stack.weight,
        percentage,
    }
}

/// Summary statistics over collapsed stacks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackDistribution {
    pub total: f64,
    pub stack_count: usize,
    pub mean: f64,
    pub median: f64,
    /// Weight held by the heaviest 10% of paths
    pub top_10_percent: f64,
    pub top_10_percent_percentage: f64,
}

impl StackDistribution {
    /// True when the heaviest 10% of paths hold more than 80% of the weight
    pub fn is_highly_concentrated(&self) -> bool {
        self.top_10_percent_percentage > 80.0
    }

    /// Get human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Total: {:.0} | Paths: {} | Mean: {:.1} | Median: {:.1} | Top 10%: {:.1}%",
            self.total, self.stack_count, self.mean, self.median, self.top_10_percent_percentage
        )
    }
}

/// Calculate weight distribution statistics
///
/// `stacks` must be sorted heaviest first.
pub fn calculate_distribution(stacks: &[CollapsedStack]) -> StackDistribution {
    if stacks.is_empty() {
        return StackDistribution::default();
    }

    let total: f64 = stacks.iter().map(|s| s.weight).sum();
    let count = stacks.len();

    let mut weights: Vec<f64> = stacks.iter().map(|s| s.weight).collect();
    weights.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let median = weights[weights.len() / 2];

    let top_count = (count as f64 * 0.1).ceil() as usize;
    let top_10_percent: f64 = stacks.iter().take(top_count).map(|s| s.weight).sum();

    StackDistribution {
        total,
        stack_count: count,
        mean: total / count as f64,
        median,
        top_10_percent,
        top_10_percent_percentage: if total > 0.0 {
            (top_10_percent / total) * 100.0
        } else {
            0.0
        },
    }
}
