//! Metric derivation and aggregation.
//!
//! This module transforms matched streams into:
//! - Inclusive and exclusive metric columns
//! - Flat profiles and load imbalance tables
//! - Collapsed call-path stacks and hot paths
//! - Exclusive time per function over time bins

pub mod derive;
pub mod profile;
pub mod stacks;
pub mod timeline;

// Re-export main types and functions
pub use derive::{calc_exc_metrics, calc_inc_metrics, ensure, ensure_with, Columns};
pub use profile::{
    flat_profile, load_imbalance, FlatProfile, FlatProfileRow, GroupBy, ImbalanceRow,
    ProfilePartial,
};
pub use stacks::{
    build_collapsed_stacks, calculate_distribution, calculate_hot_paths, merge_stacks,
    CollapsedStack, HotPath, StackDistribution,
};
pub use timeline::{timeline_partial, TimeProfile, TimelinePartial, IDLE_TIME};
