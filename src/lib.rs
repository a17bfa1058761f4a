//! trace-metrics
//!
//! Event matching, calling-context trees and performance metrics for
//! traces of parallel programs.
//!
//! A trace is loaded into a [`dataset::Dataset`]: one
//! [`trace::EventStream`] per process (or per thread). Derivations run on
//! every stream in parallel and aggregations reduce the per-stream partials
//! in stream order, so results do not depend on the worker count.
//!
//! ## Getting Started
//!
//! ```no_run
//! use trace_metrics::metrics::{Columns, GroupBy};
//! use trace_metrics::trace::{load_file, LoadOptions};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut dataset = load_file("events.json", &LoadOptions::default())?;
//! dataset.calc_exc_metrics(&Columns::All)?;
//! let profile = dataset.flat_profile(&Columns::All, &GroupBy::Name, false)?;
//! println!("{} rows", profile.len());
//! # Ok(())
//! # }
//! ```
//!
//! The `trace-metrics` CLI wraps the same pipeline:
//!
//! ```bash
//! trace-metrics analyze --input events.json --output report.json --summary
//! ```

pub mod comm;
pub mod commands;
pub mod dataset;
pub mod matcher;
pub mod metrics;
pub mod output;
pub mod trace;
pub mod utils;
