//! Dataset orchestration across streams.
//!
//! Per-stream work is mapped over the streams (in parallel unless the engine
//! is configured as sequential) and partial results are reduced in stream
//! order. Matching and tree construction never cross stream boundaries.

#[allow(clippy::module_inception)]
pub mod dataset;
pub mod dispatch;

// Re-export main types
pub use dataset::Dataset;
pub use dispatch::{CancellationToken, Dispatcher};
