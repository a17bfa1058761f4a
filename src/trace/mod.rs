//! Event storage for individual execution streams.
//!
//! This module handles:
//! - The normalized event representation
//! - Owned, time-ordered per-stream storage
//! - Versioned derived columns
//! - Predicates and filtering
//! - Loading normalized events from JSON

pub mod columns;
pub mod event;
pub mod filter;
pub mod loader;
pub mod stream;

// Re-export main types
pub use columns::{CallTree, DerivedColumn, MatchColumns, MetricColumn};
pub use event::{AttrValue, Event, EventKind};
pub use filter::{CmpOp, Field, Predicate};
pub use loader::{load_dataset, load_file, parse_events, split_streams, LoadOptions};
pub use stream::{AttrType, EventStream, StreamId};
