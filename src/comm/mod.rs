//! Communication analysis.
//!
//! This module handles:
//! - Decoding message records from Instant events
//! - Sender/receiver matrices and per-process totals
//! - Message size and communication-over-time histograms

pub mod histogram;
pub mod matrix;

// Re-export main types and functions
pub use histogram::{comm_over_time, message_histogram, Histogram};
pub use matrix::{
    comm_by_process, comm_matrix, messages, CommMatrix, CommOutput, CommPartial, Direction,
    Message, ProcessComm,
};
