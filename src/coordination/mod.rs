//! Coordination layer
//!
//! Per-key ordered execution of asynchronous work. Commands for the same
//! vehicle run one at a time in submission order; different vehicles run
//! concurrently.

pub mod ordered;

pub use ordered::{DispatchStats, Job, OrderedDispatcher};
