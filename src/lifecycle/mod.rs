//! Live sub-task bookkeeping

pub mod manager;

pub use manager::TaskPathManager;
