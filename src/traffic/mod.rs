//! Reserved corridors and collision queries

pub mod coordinator;

pub use coordinator::{fingerprint, Reservation, TrafficCoordinator, TrafficStats, UpdateOutcome};
