//! Fleet coordinator
//!
//! Composition root that wires the registry, traffic, lifecycle, distribution
//! and command dispatch together and drives the report → plan → command loop.

pub mod command;
pub mod coordinator;
pub mod state;

pub use command::{CommandSink, LoggingSink, RecordingSink, VehicleCommand};
pub use coordinator::{pending_route, FleetCoordinator, PlanOutcome};
pub use state::{FleetSnapshot, VehicleSnapshot, VehicleStateUpdate};
