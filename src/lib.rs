pub mod cli;
pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod distribution;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod simulation;
pub mod spatial;
pub mod traffic;

pub use config::AppConfig;
pub use coordination::{DispatchStats, OrderedDispatcher};
pub use coordinator::{
    CommandSink, FleetCoordinator, FleetSnapshot, PlanOutcome, VehicleCommand, VehicleStateUpdate,
};
pub use distribution::{AllocationMode, AllocationStrategy, TaskDistributor};
pub use domain::{
    CancelType, MapGraph, PlanState, Point, RoadNetwork, TaskPath, TransportTask, Vehicle,
    VehicleRegistry, Waypoint,
};
pub use error::{FleetError, Result};
pub use lifecycle::TaskPathManager;
pub use spatial::ShardedIndex;
pub use traffic::{TrafficCoordinator, UpdateOutcome};
