//! Inbound vehicle reports and fleet-wide snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordination::DispatchStats;
use crate::domain::{Point, ReportedTaskState, VehicleState, Waypoint};
use crate::traffic::TrafficStats;

/// One decoded device message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleStateUpdate {
    pub vehicle_id: String,
    pub map_id: i32,
    pub position: Point,
    /// Graph point the vehicle reports standing on
    #[serde(default)]
    pub current_point: Option<i32>,
    /// Waypoints the vehicle still has to drive
    #[serde(default)]
    pub remaining_route: Vec<Waypoint>,
    #[serde(default)]
    pub battery: Option<u8>,
    #[serde(default)]
    pub state: Option<VehicleState>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_state: Option<ReportedTaskState>,
}

impl VehicleStateUpdate {
    pub fn new(vehicle_id: impl Into<String>, map_id: i32, position: Point) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            map_id,
            position,
            current_point: None,
            remaining_route: Vec::new(),
            battery: None,
            state: None,
            task_id: None,
            task_state: None,
        }
    }

    pub fn at_point(mut self, point: i32) -> Self {
        self.current_point = Some(point);
        self
    }

    pub fn with_route(mut self, route: Vec<Waypoint>) -> Self {
        self.remaining_route = route;
        self
    }
}

/// Per-vehicle line of a fleet snapshot
#[derive(Debug, Clone, Serialize)]
pub struct VehicleSnapshot {
    pub vehicle_id: String,
    pub state: VehicleState,
    pub position: Point,
    pub live_tasks: usize,
    pub reserved_waypoints: usize,
}

/// Fleet-wide view for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct FleetSnapshot {
    pub vehicles: Vec<VehicleSnapshot>,
    pub live_tasks: usize,
    pub traffic: TrafficStats,
    pub dispatched: u64,
    pub failed_commands: u64,
    pub taken_at: DateTime<Utc>,
}

impl FleetSnapshot {
    pub fn new(
        vehicles: Vec<VehicleSnapshot>,
        live_tasks: usize,
        traffic: TrafficStats,
        dispatch: DispatchStats,
    ) -> Self {
        Self {
            vehicles,
            live_tasks,
            traffic,
            dispatched: dispatch.executed,
            failed_commands: dispatch.failed + dispatch.panicked,
            taken_at: Utc::now(),
        }
    }
}
