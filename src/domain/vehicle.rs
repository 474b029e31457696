//! Vehicle records and the shared registry.

use super::geometry::Point;
use super::map::Waypoint;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Vehicle operating state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleState {
    #[default]
    Offline,
    Idle,
    Busy,
    Charging,
    Error,
}

impl VehicleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleState::Offline => "OFFLINE",
            VehicleState::Idle => "IDLE",
            VehicleState::Busy => "BUSY",
            VehicleState::Charging => "CHARGING",
            VehicleState::Error => "ERROR",
        }
    }

    pub fn is_online(&self) -> bool {
        !matches!(self, VehicleState::Offline)
    }
}

impl fmt::Display for VehicleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who is allowed to command the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    #[default]
    Dispatcher,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    #[default]
    Auto,
    Manual,
}

/// Task progress as reported by the vehicle itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedTaskState {
    #[default]
    None,
    Have,
    Finish,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoodsState {
    #[default]
    None,
    Loaded,
}

/// Snapshot of one vehicle as known to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    /// Equipment type; 0 on a task means "any"
    pub vehicle_type: i32,
    /// Comma-separated capability labels
    pub labels: String,
    pub map_id: i32,
    pub position: Point,
    /// Graph point the vehicle currently sits on
    pub current_point: Option<i32>,
    /// Physical safety radius (mm)
    pub radius: f64,
    /// Battery percentage
    pub battery: u8,
    pub state: VehicleState,
    pub control_mode: ControlMode,
    pub drive_mode: DriveMode,
    pub estop: bool,
    pub isolated: bool,
    pub map_checked: bool,
    /// Task id the vehicle reports it is executing
    pub task_id: Option<String>,
    pub task_state: ReportedTaskState,
    pub goods: GoodsState,
}

impl Vehicle {
    /// A vehicle ready to take work
    pub fn new(id: impl Into<String>, map_id: i32, position: Point, radius: f64) -> Self {
        Self {
            id: id.into(),
            vehicle_type: 0,
            labels: String::new(),
            map_id,
            position,
            current_point: None,
            radius,
            battery: 100,
            state: VehicleState::Idle,
            control_mode: ControlMode::default(),
            drive_mode: DriveMode::default(),
            estop: false,
            isolated: false,
            map_checked: true,
            task_id: None,
            task_state: ReportedTaskState::None,
            goods: GoodsState::None,
        }
    }

    pub fn at_point(mut self, point: i32) -> Self {
        self.current_point = Some(point);
        self
    }

    pub fn with_labels(mut self, labels: impl Into<String>) -> Self {
        self.labels = labels.into();
        self
    }

    pub fn with_type(mut self, vehicle_type: i32) -> Self {
        self.vehicle_type = vehicle_type;
        self
    }

    pub fn with_battery(mut self, battery: u8) -> Self {
        self.battery = battery;
        self
    }

    pub fn with_state(mut self, state: VehicleState) -> Self {
        self.state = state;
        self
    }

    pub fn waypoint(&self) -> Option<Waypoint> {
        self.current_point.map(|id| Waypoint::new(self.map_id, id))
    }

    /// Free for a new task
    pub fn is_idle(&self) -> bool {
        self.state == VehicleState::Idle
            && self.map_checked
            && !self.isolated
            && self.control_mode == ControlMode::Dispatcher
            && self.drive_mode == DriveMode::Auto
            && !self.estop
            && self.task_state != ReportedTaskState::Have
            && self.goods == GoodsState::None
    }

    /// Charging, but with enough battery that the charge may be interrupted
    pub fn is_cancellable_charging(&self, lowest_work_battery: u8) -> bool {
        self.map_checked
            && !self.isolated
            && self.state == VehicleState::Charging
            && self.battery >= lowest_work_battery
    }

    /// Every comma-separated entry of `required` appears in this vehicle's labels
    pub fn matches_labels(&self, required: &str) -> bool {
        required
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .all(|label| self.labels.contains(label))
    }

    pub fn matches_type(&self, required: i32) -> bool {
        required == 0 || required == self.vehicle_type
    }
}

/// Explicitly constructed registry shared by every component.
///
/// Reads return clones; writes replace a single entry.
#[derive(Debug, Default)]
pub struct VehicleRegistry {
    vehicles: DashMap<String, Vehicle>,
}

impl VehicleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, vehicle: Vehicle) {
        self.vehicles.insert(vehicle.id.clone(), vehicle);
    }

    pub fn get(&self, id: &str) -> Option<Vehicle> {
        self.vehicles.get(id).map(|v| v.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vehicles.contains_key(id)
    }

    /// Apply `f` to a vehicle in place; `None` if the id is unknown.
    pub fn update_with<R>(&self, id: &str, f: impl FnOnce(&mut Vehicle) -> R) -> Option<R> {
        self.vehicles.get_mut(id).map(|mut v| f(&mut v))
    }

    pub fn remove(&self, id: &str) -> Option<Vehicle> {
        self.vehicles.remove(id).map(|(_, v)| v)
    }

    /// Returns false for an unknown vehicle.
    pub fn mark_offline(&self, id: &str) -> bool {
        self.update_with(id, |v| v.state = VehicleState::Offline)
            .is_some()
    }

    pub fn radius(&self, id: &str) -> Option<f64> {
        self.vehicles.get(id).map(|v| v.radius)
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn all(&self) -> Vec<Vehicle> {
        let mut out: Vec<Vehicle> = self.vehicles.iter().map(|v| v.clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn on_map(&self, map_id: i32) -> Vec<Vehicle> {
        self.filtered(|v| v.map_id == map_id)
    }

    pub fn idle(&self, id: &str) -> Option<Vehicle> {
        self.get(id).filter(Vehicle::is_idle)
    }

    pub fn idle_vehicles(&self) -> Vec<Vehicle> {
        self.filtered(Vehicle::is_idle)
    }

    pub fn cancellable_charging(&self, id: &str, lowest_work_battery: u8) -> Option<Vehicle> {
        self.get(id)
            .filter(|v| v.is_cancellable_charging(lowest_work_battery))
    }

    pub fn cancellable_charging_vehicles(&self, lowest_work_battery: u8) -> Vec<Vehicle> {
        self.filtered(|v| v.is_cancellable_charging(lowest_work_battery))
    }

    fn filtered(&self, pred: impl Fn(&Vehicle) -> bool) -> Vec<Vehicle> {
        let mut out: Vec<Vehicle> = self
            .vehicles
            .iter()
            .filter(|v| pred(v.value()))
            .map(|v| v.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(id: &str) -> Vehicle {
        Vehicle::new(id, 1, Point::new(0.0, 0.0), 300.0)
    }

    #[test]
    fn test_idle_requires_every_condition() {
        assert!(vehicle("A").is_idle());

        let mut busy = vehicle("B");
        busy.task_state = ReportedTaskState::Have;
        assert!(!busy.is_idle());

        let mut manual = vehicle("C");
        manual.control_mode = ControlMode::Manual;
        assert!(!manual.is_idle());

        let mut loaded = vehicle("D");
        loaded.goods = GoodsState::Loaded;
        assert!(!loaded.is_idle());

        let mut stopped = vehicle("E");
        stopped.estop = true;
        assert!(!stopped.is_idle());
    }

    #[test]
    fn test_cancellable_charging_threshold() {
        let charging = vehicle("A")
            .with_state(VehicleState::Charging)
            .with_battery(60);
        assert!(charging.is_cancellable_charging(50));
        assert!(charging.is_cancellable_charging(60));
        assert!(!charging.is_cancellable_charging(61));
        assert!(!vehicle("B").is_cancellable_charging(0));
    }

    #[test]
    fn test_label_matching() {
        let v = vehicle("A").with_labels("lift,cold,heavy");
        assert!(v.matches_labels("lift"));
        assert!(v.matches_labels("cold, lift"));
        assert!(v.matches_labels(""));
        assert!(!v.matches_labels("lift,roller"));

        assert!(v.matches_type(0));
        assert!(!v.with_type(2).matches_type(3));
    }

    #[test]
    fn test_registry_queries() {
        let registry = VehicleRegistry::new();
        registry.upsert(vehicle("B"));
        registry.upsert(vehicle("A"));
        registry.upsert(
            vehicle("C")
                .with_state(VehicleState::Charging)
                .with_battery(80),
        );
        let mut other_map = vehicle("D");
        other_map.map_id = 2;
        registry.upsert(other_map);

        let idle: Vec<String> = registry.idle_vehicles().into_iter().map(|v| v.id).collect();
        assert_eq!(idle, vec!["A", "B", "D"]);
        assert_eq!(registry.on_map(2).len(), 1);
        assert_eq!(registry.cancellable_charging_vehicles(50).len(), 1);
        assert!(registry.cancellable_charging("C", 90).is_none());

        assert!(registry.mark_offline("A"));
        assert!(!registry.mark_offline("missing"));
        assert!(registry.idle("A").is_none());
        assert_eq!(registry.radius("B"), Some(300.0));
        assert_eq!(registry.len(), 4);
    }
}
