//! Transport tasks and the per-vehicle sub-task record.

use super::map::Waypoint;
use super::state::{PlanFlag, PlanState};
use crate::error::{FleetError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transport request as handed over by task management
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportTask {
    /// Business task code
    pub code: String,
    /// Task group (several codes may share one)
    pub group: Option<String>,
    pub map_id: i32,
    pub origin: Waypoint,
    pub destination: Waypoint,
    /// Vehicle explicitly requested by the caller
    pub equipment_code: Option<String>,
    /// Required equipment type, 0 = any
    pub equipment_type: i32,
    /// Comma-separated labels the vehicle must carry
    pub labels: String,
    /// Action performed at the destination
    pub action_code: i32,
    pub action_parameter: Option<String>,
    pub state: PlanState,
}

impl TransportTask {
    pub fn new(code: impl Into<String>, origin: Waypoint, destination: Waypoint) -> Self {
        Self {
            code: code.into(),
            group: None,
            map_id: origin.map_id,
            origin,
            destination,
            equipment_code: None,
            equipment_type: 0,
            labels: String::new(),
            action_code: 0,
            action_parameter: None,
            state: PlanState::New,
        }
    }

    pub fn for_vehicle(mut self, vehicle_id: impl Into<String>) -> Self {
        self.equipment_code = Some(vehicle_id.into());
        self
    }

    pub fn with_labels(mut self, labels: impl Into<String>) -> Self {
        self.labels = labels.into();
        self
    }

    pub fn with_state(mut self, state: PlanState) -> Self {
        self.state = state;
        self
    }
}

/// Kind of sub-task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskType {
    #[default]
    Move,
    Load,
    Unload,
    Charge,
    Park,
}

/// Why a sub-task was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelType {
    Operator,
    VehicleOffline,
    Upstream,
}

/// One sub-task bound to one vehicle, with its route bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPath {
    pub vehicle_id: String,
    pub task_id: String,
    pub task_code: String,
    pub task_group: Option<String>,
    pub sub_task_type: SubTaskType,
    pub sub_task_no: u32,
    /// Last sub-task of its task
    pub is_final: bool,
    pub map_id: i32,
    pub origin: Waypoint,
    pub destination: Waypoint,

    pub action_code: i32,
    pub action_start: bool,
    pub action_no: u32,
    pub action_parameter: Option<String>,

    /// Intended full route
    pub expect_routes: Vec<Waypoint>,
    /// Route committed to the vehicle
    pub running_routes: Vec<Waypoint>,
    /// Pending re-plan
    pub new_plan_routes: Vec<Waypoint>,
    /// Waypoints already passed
    pub traveled_routes: Vec<Waypoint>,

    state: PlanState,
    before_state: Option<PlanState>,
    current_plan: PlanFlag,
    pub plan_origin: Option<Waypoint>,
    pub plan_destination: Option<Waypoint>,
    pub path_code: Option<String>,
    pub last_path_code: Option<String>,
    pub cancel_type: Option<CancelType>,

    pub expected_cost: f64,
    pub realized_cost: f64,
    pub expected_next_point: Option<Waypoint>,
    /// Blocked by traffic at the last planning attempt
    pub traffic_blocked: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskPath {
    pub fn new(vehicle_id: impl Into<String>, task: &TransportTask, sub_task_no: u32) -> Self {
        let now = Utc::now();
        Self {
            vehicle_id: vehicle_id.into(),
            task_id: format!("{}-{}", task.code, sub_task_no),
            task_code: task.code.clone(),
            task_group: task.group.clone(),
            sub_task_type: SubTaskType::Move,
            sub_task_no,
            is_final: true,
            map_id: task.map_id,
            origin: task.origin,
            destination: task.destination,
            action_code: task.action_code,
            action_start: false,
            action_no: 0,
            action_parameter: task.action_parameter.clone(),
            expect_routes: Vec::new(),
            running_routes: Vec::new(),
            new_plan_routes: Vec::new(),
            traveled_routes: Vec::new(),
            state: PlanState::New,
            before_state: None,
            current_plan: PlanFlag::Unplanned,
            plan_origin: None,
            plan_destination: None,
            path_code: None,
            last_path_code: None,
            cancel_type: None,
            expected_cost: 0.0,
            realized_cost: 0.0,
            expected_next_point: None,
            traffic_blocked: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    pub fn before_state(&self) -> Option<PlanState> {
        self.before_state
    }

    pub fn current_plan(&self) -> PlanFlag {
        self.current_plan
    }

    pub fn set_current_plan(&mut self, flag: PlanFlag) {
        self.current_plan = flag;
        self.updated_at = Utc::now();
    }

    /// Unconditional state write. Always drops the planning flag back to unplanned.
    pub fn set_state(&mut self, state: PlanState) {
        self.before_state = Some(self.state);
        self.state = state;
        self.current_plan = PlanFlag::Unplanned;
        self.updated_at = Utc::now();
    }

    /// Checked state write following the lifecycle graph.
    pub fn transition(&mut self, state: PlanState) -> Result<()> {
        if !self.state.can_transition_to(state) {
            return Err(FleetError::InvalidStateTransition {
                from: self.state.to_string(),
                to: state.to_string(),
            });
        }
        self.set_state(state);
        Ok(())
    }

    /// Append a committed segment, dropping a duplicated joint waypoint.
    pub fn add_running_routes(&mut self, points: &[Waypoint]) {
        let skip = match (self.running_routes.last(), points.first()) {
            (Some(last), Some(first)) if last == first => 1,
            _ => 0,
        };
        self.running_routes.extend_from_slice(&points[skip..]);
        self.new_plan_routes.clear();
        self.updated_at = Utc::now();
    }

    pub fn add_traveled_routes(&mut self, points: &[Waypoint]) {
        self.traveled_routes.extend_from_slice(points);
        self.updated_at = Utc::now();
    }

    /// Committed route minus as many leading waypoints as have been traveled
    pub fn effective_running_points(&self) -> Vec<Waypoint> {
        self.running_routes
            .iter()
            .skip(self.traveled_routes.len())
            .copied()
            .collect()
    }

    /// Index gap in `expect_routes` between `current` and the earliest of `candidates`.
    ///
    /// `None` when `current` or every candidate is absent from the expected route.
    pub fn point_distance(&self, candidates: &[Waypoint], current: &Waypoint) -> Option<usize> {
        let current_idx = self.expect_routes.iter().position(|p| p == current)?;
        let nearest = candidates
            .iter()
            .filter_map(|c| self.expect_routes.iter().position(|p| p == c))
            .min()?;
        Some(current_idx.abs_diff(nearest))
    }

    /// Last waypoint the vehicle has been committed to, if any
    pub fn running_end(&self) -> Option<Waypoint> {
        self.running_routes.last().copied()
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(id: i32) -> Waypoint {
        Waypoint::new(1, id)
    }

    fn task_path() -> TaskPath {
        let task = TransportTask::new("T100", wp(1), wp(5));
        TaskPath::new("AGV1", &task, 1)
    }

    #[test]
    fn test_set_state_always_resets_plan_flag() {
        for flag in [PlanFlag::Unplanned, PlanFlag::Planned, PlanFlag::Planning] {
            for state in PlanState::ALL {
                let mut tp = task_path();
                tp.set_current_plan(flag);
                tp.set_state(state);
                assert_eq!(tp.current_plan(), PlanFlag::Unplanned);
                assert_eq!(tp.state(), state);
            }
        }
    }

    #[test]
    fn test_set_state_records_previous() {
        let mut tp = task_path();
        tp.set_state(PlanState::Run);
        tp.set_state(PlanState::Pause);
        assert_eq!(tp.before_state(), Some(PlanState::Run));
    }

    #[test]
    fn test_checked_transition() {
        let mut tp = task_path();
        tp.set_current_plan(PlanFlag::Planned);
        assert!(tp.transition(PlanState::Run).is_ok());
        assert_eq!(tp.current_plan(), PlanFlag::Unplanned);

        let err = tp.transition(PlanState::New).unwrap_err();
        assert!(matches!(err, FleetError::InvalidStateTransition { .. }));
        assert_eq!(tp.state(), PlanState::Run);
    }

    #[test]
    fn test_add_running_routes_dedups_joint() {
        let mut tp = task_path();
        tp.new_plan_routes = vec![wp(3), wp(4)];
        tp.add_running_routes(&[wp(1), wp(2), wp(3)]);
        assert!(tp.new_plan_routes.is_empty());

        tp.add_running_routes(&[wp(3), wp(4)]);
        assert_eq!(tp.running_routes, vec![wp(1), wp(2), wp(3), wp(4)]);

        // A non-matching join is appended as is
        tp.add_running_routes(&[wp(9)]);
        assert_eq!(tp.running_routes.len(), 5);

        tp.add_running_routes(&[]);
        assert_eq!(tp.running_routes.len(), 5);
    }

    #[test]
    fn test_effective_running_points() {
        let mut tp = task_path();
        tp.add_running_routes(&[wp(1), wp(2), wp(3)]);
        tp.add_traveled_routes(&[wp(1)]);
        assert_eq!(tp.effective_running_points(), vec![wp(2), wp(3)]);

        tp.add_traveled_routes(&[wp(2), wp(3), wp(4)]);
        assert!(tp.effective_running_points().is_empty());
    }

    #[test]
    fn test_point_distance() {
        let mut tp = task_path();
        tp.expect_routes = vec![wp(1), wp(2), wp(3), wp(4), wp(5)];

        // Candidate order does not matter, the earliest match wins
        assert_eq!(tp.point_distance(&[wp(5), wp(4)], &wp(2)), Some(2));
        assert_eq!(tp.point_distance(&[wp(1)], &wp(4)), Some(3));
        assert_eq!(tp.point_distance(&[wp(9)], &wp(2)), None);
        assert_eq!(tp.point_distance(&[wp(3)], &wp(9)), None);
    }
}
