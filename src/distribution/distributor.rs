//! Task distribution keyed on lifecycle state.
//!
//! A NEW task gets a vehicle from the allocation strategy (or the one it
//! names). Any later state re-resolves the vehicle already bound to it.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::mode::{build_strategy, AllocationStrategy, SelectionContext};
use crate::config::DistributionConfig;
use crate::domain::{
    PlanState, ReportedTaskState, RoadNetwork, TransportTask, Vehicle, VehicleRegistry,
};
use crate::lifecycle::TaskPathManager;

/// Handler chosen by the task's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateHandler {
    New,
    InProgress,
}

impl StateHandler {
    pub fn for_state(state: PlanState) -> StateHandler {
        if state == PlanState::New {
            StateHandler::New
        } else {
            StateHandler::InProgress
        }
    }
}

pub struct TaskDistributor {
    registry: Arc<VehicleRegistry>,
    network: Arc<dyn RoadNetwork>,
    paths: Arc<TaskPathManager>,
    strategy: Box<dyn AllocationStrategy>,
    config: DistributionConfig,
}

impl TaskDistributor {
    pub fn new(
        registry: Arc<VehicleRegistry>,
        network: Arc<dyn RoadNetwork>,
        paths: Arc<TaskPathManager>,
        config: DistributionConfig,
        custom: Option<Arc<dyn AllocationStrategy>>,
    ) -> Self {
        let strategy = build_strategy(&config, custom);
        info!(mode = %config.mode, strategy = strategy.name(), "task distribution ready");
        Self {
            registry,
            network,
            paths,
            strategy,
            config,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Vehicle that should execute `task`, or `None` if nobody fits right now.
    pub fn distribute(&self, task: &TransportTask) -> Option<Vehicle> {
        match StateHandler::for_state(task.state) {
            StateHandler::New => self.select_new(task),
            StateHandler::InProgress => self.resolve_bound(task),
        }
    }

    fn select_new(&self, task: &TransportTask) -> Option<Vehicle> {
        let Some(code) = task.equipment_code.as_deref().filter(|c| !c.is_empty()) else {
            let ctx = SelectionContext {
                registry: &self.registry,
                network: self.network.as_ref(),
                lowest_work_battery: self.config.lowest_work_battery,
            };
            return self.strategy.select(task, &ctx);
        };

        let selected = self.registry.idle(code).or_else(|| {
            self.registry
                .cancellable_charging(code, self.config.lowest_work_battery)
        });
        if selected.is_none() {
            debug!(task = %task.code, vehicle = code, "requested vehicle is not available");
        }
        selected
    }

    fn resolve_bound(&self, task: &TransportTask) -> Option<Vehicle> {
        let code = task
            .equipment_code
            .clone()
            .filter(|c| !c.is_empty())
            .or_else(|| self.paths.vehicle_for_task(&task.code))?;

        let Some(vehicle) = self.registry.get(&code) else {
            warn!(task = %task.code, vehicle = %code, "bound vehicle is not registered");
            return None;
        };

        if self.config.revalidate_progress && !progress_consistent(task, &vehicle) {
            warn!(
                task = %task.code,
                vehicle = %vehicle.id,
                reported = ?vehicle.task_id,
                reported_state = ?vehicle.task_state,
                "vehicle progress does not match task"
            );
            return None;
        }
        Some(vehicle)
    }
}

/// The vehicle's own report must not contradict the task record.
pub fn progress_consistent(task: &TransportTask, vehicle: &Vehicle) -> bool {
    if let Some(reported) = vehicle.task_id.as_deref() {
        // Either the task code itself or one of its "{code}-{n}" sub-tasks
        let own_sub_task = reported
            .strip_prefix(task.code.as_str())
            .map(|rest| rest.is_empty() || rest.starts_with('-'))
            .unwrap_or(false);
        if !own_sub_task {
            return false;
        }
    }
    let vehicle_done = matches!(
        vehicle.task_state,
        ReportedTaskState::Finish | ReportedTaskState::Cancel
    );
    !(vehicle_done && !task.state.is_terminal())
}
