//! Fleet coordinator: the control flow from vehicle report to emitted command.
//!
//! report → registry + footprint → traveled bookkeeping → corridor recompute
//! task  → distribution → sub-task
//! plan  → greedy safe prefix → commit + reserve → ordered command emission
//!
//! Every collaborator is constructed here and passed down explicitly.

use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::command::{CommandSink, VehicleCommand};
use super::state::{FleetSnapshot, VehicleSnapshot, VehicleStateUpdate};
use crate::config::AppConfig;
use crate::coordination::OrderedDispatcher;
use crate::distribution::{AllocationStrategy, TaskDistributor};
use crate::domain::{
    path_length, CancelType, PlanFlag, PlanState, ReportedTaskState, RoadNetwork, TaskPath,
    TransportTask, VehicleRegistry, VehicleState, Waypoint,
};
use crate::error::{FleetError, Result};
use crate::lifecycle::TaskPathManager;
use crate::traffic::{fingerprint, TrafficCoordinator, UpdateOutcome};

/// Result of a planning attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    /// This prefix was committed and sent to the vehicle
    Committed(Vec<Waypoint>),
    /// Nothing safe (or plannable) right now; try again later
    Deferred,
    /// Vehicle has no live sub-task
    NoTask,
}

pub struct FleetCoordinator {
    config: AppConfig,
    registry: Arc<VehicleRegistry>,
    network: Arc<dyn RoadNetwork>,
    traffic: Arc<TrafficCoordinator>,
    paths: Arc<TaskPathManager>,
    distributor: TaskDistributor,
    dispatcher: Arc<OrderedDispatcher>,
    sink: Arc<dyn CommandSink>,
}

impl FleetCoordinator {
    /// Wire every component onto the current tokio runtime.
    pub fn new(
        config: AppConfig,
        registry: Arc<VehicleRegistry>,
        network: Arc<dyn RoadNetwork>,
        sink: Arc<dyn CommandSink>,
    ) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| FleetError::DispatcherUnavailable(e.to_string()))?;
        Ok(Self::with_handle(config, registry, network, sink, handle, None))
    }

    /// Commands are drained on the runtime behind `handle`; `custom` backs the
    /// `customize` allocation mode.
    pub fn with_handle(
        config: AppConfig,
        registry: Arc<VehicleRegistry>,
        network: Arc<dyn RoadNetwork>,
        sink: Arc<dyn CommandSink>,
        handle: Handle,
        custom: Option<Arc<dyn AllocationStrategy>>,
    ) -> Self {
        let traffic = Arc::new(TrafficCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&network),
            &config.spatial,
            config.traffic.clone(),
        ));
        let paths = Arc::new(TaskPathManager::new());
        let distributor = TaskDistributor::new(
            Arc::clone(&registry),
            Arc::clone(&network),
            Arc::clone(&paths),
            config.distribution.clone(),
            custom,
        );

        info!(
            grid = config.spatial.grid_size,
            buffer_radius = config.traffic.buffer_radius,
            mode = %config.distribution.mode,
            "fleet coordinator ready"
        );

        Self {
            config,
            registry,
            network,
            traffic,
            paths,
            distributor,
            dispatcher: Arc::new(OrderedDispatcher::new(handle)),
            sink,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<VehicleRegistry> {
        &self.registry
    }

    pub fn traffic(&self) -> &Arc<TrafficCoordinator> {
        &self.traffic
    }

    pub fn paths(&self) -> &Arc<TaskPathManager> {
        &self.paths
    }

    pub fn dispatcher(&self) -> &Arc<OrderedDispatcher> {
        &self.dispatcher
    }

    /// Apply one device report. `None` when the vehicle is not registered.
    pub fn on_vehicle_state(&self, update: VehicleStateUpdate) -> Option<UpdateOutcome> {
        let id = update.vehicle_id.as_str();
        let radius = self.registry.update_with(id, |v| {
            v.map_id = update.map_id;
            v.position = update.position;
            v.current_point = update.current_point;
            if let Some(battery) = update.battery {
                v.battery = battery;
            }
            if let Some(state) = update.state {
                v.state = state;
            }
            if let Some(task_state) = update.task_state {
                v.task_state = task_state;
            }
            if update.task_id.is_some() {
                v.task_id = update.task_id.clone();
            }
            v.radius
        });
        let Some(radius) = radius else {
            debug!(vehicle_id = id, "report from unregistered vehicle ignored");
            return None;
        };

        self.traffic.update_position(id, update.position, radius);

        if let Some(point) = update.current_point {
            let here = Waypoint::new(update.map_id, point);
            self.paths.update_first(id, |tp| {
                let ahead = tp.effective_running_points();
                if let Some(idx) = ahead.iter().position(|w| *w == here) {
                    if idx > 0 {
                        tp.add_traveled_routes(&ahead[..idx]);
                        tp.expected_next_point = ahead.get(idx + 1).copied();
                    }
                }
            });
        }

        Some(
            self.traffic
                .update(id, &update.remaining_route, self.config.traffic.buffer_radius),
        )
    }

    /// Pick a vehicle for `task` and queue a sub-task for it.
    ///
    /// A task already past NEW only has its bound vehicle re-validated.
    pub fn assign(&self, task: &TransportTask) -> Option<String> {
        let vehicle = self.distributor.distribute(task)?;
        if task.state != PlanState::New {
            debug!(task = %task.code, vehicle_id = %vehicle.id, "bound vehicle still valid");
            return Some(vehicle.id);
        }

        let sub_task_no = self.paths.get(&vehicle.id).len() as u32 + 1;
        let path = TaskPath::new(&vehicle.id, task, sub_task_no);
        let task_id = path.task_id.clone();
        self.paths.put(path);

        self.registry.update_with(&vehicle.id, |v| {
            v.state = VehicleState::Busy;
            v.task_id = Some(task_id.clone());
            v.task_state = ReportedTaskState::Have;
        });
        info!(task = %task.code, task_id = %task_id, vehicle_id = %vehicle.id, "task assigned");
        Some(vehicle.id)
    }

    /// Try to commit as much of `candidate` as is safe right now.
    pub fn plan(&self, vehicle_id: &str, candidate: &[Waypoint]) -> PlanOutcome {
        let Some(current) = self.paths.first(vehicle_id) else {
            return PlanOutcome::NoTask;
        };
        if current.state().is_terminal() {
            return PlanOutcome::NoTask;
        }
        if !current.state().needs_plan() || candidate.is_empty() {
            return PlanOutcome::Deferred;
        }

        self.paths.update_first(vehicle_id, |tp| {
            if tp.expect_routes.is_empty() {
                tp.expect_routes = candidate.to_vec();
            }
            tp.new_plan_routes = candidate.to_vec();
            tp.set_current_plan(PlanFlag::Planning);
        });

        let safe = self.traffic.find_safe_plan(
            current.map_id,
            vehicle_id,
            candidate,
            self.config.traffic.safety_buffer,
        );
        // A lone joint waypoint adds nothing to what is already committed
        let stalled = safe.len() == 1 && current.running_end() == safe.first().copied();
        if safe.is_empty() || stalled {
            self.paths.update_first(vehicle_id, |tp| {
                tp.traffic_blocked = true;
                tp.set_current_plan(PlanFlag::Unplanned);
            });
            debug!(vehicle_id, "no safe prefix, plan deferred");
            return PlanOutcome::Deferred;
        }

        let cost = path_length(&safe, self.network.as_ref());
        let committed = self.paths.update_first(vehicle_id, |tp| {
            tp.add_running_routes(&safe);
            tp.traffic_blocked = false;
            tp.plan_origin = safe.first().copied();
            tp.plan_destination = safe.last().copied();
            tp.last_path_code = tp.path_code.take();
            tp.path_code = Some(fingerprint(&safe));
            tp.expected_cost += cost;
            if tp.state() != PlanState::Run && tp.state().can_transition_to(PlanState::Run) {
                tp.set_state(PlanState::Run);
            }
            tp.set_current_plan(PlanFlag::Planned);
            (tp.task_id.clone(), tp.effective_running_points())
        });
        // Sub-task vanished between the two writes
        let Some((task_id, remaining)) = committed else {
            return PlanOutcome::NoTask;
        };

        self.traffic
            .update(vehicle_id, &remaining, self.config.traffic.buffer_radius);
        self.emit(
            vehicle_id,
            VehicleCommand::Move {
                task_id,
                route: safe.clone(),
            },
        );
        PlanOutcome::Committed(safe)
    }

    /// Plan the part of the expected route not yet committed.
    pub fn plan_remaining(&self, vehicle_id: &str) -> PlanOutcome {
        let Some(current) = self.paths.first(vehicle_id) else {
            return PlanOutcome::NoTask;
        };
        let pending = pending_route(&current);
        if pending.len() < 2 && !current.running_routes.is_empty() {
            return PlanOutcome::Deferred;
        }
        self.plan(vehicle_id, &pending)
    }

    pub fn pause(&self, vehicle_id: &str) -> Result<()> {
        let task_id = self.transition_first(vehicle_id, PlanState::Pause)?;
        self.emit(vehicle_id, VehicleCommand::Pause { task_id });
        Ok(())
    }

    /// Resume driving; the sub-task must be planned again before moving on.
    pub fn resume(&self, vehicle_id: &str) -> Result<()> {
        let task_id = self.transition_first(vehicle_id, PlanState::Run)?;
        self.emit(vehicle_id, VehicleCommand::Resume { task_id });
        Ok(())
    }

    /// Cancel the active sub-task and hand it back for persistence.
    pub fn cancel(&self, vehicle_id: &str, cancel_type: CancelType) -> Result<TaskPath> {
        let task_id = self.transition_first(vehicle_id, PlanState::Cancel)?;
        let mut done = self.close_first(vehicle_id)?;
        done.cancel_type = Some(cancel_type);
        self.emit(vehicle_id, VehicleCommand::Cancel { task_id });
        info!(vehicle_id, task_id = %done.task_id, ?cancel_type, "sub-task cancelled");
        Ok(done)
    }

    /// Complete the active sub-task and hand it back for persistence.
    pub fn finish(&self, vehicle_id: &str) -> Result<TaskPath> {
        self.transition_first(vehicle_id, PlanState::Finish)?;
        let mut done = self.close_first(vehicle_id)?;
        // Traveled points plus the one the vehicle stands on
        let mut driven = done.traveled_routes.clone();
        driven.extend(done.effective_running_points().first());
        done.realized_cost = path_length(&driven, self.network.as_ref());
        info!(vehicle_id, task_id = %done.task_id, "sub-task finished");
        Ok(done)
    }

    /// Device went away: drop its corridor and footprint, and its executor once idle.
    pub fn vehicle_offline(&self, vehicle_id: &str) {
        self.dispatcher.unregister(vehicle_id);
        self.traffic.release(vehicle_id);
        if !self.registry.mark_offline(vehicle_id) {
            debug!(vehicle_id, "offline notice for unregistered vehicle");
        }
        warn!(vehicle_id, "vehicle offline");
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        let vehicles = self
            .registry
            .all()
            .into_iter()
            .map(|v| VehicleSnapshot {
                live_tasks: self.paths.get(&v.id).len(),
                reserved_waypoints: self
                    .traffic
                    .reservation(&v.id)
                    .map(|r| r.route.len())
                    .unwrap_or(0),
                vehicle_id: v.id,
                state: v.state,
                position: v.position,
            })
            .collect();
        FleetSnapshot::new(
            vehicles,
            self.paths.len(),
            self.traffic.stats(),
            self.dispatcher.stats(),
        )
    }

    fn transition_first(&self, vehicle_id: &str, state: PlanState) -> Result<String> {
        self.paths
            .update_first(vehicle_id, |tp| {
                tp.transition(state).map(|_| tp.task_id.clone())
            })
            .ok_or_else(|| FleetError::NoActiveTask(vehicle_id.to_string()))?
    }

    /// Remove the head sub-task, release its corridor and free the vehicle.
    fn close_first(&self, vehicle_id: &str) -> Result<TaskPath> {
        let done = self
            .paths
            .remove_first(vehicle_id)
            .ok_or_else(|| FleetError::NoActiveTask(vehicle_id.to_string()))?;
        self.traffic.update(vehicle_id, &[], 0.0);
        if !self.paths.has_task(vehicle_id) {
            self.registry.update_with(vehicle_id, |v| {
                if v.state == VehicleState::Busy {
                    v.state = VehicleState::Idle;
                }
                v.task_id = None;
                v.task_state = ReportedTaskState::None;
            });
        }
        Ok(done)
    }

    /// Queue a command behind earlier ones for the same vehicle.
    fn emit(&self, vehicle_id: &str, command: VehicleCommand) {
        let sink = Arc::clone(&self.sink);
        let registry = Arc::clone(&self.registry);
        let id = vehicle_id.to_string();
        let request_id = Uuid::new_v4();
        debug!(vehicle_id, %request_id, kind = command.kind(), "command queued");
        self.dispatcher.dispatch(vehicle_id, async move {
            let kind = command.kind();
            match sink.send(&id, command).await {
                Ok(()) => {
                    debug!(vehicle_id = %id, %request_id, kind, "command delivered");
                    Ok(())
                }
                Err(e) => {
                    if e.is_delivery_failure() {
                        registry.mark_offline(&id);
                        warn!(
                            vehicle_id = %id,
                            %request_id,
                            kind,
                            error = %e,
                            "delivery failed, vehicle marked offline"
                        );
                    }
                    Err(e)
                }
            }
        });
    }
}

/// Expected-route tail starting at the last committed waypoint.
pub fn pending_route(path: &TaskPath) -> Vec<Waypoint> {
    match path.running_end() {
        None => path.expect_routes.clone(),
        Some(end) => match path.expect_routes.iter().position(|w| *w == end) {
            Some(idx) => path.expect_routes[idx..].to_vec(),
            None => Vec::new(),
        },
    }
}
