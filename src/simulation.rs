//! In-process fleet simulation
//!
//! Drives a [`FleetCoordinator`] over a grid map with simulated vehicles that
//! move one waypoint per tick along whatever has been committed to them.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::coordinator::{
    CommandSink, FleetCoordinator, FleetSnapshot, LoggingSink, PlanOutcome, VehicleStateUpdate,
};
use crate::domain::{
    MapGraph, PlanState, RoadNetwork, TransportTask, Vehicle, VehicleRegistry, Waypoint,
};
use crate::error::{FleetError, Result};

const MAP_ID: i32 = 1;
const SPACING: f64 = 1000.0;
const VEHICLE_RADIUS: f64 = 300.0;

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub vehicles: usize,
    pub ticks: u64,
    /// Random seed; drawn from entropy when absent
    pub seed: Option<u64>,
    /// Chance of a new transport task per tick
    pub task_rate: f64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            vehicles: 4,
            ticks: 100,
            seed: None,
            task_rate: 0.5,
        }
    }
}

/// Counters gathered over one run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub run_id: Uuid,
    pub seed: u64,
    pub vehicles: usize,
    pub ticks: u64,
    pub grid_side: i32,
    pub tasks_created: u64,
    pub tasks_assigned: u64,
    pub tasks_unassigned: u64,
    pub tasks_finished: u64,
    pub plans_committed: u64,
    pub plans_deferred: u64,
    pub commands_sent: u64,
    pub commands_flushed: bool,
    pub fleet: FleetSnapshot,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Simulation {}: {} vehicles, {} ticks, {}x{} grid, seed {}",
            self.run_id, self.vehicles, self.ticks, self.grid_side, self.grid_side, self.seed
        )?;
        writeln!(
            f,
            "  tasks:    created={} assigned={} unassigned={} finished={}",
            self.tasks_created, self.tasks_assigned, self.tasks_unassigned, self.tasks_finished
        )?;
        writeln!(
            f,
            "  planning: committed={} deferred={}",
            self.plans_committed, self.plans_deferred
        )?;
        writeln!(
            f,
            "  commands: sent={} flushed={}",
            self.commands_sent, self.commands_flushed
        )?;
        writeln!(f, "  traffic:  {}", self.fleet.traffic)?;
        write!(f, "  live sub-tasks at end: {}", self.fleet.live_tasks)
    }
}

struct Simulation {
    fleet: FleetCoordinator,
    map: Arc<MapGraph>,
    rng: StdRng,
    report: SimulationReport,
}

/// Run a whole simulation on the current tokio runtime.
pub async fn run(mut config: AppConfig, options: SimulationOptions) -> Result<SimulationReport> {
    if options.vehicles == 0 {
        return Err(FleetError::Validation(
            "simulation needs at least one vehicle".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&options.task_rate) {
        return Err(FleetError::Validation(format!(
            "task rate must be within 0..=1, got {}",
            options.task_rate
        )));
    }

    let seed = options.seed.unwrap_or_else(rand::random);
    let side = grid_side(options.vehicles);
    let extent = f64::from(side) * SPACING;
    config.spatial.width = config.spatial.width.max(extent);
    config.spatial.height = config.spatial.height.max(extent);
    config.validate().map_err(|e| FleetError::InvalidConfig(e.join("; ")))?;

    let map = Arc::new(MapGraph::grid(MAP_ID, side, side, SPACING));
    let registry = Arc::new(VehicleRegistry::new());
    let total = (side * side) as usize;
    for i in 0..options.vehicles {
        let point = (i * total / options.vehicles) as i32 + 1;
        let waypoint = Waypoint::new(MAP_ID, point);
        let position = map
            .position(&waypoint)
            .ok_or_else(|| FleetError::Internal(format!("grid has no point {waypoint}")))?;
        registry.upsert(
            Vehicle::new(format!("AGV{:03}", i + 1), MAP_ID, position, VEHICLE_RADIUS)
                .at_point(point),
        );
    }

    let sink = Arc::new(LoggingSink::new());
    let network: Arc<dyn RoadNetwork> = map.clone();
    let command_sink: Arc<dyn CommandSink> = sink.clone();
    let fleet = FleetCoordinator::new(config, registry, network, command_sink)?;
    // Initial reports put every vehicle's footprint into the index
    for vehicle in fleet.registry().all() {
        let mut update = VehicleStateUpdate::new(&vehicle.id, vehicle.map_id, vehicle.position);
        update.current_point = vehicle.current_point;
        fleet.on_vehicle_state(update);
    }

    let run_id = Uuid::new_v4();
    info!(
        %run_id,
        vehicles = options.vehicles,
        ticks = options.ticks,
        seed,
        grid = side,
        "simulation starting"
    );

    let mut sim = Simulation {
        report: SimulationReport {
            run_id,
            seed,
            vehicles: options.vehicles,
            ticks: options.ticks,
            grid_side: side,
            tasks_created: 0,
            tasks_assigned: 0,
            tasks_unassigned: 0,
            tasks_finished: 0,
            plans_committed: 0,
            plans_deferred: 0,
            commands_sent: 0,
            commands_flushed: false,
            fleet: fleet.snapshot(),
        },
        fleet,
        map,
        rng: StdRng::seed_from_u64(seed),
    };

    for tick in 0..options.ticks {
        if sim.rng.gen_bool(options.task_rate) {
            sim.spawn_task(tick)?;
        }
        sim.plan_all();
        sim.advance_all()?;
        // Give drain workers a chance between ticks
        tokio::task::yield_now().await;
    }

    sim.report.commands_flushed = sim.fleet.dispatcher().flush(Duration::from_secs(5)).await;
    if !sim.report.commands_flushed {
        warn!("command queues still busy at end of simulation");
    }
    sim.report.commands_sent = sink.sent();
    sim.report.fleet = sim.fleet.snapshot();
    info!(
        finished = sim.report.tasks_finished,
        committed = sim.report.plans_committed,
        deferred = sim.report.plans_deferred,
        "simulation complete"
    );
    Ok(sim.report)
}

/// Side of a square grid with roughly four points per vehicle.
pub fn grid_side(vehicles: usize) -> i32 {
    ((vehicles as f64 * 4.0).sqrt().ceil() as i32).max(4)
}

impl Simulation {
    fn spawn_task(&mut self, tick: u64) -> Result<()> {
        let total = self.map.point_count() as i32;
        let origin = Waypoint::new(MAP_ID, self.rng.gen_range(1..=total));
        let mut destination = origin;
        while destination == origin {
            destination = Waypoint::new(MAP_ID, self.rng.gen_range(1..=total));
        }
        let task = TransportTask::new(format!("SIM{tick:05}"), origin, destination);
        self.report.tasks_created += 1;

        let Some(vehicle_id) = self.fleet.assign(&task) else {
            debug!(task = %task.code, "no vehicle available");
            self.report.tasks_unassigned += 1;
            return Ok(());
        };
        self.report.tasks_assigned += 1;

        let vehicle = self
            .fleet
            .registry()
            .get(&vehicle_id)
            .ok_or_else(|| FleetError::UnknownVehicle(vehicle_id.clone()))?;
        let start = vehicle
            .waypoint()
            .ok_or_else(|| FleetError::Internal(format!("{vehicle_id} is not on a waypoint")))?;

        let occupied = self.occupied_points(&vehicle_id);
        let mut route = shortest_route(&self.map, start, origin, &occupied)
            .or_else(|| shortest_route(&self.map, start, origin, &HashSet::new()))
            .unwrap_or_else(|| vec![start]);
        if let Some(tail) = shortest_route(&self.map, origin, destination, &occupied)
            .or_else(|| shortest_route(&self.map, origin, destination, &HashSet::new()))
        {
            route.extend_from_slice(&tail[1..]);
        }

        self.fleet
            .paths()
            .update_first(&vehicle_id, |tp| tp.expect_routes = route);
        Ok(())
    }

    fn plan_all(&mut self) {
        for vehicle_id in self.fleet.paths().vehicles() {
            match self.fleet.plan_remaining(&vehicle_id) {
                PlanOutcome::Committed(_) => self.report.plans_committed += 1,
                PlanOutcome::Deferred => self.report.plans_deferred += 1,
                PlanOutcome::NoTask => {}
            }
        }
    }

    fn advance_all(&mut self) -> Result<()> {
        for vehicle_id in self.fleet.paths().vehicles() {
            let Some(tp) = self.fleet.paths().first(&vehicle_id) else {
                continue;
            };
            if tp.state() != PlanState::Run {
                continue;
            }
            let ahead = tp.effective_running_points();
            match ahead.as_slice() {
                [] => {}
                [last] => {
                    let done = Some(*last) == tp.expect_routes.last().copied();
                    if done {
                        self.report_at(&vehicle_id, *last, Vec::new());
                        self.fleet.finish(&vehicle_id)?;
                        self.report.tasks_finished += 1;
                    }
                }
                [_, next, ..] => {
                    let next = *next;
                    self.report_at(&vehicle_id, next, ahead[1..].to_vec());
                }
            }
        }
        Ok(())
    }

    fn report_at(&self, vehicle_id: &str, point: Waypoint, remaining: Vec<Waypoint>) {
        let Some(position) = self.map.position(&point) else {
            return;
        };
        let update = VehicleStateUpdate::new(vehicle_id, point.map_id, position)
            .at_point(point.id)
            .with_route(remaining);
        self.fleet.on_vehicle_state(update);
    }

    /// Points other vehicles are parked on
    fn occupied_points(&self, except: &str) -> HashSet<Waypoint> {
        self.fleet
            .registry()
            .all()
            .into_iter()
            .filter(|v| v.id != except)
            .filter_map(|v| v.waypoint())
            .collect()
    }
}

/// Breadth-first route over the map's edges, never entering `avoid`.
pub fn shortest_route(
    map: &MapGraph,
    from: Waypoint,
    to: Waypoint,
    avoid: &HashSet<Waypoint>,
) -> Option<Vec<Waypoint>> {
    if from == to {
        return Some(vec![from]);
    }
    let mut came_from: HashMap<Waypoint, Waypoint> = HashMap::new();
    let mut queue = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        for next in map.neighbours(&current) {
            if next == from || came_from.contains_key(&next) || avoid.contains(&next) {
                continue;
            }
            came_from.insert(next, current);
            if next == to {
                let mut route = vec![to];
                let mut cursor = to;
                while let Some(prev) = came_from.get(&cursor) {
                    route.push(*prev);
                    cursor = *prev;
                }
                route.reverse();
                return Some(route);
            }
            queue.push_back(next);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(id: i32) -> Waypoint {
        Waypoint::new(MAP_ID, id)
    }

    #[test]
    fn test_grid_side() {
        assert_eq!(grid_side(1), 4);
        assert_eq!(grid_side(4), 4);
        assert_eq!(grid_side(10), 7);
    }

    #[test]
    fn test_shortest_route_detours_around_obstacles() {
        let map = MapGraph::grid(MAP_ID, 3, 3, SPACING);
        // 1 2 3
        // 4 5 6
        // 7 8 9
        let direct = shortest_route(&map, wp(1), wp(3), &HashSet::new()).unwrap();
        assert_eq!(direct, vec![wp(1), wp(2), wp(3)]);

        let avoid = HashSet::from([wp(2)]);
        let detour = shortest_route(&map, wp(1), wp(3), &avoid).unwrap();
        assert_eq!(detour.len(), 5);
        assert!(!detour.contains(&wp(2)));

        let walled = HashSet::from([wp(2), wp(4)]);
        assert!(shortest_route(&map, wp(1), wp(9), &walled).is_none());
        assert_eq!(shortest_route(&map, wp(5), wp(5), &walled), Some(vec![wp(5)]));
    }

    #[tokio::test]
    async fn test_seeded_run_is_deterministic() {
        let options = SimulationOptions {
            vehicles: 3,
            ticks: 40,
            seed: Some(7),
            task_rate: 0.6,
        };
        let config = AppConfig::default();
        let first = run(config.clone(), options.clone()).await.unwrap();
        let second = run(config, options).await.unwrap();

        assert_eq!(first.tasks_created, second.tasks_created);
        assert_eq!(first.tasks_finished, second.tasks_finished);
        assert_eq!(first.plans_committed, second.plans_committed);
        assert!(first.commands_flushed);
        assert_eq!(first.tasks_assigned + first.tasks_unassigned, first.tasks_created);
        assert!(first.commands_sent >= first.plans_committed);
    }

    #[tokio::test]
    async fn test_rejects_empty_fleet() {
        let options = SimulationOptions {
            vehicles: 0,
            ..SimulationOptions::default()
        };
        assert!(matches!(
            run(AppConfig::default(), options).await,
            Err(FleetError::Validation(_))
        ));
    }
}
