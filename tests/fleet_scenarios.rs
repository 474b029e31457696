//! End-to-end behaviour of the dispatch core through its public API.

use async_trait::async_trait;
use fleetcore::config::AppConfig;
use fleetcore::coordinator::{
    CommandSink, FleetCoordinator, PlanOutcome, RecordingSink, VehicleCommand, VehicleStateUpdate,
};
use fleetcore::domain::{
    CancelType, Envelope, MapGraph, PlanFlag, PlanState, Point, RoadNetwork, TaskPath,
    TransportTask, Vehicle, VehicleRegistry, VehicleState, Waypoint,
};
use fleetcore::error::{FleetError, Result};
use fleetcore::spatial::ShardedIndex;
use fleetcore::traffic::{TrafficCoordinator, UpdateOutcome};
use fleetcore::OrderedDispatcher;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn wp(id: i32) -> Waypoint {
    Waypoint::new(1, id)
}

/// 10x10 grid, 1000 apart; point n sits at ((n-1)%10, (n-1)/10) * 1000
fn grid() -> Arc<dyn RoadNetwork> {
    Arc::new(MapGraph::grid(1, 10, 10, 1000.0))
}

fn position(id: i32) -> Point {
    Point::new(f64::from((id - 1) % 10) * 1000.0, f64::from((id - 1) / 10) * 1000.0)
}

fn registry_with(vehicles: &[(&str, i32)]) -> Arc<VehicleRegistry> {
    let registry = Arc::new(VehicleRegistry::new());
    for (id, point) in vehicles {
        registry.upsert(Vehicle::new(*id, 1, position(*point), 300.0).at_point(*point));
    }
    registry
}

fn traffic(registry: Arc<VehicleRegistry>) -> TrafficCoordinator {
    let config = AppConfig::default_config(10_000.0, 10_000.0, 2);
    TrafficCoordinator::new(registry, grid(), &config.spatial, config.traffic)
}

// ---------------------------------------------------------------------------
// Spatial index
// ---------------------------------------------------------------------------

#[test]
fn test_query_finds_footprint_in_its_shard_only() {
    let index = ShardedIndex::new(Point::new(0.0, 0.0), 100.0, 100.0, 2);
    index.insert(Envelope::new(24.0, 26.0, 24.0, 26.0), "A".to_string());

    assert_eq!(index.query(&Envelope::new(20.0, 30.0, 20.0, 30.0)), vec!["A".to_string()]);
    assert!(index.query(&Envelope::new(80.0, 90.0, 80.0, 90.0)).is_empty());
}

#[test]
fn test_removed_items_never_come_back() {
    let index = ShardedIndex::new(Point::new(0.0, 0.0), 1000.0, 1000.0, 4);
    let mut rng = StdRng::seed_from_u64(11);
    let full = Envelope::new(-10.0, 1010.0, -10.0, 1010.0);

    let mut live = Vec::new();
    for i in 0..200 {
        let x = rng.gen_range(0.0..990.0);
        let y = rng.gen_range(0.0..990.0);
        let env = Envelope::new(x, x + 10.0, y, y + 10.0);
        index.insert(env, i);
        live.push((env, i));
    }

    for (env, item) in live.iter().filter(|(_, i)| i % 3 == 0) {
        assert!(index.remove(env, item));
        assert!(!index.query(env).contains(item));
        assert!(!index.query(&full).contains(item));
    }
    assert_eq!(index.size(), 200 - live.iter().filter(|(_, i)| i % 3 == 0).count());
}

#[test]
fn test_cross_shard_move_is_atomic_for_readers() {
    let index = Arc::new(ShardedIndex::new(Point::new(0.0, 0.0), 100.0, 100.0, 2));
    let west = Envelope::new(10.0, 12.0, 10.0, 12.0);
    let east = Envelope::new(80.0, 82.0, 80.0, 82.0);
    index.insert(west, "AGV1".to_string());

    let stop = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let index = Arc::clone(&index);
        let stop = Arc::clone(&stop);
        readers.push(std::thread::spawn(move || {
            let everything = Envelope::new(0.0, 100.0, 0.0, 100.0);
            let mut observed = 0u64;
            while !stop.load(Ordering::Relaxed) {
                assert_eq!(index.query(&everything).len(), 1);
                observed += 1;
            }
            observed
        }));
    }

    let id = "AGV1".to_string();
    for i in 0..2000 {
        let (from, to) = if i % 2 == 0 { (west, east) } else { (east, west) };
        assert!(index.move_item(&from, &id, to, id.clone()));
    }
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(index.size(), 1);
    assert_eq!(index.query(&west), vec![id]);
}

// ---------------------------------------------------------------------------
// Traffic
// ---------------------------------------------------------------------------

#[test]
fn test_repeated_update_skips_rebuild() {
    let coordinator = traffic(registry_with(&[("V1", 1)]));

    assert_eq!(coordinator.update("V1", &[wp(1), wp(2)], 300.0), UpdateOutcome::Rebuilt);
    let revision = coordinator.revision();
    assert_eq!(coordinator.update("V1", &[wp(1), wp(2)], 300.0), UpdateOutcome::Unchanged);
    assert_eq!(coordinator.revision(), revision);
}

#[test]
fn test_safe_plan_stops_before_reserved_corridor() {
    let coordinator = traffic(registry_with(&[("V1", 1), ("V2", 24)]));
    // V2 reserves the column segment (3000,1000)-(3000,2000)
    coordinator.update("V2", &[wp(14), wp(24)], 300.0);

    let candidate = [wp(1), wp(2), wp(3), wp(4), wp(5)];
    let safe = coordinator.find_safe_plan(1, "V1", &candidate, 500.0);

    assert_eq!(safe, vec![wp(1), wp(2), wp(3)]);
    assert_eq!(&candidate[..safe.len()], safe.as_slice());
    assert!(coordinator.is_plan_safe(1, "V1", &safe, 500.0));
}

#[test]
fn test_safe_plan_respects_parked_vehicle() {
    let registry = registry_with(&[("V1", 1), ("V2", 3)]);
    let coordinator = traffic(Arc::clone(&registry));
    coordinator.update_position("V2", position(3), 300.0);

    let safe = coordinator.find_safe_plan(1, "V1", &[wp(1), wp(2), wp(3), wp(4)], 300.0);
    assert_eq!(safe, vec![wp(1), wp(2)]);

    // Once V2 leaves the map its footprint no longer counts
    coordinator.release("V2");
    registry.remove("V2");
    assert_eq!(coordinator.find_safe_plan(1, "V1", &[wp(1), wp(2), wp(3)], 300.0).len(), 3);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_effective_running_points_skip_traveled() {
    let task = TransportTask::new("T1", wp(1), wp(3));
    let mut tp = TaskPath::new("AGV1", &task, 1);
    tp.add_running_routes(&[wp(1), wp(2), wp(3)]);
    tp.add_traveled_routes(&[wp(1)]);
    assert_eq!(tp.effective_running_points(), vec![wp(2), wp(3)]);
}

#[test]
fn test_set_state_always_clears_plan_flag() {
    let task = TransportTask::new("T1", wp(1), wp(3));
    for flag in [PlanFlag::Unplanned, PlanFlag::Planning, PlanFlag::Planned] {
        for state in PlanState::ALL {
            let mut tp = TaskPath::new("AGV1", &task, 1);
            tp.set_current_plan(flag);
            tp.set_state(state);
            assert_eq!(tp.current_plan(), PlanFlag::Unplanned);
            assert_eq!(tp.current_plan().code(), 0);
        }
    }
}

// ---------------------------------------------------------------------------
// Ordered dispatch
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatch_is_fifo_per_key() {
    let dispatcher = OrderedDispatcher::current().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    for n in 1..=1000u32 {
        let log = Arc::clone(&log);
        dispatcher.dispatch("AGV1", async move {
            log.lock().push(n);
            Ok(())
        });
    }

    assert!(dispatcher.flush(Duration::from_secs(10)).await);
    let log = log.lock();
    assert_eq!(log.len(), 1000);
    assert!(log.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_job_completes_before_second_starts() {
    let dispatcher = OrderedDispatcher::current().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let a = Arc::clone(&log);
    dispatcher.dispatch("AGV1", async move {
        a.lock().push("A started");
        tokio::time::sleep(Duration::from_millis(50)).await;
        a.lock().push("A completed");
        Ok(())
    });
    let b = Arc::clone(&log);
    dispatcher.dispatch("AGV1", async move {
        b.lock().push("B started");
        Ok(())
    });

    assert!(dispatcher.flush(Duration::from_secs(5)).await);
    assert_eq!(*log.lock(), vec!["A started", "A completed", "B started"]);
}

// ---------------------------------------------------------------------------
// Fleet coordinator
// ---------------------------------------------------------------------------

struct UnreachableSink;

#[async_trait]
impl CommandSink for UnreachableSink {
    async fn send(&self, vehicle_id: &str, _command: VehicleCommand) -> Result<()> {
        Err(FleetError::CommandDelivery {
            vehicle_id: vehicle_id.to_string(),
            reason: "no route to host".to_string(),
        })
    }
}

fn fleet(registry: Arc<VehicleRegistry>, sink: Arc<dyn CommandSink>) -> FleetCoordinator {
    let config = AppConfig::default_config(10_000.0, 10_000.0, 2);
    FleetCoordinator::new(config, registry, grid(), sink).unwrap()
}

#[tokio::test]
async fn test_commands_reach_vehicle_in_order() {
    let sink = Arc::new(RecordingSink::new());
    let fleet = fleet(registry_with(&[("AGV1", 1)]), sink.clone());

    fleet.assign(&TransportTask::new("T1", wp(1), wp(4)));
    fleet
        .paths()
        .update_first("AGV1", |tp| tp.expect_routes = vec![wp(1), wp(2), wp(3), wp(4)]);
    assert!(matches!(fleet.plan("AGV1", &[wp(1), wp(2)]), PlanOutcome::Committed(_)));
    fleet.pause("AGV1").unwrap();
    fleet.resume("AGV1").unwrap();
    assert_eq!(
        fleet.plan_remaining("AGV1"),
        PlanOutcome::Committed(vec![wp(2), wp(3), wp(4)])
    );
    let cancelled = fleet.cancel("AGV1", CancelType::Upstream).unwrap();
    assert_eq!(cancelled.running_routes, vec![wp(1), wp(2), wp(3), wp(4)]);

    assert!(fleet.dispatcher().flush(Duration::from_secs(5)).await);
    let kinds: Vec<&str> = sink.commands_for("AGV1").iter().map(|c| c.kind()).collect();
    assert_eq!(kinds, vec!["move", "pause", "resume", "move", "cancel"]);
    assert!(sink
        .commands_for("AGV1")
        .iter()
        .all(|c| c.task_id() == "T1-1"));
}

#[tokio::test]
async fn test_crossing_vehicle_waits_for_corridor() {
    let sink = Arc::new(RecordingSink::new());
    // AGV1 drives row 0 eastwards, AGV2 drives column 3 northwards across it
    let fleet = fleet(registry_with(&[("AGV1", 1), ("AGV2", 23)]), sink.clone());
    for vehicle in fleet.registry().all() {
        fleet.on_vehicle_state(
            VehicleStateUpdate::new(&vehicle.id, 1, vehicle.position)
                .at_point(vehicle.current_point.unwrap()),
        );
    }

    let east = [wp(1), wp(2), wp(3), wp(4), wp(5)];
    let north = [wp(23), wp(13), wp(3)];
    fleet.assign(&TransportTask::new("EAST", wp(1), wp(5)).for_vehicle("AGV1"));
    fleet.assign(&TransportTask::new("NORTH", wp(23), wp(3)).for_vehicle("AGV2"));

    assert_eq!(fleet.plan("AGV1", &east), PlanOutcome::Committed(east.to_vec()));
    // AGV2 stops one row short of AGV1's corridor
    assert_eq!(
        fleet.plan("AGV2", &north),
        PlanOutcome::Committed(vec![wp(23), wp(13)])
    );
    assert_eq!(fleet.plan_remaining("AGV2"), PlanOutcome::Deferred);
    assert!(fleet.paths().first("AGV2").unwrap().traffic_blocked);

    // AGV1 arrives and finishes; its corridor goes away
    fleet.on_vehicle_state(
        VehicleStateUpdate::new("AGV1", 1, position(5))
            .at_point(5)
            .with_route(vec![wp(5)]),
    );
    fleet.finish("AGV1").unwrap();

    assert_eq!(
        fleet.plan_remaining("AGV2"),
        PlanOutcome::Committed(vec![wp(13), wp(3)])
    );
    assert_eq!(
        fleet.paths().first("AGV2").unwrap().running_routes,
        north.to_vec()
    );
    assert!(fleet.dispatcher().flush(Duration::from_secs(5)).await);
    assert_eq!(sink.commands_for("AGV2").len(), 2);
}

#[tokio::test]
async fn test_unreachable_vehicle_goes_offline() {
    let registry = registry_with(&[("AGV1", 1)]);
    let fleet = fleet(Arc::clone(&registry), Arc::new(UnreachableSink));

    assert_eq!(fleet.assign(&TransportTask::new("T1", wp(1), wp(3))).as_deref(), Some("AGV1"));
    fleet.plan("AGV1", &[wp(1), wp(2), wp(3)]);

    assert!(fleet.dispatcher().flush(Duration::from_secs(5)).await);
    assert_eq!(registry.get("AGV1").unwrap().state, VehicleState::Offline);

    // An offline vehicle is not offered new work
    assert!(fleet.assign(&TransportTask::new("T2", wp(4), wp(5))).is_none());
}

#[tokio::test]
async fn test_snapshot_reflects_fleet() {
    let fleet = fleet(
        registry_with(&[("AGV1", 1), ("AGV2", 50)]),
        Arc::new(RecordingSink::new()),
    );
    fleet.assign(&TransportTask::new("T1", wp(1), wp(3)).for_vehicle("AGV1"));
    fleet.plan("AGV1", &[wp(1), wp(2), wp(3)]);
    assert!(fleet.dispatcher().flush(Duration::from_secs(5)).await);

    let snapshot = fleet.snapshot();
    assert_eq!(snapshot.vehicles.len(), 2);
    assert_eq!(snapshot.live_tasks, 1);
    assert_eq!(snapshot.traffic.reservations, 1);
    assert_eq!(snapshot.vehicles[0].reserved_waypoints, 3);
    assert_eq!(snapshot.vehicles[1].state, VehicleState::Idle);
    assert_eq!(snapshot.dispatched, 1);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["vehicles"][0]["vehicle_id"], "AGV1");
}
