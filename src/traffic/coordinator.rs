//! Traffic coordinator
//!
//! Keeps one reserved corridor per vehicle for its remaining route and
//! answers "is this candidate route clear of everyone else" queries.
//!
//! Each reservation (corridor + route fingerprint) is stored behind one `Arc`
//! and replaced as a unit, so a reader never sees a fingerprint paired with
//! another route's corridor. Different vehicles' entries are independent;
//! a planning query may see some of them one update behind.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{SpatialConfig, TrafficConfig};
use crate::domain::{
    build_path_geometry, check_collision, Corridor, Envelope, Point, RoadNetwork, Shape,
    VehicleRegistry, Waypoint,
};
use crate::spatial::ShardedIndex;

/// A vehicle's claimed corridor for its remaining route
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub vehicle_id: String,
    pub map_id: i32,
    pub fingerprint: String,
    pub route: Vec<Waypoint>,
    pub corridor: Corridor,
    /// Coordinator revision at which this corridor was built
    pub revision: u64,
}

impl Reservation {
    pub fn envelope(&self) -> Envelope {
        self.corridor.envelope()
    }
}

/// What `update` did with the reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No remaining route; reservation dropped
    Cleared,
    /// Same route as before; nothing rebuilt
    Unchanged,
    /// Corridor rebuilt and replaced
    Rebuilt,
    /// Route had unknown waypoints; treated as no reservation
    Unresolved,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrafficStats {
    pub reservations: usize,
    pub footprints: usize,
    pub revision: u64,
}

impl fmt::Display for TrafficStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reservations={} footprints={} revision={}",
            self.reservations, self.footprints, self.revision
        )
    }
}

/// Ordered, map-qualified waypoint sequence
pub fn fingerprint(route: &[Waypoint]) -> String {
    route
        .iter()
        .map(|w| w.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub struct TrafficCoordinator {
    registry: Arc<VehicleRegistry>,
    network: Arc<dyn RoadNetwork>,
    reservations: DashMap<String, Arc<Reservation>>,
    footprints: ShardedIndex<String>,
    /// Last footprint envelope per vehicle, needed to move it in the index
    positions: DashMap<String, Envelope>,
    revision: AtomicU64,
    config: TrafficConfig,
}

impl TrafficCoordinator {
    pub fn new(
        registry: Arc<VehicleRegistry>,
        network: Arc<dyn RoadNetwork>,
        spatial: &SpatialConfig,
        config: TrafficConfig,
    ) -> Self {
        Self {
            registry,
            network,
            reservations: DashMap::new(),
            footprints: ShardedIndex::from_config(spatial),
            positions: DashMap::new(),
            revision: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &TrafficConfig {
        &self.config
    }

    /// Number of corridor rebuilds so far
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Replace the vehicle's reservation with one covering `remaining_route`.
    pub fn update(
        &self,
        vehicle_id: &str,
        remaining_route: &[Waypoint],
        buffer_radius: f64,
    ) -> UpdateOutcome {
        let Some(first) = remaining_route.first() else {
            if self.reservations.remove(vehicle_id).is_some() {
                debug!(vehicle_id, "reservation cleared");
            }
            return UpdateOutcome::Cleared;
        };

        let print = fingerprint(remaining_route);
        if let Some(current) = self.reservations.get(vehicle_id) {
            if current.fingerprint == print {
                return UpdateOutcome::Unchanged;
            }
        }

        let Some(skeleton) = build_path_geometry(remaining_route, self.network.as_ref()) else {
            warn!(vehicle_id, route = %print, "route has unresolved waypoints, dropping reservation");
            self.reservations.remove(vehicle_id);
            return UpdateOutcome::Unresolved;
        };

        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        let reservation = Reservation {
            vehicle_id: vehicle_id.to_string(),
            map_id: first.map_id,
            fingerprint: print,
            route: remaining_route.to_vec(),
            corridor: Corridor::new(skeleton, buffer_radius),
            revision,
        };
        debug!(
            vehicle_id,
            revision,
            waypoints = remaining_route.len(),
            "reservation rebuilt"
        );
        self.reservations
            .insert(vehicle_id.to_string(), Arc::new(reservation));
        UpdateOutcome::Rebuilt
    }

    /// Move the vehicle's footprint (position ± radius) in the spatial index.
    pub fn update_position(&self, vehicle_id: &str, position: Point, radius: f64) {
        let envelope = Envelope::around(position, radius);
        match self.positions.entry(vehicle_id.to_string()) {
            Entry::Occupied(mut e) => {
                let old = *e.get();
                if old != envelope {
                    let key = e.key().clone();
                    self.footprints.move_item(&old, &key, envelope, key.clone());
                    e.insert(envelope);
                }
            }
            Entry::Vacant(e) => {
                self.footprints.insert(envelope, e.key().clone());
                e.insert(envelope);
            }
        }
    }

    /// Drop everything held for a vehicle (offline, removed).
    pub fn release(&self, vehicle_id: &str) {
        self.reservations.remove(vehicle_id);
        if let Some((key, envelope)) = self.positions.remove(vehicle_id) {
            self.footprints.remove(&envelope, &key);
        }
        debug!(vehicle_id, "traffic state released");
    }

    /// Greedy back-off: the longest prefix of `candidate` that is currently safe.
    ///
    /// An empty result means "no safe prefix right now".
    pub fn find_safe_plan(
        &self,
        map_id: i32,
        vehicle_id: &str,
        candidate: &[Waypoint],
        buffer: f64,
    ) -> Vec<Waypoint> {
        let mut plan = candidate.to_vec();
        while !plan.is_empty() && !self.is_plan_safe(map_id, vehicle_id, &plan, buffer) {
            plan.pop();
        }
        if plan.len() < candidate.len() {
            debug!(
                vehicle_id,
                requested = candidate.len(),
                granted = plan.len(),
                "candidate route truncated"
            );
        }
        plan
    }

    /// Whether `candidate` keeps clear of every other vehicle on `map_id`.
    ///
    /// Both the other vehicle's reserved corridor and its current position
    /// must be farther than `buffer` plus that vehicle's registered radius.
    /// A route whose geometry cannot be resolved is never safe.
    pub fn is_plan_safe(
        &self,
        map_id: i32,
        vehicle_id: &str,
        candidate: &[Waypoint],
        buffer: f64,
    ) -> bool {
        if candidate.is_empty() {
            return true;
        }
        let Some(path) = build_path_geometry(candidate, self.network.as_ref()) else {
            return false;
        };

        let others: HashMap<String, (Point, f64)> = self
            .registry
            .on_map(map_id)
            .into_iter()
            .filter(|v| v.id != vehicle_id)
            .map(|v| (v.id, (v.position, v.radius)))
            .collect();
        if others.is_empty() {
            return true;
        }

        let reserved: Vec<Arc<Reservation>> = self
            .reservations
            .iter()
            .filter(|r| r.map_id == map_id && r.key() != vehicle_id)
            .map(|r| Arc::clone(r.value()))
            .collect();
        for reservation in reserved {
            // Vanished from the registry: ignore
            let Some((_, radius)) = others.get(&reservation.vehicle_id) else {
                continue;
            };
            if check_collision(&path, &reservation.corridor, buffer + radius) {
                debug!(
                    vehicle_id,
                    blocker = %reservation.vehicle_id,
                    "candidate crosses reserved corridor"
                );
                return false;
            }
        }

        // Broad phase over footprints; reach covers every footprint centre.
        // It only rules out vehicles whose indexed footprint matches the registry.
        let max_radius = others.values().map(|(_, r)| *r).fold(0.0, f64::max);
        let region = path.envelope().expand_by(buffer + max_radius);
        let nearby: HashSet<String> = self.footprints.query(&region).into_iter().collect();
        for (id, (position, radius)) in &others {
            if !nearby.contains(id) && self.footprint_is_current(id, *position, *radius) {
                continue;
            }
            if check_collision(&path, position, buffer + radius) {
                debug!(vehicle_id, blocker = %id, "candidate passes too close to vehicle");
                return false;
            }
        }

        true
    }

    fn footprint_is_current(&self, vehicle_id: &str, position: Point, radius: f64) -> bool {
        self.positions
            .get(vehicle_id)
            .map(|e| *e.value() == Envelope::around(position, radius))
            .unwrap_or(false)
    }

    /// Candidate points farther than the summed radii from `blocked_route`.
    pub fn filter_safe_points(
        &self,
        blocked_route: &[Waypoint],
        candidates: &[Waypoint],
        blocked_radius: f64,
        point_radius: f64,
    ) -> Vec<Waypoint> {
        let blocked = build_path_geometry(blocked_route, self.network.as_ref());
        let limit = blocked_radius + point_radius;
        candidates
            .iter()
            .filter(|c| match (self.network.position(c), &blocked) {
                (Some(p), Some(path)) => path.distance_to_point(&p) > limit,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .copied()
            .collect()
    }

    pub fn reservation(&self, vehicle_id: &str) -> Option<Arc<Reservation>> {
        self.reservations.get(vehicle_id).map(|r| Arc::clone(r.value()))
    }

    /// Copy of every reservation, sorted by vehicle id
    pub fn snapshot(&self) -> Vec<Reservation> {
        let mut out: Vec<Reservation> = self
            .reservations
            .iter()
            .map(|r| r.value().as_ref().clone())
            .collect();
        out.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        out
    }

    /// Vehicles on `map_id` whose footprint intersects `region`
    pub fn vehicles_in(&self, map_id: i32, region: &Envelope) -> Vec<String> {
        // Items are sharded by centre, so widen the scan by the largest radius
        let max_radius = self
            .registry
            .on_map(map_id)
            .iter()
            .map(|v| v.radius)
            .fold(0.0, f64::max);
        let mut ids: Vec<String> = self
            .footprints
            .query(&region.expand_by(max_radius))
            .into_iter()
            .filter(|id| {
                self.registry
                    .get(id)
                    .map(|v| v.map_id == map_id)
                    .unwrap_or(false)
            })
            .filter(|id| {
                self.positions
                    .get(id)
                    .map(|e| e.value().intersects(region))
                    .unwrap_or(false)
            })
            .collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> TrafficStats {
        TrafficStats {
            reservations: self.reservations.len(),
            footprints: self.footprints.size(),
            revision: self.revision(),
        }
    }
}
