//! Allocation modes: how an unassigned task picks its vehicle.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::DistributionConfig;
use crate::domain::{Point, RoadNetwork, TransportTask, Vehicle, VehicleRegistry, Waypoint};

/// Configured allocation mode, resolved once into a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// External hook
    Customize,
    #[default]
    DistancePriority,
    PowerPriority,
    RecentPark,
    OriginSpecify,
}

impl AllocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMode::Customize => "customize",
            AllocationMode::DistancePriority => "distance_priority",
            AllocationMode::PowerPriority => "power_priority",
            AllocationMode::RecentPark => "recent_park",
            AllocationMode::OriginSpecify => "origin_specify",
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AllocationMode::Customize => -1,
            AllocationMode::DistancePriority => 0,
            AllocationMode::PowerPriority => 1,
            AllocationMode::RecentPark => 2,
            AllocationMode::OriginSpecify => 3,
        }
    }

    /// Unknown codes select distance priority.
    pub fn from_code(code: i32) -> AllocationMode {
        match code {
            -1 => AllocationMode::Customize,
            1 => AllocationMode::PowerPriority,
            2 => AllocationMode::RecentPark,
            3 => AllocationMode::OriginSpecify,
            _ => AllocationMode::DistancePriority,
        }
    }
}

impl fmt::Display for AllocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only view handed to a strategy
pub struct SelectionContext<'a> {
    pub registry: &'a VehicleRegistry,
    pub network: &'a dyn RoadNetwork,
    pub lowest_work_battery: u8,
}

impl SelectionContext<'_> {
    fn idle(&self) -> Vec<Vehicle> {
        self.registry.idle_vehicles()
    }

    fn charging(&self) -> Vec<Vehicle> {
        self.registry
            .cancellable_charging_vehicles(self.lowest_work_battery)
    }

    fn origin(&self, task: &TransportTask) -> Option<Point> {
        let origin = self.network.position(&task.origin);
        if origin.is_none() {
            error!(task = %task.code, origin = %task.origin, "task origin has no position");
        }
        origin
    }
}

/// Chooses a vehicle for a task that names none
pub trait AllocationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, task: &TransportTask, ctx: &SelectionContext<'_>) -> Option<Vehicle>;
}

/// Labels, equipment type, and the vehicle must be standing on a known point.
pub fn is_eligible(task: &TransportTask, vehicle: &Vehicle) -> bool {
    if !vehicle.matches_labels(&task.labels) {
        debug!(task = %task.code, vehicle = %vehicle.id, "labels do not match");
        return false;
    }
    if !vehicle.matches_type(task.equipment_type) {
        debug!(task = %task.code, vehicle = %vehicle.id, "equipment type does not match");
        return false;
    }
    if vehicle.current_point.is_none() {
        warn!(task = %task.code, vehicle = %vehicle.id, "vehicle is not on a point");
        return false;
    }
    true
}

/// Eligible candidate whose point is closest to the task origin
pub fn nearest(
    task: &TransportTask,
    candidates: Vec<Vehicle>,
    ctx: &SelectionContext<'_>,
) -> Option<Vehicle> {
    if candidates.is_empty() {
        return None;
    }
    let origin = ctx.origin(task)?;

    let mut best: Option<(f64, Vehicle)> = None;
    for vehicle in candidates.into_iter().filter(|v| is_eligible(task, v)) {
        let Some(position) = vehicle.waypoint().and_then(|w| ctx.network.position(&w)) else {
            continue;
        };
        let distance = position.distance(&origin);
        if best.as_ref().map_or(true, |(d, _)| distance < *d) {
            best = Some((distance, vehicle));
        }
    }
    best.map(|(_, v)| v)
}

#[derive(Debug, Default)]
pub struct DistancePriority;

impl AllocationStrategy for DistancePriority {
    fn name(&self) -> &'static str {
        "distance_priority"
    }

    fn select(&self, task: &TransportTask, ctx: &SelectionContext<'_>) -> Option<Vehicle> {
        nearest(task, ctx.idle(), ctx).or_else(|| nearest(task, ctx.charging(), ctx))
    }
}

#[derive(Debug, Default)]
pub struct PowerPriority;

impl PowerPriority {
    fn fullest(task: &TransportTask, candidates: Vec<Vehicle>) -> Option<Vehicle> {
        let mut best: Option<Vehicle> = None;
        for vehicle in candidates.into_iter().filter(|v| is_eligible(task, v)) {
            if best.as_ref().map_or(true, |b| vehicle.battery > b.battery) {
                best = Some(vehicle);
            }
        }
        best
    }
}

impl AllocationStrategy for PowerPriority {
    fn name(&self) -> &'static str {
        "power_priority"
    }

    fn select(&self, task: &TransportTask, ctx: &SelectionContext<'_>) -> Option<Vehicle> {
        Self::fullest(task, ctx.idle()).or_else(|| Self::fullest(task, ctx.charging()))
    }
}

/// Idle vehicle parked on the standby point closest to the task origin
#[derive(Debug, Default)]
pub struct RecentPark {
    /// origin → nearest standby point
    standby_cache: DashMap<Waypoint, Waypoint>,
}

impl RecentPark {
    fn nearest_standby(&self, task: &TransportTask, ctx: &SelectionContext<'_>) -> Option<Waypoint> {
        if let Some(cached) = self.standby_cache.get(&task.origin) {
            return Some(*cached);
        }
        let origin = ctx.origin(task)?;
        let mut best: Option<(f64, Waypoint)> = None;
        for standby in ctx.network.standby_points(task.origin.map_id) {
            let Some(p) = ctx.network.position(&standby) else {
                continue;
            };
            let distance = p.distance(&origin);
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, standby));
            }
        }
        let (_, standby) = best?;
        self.standby_cache.insert(task.origin, standby);
        Some(standby)
    }
}

impl AllocationStrategy for RecentPark {
    fn name(&self) -> &'static str {
        "recent_park"
    }

    fn select(&self, task: &TransportTask, ctx: &SelectionContext<'_>) -> Option<Vehicle> {
        let standby = self.nearest_standby(task, ctx)?;
        ctx.idle()
            .into_iter()
            .filter(|v| is_eligible(task, v))
            .find(|v| v.waypoint() == Some(standby))
    }
}

/// Parse an origin table key of the form `<map>-<point>`.
pub fn parse_origin_key(key: &str) -> Option<Waypoint> {
    let (map, point) = key.split_once('-')?;
    Some(Waypoint::new(map.trim().parse().ok()?, point.trim().parse().ok()?))
}

/// Only the vehicles configured for the task origin may take it
#[derive(Debug, Default)]
pub struct OriginSpecify {
    table: HashMap<Waypoint, Vec<String>>,
}

impl OriginSpecify {
    pub fn new(raw: &HashMap<String, String>) -> Self {
        let mut table = HashMap::new();
        for (key, vehicles) in raw {
            let Some(origin) = parse_origin_key(key) else {
                warn!(key = %key, "ignoring malformed origin table key");
                continue;
            };
            let ids = vehicles
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            table.insert(origin, ids);
        }
        Self { table }
    }
}

impl AllocationStrategy for OriginSpecify {
    fn name(&self) -> &'static str {
        "origin_specify"
    }

    fn select(&self, task: &TransportTask, ctx: &SelectionContext<'_>) -> Option<Vehicle> {
        let Some(allowed) = self.table.get(&task.origin) else {
            error!(task = %task.code, origin = %task.origin, "no vehicles configured for origin");
            return None;
        };

        let mut idle = Vec::new();
        let mut charging = Vec::new();
        for id in allowed {
            let Some(vehicle) = ctx.registry.get(id) else {
                warn!(vehicle = %id, "configured vehicle is not registered");
                continue;
            };
            if vehicle.is_idle() {
                idle.push(vehicle);
            } else if vehicle.is_cancellable_charging(ctx.lowest_work_battery) {
                charging.push(vehicle);
            }
        }

        if idle.is_empty() {
            nearest(task, charging, ctx)
        } else {
            nearest(task, idle, ctx)
        }
    }
}

/// Delegates to an externally supplied strategy
#[derive(Default)]
pub struct Customize {
    hook: Option<Arc<dyn AllocationStrategy>>,
}

impl Customize {
    pub fn new(hook: Option<Arc<dyn AllocationStrategy>>) -> Self {
        Self { hook }
    }
}

impl AllocationStrategy for Customize {
    fn name(&self) -> &'static str {
        "customize"
    }

    fn select(&self, task: &TransportTask, ctx: &SelectionContext<'_>) -> Option<Vehicle> {
        match &self.hook {
            Some(hook) => hook.select(task, ctx),
            None => {
                error!(task = %task.code, "customize mode selected but no strategy installed");
                None
            }
        }
    }
}

/// Resolve the configured mode into its strategy.
pub fn build_strategy(
    config: &DistributionConfig,
    custom: Option<Arc<dyn AllocationStrategy>>,
) -> Box<dyn AllocationStrategy> {
    match config.mode {
        AllocationMode::Customize => Box::new(Customize::new(custom)),
        AllocationMode::DistancePriority => Box::new(DistancePriority),
        AllocationMode::PowerPriority => Box::new(PowerPriority),
        AllocationMode::RecentPark => Box::new(RecentPark::default()),
        AllocationMode::OriginSpecify => Box::new(OriginSpecify::new(&config.origin_specify)),
    }
}
