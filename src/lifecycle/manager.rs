//! Live sub-tasks per vehicle.
//!
//! Each vehicle owns a FIFO of sub-tasks; the head is the one being executed.
//! Empty queues are dropped so departed vehicles leave nothing behind.

use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};

use crate::domain::TaskPath;

#[derive(Debug, Default)]
pub struct TaskPathManager {
    paths: DashMap<String, VecDeque<TaskPath>>,
}

impl TaskPathManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sub-task behind the vehicle's existing ones.
    pub fn put(&self, path: TaskPath) {
        self.paths
            .entry(path.vehicle_id.clone())
            .or_default()
            .push_back(path);
    }

    pub fn put_all(&self, vehicle_id: &str, paths: Vec<TaskPath>) {
        if paths.is_empty() {
            return;
        }
        self.paths
            .entry(vehicle_id.to_string())
            .or_default()
            .extend(paths);
    }

    /// Head of the vehicle's queue
    pub fn first(&self, vehicle_id: &str) -> Option<TaskPath> {
        self.paths.get(vehicle_id).and_then(|q| q.front().cloned())
    }

    pub fn get(&self, vehicle_id: &str) -> Vec<TaskPath> {
        self.paths
            .get(vehicle_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_all(&self) -> HashMap<String, Vec<TaskPath>> {
        self.paths
            .iter()
            .map(|e| (e.key().clone(), e.value().iter().cloned().collect()))
            .collect()
    }

    pub fn has_task(&self, vehicle_id: &str) -> bool {
        self.paths
            .get(vehicle_id)
            .map(|q| !q.is_empty())
            .unwrap_or(false)
    }

    /// Find the vehicle that holds a sub-task of `task_code`.
    pub fn vehicle_for_task(&self, task_code: &str) -> Option<String> {
        self.paths
            .iter()
            .find(|e| e.value().iter().any(|p| p.task_code == task_code))
            .map(|e| e.key().clone())
    }

    /// Mutate the head sub-task in place.
    pub fn update_first<R>(
        &self,
        vehicle_id: &str,
        f: impl FnOnce(&mut TaskPath) -> R,
    ) -> Option<R> {
        let mut queue = self.paths.get_mut(vehicle_id)?;
        queue.front_mut().map(f)
    }

    pub fn remove_first(&self, vehicle_id: &str) -> Option<TaskPath> {
        let removed = self.paths.get_mut(vehicle_id)?.pop_front();
        self.drop_if_empty(vehicle_id);
        removed
    }

    /// Remove one sub-task by id.
    pub fn remove(&self, vehicle_id: &str, task_id: &str) -> Option<TaskPath> {
        let removed = {
            let mut queue = self.paths.get_mut(vehicle_id)?;
            let pos = queue.iter().position(|p| p.task_id == task_id)?;
            queue.remove(pos)
        };
        self.drop_if_empty(vehicle_id);
        removed
    }

    /// Take every sub-task of a vehicle.
    pub fn clear_vehicle(&self, vehicle_id: &str) -> Vec<TaskPath> {
        self.paths
            .remove(vehicle_id)
            .map(|(_, q)| q.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn vehicles(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.paths.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Total number of live sub-tasks
    pub fn len(&self) -> usize {
        self.paths.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drop_if_empty(&self, vehicle_id: &str) {
        self.paths.remove_if(vehicle_id, |_, q| q.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PlanState, TransportTask, Waypoint};

    fn path(vehicle: &str, code: &str, no: u32) -> TaskPath {
        let task = TransportTask::new(code, Waypoint::new(1, 1), Waypoint::new(1, 2));
        TaskPath::new(vehicle, &task, no)
    }

    #[test]
    fn test_fifo_per_vehicle() {
        let manager = TaskPathManager::new();
        manager.put(path("AGV1", "T1", 1));
        manager.put_all("AGV1", vec![path("AGV1", "T1", 2), path("AGV1", "T1", 3)]);
        manager.put(path("AGV2", "T2", 1));

        assert_eq!(manager.len(), 4);
        assert_eq!(manager.first("AGV1").unwrap().task_id, "T1-1");
        assert_eq!(manager.get("AGV1").len(), 3);
        assert_eq!(manager.vehicle_for_task("T2").as_deref(), Some("AGV2"));

        assert_eq!(manager.remove_first("AGV1").unwrap().task_id, "T1-1");
        assert_eq!(manager.remove("AGV1", "T1-3").unwrap().task_id, "T1-3");
        assert!(manager.remove("AGV1", "T1-9").is_none());
        assert_eq!(manager.first("AGV1").unwrap().task_id, "T1-2");
    }

    #[test]
    fn test_empty_queue_is_dropped() {
        let manager = TaskPathManager::new();
        manager.put(path("AGV1", "T1", 1));
        assert!(manager.has_task("AGV1"));

        manager.remove_first("AGV1");
        assert!(!manager.has_task("AGV1"));
        assert!(manager.vehicles().is_empty());
        assert!(manager.remove_first("AGV1").is_none());
    }

    #[test]
    fn test_update_first_mutates_head() {
        let manager = TaskPathManager::new();
        manager.put(path("AGV1", "T1", 1));
        manager.put(path("AGV1", "T1", 2));

        let state = manager.update_first("AGV1", |p| {
            p.set_state(PlanState::Run);
            p.state()
        });
        assert_eq!(state, Some(PlanState::Run));
        assert_eq!(manager.get("AGV1")[1].state(), PlanState::New);
        assert!(manager.update_first("AGV9", |_| ()).is_none());

        assert_eq!(manager.clear_vehicle("AGV1").len(), 2);
        assert!(manager.get_all().is_empty());
    }
}
