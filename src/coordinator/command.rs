//! Commands emitted to vehicles and the sink that delivers them

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::domain::Waypoint;
use crate::error::Result;

/// Command pushed to one vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VehicleCommand {
    /// Drive the committed route segment
    Move {
        task_id: String,
        route: Vec<Waypoint>,
    },
    Pause {
        task_id: String,
    },
    Resume {
        task_id: String,
    },
    Cancel {
        task_id: String,
    },
}

impl VehicleCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            VehicleCommand::Move { .. } => "move",
            VehicleCommand::Pause { .. } => "pause",
            VehicleCommand::Resume { .. } => "resume",
            VehicleCommand::Cancel { .. } => "cancel",
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            VehicleCommand::Move { task_id, .. }
            | VehicleCommand::Pause { task_id }
            | VehicleCommand::Resume { task_id }
            | VehicleCommand::Cancel { task_id } => task_id,
        }
    }
}

/// Outbound command emission (protocol adapters live behind this)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, vehicle_id: &str, command: VehicleCommand) -> Result<()>;
}

/// Sink that only logs; used by the simulator
#[derive(Debug, Default)]
pub struct LoggingSink {
    sent: AtomicU64,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CommandSink for LoggingSink {
    async fn send(&self, vehicle_id: &str, command: VehicleCommand) -> Result<()> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        info!(
            vehicle_id,
            kind = command.kind(),
            task_id = command.task_id(),
            "command emitted"
        );
        Ok(())
    }
}

/// Sink that keeps every delivered command in order
#[derive(Debug, Default)]
pub struct RecordingSink {
    log: Mutex<Vec<(String, VehicleCommand)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<(String, VehicleCommand)> {
        self.log.lock().clone()
    }

    pub fn commands_for(&self, vehicle_id: &str) -> Vec<VehicleCommand> {
        self.log
            .lock()
            .iter()
            .filter(|(id, _)| id == vehicle_id)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn send(&self, vehicle_id: &str, command: VehicleCommand) -> Result<()> {
        self.log.lock().push((vehicle_id.to_string(), command));
        Ok(())
    }
}
