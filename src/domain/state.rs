use serde::{Deserialize, Serialize};
use std::fmt;

/// Sub-task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanState {
    /// Pre-dispatch checks
    Check,
    /// Waiting on a docking device (lift, door, conveyor)
    DockDevice,
    /// Freshly assigned, no route yet
    New,
    /// Route must be planned again
    AgainPlan,
    /// Planned, waiting for the vehicle to start
    WaitStart,
    /// Vehicle is driving the committed route
    Run,
    Pause,
    /// Executing the action at the destination
    Action,
    Cancel,
    Finish,
}

impl PlanState {
    pub const ALL: [PlanState; 10] = [
        PlanState::Check,
        PlanState::DockDevice,
        PlanState::New,
        PlanState::AgainPlan,
        PlanState::WaitStart,
        PlanState::Run,
        PlanState::Pause,
        PlanState::Action,
        PlanState::Cancel,
        PlanState::Finish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanState::Check => "CHECK",
            PlanState::DockDevice => "DOCK_DEVICE",
            PlanState::New => "NEW",
            PlanState::AgainPlan => "AGAIN_PLAN",
            PlanState::WaitStart => "WAIT_START",
            PlanState::Run => "RUN",
            PlanState::Pause => "PAUSE",
            PlanState::Action => "ACTION",
            PlanState::Cancel => "CANCEL",
            PlanState::Finish => "FINISH",
        }
    }

    /// Numeric code persisted alongside the sub-task
    pub fn code(&self) -> i32 {
        match self {
            PlanState::Check => 0,
            PlanState::DockDevice => 5,
            PlanState::New => 10,
            PlanState::AgainPlan => 20,
            PlanState::WaitStart => 30,
            PlanState::Run => 40,
            PlanState::Pause => 50,
            PlanState::Action => 60,
            PlanState::Cancel => 80,
            PlanState::Finish => 100,
        }
    }

    pub fn from_code(code: i32) -> Option<PlanState> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: PlanState) -> bool {
        use PlanState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, target) {
            // Any live sub-task can be cancelled
            (_, Cancel) => true,

            (Check, DockDevice) | (Check, New) => true,
            (DockDevice, New) => true,

            (New, AgainPlan) | (New, WaitStart) | (New, Run) => true,

            (AgainPlan, WaitStart) | (AgainPlan, Run) => true,
            (WaitStart, AgainPlan) | (WaitStart, Run) => true,

            (Run, Pause) | (Run, AgainPlan) | (Run, Action) | (Run, Finish) => true,
            (Pause, Run) | (Pause, AgainPlan) => true,

            (Action, Run) | (Action, Finish) => true,

            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<PlanState> {
        Self::ALL
            .into_iter()
            .filter(|s| self.can_transition_to(*s))
            .collect()
    }

    /// Is this sub-task waiting for (or able to take) a new route?
    pub fn needs_plan(&self) -> bool {
        matches!(
            self,
            PlanState::New | PlanState::AgainPlan | PlanState::WaitStart | PlanState::Run
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanState::Cancel | PlanState::Finish)
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PlanState {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let upper = s.to_uppercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == upper)
            .ok_or_else(|| format!("Unknown plan state: {}", s))
    }
}

/// Planning flag of a sub-task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlanFlag {
    #[default]
    Unplanned,
    Planned,
    Planning,
}

impl PlanFlag {
    pub fn code(&self) -> u8 {
        match self {
            PlanFlag::Unplanned => 0,
            PlanFlag::Planned => 1,
            PlanFlag::Planning => 2,
        }
    }
}

impl fmt::Display for PlanFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
