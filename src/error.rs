use thiserror::Error;

/// Main error type for the dispatch core
#[derive(Error, Debug)]
pub enum FleetError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Lifecycle errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("No active sub-task for vehicle {0}")]
    NoActiveTask(String),

    // Registry errors
    #[error("Unknown vehicle: {0}")]
    UnknownVehicle(String),

    // Command emission errors
    #[error("Command delivery to {vehicle_id} failed: {reason}")]
    CommandDelivery { vehicle_id: String, reason: String },

    #[error("Dispatcher unavailable: {0}")]
    DispatcherUnavailable(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

impl FleetError {
    /// Delivery failures are the only errors that flip a vehicle offline.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            FleetError::CommandDelivery { .. } | FleetError::Io(_) | FleetError::Other(_)
        )
    }
}
