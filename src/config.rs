use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::distribution::AllocationMode;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub spatial: SpatialConfig,
    #[serde(default)]
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Map bounds and shard grid for the footprint index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialConfig {
    /// Lower-left corner of the map (mm)
    #[serde(default)]
    pub min_x: f64,
    #[serde(default)]
    pub min_y: f64,
    #[serde(default = "default_extent")]
    pub width: f64,
    #[serde(default = "default_extent")]
    pub height: f64,
    /// Shards per axis; the index holds `grid_size²` shards
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,
}

fn default_extent() -> f64 {
    100_000.0
}

fn default_grid_size() -> usize {
    4
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            width: default_extent(),
            height: default_extent(),
            grid_size: default_grid_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficConfig {
    /// Inflation applied to a committed route when reserving it (mm)
    #[serde(default = "default_buffer_radius")]
    pub buffer_radius: f64,
    /// Extra clearance required on top of the other vehicle's radius (mm)
    #[serde(default = "default_safety_buffer")]
    pub safety_buffer: f64,
}

fn default_buffer_radius() -> f64 {
    300.0
}

fn default_safety_buffer() -> f64 {
    300.0
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            buffer_radius: default_buffer_radius(),
            safety_buffer: default_safety_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    #[serde(default)]
    pub mode: AllocationMode,
    /// Charging vehicles at or above this battery % may be pulled off the charger
    #[serde(default = "default_lowest_work_battery")]
    pub lowest_work_battery: u8,
    /// `"<map>-<point>"` → comma-separated vehicle ids allowed to start there
    #[serde(default)]
    pub origin_specify: HashMap<String, String>,
    /// Check the vehicle's own progress report before re-using it for a running task
    #[serde(default = "default_true")]
    pub revalidate_progress: bool,
}

fn default_lowest_work_battery() -> u8 {
    40
}

fn default_true() -> bool {
    true
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            mode: AllocationMode::default(),
            lowest_work_battery: default_lowest_work_battery(),
            origin_specify: HashMap::new(),
            revalidate_progress: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("spatial.grid_size", default_grid_size() as i64)?
            .set_default("traffic.buffer_radius", default_buffer_radius())?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FLEET_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (FLEET_TRAFFIC__BUFFER_RADIUS, etc.)
            .add_source(
                Environment::with_prefix("FLEET")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Configuration for a map of the given size, everything else defaulted
    pub fn default_config(width: f64, height: f64, grid_size: usize) -> Self {
        Self {
            spatial: SpatialConfig {
                width,
                height,
                grid_size,
                ..SpatialConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.spatial.grid_size < 1 {
            errors.push("spatial.grid_size must be at least 1".to_string());
        }

        if self.spatial.width <= 0.0 || self.spatial.height <= 0.0 {
            errors.push(format!(
                "spatial extent must be positive, got {}x{}",
                self.spatial.width, self.spatial.height
            ));
        }

        if self.traffic.buffer_radius < 0.0 {
            errors.push("traffic.buffer_radius must not be negative".to_string());
        }

        if self.traffic.safety_buffer < 0.0 {
            errors.push("traffic.safety_buffer must not be negative".to_string());
        }

        if self.distribution.lowest_work_battery > 100 {
            errors.push("distribution.lowest_work_battery must be within 0..=100".to_string());
        }

        for key in self.distribution.origin_specify.keys() {
            if crate::distribution::parse_origin_key(key).is_none() {
                errors.push(format!(
                    "distribution.origin_specify key '{key}' is not '<map>-<point>'"
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
