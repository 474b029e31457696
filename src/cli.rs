use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::error::{FleetError, Result};
use crate::simulation::{self, SimulationOptions};

#[derive(Parser)]
#[command(name = "fleetcore")]
#[command(version)]
#[command(about = "AGV fleet dispatch core: traffic, task lifecycle and ordered command dispatch", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and <FLEET_ENV>.toml
    #[arg(short, long, default_value = "config", env = "FLEET_CONFIG_DIR", global = true)]
    pub config_dir: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive the full engine over a grid map with simulated vehicles
    Simulate {
        /// Number of simulated vehicles
        #[arg(short, long, default_value = "4")]
        vehicles: usize,
        /// Number of ticks to run
        #[arg(short, long, default_value = "100")]
        ticks: u64,
        /// Random seed (drawn from entropy when omitted)
        #[arg(short, long)]
        seed: Option<u64>,
        /// Chance of a new transport task per tick
        #[arg(long, default_value = "0.5")]
        task_rate: f64,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load and validate configuration
    CheckConfig,
}

/// Load configuration and fail on the first invalid value set.
pub fn load_config(config_dir: &str) -> Result<AppConfig> {
    let config = AppConfig::load_from(config_dir)?;
    config
        .validate()
        .map_err(|errors| FleetError::InvalidConfig(errors.join("; ")))?;
    Ok(config)
}

pub async fn run_simulate(
    config: AppConfig,
    vehicles: usize,
    ticks: u64,
    seed: Option<u64>,
    task_rate: f64,
    json: bool,
) -> Result<()> {
    let options = SimulationOptions {
        vehicles,
        ticks,
        seed,
        task_rate,
    };
    let report = simulation::run(config, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

/// Print every configuration problem; `Ok(false)` when any were found.
pub fn check_config(config_dir: &str) -> Result<bool> {
    let config = AppConfig::load_from(config_dir)?;
    match config.validate() {
        Ok(()) => {
            println!("\x1b[32m✓ configuration in '{config_dir}' is valid\x1b[0m");
            println!(
                "  spatial:      {}x{} grid {}",
                config.spatial.width, config.spatial.height, config.spatial.grid_size
            );
            println!(
                "  traffic:      buffer {} safety {}",
                config.traffic.buffer_radius, config.traffic.safety_buffer
            );
            println!(
                "  distribution: {} (lowest battery {})",
                config.distribution.mode, config.distribution.lowest_work_battery
            );
            Ok(true)
        }
        Err(errors) => {
            println!("\x1b[31m✗ {} configuration error(s):\x1b[0m", errors.len());
            for error in &errors {
                println!("  - {error}");
            }
            Ok(false)
        }
    }
}
