use clap::Parser;
use fleetcore::cli::{self, Cli, Commands};
use fleetcore::error::Result;
use tracing::error;

mod main_runtime;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Simulate {
            vehicles,
            ticks,
            seed,
            task_rate,
            json,
        } => {
            let config = cli::load_config(&cli.config_dir)?;
            main_runtime::init_logging(&config.logging);
            if let Err(e) =
                cli::run_simulate(config, *vehicles, *ticks, *seed, *task_rate, *json).await
            {
                error!(error = %e, "simulation failed");
                return Err(e);
            }
        }
        Commands::CheckConfig => {
            main_runtime::init_logging_simple();
            if !cli::check_config(&cli.config_dir)? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
