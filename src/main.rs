//! rpc-prometheus command-line tool
//!
//! Generates configuration templates and runs a synthetic workload through the
//! instrumentation so its metrics can be inspected.

use clap::{CommandFactory, Parser};
use rpc_prometheus::cli::{Cli, Command, generate_config_template};
use rpc_prometheus::{config::Config, simulate, telemetry};
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => write_template(output.as_deref()),
        Some(Command::Simulate { calls }) => run_simulation(&cli.config, calls).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

fn write_template(output: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let template = generate_config_template();
    match output {
        Some(path) => {
            std::fs::write(path, template)?;
            eprintln!("Configuration template written to {}", path);
        }
        None => print!("{}", template),
    }
    Ok(())
}

async fn run_simulation(config_path: &str, calls: u32) -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration; a missing file means defaults
    let config_found = Path::new(config_path).exists();
    let config = if config_found {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    // Initialize telemetry
    telemetry::init(&config.observability.log_level);

    if config_found {
        tracing::info!(path = %config_path, "Loaded configuration");
    } else {
        tracing::info!(path = %config_path, "Config file not found, using defaults");
    }

    let simulation = simulate::run(&config, calls).await?;
    print!("{}", simulation.exposition()?);

    Ok(())
}
