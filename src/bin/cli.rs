//! Operator CLI: validates config without starting the server, mirroring
//! the donor's split between a long-running binary and a small operator
//! tool for inspecting/validating its on-disk state.

use clap::{Parser, Subcommand};
use sentrymux::config::AppConfig;
use sentrymux::model::PublishingTarget;
use sentrymux::routing::RoutingConfig;

#[derive(Parser, Debug)]
#[command(name = "sentrymux-cli", about = "Operator tool for sentrymux")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parses config + routing + targets files and reports any errors,
    /// without starting the server.
    ValidateConfig {
        #[arg(long, default_value = "config.yaml")]
        config: String,
        #[arg(long, default_value = "routing.yaml")]
        routing: String,
        #[arg(long, default_value = "targets.yaml")]
        targets: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::ValidateConfig {
            config,
            routing,
            targets,
        } => {
            if let Err(err) = validate_config(&config, &routing, &targets) {
                eprintln!("config invalid: {err}");
                std::process::exit(1);
            }
            println!("config ok");
        }
    }
}

fn validate_config(config_path: &str, routing_path: &str, targets_path: &str) -> Result<(), String> {
    let config_raw = std::fs::read_to_string(config_path)
        .map_err(|e| format!("reading {config_path}: {e}"))?;
    AppConfig::from_yaml(&config_raw).map_err(|e| format!("{config_path}: {e}"))?;

    let routing_raw = std::fs::read_to_string(routing_path)
        .map_err(|e| format!("reading {routing_path}: {e}"))?;
    RoutingConfig::parse(&routing_raw).map_err(|e| format!("{routing_path}: {e}"))?;

    let targets_raw = std::fs::read_to_string(targets_path).unwrap_or_default();
    if !targets_raw.trim().is_empty() {
        serde_yaml::from_str::<Vec<PublishingTarget>>(&targets_raw)
            .map_err(|e| format!("{targets_path}: {e}"))?;
    }

    Ok(())
}
