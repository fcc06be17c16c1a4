use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crossbar::config::{Config, LoggingConfig};
use crossbar::LoadBalancer;

#[derive(Parser)]
#[command(name = "crossbar")]
#[command(version, about = "HTTP/1.1 reverse proxy load balancer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the load balancer
    Start {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Stop the load balancer
    Stop,
    /// Show load balancer status
    Status,
    /// Validate a configuration file
    Validate {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Start { config } => start(&config).await,
        // Each invocation is its own process; only `start` hosts an instance
        Command::Stop | Command::Status => {
            println!("Load balancer is not running");
            ExitCode::FAILURE
        }
        Command::Validate { config } => validate(&config).await,
    }
}

async fn start(path: &str) -> ExitCode {
    let config = match Config::from_file(path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(errors) = config.validate() {
        eprintln!("Configuration validation failed:");
        for error in &errors {
            eprintln!("  - {}", error);
        }
        return ExitCode::FAILURE;
    }

    init_tracing(&config.logging);
    info!("Starting crossbar load balancer");

    let balancer = LoadBalancer::new(config);
    if let Err(e) = balancer.start().await {
        error!("Failed to start load balancer: {}", e);
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    warn!("Received CTRL+C, shutting down gracefully...");

    if let Err(e) = balancer.stop().await {
        error!("Error during shutdown: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

async fn validate(path: &str) -> ExitCode {
    let config = match Config::from_file(path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error validating configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match config.validate() {
        Ok(()) => {
            println!("Configuration is valid");
            ExitCode::SUCCESS
        }
        Err(errors) => {
            eprintln!("Configuration validation failed:");
            for error in &errors {
                eprintln!("  - {}", error);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("crossbar={}", config.level.as_filter())));

    match &config.file {
        Some(path) => match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .init();
            }
            Err(e) => {
                eprintln!("Cannot open log file {}: {}; logging to stdout", path, e);
                tracing_subscriber::fmt().with_env_filter(filter).init();
            }
        },
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
