//! Portlink - expose local services through a relay
//!
//! Keeps one outbound tunnel per configured server alive and serves a live
//! status dashboard.

use anyhow::{Context, Result};
use clap::Parser;
use portlink_agent::config::LoggingConfig;
use portlink_agent::{AgentConfig, AgentController, TunnelRegistry};
use portlink_dashboard::DashboardServer;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Portlink - Tunnel your local services through a relay
#[derive(Parser, Debug)]
#[command(name = "portlink")]
#[command(about = "Portlink - Tunnel your local services through a relay")]
#[command(version)]
#[command(long_version = concat!(
    env!("GIT_TAG"),
    "\nCommit: ", env!("GIT_HASH"),
    "\nBuilt: ", env!("BUILD_TIME")
))]
struct Cli {
    /// Configuration file (JSON, or YAML by extension)
    #[arg(short, long, env = "PORTLINK_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Log level filter (e.g. "info", "debug", "portlink_agent=trace")
    #[arg(long, env = "PORTLINK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Do not start the status dashboard
    #[arg(long)]
    no_dashboard: bool,
}

/// Setup console and file logging
fn setup_logging(cli: &Cli, logging: &LoggingConfig) -> Result<()> {
    let log_level = cli
        .log_level
        .clone()
        .or_else(|| cli.verbose.then(|| "debug".to_string()))
        .or_else(|| logging.level.clone());

    let filter = match log_level {
        Some(level) => EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let console_layer = logging
        .console
        .then(|| fmt::layer().with_target(true).with_thread_ids(false));

    let file_layer = if logging.file {
        fs::create_dir_all(&logging.directory).with_context(|| {
            format!(
                "Failed to create log directory {}",
                logging.directory.display()
            )
        })?;

        let path = logging.file_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AgentConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    setup_logging(&cli, &config.logging)?;

    info!("Portlink starting...");
    info!("Agent: {}", config.agent_name);
    info!(
        "Relay: {} (base port {})",
        config.relay.hostname, config.relay.base_port
    );

    let registry = TunnelRegistry::new(config.agent_name.clone());

    if config.dashboard.enabled && !cli.no_dashboard {
        let dashboard = DashboardServer::from_config(&config.dashboard, registry.clone())
            .context("Invalid dashboard configuration")?;

        // A dashboard that cannot start does not stop the tunnels
        tokio::spawn(async move {
            if let Err(e) = dashboard.run().await {
                error!("Dashboard unavailable: {}", e);
            }
        });
    }

    let controller =
        AgentController::new(config, registry).context("Invalid relay configuration")?;
    let agent_task = tokio::spawn(controller.run());

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = agent_task => {
            match result {
                Ok(Ok(())) => {
                    warn!("No tunnels running");
                }
                Ok(Err(e)) => {
                    error!("Agent error: {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("Agent task panicked: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    info!("Portlink stopped");
    Ok(())
}
