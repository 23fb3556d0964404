// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # SHIM CLI
//!
//! The `shim` binary drives the self-healing remediation engine.
//!
//! ## Architecture
//!
//! - **Default mode**: commands talk to the daemon's HTTP API; `incident submit`
//!   falls back to an in-process engine when no daemon answers
//! - **Daemon mode**: `shim --daemon` serves the engine and its API
//! - **Detection**: HTTP health check against `--host`/`--port`
//!
//! ## Commands
//!
//! - `shim daemon run|start|status` - Manage daemon lifecycle
//! - `shim incident submit|status|list|cancel|audit` - Remediation workflows
//! - `shim approval list|approve|deny` - Human approval gate
//! - `shim action list` - Registered action catalog
//! - `shim config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use shim_orchestrator::commands::{
    self, ActionCommand, ApprovalCommand, ConfigCommand, DaemonCommand, IncidentCommand,
};
use shim_core::domain::node_config::MonitorConfigManifest;
use shim_orchestrator::daemon;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// SHIM - Self-healing infrastructure monitor
#[derive(Parser)]
#[command(name = "shim")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run as daemon service (foreground)
    #[arg(long, global = true)]
    daemon: bool,

    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "SHIM_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API port (default: 8000)
    #[arg(long, global = true, env = "SHIM_PORT", default_value = "8000")]
    port: u16,

    /// HTTP API host (default: 127.0.0.1)
    #[arg(long, global = true, env = "SHIM_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SHIM_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format (default: observability.logging.format, else text)
    #[arg(long, global = true, env = "SHIM_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage daemon lifecycle
    #[command(name = "daemon")]
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Submit and inspect incidents
    #[command(name = "incident")]
    Incident {
        #[command(subcommand)]
        command: IncidentCommand,
    },

    /// Answer approval requests
    #[command(name = "approval")]
    Approval {
        #[command(subcommand)]
        command: ApprovalCommand,
    },

    /// Inspect the action catalog
    #[command(name = "action")]
    Action {
        #[command(subcommand)]
        command: ActionCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_format = cli
        .log_format
        .unwrap_or_else(|| configured_log_format(cli.config.clone()));
    init_logging(&cli.log_level, log_format)?;

    if cli.daemon {
        info!("Starting SHIM in daemon mode");
        return daemon::start_daemon(cli.config, Some(cli.host), Some(cli.port)).await;
    }

    match cli.command {
        Some(Commands::Daemon { command }) => {
            commands::daemon::handle_command(command, cli.config, &cli.host, cli.port).await
        }
        Some(Commands::Incident { command }) => {
            commands::incident::handle_command(command, cli.config, &cli.host, cli.port).await
        }
        Some(Commands::Approval { command }) => {
            commands::approval::handle_command(command, &cli.host, cli.port).await
        }
        Some(Commands::Action { command }) => {
            commands::action::handle_command(command, &cli.host, cli.port).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

fn configured_log_format(config_path: Option<PathBuf>) -> LogFormat {
    let format = MonitorConfigManifest::load_or_default(config_path)
        .ok()
        .and_then(|c| c.spec.observability)
        .and_then(|o| o.logging)
        .map(|l| l.format);
    match format.as_deref() {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
