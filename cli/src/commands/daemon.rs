// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon lifecycle management commands
//!
//! Commands: run, start, status

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::daemon::{check_daemon_running, start_daemon, DaemonStatus};

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Run the engine and HTTP API in the foreground
    Run,

    /// Start the daemon in the background (if not already running)
    Start,

    /// Check daemon status
    Status,
}

pub async fn handle_command(
    command: DaemonCommand,
    config_path: Option<PathBuf>,
    host: &str,
    port: u16,
) -> Result<()> {
    match command {
        DaemonCommand::Run => start_daemon(config_path, Some(host.to_string()), Some(port)).await,
        DaemonCommand::Start => start(config_path, host, port).await,
        DaemonCommand::Status => status(host, port).await,
    }
}

async fn start(config_path: Option<PathBuf>, host: &str, port: u16) -> Result<()> {
    // Fail fast on a broken configuration instead of inside the detached child
    crate::daemon::server::load_config(config_path.clone())?;

    info!("Checking if daemon is already running...");
    match check_daemon_running(host, port).await {
        Ok(DaemonStatus::Running { .. }) => {
            println!("{}", "✓ Daemon already running".green());
            return Ok(());
        }
        Ok(DaemonStatus::Unhealthy { error }) => {
            anyhow::bail!("A process answers on {}:{} but is unhealthy: {}", host, port, error);
        }
        Ok(DaemonStatus::Stopped) => info!("Daemon not running, starting..."),
        Err(e) => warn!("Failed to check daemon status: {}", e),
    }

    let current_exe = std::env::current_exe().context("Failed to get current executable path")?;

    let mut cmd = std::process::Command::new(current_exe);
    cmd.arg("--daemon")
        .arg("--host")
        .arg(host)
        .arg("--port")
        .arg(port.to_string());
    if let Some(config) = config_path {
        cmd.arg("--config").arg(config);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let temp_dir = std::env::temp_dir();
    let stdout_path = temp_dir.join("shim.out");
    let stderr_path = temp_dir.join("shim.err");
    let stdout_file = std::fs::File::create(&stdout_path).context("Failed to create stdout log file")?;
    let stderr_file = std::fs::File::create(&stderr_path).context("Failed to create stderr log file")?;

    cmd.stdin(std::process::Stdio::null())
        .stdout(stdout_file)
        .stderr(stderr_file);

    println!("Redirecting logs to: {}", stdout_path.display());
    let child = cmd.spawn().context("Failed to spawn daemon process")?;

    println!("{}", format!("✓ Daemon starting (PID: {})", child.id()).green());
    println!("Check status with: shim daemon status");
    Ok(())
}

async fn status(host: &str, port: u16) -> Result<()> {
    match check_daemon_running(host, port).await? {
        DaemonStatus::Running {
            uptime,
            active_workflows,
        } => {
            println!("{}", "✓ Daemon is running".green());
            if let Some(uptime) = uptime {
                println!("  Uptime: {}", format_duration(uptime));
            }
            if let Some(active) = active_workflows {
                println!("  Active workflows: {}", active);
            }
        }
        DaemonStatus::Stopped => {
            println!("{}", "✗ Daemon is not running".red());
        }
        DaemonStatus::Unhealthy { error } => {
            println!("{}", "⚠ Daemon unhealthy".yellow());
            println!("  HTTP API check failed: {}", error);
            println!("  Check logs at /tmp/shim.out and /tmp/shim.err");
        }
    }
    Ok(())
}

fn format_duration(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}
