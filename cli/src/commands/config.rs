// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use shim_core::domain::node_config::MonitorConfigManifest;

pub const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
pub const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./shim-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate {
            output,
            examples,
            force,
        } => generate(output, examples, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config =
        MonitorConfigManifest::load_or_default(config_override.clone()).context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. SHIM_CONFIG_PATH: {}",
            std::env::var("SHIM_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./shim-config.yaml");
        println!("  4. ~/.shim/config.yaml");
        println!("  5. /etc/shim/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", "Node:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let remediation = &spec.remediation;
    println!("{}", "Remediation policy:".bold());
    if remediation.dry_run {
        println!("  {}", "DRY RUN: actions are not executed".yellow().bold());
    }
    println!("  Max attempts: {}", remediation.max_retries);
    println!("  Rollback on failure: {}", remediation.rollback_on_failure);
    println!("  Approval timeout: {:?}", remediation.approval_timeout);
    println!("  Min confidence: {:.2}", remediation.min_confidence);
    if remediation.allowed_actions.is_empty() {
        println!("  Allowed actions: {}", "(all registered)".dimmed());
    } else {
        let names: Vec<&str> = remediation.allowed_actions.iter().map(|a| a.as_str()).collect();
        println!("  Allowed actions: {}", names.join(", "));
    }
    println!();

    println!("{}", "Audit log:".bold());
    println!("  Backend: {:?}", spec.audit.backend);
    if let Some(path) = &spec.audit.path {
        println!("  Path: {}", path);
    }
    println!("  Retention: {} days", spec.retention.history_retention_days);
    println!();

    println!("{}", "Catalog:".bold());
    println!("  Custom actions: {}", spec.actions.len());
    for action in &spec.actions {
        println!("    - {} ({})", action.name, action.risk_tier);
    }
    println!("  Playbooks: {}", spec.playbooks.len());
    for playbook in &spec.playbooks {
        let actions: Vec<&str> = playbook.actions.iter().map(|a| a.as_str()).collect();
        println!("    - {} → {}", playbook.symptom_class, actions.join(", "));
    }
    println!();

    let network = config.network();
    println!("{}", "Network:".bold());
    println!("  API: {}:{}", network.bind_address, network.port);
    println!("  Health check: {}", spec.health_check.endpoint);

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = MonitorConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: PathBuf, with_examples: bool, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(&output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());
    Ok(())
}
