// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Incident commands
//!
//! Commands: submit, status, list, cancel, audit

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use shim_core::domain::action::ActionName;
use shim_core::domain::events::RemediationEvent;
use shim_core::domain::incident::{Diagnosis, Severity};
use shim_core::domain::workflow::{RemediationWorkflow, WorkflowId};
use shim_core::infrastructure::DomainEvent;
use shim_core::presentation::api::{SubmitIncidentRequest, SymptomInput};

use super::{colored_state, connect, describe_event, print_json};
use crate::daemon::{check_daemon_running, DaemonClient, DaemonStatus};
use crate::embedded::EmbeddedEngine;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SeverityArg {
    Low,
    Medium,
    High,
    Critical,
}

impl From<SeverityArg> for Severity {
    fn from(value: SeverityArg) -> Self {
        match value {
            SeverityArg::Low => Severity::Low,
            SeverityArg::Medium => Severity::Medium,
            SeverityArg::High => Severity::High,
            SeverityArg::Critical => Severity::Critical,
        }
    }
}

#[derive(Subcommand)]
pub enum IncidentCommand {
    /// Submit an incident for remediation
    Submit {
        /// Affected resource (host, service, pod)
        #[arg(required_unless_present = "file")]
        target: Option<String>,

        /// Symptom as `class` or `class:description` (repeatable)
        #[arg(short, long = "symptom", value_name = "SYMPTOM")]
        symptoms: Vec<String>,

        #[arg(long, value_enum, default_value = "medium")]
        severity: SeverityArg,

        /// Root-cause hypothesis; supplying a diagnosis skips the playbooks
        #[arg(long, requires = "actions")]
        root_cause: Option<String>,

        /// Suggested action, most preferred first (repeatable)
        #[arg(short, long = "action", value_name = "ACTION")]
        actions: Vec<String>,

        /// Confidence of the supplied diagnosis
        #[arg(long, default_value = "0.9")]
        confidence: f64,

        /// Template parameter as key=value (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Allow forbidden_without_override actions (still gated by approval)
        #[arg(long = "override")]
        override_forbidden: bool,

        /// Read the whole request from a JSON or YAML file
        #[arg(short, long, conflicts_with = "target")]
        file: Option<PathBuf>,

        /// Stream the workflow's events until it reaches a terminal state
        #[arg(long)]
        follow: bool,
    },

    /// Show a workflow's status
    Status {
        workflow_id: WorkflowId,

        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// List tracked workflows
    List {
        #[arg(long)]
        json: bool,
    },

    /// Cancel a workflow that has not started executing
    Cancel {
        workflow_id: WorkflowId,

        #[arg(short, long)]
        reason: String,
    },

    /// Show a workflow's audit trail
    Audit {
        workflow_id: WorkflowId,

        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(
    command: IncidentCommand,
    config_path: Option<PathBuf>,
    host: &str,
    port: u16,
) -> Result<()> {
    match command {
        IncidentCommand::Submit {
            target,
            symptoms,
            severity,
            root_cause,
            actions,
            confidence,
            params,
            override_forbidden,
            file,
            follow,
        } => {
            let request = match file {
                Some(path) => read_request(&path)?,
                None => build_request(
                    target.unwrap_or_default(),
                    &symptoms,
                    severity.into(),
                    root_cause,
                    &actions,
                    confidence,
                    &params,
                    override_forbidden,
                )?,
            };
            submit(request, follow, config_path, host, port).await
        }
        IncidentCommand::Status { workflow_id, json } => {
            let workflow = connect(host, port).await?.get_workflow(workflow_id).await?;
            if json {
                print_json(&workflow)
            } else {
                print_workflow(&workflow);
                Ok(())
            }
        }
        IncidentCommand::List { json } => {
            let workflows = connect(host, port).await?.list_workflows().await?;
            if json {
                return print_json(&workflows);
            }
            if workflows.is_empty() {
                println!("No workflows tracked");
                return Ok(());
            }
            println!(
                "{:<38} {:<32} {:<18} {}",
                "WORKFLOW".bold(),
                "KEY".bold(),
                "STATE".bold(),
                "UPDATED".bold()
            );
            for workflow in workflows {
                println!(
                    "{:<38} {:<32} {:<18} {}",
                    workflow.id,
                    workflow.incident.remediation_key().to_string(),
                    colored_state(workflow.state),
                    workflow.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        IncidentCommand::Cancel { workflow_id, reason } => {
            connect(host, port)
                .await?
                .cancel_workflow(workflow_id, reason)
                .await?;
            println!("{}", format!("✓ Workflow {} cancelled", workflow_id).green());
            Ok(())
        }
        IncidentCommand::Audit { workflow_id, json } => {
            let entries = connect(host, port).await?.audit_trail(workflow_id).await?;
            if json {
                return print_json(&entries);
            }
            for entry in entries {
                let detail = match entry.event.transition_target() {
                    Some(state) => format!("→ {}", colored_state(state)),
                    None => String::new(),
                };
                println!(
                    "{:>4}  {}  {:<24} {}",
                    entry.sequence,
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                    entry.event.kind(),
                    detail
                );
            }
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_request(
    target: String,
    symptoms: &[String],
    severity: Severity,
    root_cause: Option<String>,
    actions: &[String],
    confidence: f64,
    params: &[String],
    override_forbidden: bool,
) -> Result<SubmitIncidentRequest> {
    if symptoms.is_empty() {
        anyhow::bail!("At least one --symptom is required");
    }

    let symptoms = symptoms
        .iter()
        .map(|raw| match raw.split_once(':') {
            Some((class, description)) => SymptomInput {
                class: class.trim().to_string(),
                description: Some(description.trim().to_string()),
            },
            None => SymptomInput {
                class: raw.trim().to_string(),
                description: None,
            },
        })
        .collect();

    let diagnosis = match root_cause {
        Some(root_cause) => {
            let actions = actions
                .iter()
                .map(|a| ActionName::new(a.as_str()))
                .collect::<Result<Vec<_>, _>>()?;
            let mut diagnosis = Diagnosis::new(root_cause, confidence, actions);
            for param in params {
                let (key, value) = parse_param(param)?;
                diagnosis = diagnosis.with_parameter(key, value);
            }
            diagnosis.produced_by = Some(format!("cli:{}", operator()));
            Some(diagnosis)
        }
        None if !actions.is_empty() || !params.is_empty() => {
            anyhow::bail!("--action and --param require --root-cause")
        }
        None => None,
    };

    Ok(SubmitIncidentRequest {
        target,
        symptoms,
        severity,
        diagnosis,
        override_forbidden,
    })
}

/// `key=value`; the value is taken as JSON when it parses, else as a string
fn parse_param(raw: &str) -> Result<(String, serde_json::Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Invalid parameter '{}', expected key=value", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

fn read_request(path: &PathBuf) -> Result<SubmitIncidentRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read incident file {:?}", path))?;
    // YAML is a superset of JSON
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse incident file {:?}", path))
}

pub(crate) fn operator() -> String {
    std::env::var("USER").unwrap_or_else(|_| "operator".to_string())
}

async fn submit(
    request: SubmitIncidentRequest,
    follow: bool,
    config_path: Option<PathBuf>,
    host: &str,
    port: u16,
) -> Result<()> {
    match check_daemon_running(host, port).await? {
        DaemonStatus::Running { .. } => {
            let client = DaemonClient::new(host, port)?;
            let response = client.submit_incident(&request).await?;
            println!(
                "{}",
                format!("✓ Incident {} accepted", response.incident_id).green()
            );
            println!("  Workflow: {}", response.workflow_id);

            if follow {
                client
                    .stream_events(
                        response.workflow_id,
                        |event| println!("  {}", describe_event(event)),
                        is_terminal_transition,
                    )
                    .await?;
                let workflow = client.get_workflow(response.workflow_id).await?;
                print_outcome(&workflow);
            }
            Ok(())
        }
        DaemonStatus::Stopped => {
            info!("Daemon not running, remediating in embedded mode");
            println!("{}", "Daemon not running, remediating in-process".dimmed());

            let engine = EmbeddedEngine::new(config_path).await?;
            let result = engine
                .run_incident(request, |event| println!("  {}", describe_event(event)))
                .await;
            engine.shutdown().await;

            let workflow = result?;
            print_outcome(&workflow);
            Ok(())
        }
        DaemonStatus::Unhealthy { error } => anyhow::bail!("Daemon is unhealthy: {}", error),
    }
}

fn is_terminal_transition(event: &DomainEvent) -> bool {
    matches!(
        event,
        DomainEvent::Remediation(RemediationEvent::StateChanged { to, .. }) if to.is_terminal()
    )
}

fn print_outcome(workflow: &RemediationWorkflow) {
    println!();
    println!("Workflow {} finished: {}", workflow.id, colored_state(workflow.state));
    if let Some(reason) = &workflow.outcome_reason {
        println!("  Reason: {}", reason);
    }
}

fn print_workflow(workflow: &RemediationWorkflow) {
    let incident = &workflow.incident;
    println!("{}", format!("Workflow {}", workflow.id).bold());
    println!("  State: {}", colored_state(workflow.state));
    println!("  Incident: {}", incident.id);
    println!("  Key: {}", incident.remediation_key());
    println!("  Severity: {:?}", incident.severity);
    if let Some(reason) = &workflow.outcome_reason {
        println!("  Reason: {}", reason);
    }
    if let Some(error) = &workflow.halted {
        println!("  {} {}", "HALTED:".red().bold(), error);
    }

    if let Some(diagnosis) = &workflow.diagnosis {
        let actions: Vec<&str> = diagnosis.suggested_actions.iter().map(|a| a.as_str()).collect();
        println!();
        println!("{}", "Diagnosis:".bold());
        println!("  Root cause: {}", diagnosis.root_cause);
        println!("  Confidence: {:.2}", diagnosis.confidence);
        println!("  Suggested: {}", actions.join(", "));
    }

    if let Some(chosen) = &workflow.chosen_action {
        println!();
        println!("{}", "Action:".bold());
        println!("  {} ({})", chosen.name, chosen.risk_tier);
        if !chosen.idempotent {
            println!("  {}", "non-idempotent: attempted once".yellow());
        }
    }

    if let Some(approval) = &workflow.approval {
        println!("  Approval {}: {}", approval.id, approval.decision);
        if let Some(by) = &approval.decided_by {
            println!("  Decided by: {}", by);
        }
    }

    if !workflow.executions.is_empty() {
        println!();
        println!("{}", "Executions:".bold());
        for record in &workflow.executions {
            println!(
                "  {} {} #{} {}{}",
                record.kind.as_str(),
                record.action,
                record.attempt,
                record.outcome,
                if record.dry_run { " (dry run)" } else { "" }
            );
        }
    }

    if let Some(health) = &workflow.health {
        println!();
        let verdict = if health.healthy { "healthy".green() } else { "unhealthy".red() };
        println!("  Health: {} (score {:.2})", verdict, health.score);
        if let Some(detail) = &health.detail {
            println!("  Detail: {}", detail);
        }
    }
}
