// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the SHIM CLI

pub mod action;
pub mod approval;
pub mod config;
pub mod daemon;
pub mod incident;

pub use self::action::ActionCommand;
pub use self::approval::ApprovalCommand;
pub use self::config::ConfigCommand;
pub use self::daemon::DaemonCommand;
pub use self::incident::IncidentCommand;

use colored::{ColoredString, Colorize};
use shim_core::domain::workflow::WorkflowState;

/// State name colored by outcome
pub(crate) fn colored_state(state: WorkflowState) -> ColoredString {
    let name = state.as_str();
    match state {
        WorkflowState::Resolved => name.green(),
        WorkflowState::RolledBack | WorkflowState::Closed => name.yellow(),
        WorkflowState::FailedPermanent => name.red().bold(),
        WorkflowState::AwaitingApproval => name.magenta(),
        _ => name.cyan(),
    }
}

/// Print `value` as pretty JSON
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Client for a daemon that is known to answer its health endpoint
pub(crate) async fn connect(host: &str, port: u16) -> anyhow::Result<crate::daemon::DaemonClient> {
    use crate::daemon::{check_daemon_running, DaemonClient, DaemonStatus};

    match check_daemon_running(host, port).await? {
        DaemonStatus::Running { .. } => DaemonClient::new(host, port),
        DaemonStatus::Stopped => {
            anyhow::bail!("Daemon is not running on {}:{}. Start it with: shim daemon start", host, port)
        }
        DaemonStatus::Unhealthy { error } => anyhow::bail!("Daemon is unhealthy: {}", error),
    }
}

/// One-line rendering of a workflow event for terminal output
pub(crate) fn describe_event(event: &shim_core::infrastructure::DomainEvent) -> String {
    use shim_core::domain::events::{AlertEvent, ApprovalEvent, RemediationEvent};
    use shim_core::infrastructure::DomainEvent;

    match event {
        DomainEvent::Remediation(RemediationEvent::WorkflowSubmitted { key, .. }) => {
            format!("submitted for {}", key)
        }
        DomainEvent::Remediation(RemediationEvent::StateChanged { from, to, reason, .. }) => {
            format!("{} → {} ({})", from, colored_state(*to), reason)
        }
        DomainEvent::Remediation(RemediationEvent::ActionExecuted {
            action,
            kind,
            attempt,
            outcome,
            ..
        }) => format!("{} {} attempt {}: {}", kind.as_str(), action, attempt, outcome),
        DomainEvent::Remediation(RemediationEvent::WorkflowArchived { .. }) => "archived".to_string(),
        DomainEvent::Approval(ApprovalEvent::ApprovalRequested {
            request_id,
            action,
            expires_at,
            ..
        }) => format!(
            "{} for {} (request {}, expires {})",
            "approval requested".magenta(),
            action,
            request_id,
            expires_at.format("%H:%M:%S")
        ),
        DomainEvent::Approval(ApprovalEvent::ApprovalResolved { decision, .. }) => {
            format!("approval {}", decision)
        }
        DomainEvent::Alert(AlertEvent::ManualInterventionRequired { reason, .. }) => {
            format!("{} {}", "MANUAL INTERVENTION REQUIRED:".red().bold(), reason)
        }
        DomainEvent::Alert(AlertEvent::WorkflowHalted { state, error, .. }) => {
            format!("{} in {}: {}", "HALTED".red().bold(), state, error)
        }
    }
}
