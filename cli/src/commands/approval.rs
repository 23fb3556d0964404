// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Approval commands
//!
//! Commands: list, approve, deny

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use colored::Colorize;

use shim_core::domain::approval::{ApprovalDecision, ApprovalRequest, ApprovalRequestId};

use super::incident::operator;
use super::{connect, print_json};

#[derive(Subcommand)]
pub enum ApprovalCommand {
    /// List pending approval requests
    List {
        #[arg(long)]
        json: bool,
    },

    /// Approve a pending request
    Approve {
        request_id: ApprovalRequestId,

        /// Who is deciding (default: $USER)
        #[arg(long)]
        actor: Option<String>,

        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Deny a pending request
    Deny {
        request_id: ApprovalRequestId,

        /// Who is deciding (default: $USER)
        #[arg(long)]
        actor: Option<String>,

        #[arg(short, long)]
        reason: Option<String>,
    },
}

pub async fn handle_command(command: ApprovalCommand, host: &str, port: u16) -> Result<()> {
    match command {
        ApprovalCommand::List { json } => {
            let approvals = connect(host, port).await?.list_approvals().await?;
            if json {
                return print_json(&approvals);
            }
            if approvals.is_empty() {
                println!("No pending approvals");
                return Ok(());
            }
            for approval in &approvals {
                print_request(approval);
            }
            Ok(())
        }
        ApprovalCommand::Approve {
            request_id,
            actor,
            reason,
        } => decide(host, port, request_id, ApprovalDecision::Approved, actor, reason).await,
        ApprovalCommand::Deny {
            request_id,
            actor,
            reason,
        } => decide(host, port, request_id, ApprovalDecision::Denied, actor, reason).await,
    }
}

async fn decide(
    host: &str,
    port: u16,
    request_id: ApprovalRequestId,
    decision: ApprovalDecision,
    actor: Option<String>,
    reason: Option<String>,
) -> Result<()> {
    let actor = actor.unwrap_or_else(operator);
    let resolved = connect(host, port)
        .await?
        .decide_approval(request_id, decision, actor, reason)
        .await?;

    let message = format!("✓ Request {} {}", resolved.id, resolved.decision);
    if resolved.decision.permits_execution() {
        println!("{}", message.green());
    } else {
        println!("{}", message.yellow());
    }
    println!("  Workflow: {}", resolved.workflow_id);
    Ok(())
}

fn print_request(request: &ApprovalRequest) {
    let remaining = (request.expires_at - Utc::now()).num_seconds().max(0);
    println!("{}", format!("Request {}", request.id).bold());
    println!("  Action: {} ({})", request.action, request.risk_tier);
    println!("  Workflow: {}", request.workflow_id);
    println!("  Requested by: {} at {}", request.requester, request.requested_at.format("%H:%M:%S"));
    println!("  Expires in: {}s", remaining);
    println!();
}
