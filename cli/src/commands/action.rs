// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Action catalog commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use shim_core::domain::action::{RemediationAction, RiskTier};

use super::{connect, print_json};

#[derive(Subcommand)]
pub enum ActionCommand {
    /// List the actions registered with the daemon
    List {
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(command: ActionCommand, host: &str, port: u16) -> Result<()> {
    match command {
        ActionCommand::List { json } => {
            let mut actions = connect(host, port).await?.list_actions().await?;
            actions.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
            if json {
                return print_json(&actions);
            }

            println!(
                "{:<24} {:<28} {:<10} {}",
                "NAME".bold(),
                "RISK TIER".bold(),
                "ROLLBACK".bold(),
                "DESCRIPTION".bold()
            );
            for action in &actions {
                println!("{}", format_row(action));
            }
            Ok(())
        }
    }
}

fn format_row(action: &RemediationAction) -> String {
    let tier = match action.risk_tier {
        RiskTier::Safe => action.risk_tier.as_str().green(),
        RiskTier::RequiresApproval => action.risk_tier.as_str().yellow(),
        RiskTier::ForbiddenWithoutOverride => action.risk_tier.as_str().red(),
    };
    let rollback = if action.rollback.is_some() { "yes" } else { "no" };
    let mut description = action.description.clone();
    if !action.idempotent {
        description.push_str(" [single attempt]");
    }
    format!("{:<24} {:<28} {:<10} {}", action.name.as_str(), tier, rollback, description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shim_core::application::ActionRegistry;

    #[test]
    fn test_non_idempotent_actions_are_flagged() {
        colored::control::set_override(false);
        let registry = ActionRegistry::with_builtin_catalog().unwrap();
        let kill = registry.resolve("kill_process").unwrap();
        let row = format_row(&kill);
        assert!(row.contains("forbidden_without_override"));
        assert!(row.contains("[single attempt]"));
    }
}
