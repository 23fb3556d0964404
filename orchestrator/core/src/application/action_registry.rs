// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Action Registry
//!
//! Catalog of remediation actions the engine may run. Diagnoses name actions;
//! the registry is the authority on whether a name exists, how risky it is and
//! how it is undone.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Responsibility:** Validate and store action definitions, resolve names
//! - **Concurrency:** read-mostly; registration takes the write lock,
//!   lookups share the read lock

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::domain::action::{ActionError, ActionName, CommandDescriptor, RemediationAction, RiskTier};

pub struct ActionRegistry {
    actions: RwLock<HashMap<ActionName, Arc<RemediationAction>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-populated with [`builtin_catalog`]
    pub fn with_builtin_catalog() -> Result<Self, ActionError> {
        let registry = Self::new();
        for action in builtin_catalog() {
            registry.register(action)?;
        }
        Ok(registry)
    }

    pub fn register(&self, action: RemediationAction) -> Result<(), ActionError> {
        action.validate()?;

        let mut actions = self.actions.write();
        if actions.contains_key(&action.name) {
            return Err(ActionError::DuplicateAction(action.name));
        }

        info!(
            action = %action.name,
            risk_tier = %action.risk_tier,
            idempotent = action.idempotent,
            "Registered remediation action"
        );
        actions.insert(action.name.clone(), Arc::new(action));
        Ok(())
    }

    /// Look up an action by name. Accepts raw strings so that unvalidated
    /// diagnosis output can be checked directly.
    pub fn resolve(&self, name: &str) -> Result<Arc<RemediationAction>, ActionError> {
        let actions = self.actions.read();
        ActionName::new(name)
            .ok()
            .and_then(|key| actions.get(&key).cloned())
            .ok_or_else(|| ActionError::UnknownAction(name.to_string()))
    }

    /// The inverse of `name`, run when a remediation has to be undone
    pub fn rollback_for(&self, name: &str) -> Result<RemediationAction, ActionError> {
        let action = self.resolve(name)?;
        action
            .inverse()
            .ok_or_else(|| ActionError::NoRollbackDefined(action.name.clone()))
    }

    /// All actions, ordered by name
    pub fn list(&self) -> Vec<RemediationAction> {
        let mut actions: Vec<RemediationAction> =
            self.actions.read().values().map(|a| a.as_ref().clone()).collect();
        actions.sort_by(|a, b| a.name.cmp(&b.name));
        actions
    }

    pub fn len(&self) -> usize {
        self.actions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.read().is_empty()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin(name: &'static str) -> ActionName {
    ActionName::from_static(name)
}

/// Reads the current replica count of `{{target}}`
fn replica_count() -> CommandDescriptor {
    CommandDescriptor::new("kubectl").args([
        "get",
        "deployment/{{target}}",
        "-o",
        "jsonpath={.spec.replicas}",
    ])
}

/// Built-in remediation actions
pub fn builtin_catalog() -> Vec<RemediationAction> {
    vec![
        RemediationAction::new(
            builtin("restart_service"),
            CommandDescriptor::new("systemctl").args(["restart", "{{target}}"]),
            RiskTier::RequiresApproval,
        )
        .with_description("Restart a service or application instance")
        .with_rollback(CommandDescriptor::new("systemctl").args(["start", "{{target}}"])),
        RemediationAction::new(
            builtin("scale_up"),
            CommandDescriptor::new("kubectl").args([
                "scale",
                "deployment/{{target}}",
                "--replicas={{params.target_capacity}}",
            ]),
            RiskTier::RequiresApproval,
        )
        .with_description("Scale up resources (add instances, increase capacity)")
        .with_rollback(CommandDescriptor::new("kubectl").args([
            "scale",
            "deployment/{{target}}",
            "--replicas={{params.previous_capacity}}",
        ]))
        .with_capture("previous_capacity", replica_count()),
        RemediationAction::new(
            builtin("scale_down"),
            CommandDescriptor::new("kubectl")
                .args([
                    "scale",
                    "deployment/{{target}}",
                    "--replicas={{params.target_capacity}}",
                ])
                .with_timeout(std::time::Duration::from_secs(300)),
            RiskTier::RequiresApproval,
        )
        .with_description("Scale down resources (remove instances, decrease capacity)")
        .with_rollback(CommandDescriptor::new("kubectl").args([
            "scale",
            "deployment/{{target}}",
            "--replicas={{params.previous_capacity}}",
        ]))
        .with_capture("previous_capacity", replica_count()),
        RemediationAction::new(
            builtin("clear_cache"),
            CommandDescriptor::new("redis-cli").args(["-h", "{{target}}", "FLUSHDB"]),
            RiskTier::Safe,
        )
        .with_description("Clear cache to resolve stale data issues"),
        RemediationAction::new(
            builtin("update_config"),
            CommandDescriptor::new("kubectl").args(["apply", "-f", "{{params.config_file}}"]),
            RiskTier::ForbiddenWithoutOverride,
        )
        .with_description("Update configuration to resolve issues")
        .with_rollback(
            CommandDescriptor::new("kubectl").args(["rollout", "undo", "deployment/{{target}}"]),
        ),
        RemediationAction::new(
            builtin("restart_pod"),
            CommandDescriptor::new("kubectl").args([
                "delete",
                "pod",
                "{{target}}",
                "--namespace={{params.namespace}}",
            ]),
            RiskTier::Safe,
        )
        .with_description("Restart a Kubernetes pod")
        .with_default_param("namespace", "default"),
        RemediationAction::new(
            builtin("kill_process"),
            CommandDescriptor::new("ssh").args(["{{target}}", "kill", "-TERM", "{{params.pid}}"]),
            RiskTier::ForbiddenWithoutOverride,
        )
        .with_description("Kill a problematic process")
        .with_rollback(
            CommandDescriptor::new("ssh").args(["{{target}}", "systemctl", "restart", "{{params.service}}"]),
        )
        .non_idempotent(),
    ]
}
