// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Remediation Action Domain Model
//!
//! A [`RemediationAction`] describes something the engine may do to a target:
//! the command it runs, the inverse command that undoes it, how risky it is and
//! whether running it twice is harmless.
//!
//! Command descriptors are templates. Placeholders are rendered with Handlebars
//! at execution time:
//!
//! - `{{target}}` - target resource reference
//! - `{{incident_id}}` - incident identifier
//! - `{{attempt}}` - attempt number (1-based)
//! - `{{params.<key>}}` - diagnosis parameters, and for rollbacks the state
//!   captured before the action ran
//!
//! An action may declare `capture` commands. They run once before the first
//! attempt; each command's trimmed stdout is stored under its key so the
//! rollback can restore what was there (e.g. the replica count before a
//! scale).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// Value Objects
// ============================================================================

/// Registry-unique action name (e.g. `restart_service`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionName(String);

impl ActionName {
    pub fn new(name: impl Into<String>) -> Result<Self, ActionError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 128
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'));

        if !valid {
            return Err(ActionError::InvalidName(name));
        }
        Ok(Self(name))
    }

    /// For built-in names that are known to satisfy the naming rules
    pub(crate) fn from_static(name: &'static str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name under which the inverse of this action is reported
    pub fn rollback_name(&self) -> ActionName {
        ActionName(format!("{}.rollback", self.0))
    }
}

impl TryFrom<String> for ActionName {
    type Error = ActionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ActionName> for String {
    fn from(name: ActionName) -> Self {
        name.0
    }
}

impl std::fmt::Display for ActionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Risk tier of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Executed without human approval
    Safe,
    /// Executed only after an approval request resolves to `approved`
    RequiresApproval,
    /// Rejected unless the incident carries an operator override, and then
    /// still gated behind approval
    ForbiddenWithoutOverride,
}

impl RiskTier {
    /// Tiers that must declare an inverse before they can be registered
    pub fn requires_rollback(&self) -> bool {
        !matches!(self, RiskTier::Safe)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Safe => "safe",
            RiskTier::RequiresApproval => "requires_approval",
            RiskTier::ForbiddenWithoutOverride => "forbidden_without_override",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executable command descriptor
///
/// `program` and every element of `args` and `env` are Handlebars templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Overrides the engine-wide execution timeout for this command
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl CommandDescriptor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Single-line rendering for logs and audit output
    pub fn display_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

// ============================================================================
// Entity
// ============================================================================

/// Catalog entry for a remediation action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    pub name: ActionName,

    #[serde(default)]
    pub description: String,

    pub command: CommandDescriptor,

    /// Inverse command; mandatory for every tier except `safe`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<CommandDescriptor>,

    pub risk_tier: RiskTier,

    /// Whether repeating the action is harmless. Non-idempotent actions
    /// are attempted once.
    #[serde(default = "default_idempotent")]
    pub idempotent: bool,

    /// Template parameters used when the diagnosis does not supply them
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_params: BTreeMap<String, serde_json::Value>,

    /// Commands that read pre-remediation state, keyed by the parameter the
    /// rollback reads it back from
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capture: BTreeMap<String, CommandDescriptor>,
}

fn default_idempotent() -> bool {
    true
}

impl RemediationAction {
    pub fn new(name: ActionName, command: CommandDescriptor, risk_tier: RiskTier) -> Self {
        Self {
            name,
            description: String::new(),
            command,
            rollback: None,
            risk_tier,
            idempotent: true,
            default_params: BTreeMap::new(),
            capture: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_rollback(mut self, rollback: CommandDescriptor) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn with_default_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.default_params.insert(key.into(), value.into());
        self
    }

    pub fn with_capture(mut self, key: impl Into<String>, command: CommandDescriptor) -> Self {
        self.capture.insert(key.into(), command);
        self
    }

    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    pub fn has_rollback(&self) -> bool {
        self.rollback.is_some()
    }

    /// Registration-time invariant check
    pub fn validate(&self) -> Result<(), ActionError> {
        if self.command.program.trim().is_empty() {
            return Err(ActionError::EmptyCommand(self.name.clone()));
        }
        if self.risk_tier.requires_rollback() && self.rollback.is_none() {
            return Err(ActionError::MissingRollback(self.name.clone()));
        }
        if let Some(rollback) = &self.rollback {
            if rollback.program.trim().is_empty() {
                return Err(ActionError::EmptyCommand(self.name.rollback_name()));
            }
        }
        if self.capture.values().any(|c| c.program.trim().is_empty()) {
            return Err(ActionError::EmptyCommand(self.name.clone()));
        }
        Ok(())
    }

    /// Derive the inverse action, or `None` when the action declares no rollback
    pub fn inverse(&self) -> Option<RemediationAction> {
        self.rollback.as_ref().map(|rollback| RemediationAction {
            name: self.name.rollback_name(),
            description: format!("Rollback of {}", self.name),
            command: rollback.clone(),
            rollback: None,
            risk_tier: RiskTier::Safe,
            idempotent: self.idempotent,
            default_params: self.default_params.clone(),
            capture: BTreeMap::new(),
        })
    }
}

// ============================================================================
// Domain Errors
// ============================================================================

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("Action '{0}' is already registered")]
    DuplicateAction(ActionName),

    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Action '{0}' requires a rollback command for its risk tier")]
    MissingRollback(ActionName),

    #[error("No rollback defined for action '{0}'")]
    NoRollbackDefined(ActionName),

    #[error("Invalid action name '{0}': use lowercase letters, digits, '_', '-' or '.'")]
    InvalidName(String),

    #[error("Action '{0}' has an empty command")]
    EmptyCommand(ActionName),
}
