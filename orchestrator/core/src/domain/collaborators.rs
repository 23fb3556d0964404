// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! External Collaborator Ports
//!
//! The engine talks to the outside world through three traits: a diagnostic
//! source, an action executor (which also reads pre-remediation state) and a
//! health checker. Adapters live in
//! `crate::infrastructure`; tests provide their own stubs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::action::RemediationAction;
use crate::domain::execution::ExecutionKind;
use crate::domain::incident::{Diagnosis, Incident, IncidentId, TargetRef};
use crate::domain::workflow::WorkflowId;

/// Everything an executor needs to run one attempt of an action
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    pub workflow_id: WorkflowId,
    pub incident_id: IncidentId,
    pub target: TargetRef,
    pub action: RemediationAction,
    pub kind: ExecutionKind,
    pub attempt: u32,
    pub parameters: HashMap<String, serde_json::Value>,
}

/// Result of running an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub success: bool,
    pub output: String,
    #[serde(default)]
    pub dry_run: bool,
}

impl ActionOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            dry_run: false,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            dry_run: false,
        }
    }

    pub fn dry_run(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            dry_run: true,
        }
    }
}

/// Health of a target after remediation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    /// Health score in `[0.0, 1.0]`
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn healthy(score: f64) -> Self {
        Self {
            healthy: true,
            score,
            detail: None,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(score: f64, detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            score,
            detail: Some(detail.into()),
            checked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("{0}")]
    Failed(String),
}

/// Produces a diagnosis for an incident
#[async_trait]
pub trait Diagnostician: Send + Sync {
    /// `Ok(None)` means no diagnosis could be produced for this incident.
    async fn diagnose(&self, incident: &Incident) -> Result<Option<Diagnosis>, CollaboratorError>;
}

/// Values read from the target before an action changes it
pub type CapturedState = HashMap<String, serde_json::Value>;

/// Runs an action against a target
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, invocation: &ActionInvocation) -> Result<ActionOutput, CollaboratorError>;

    /// Run the action's `capture` commands and return one value per key.
    /// Executors that cannot read target state capture nothing.
    async fn capture_state(&self, _invocation: &ActionInvocation) -> Result<CapturedState, CollaboratorError> {
        Ok(CapturedState::new())
    }
}

/// Reports whether a target is healthy
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, incident: &Incident) -> Result<HealthReport, CollaboratorError>;
}
