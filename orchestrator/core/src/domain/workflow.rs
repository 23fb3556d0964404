// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Remediation Workflow Domain Model
//!
//! A [`RemediationWorkflow`] is the per-incident state machine that carries an
//! incident from diagnosis to a terminal outcome.
//!
//! # Architectural Context
//!
//! - **Bounded Context:** Remediation Context
//! - **Aggregate Root:** RemediationWorkflow (owns its Incident)
//!
//! # State Machine
//!
//! ```text
//! diagnosing ──> deciding ──> awaiting_approval ──> executing ──> verifying ──> resolved
//!     │              │   └──────────────────────────────┘ ↺ retry     │
//!     │              │               │                   │            │
//!     └──> closed <──┴───────────────┘                   └──> rolling_back ──> rolled_back
//!                                                             │          └──> failed_permanent
//!                                 executing / verifying ──────┴─────────────> failed_permanent
//! ```
//!
//! `resolved`, `rolled_back`, `closed` and `failed_permanent` are terminal.
//! Transitions are validated here; the runner makes each one atomic with its
//! audit entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::action::{ActionName, RiskTier};
use crate::domain::approval::ApprovalRequest;
use crate::domain::collaborators::{CapturedState, HealthReport};
use crate::domain::execution::{ExecutionKind, ExecutionRecord, ExecutionRecordId};
use crate::domain::incident::{Diagnosis, Incident};

// ============================================================================
// Value Objects: Identifiers
// ============================================================================

/// Unique identifier for a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Value Objects: States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Diagnosing,
    Deciding,
    AwaitingApproval,
    Executing,
    Verifying,
    RollingBack,
    Resolved,
    RolledBack,
    Closed,
    FailedPermanent,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Resolved
                | WorkflowState::RolledBack
                | WorkflowState::Closed
                | WorkflowState::FailedPermanent
        )
    }

    /// States in which an action is (or may be) running against the target
    pub fn is_executing_class(&self) -> bool {
        matches!(
            self,
            WorkflowState::Executing | WorkflowState::Verifying | WorkflowState::RollingBack
        )
    }

    /// States from which a cancellation is accepted
    pub fn is_cancellable(&self) -> bool {
        matches!(self, WorkflowState::Deciding | WorkflowState::AwaitingApproval)
    }

    pub fn can_transition_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        matches!(
            (self, next),
            (Diagnosing, Deciding)
                | (Diagnosing, Closed)
                | (Deciding, AwaitingApproval)
                | (Deciding, Executing)
                | (Deciding, Closed)
                | (AwaitingApproval, Executing)
                | (AwaitingApproval, Closed)
                | (Executing, Executing)
                | (Executing, Verifying)
                | (Executing, RollingBack)
                | (Executing, FailedPermanent)
                | (Verifying, Resolved)
                | (Verifying, RollingBack)
                | (Verifying, FailedPermanent)
                | (RollingBack, RolledBack)
                | (RollingBack, FailedPermanent)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Diagnosing => "diagnosing",
            WorkflowState::Deciding => "deciding",
            WorkflowState::AwaitingApproval => "awaiting_approval",
            WorkflowState::Executing => "executing",
            WorkflowState::Verifying => "verifying",
            WorkflowState::RollingBack => "rolling_back",
            WorkflowState::Resolved => "resolved",
            WorkflowState::RolledBack => "rolled_back",
            WorkflowState::Closed => "closed",
            WorkflowState::FailedPermanent => "failed_permanent",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The action the workflow committed to in `deciding`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChosenAction {
    pub name: ActionName,
    pub risk_tier: RiskTier,
    pub idempotent: bool,
    pub has_rollback: bool,
}

// ============================================================================
// Aggregate
// ============================================================================

/// Runtime state of one remediation. Serialized as the status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationWorkflow {
    pub id: WorkflowId,
    pub incident: Incident,
    pub state: WorkflowState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_action: Option<ChosenAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,

    /// State read before the first attempt; merged into rollback parameters
    #[serde(default, skip_serializing_if = "CapturedState::is_empty")]
    pub captured_state: CapturedState,

    #[serde(default)]
    pub executions: Vec<ExecutionRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,

    /// Why the workflow ended up closed or failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_reason: Option<String>,

    /// Set when the workflow stopped because its audit record could not be
    /// persisted. A halted workflow keeps its remediation key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_at: Option<DateTime<Utc>>,
}

impl RemediationWorkflow {
    pub fn new(id: WorkflowId, incident: Incident) -> Self {
        let now = Utc::now();
        Self {
            id,
            incident,
            state: WorkflowState::Diagnosing,
            diagnosis: None,
            chosen_action: None,
            approval: None,
            captured_state: CapturedState::new(),
            executions: Vec::new(),
            health: None,
            outcome_reason: None,
            halted: None,
            created_at: now,
            updated_at: now,
            terminal_at: None,
        }
    }

    /// Validate and apply a state change, returning the previous state.
    pub fn transition_to(&mut self, next: WorkflowState) -> Result<WorkflowState, WorkflowError> {
        if !self.state.can_transition_to(next) {
            return Err(WorkflowError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let previous = self.state;
        let now = Utc::now();
        self.state = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.terminal_at = Some(now);
        }
        Ok(previous)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn record_execution(&mut self, record: ExecutionRecord) {
        self.executions.push(record);
        self.updated_at = Utc::now();
    }

    /// Link the most recent remediation record to the rollback that undid it
    pub fn link_rollback(&mut self, rollback_id: ExecutionRecordId) -> Option<ExecutionRecordId> {
        let record = self
            .executions
            .iter_mut()
            .rev()
            .find(|r| r.kind == ExecutionKind::Remediation)?;
        record.rolled_back_by = Some(rollback_id);
        Some(record.id)
    }

    pub fn remediation_attempts(&self) -> usize {
        self.executions
            .iter()
            .filter(|r| r.kind == ExecutionKind::Remediation)
            .count()
    }

    pub fn rollback_records(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.executions
            .iter()
            .filter(|r| r.kind == ExecutionKind::Rollback)
    }
}

// ============================================================================
// Domain Errors
// ============================================================================

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Invalid transition from '{from}' to '{to}'")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::incident::{Severity, Symptom, SymptomClass, TargetRef};

    fn workflow() -> RemediationWorkflow {
        let incident = Incident::new(
            TargetRef::new("db-1").unwrap(),
            vec![Symptom::new(SymptomClass::new("high_memory").unwrap())],
            Severity::High,
        )
        .unwrap();
        RemediationWorkflow::new(WorkflowId::new(), incident)
    }

    #[test]
    fn test_workflow_id_creation() {
        assert_ne!(WorkflowId::new(), WorkflowId::new());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut wf = workflow();
        for next in [
            WorkflowState::Deciding,
            WorkflowState::Executing,
            WorkflowState::Verifying,
            WorkflowState::Resolved,
        ] {
            wf.transition_to(next).unwrap();
        }
        assert!(wf.is_terminal());
        assert!(wf.terminal_at.is_some());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let terminals = [
            WorkflowState::Resolved,
            WorkflowState::RolledBack,
            WorkflowState::Closed,
            WorkflowState::FailedPermanent,
        ];
        for terminal in terminals {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(WorkflowState::Executing));
            assert!(!terminal.can_transition_to(WorkflowState::Closed));
        }
    }

    #[test]
    fn test_cannot_skip_approval_into_verifying() {
        let mut wf = workflow();
        wf.transition_to(WorkflowState::Deciding).unwrap();
        wf.transition_to(WorkflowState::AwaitingApproval).unwrap();

        let err = wf.transition_to(WorkflowState::Verifying).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InvalidTransition {
                from: WorkflowState::AwaitingApproval,
                to: WorkflowState::Verifying,
            }
        );
        assert_eq!(wf.state, WorkflowState::AwaitingApproval);
    }

    #[test]
    fn test_cancellable_states() {
        assert!(WorkflowState::Deciding.is_cancellable());
        assert!(WorkflowState::AwaitingApproval.is_cancellable());
        assert!(!WorkflowState::Executing.is_cancellable());
        assert!(WorkflowState::RollingBack.is_executing_class());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&WorkflowState::FailedPermanent).unwrap();
        assert_eq!(json, "\"failed_permanent\"");
    }
}
