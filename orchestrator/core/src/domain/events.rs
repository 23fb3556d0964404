// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::ActionName;
use crate::domain::approval::{ApprovalDecision, ApprovalRequestId};
use crate::domain::execution::{ExecutionKind, ExecutionOutcome};
use crate::domain::incident::{IncidentId, RemediationKey};
use crate::domain::workflow::{WorkflowId, WorkflowState};

/// Workflow lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RemediationEvent {
    WorkflowSubmitted {
        workflow_id: WorkflowId,
        incident_id: IncidentId,
        key: RemediationKey,
        submitted_at: DateTime<Utc>,
    },
    StateChanged {
        workflow_id: WorkflowId,
        incident_id: IncidentId,
        from: WorkflowState,
        to: WorkflowState,
        reason: String,
        changed_at: DateTime<Utc>,
    },
    ActionExecuted {
        workflow_id: WorkflowId,
        action: ActionName,
        kind: ExecutionKind,
        attempt: u32,
        outcome: ExecutionOutcome,
        executed_at: DateTime<Utc>,
    },
    WorkflowArchived {
        workflow_id: WorkflowId,
        archived_at: DateTime<Utc>,
    },
}

impl RemediationEvent {
    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            RemediationEvent::WorkflowSubmitted { workflow_id, .. }
            | RemediationEvent::StateChanged { workflow_id, .. }
            | RemediationEvent::ActionExecuted { workflow_id, .. }
            | RemediationEvent::WorkflowArchived { workflow_id, .. } => *workflow_id,
        }
    }
}

/// Approval gate events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ApprovalEvent {
    ApprovalRequested {
        request_id: ApprovalRequestId,
        workflow_id: WorkflowId,
        action: ActionName,
        expires_at: DateTime<Utc>,
    },
    ApprovalResolved {
        request_id: ApprovalRequestId,
        workflow_id: WorkflowId,
        decision: ApprovalDecision,
        resolved_at: DateTime<Utc>,
    },
}

/// Conditions that need an operator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    ManualInterventionRequired {
        workflow_id: WorkflowId,
        incident_id: IncidentId,
        key: RemediationKey,
        reason: String,
        raised_at: DateTime<Utc>,
    },
    WorkflowHalted {
        workflow_id: WorkflowId,
        incident_id: IncidentId,
        state: WorkflowState,
        error: String,
        halted_at: DateTime<Utc>,
    },
}
