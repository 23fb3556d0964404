// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Audit Trail Domain Model
//!
//! Every state transition, decision and execution outcome of a workflow is
//! written as an immutable [`AuditEntry`]. Entries carry a per-incident
//! sequence number that is strictly increasing and gap-free; the log assigns
//! it on append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::{ActionName, RiskTier};
use crate::domain::approval::{ApprovalDecision, ApprovalRequest, ApprovalRequestId};
use crate::domain::collaborators::{CapturedState, HealthReport};
use crate::domain::execution::ExecutionRecord;
use crate::domain::incident::{Diagnosis, Incident, IncidentId};
use crate::domain::workflow::{WorkflowId, WorkflowState};

/// Per-incident sequence number, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    pub const FIRST: SequenceNumber = SequenceNumber(1);

    pub fn next(&self) -> SequenceNumber {
        SequenceNumber(self.0 + 1)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    IncidentOpened {
        incident: Incident,
    },
    Transition {
        from: WorkflowState,
        to: WorkflowState,
        reason: String,
    },
    DiagnosisAttached {
        diagnosis: Diagnosis,
    },
    ActionChosen {
        action: ActionName,
        risk_tier: RiskTier,
    },
    ApprovalRequested {
        request: ApprovalRequest,
    },
    /// A human decision as submitted; the request may still lose the race
    /// against expiry, which the following `approval_resolved` shows
    ApprovalDecisionReceived {
        request_id: ApprovalRequestId,
        decision: ApprovalDecision,
        actor: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ApprovalResolved {
        request_id: ApprovalRequestId,
        decision: ApprovalDecision,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor: Option<String>,
    },
    CancellationRequested {
        reason: String,
    },
    /// Pre-remediation state the rollback renders from
    StateCaptured {
        action: ActionName,
        values: CapturedState,
    },
    StateCaptureFailed {
        action: ActionName,
        error: String,
    },
    ExecutionCompleted {
        record: ExecutionRecord,
    },
    HealthChecked {
        report: HealthReport,
    },
    ManualInterventionRequired {
        reason: String,
    },
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::IncidentOpened { .. } => "incident_opened",
            AuditEvent::Transition { .. } => "transition",
            AuditEvent::DiagnosisAttached { .. } => "diagnosis_attached",
            AuditEvent::ActionChosen { .. } => "action_chosen",
            AuditEvent::ApprovalRequested { .. } => "approval_requested",
            AuditEvent::ApprovalDecisionReceived { .. } => "approval_decision_received",
            AuditEvent::ApprovalResolved { .. } => "approval_resolved",
            AuditEvent::CancellationRequested { .. } => "cancellation_requested",
            AuditEvent::StateCaptured { .. } => "state_captured",
            AuditEvent::StateCaptureFailed { .. } => "state_capture_failed",
            AuditEvent::ExecutionCompleted { .. } => "execution_completed",
            AuditEvent::HealthChecked { .. } => "health_checked",
            AuditEvent::ManualInterventionRequired { .. } => "manual_intervention_required",
        }
    }

    /// Target state when this entry records a transition
    pub fn transition_target(&self) -> Option<WorkflowState> {
        match self {
            AuditEvent::Transition { to, .. } => Some(*to),
            _ => None,
        }
    }
}

/// Entry submitted to the log; the sequence number is assigned on append
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub incident_id: IncidentId,
    pub workflow_id: WorkflowId,
    pub event: AuditEvent,
}

impl NewAuditEntry {
    pub fn new(incident_id: IncidentId, workflow_id: WorkflowId, event: AuditEvent) -> Self {
        Self {
            incident_id,
            workflow_id,
            event,
        }
    }

    pub fn into_entry(self, sequence: SequenceNumber, recorded_at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            incident_id: self.incident_id,
            workflow_id: self.workflow_id,
            sequence,
            recorded_at,
            event: self.event,
        }
    }
}

/// Persisted, immutable audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub incident_id: IncidentId,
    pub workflow_id: WorkflowId,
    pub sequence: SequenceNumber,
    pub recorded_at: DateTime<Utc>,
    pub event: AuditEvent,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Audit entry could not be encoded: {0}")]
    Serialization(String),

    #[error("Corrupt audit record for incident {incident_id} at sequence {sequence}: {detail}")]
    Corrupt {
        incident_id: IncidentId,
        sequence: u64,
        detail: String,
    },
}

impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        AuditError::StorageUnavailable(err.to_string())
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        AuditError::StorageUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_numbers_start_at_one() {
        assert_eq!(SequenceNumber::FIRST.value(), 1);
        assert_eq!(SequenceNumber::FIRST.next(), SequenceNumber(2));
    }

    #[test]
    fn test_event_is_tagged_by_type() {
        let event = AuditEvent::Transition {
            from: WorkflowState::Deciding,
            to: WorkflowState::Executing,
            reason: "action clear_cache is safe".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "transition");
        assert_eq!(value["to"], "executing");
        assert_eq!(event.transition_target(), Some(WorkflowState::Executing));
    }

    #[test]
    fn test_entry_roundtrip_through_json() {
        let entry = NewAuditEntry::new(
            IncidentId::new(),
            WorkflowId::new(),
            AuditEvent::ManualInterventionRequired {
                reason: "rollback failed".into(),
            },
        )
        .into_entry(SequenceNumber(7), Utc::now());

        let line = serde_json::to_string(&entry).unwrap();
        let parsed: AuditEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.sequence, SequenceNumber(7));
        assert_eq!(parsed.event.kind(), "manual_intervention_required");
    }
}
