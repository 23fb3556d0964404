// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Approval Request Domain Model
//!
//! An [`ApprovalRequest`] is linked 1:1 to a workflow parked in
//! `awaiting_approval`. It leaves `pending` exactly once: through a human
//! decision or through the expiry sweep, whichever writes first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::action::{ActionName, RiskTier};
use crate::domain::incident::IncidentId;
use crate::domain::workflow::WorkflowId;

/// Unique identifier for an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalRequestId(pub Uuid);

impl ApprovalRequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ApprovalRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ApprovalRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ApprovalRequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalDecision {
    pub fn is_pending(&self) -> bool {
        matches!(self, ApprovalDecision::Pending)
    }

    /// Only `approved` lets the workflow proceed; `expired` counts as `denied`.
    pub fn permits_execution(&self) -> bool {
        matches!(self, ApprovalDecision::Approved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::Pending => "pending",
            ApprovalDecision::Approved => "approved",
            ApprovalDecision::Denied => "denied",
            ApprovalDecision::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pending or resolved request for human approval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalRequestId,
    pub workflow_id: WorkflowId,
    pub incident_id: IncidentId,
    pub action: ActionName,
    pub risk_tier: RiskTier,
    pub requester: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decision: ApprovalDecision,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalRequest {
    pub fn new(
        workflow_id: WorkflowId,
        incident_id: IncidentId,
        action: ActionName,
        risk_tier: RiskTier,
        requester: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalRequestId::new(),
            workflow_id,
            incident_id,
            action,
            risk_tier,
            requester: requester.into(),
            requested_at: Utc::now(),
            expires_at,
            decision: ApprovalDecision::Pending,
            decided_by: None,
            decided_at: None,
            reason: None,
        }
    }

    /// Move out of `pending`. Fails with `AlreadyResolved` if another writer
    /// got there first.
    pub fn resolve(
        &mut self,
        decision: ApprovalDecision,
        actor: impl Into<String>,
        reason: Option<String>,
    ) -> Result<(), ApprovalError> {
        if decision.is_pending() {
            return Err(ApprovalError::InvalidDecision(decision));
        }
        if !self.decision.is_pending() {
            return Err(ApprovalError::AlreadyResolved {
                id: self.id,
                decision: self.decision,
            });
        }

        self.decision = decision;
        self.decided_by = Some(actor.into());
        self.decided_at = Some(Utc::now());
        self.reason = reason;
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("Approval request {0} not found")]
    NotFound(ApprovalRequestId),

    #[error("Approval request {id} already resolved as {decision}")]
    AlreadyResolved {
        id: ApprovalRequestId,
        decision: ApprovalDecision,
    },

    #[error("'{0}' is not a valid decision")]
    InvalidDecision(ApprovalDecision),

    #[error("Approval gate is closed to new requests")]
    GateClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ApprovalRequest {
        ApprovalRequest::new(
            WorkflowId::new(),
            IncidentId::new(),
            ActionName::new("restart_service").unwrap(),
            RiskTier::RequiresApproval,
            "shim",
            Utc::now() + chrono::Duration::seconds(60),
        )
    }

    #[test]
    fn test_first_resolution_wins() {
        let mut req = request();
        req.resolve(ApprovalDecision::Approved, "alice", None).unwrap();

        let second = req.resolve(ApprovalDecision::Expired, "sweeper", None);
        assert!(matches!(
            second,
            Err(ApprovalError::AlreadyResolved { decision: ApprovalDecision::Approved, .. })
        ));
        assert_eq!(req.decided_by.as_deref(), Some("alice"));
    }

    #[test]
    fn test_pending_is_not_a_decision() {
        let mut req = request();
        assert_eq!(
            req.resolve(ApprovalDecision::Pending, "bob", None),
            Err(ApprovalError::InvalidDecision(ApprovalDecision::Pending))
        );
        assert!(req.decision.is_pending());
    }

    #[test]
    fn test_expired_does_not_permit_execution() {
        assert!(ApprovalDecision::Approved.permits_execution());
        assert!(!ApprovalDecision::Denied.permits_execution());
        assert!(!ApprovalDecision::Expired.permits_execution());
    }
}
