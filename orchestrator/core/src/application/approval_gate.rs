// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Approval Gate - human-in-the-loop suspension for risky actions
//!
//! A workflow that needs approval registers an [`ApprovalRequest`] and parks on
//! the returned [`ApprovalWaiter`]. The request leaves `pending` exactly once:
//! by a human decision, by the expiry sweep or by withdrawal on cancellation.
//! All three go through the same per-entry compare-and-swap, so the first
//! writer wins and later writers get `AlreadyResolved`.
//!
//! Expiry deadlines use `tokio::time::Instant` so the sweep follows the
//! runtime clock (and paused time in tests).
//!
//! Closing the gate refuses new requests and withdraws every pending one.
//! The closed flag is checked under the same lock that registration holds, so
//! no request can slip in between the close and the withdrawal pass.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::action::RemediationAction;
use crate::domain::approval::{ApprovalDecision, ApprovalError, ApprovalRequest, ApprovalRequestId};
use crate::domain::events::ApprovalEvent;
use crate::domain::incident::IncidentId;
use crate::domain::workflow::WorkflowId;
use crate::infrastructure::event_bus::EventBus;

/// Actor recorded on requests that expire
pub const EXPIRY_ACTOR: &str = "approval-sweeper";

/// Actor recorded on requests withdrawn by a cancellation
pub const COORDINATOR_ACTOR: &str = "coordinator";

struct GateEntry {
    request: ApprovalRequest,
    deadline: Instant,
    notify: Option<oneshot::Sender<ApprovalDecision>>,
}

/// Handle a workflow awaits while its request is pending
#[derive(Debug)]
pub struct ApprovalWaiter {
    request_id: ApprovalRequestId,
    receiver: oneshot::Receiver<ApprovalDecision>,
}

impl ApprovalWaiter {
    pub fn request_id(&self) -> ApprovalRequestId {
        self.request_id
    }

    /// Wait for the request to leave `pending`. A gate dropped before the
    /// request resolved counts as expired.
    pub async fn wait(self) -> ApprovalDecision {
        self.receiver.await.unwrap_or(ApprovalDecision::Expired)
    }
}

pub struct ApprovalGate {
    entries: DashMap<ApprovalRequestId, GateEntry>,
    closed: RwLock<bool>,
    event_bus: EventBus,
}

impl ApprovalGate {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            entries: DashMap::new(),
            closed: RwLock::new(false),
            event_bus,
        }
    }

    /// Register a pending request that expires after `expiry`.
    ///
    /// Fails with [`ApprovalError::GateClosed`] once [`ApprovalGate::close`]
    /// has been called.
    pub fn request_approval(
        &self,
        workflow_id: WorkflowId,
        incident_id: IncidentId,
        action: &RemediationAction,
        requester: &str,
        expiry: Duration,
    ) -> Result<(ApprovalRequest, ApprovalWaiter), ApprovalError> {
        let closed = self.closed.read();
        if *closed {
            return Err(ApprovalError::GateClosed);
        }

        let expires_at = Utc::now()
            + chrono::Duration::from_std(expiry).unwrap_or_else(|_| chrono::Duration::days(365));
        let request = ApprovalRequest::new(
            workflow_id,
            incident_id,
            action.name.clone(),
            action.risk_tier,
            requester,
            expires_at,
        );
        let (tx, rx) = oneshot::channel();

        self.entries.insert(
            request.id,
            GateEntry {
                request: request.clone(),
                deadline: Instant::now() + expiry,
                notify: Some(tx),
            },
        );
        drop(closed);

        info!(
            request_id = %request.id,
            workflow_id = %workflow_id,
            action = %action.name,
            expires_at = %expires_at,
            "Approval requested"
        );
        self.event_bus.publish_approval_event(ApprovalEvent::ApprovalRequested {
            request_id: request.id,
            workflow_id,
            action: action.name.clone(),
            expires_at,
        });

        let waiter = ApprovalWaiter {
            request_id: request.id,
            receiver: rx,
        };
        Ok((request, waiter))
    }

    /// Refuse new requests and withdraw every pending one. Returns the ids
    /// withdrawn by this call.
    pub fn close(&self, reason: &str) -> Vec<ApprovalRequestId> {
        *self.closed.write() = true;

        let withdrawn: Vec<ApprovalRequestId> = self
            .list_pending()
            .into_iter()
            .filter_map(|request| match self.withdraw(request.id, reason) {
                Ok(resolved) => Some(resolved.id),
                Err(e) => {
                    debug!(request_id = %request.id, "Request resolved before close: {}", e);
                    None
                }
            })
            .collect();

        info!(withdrawn = withdrawn.len(), "Approval gate closed");
        withdrawn
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Record a human decision. Only `approved` and `denied` are accepted.
    pub fn decide(
        &self,
        request_id: ApprovalRequestId,
        decision: ApprovalDecision,
        actor: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        if !matches!(decision, ApprovalDecision::Approved | ApprovalDecision::Denied) {
            return Err(ApprovalError::InvalidDecision(decision));
        }
        self.resolve(request_id, decision, actor, reason)
    }

    /// Resolve a pending request as `denied` on behalf of a cancellation
    pub fn withdraw(
        &self,
        request_id: ApprovalRequestId,
        reason: &str,
    ) -> Result<ApprovalRequest, ApprovalError> {
        self.resolve(
            request_id,
            ApprovalDecision::Denied,
            COORDINATOR_ACTOR,
            Some(reason.to_string()),
        )
    }

    fn resolve(
        &self,
        request_id: ApprovalRequestId,
        decision: ApprovalDecision,
        actor: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let resolved = {
            let mut entry = self
                .entries
                .get_mut(&request_id)
                .ok_or(ApprovalError::NotFound(request_id))?;

            entry.request.resolve(decision, actor, reason)?;
            if let Some(tx) = entry.notify.take() {
                // The waiter may already be gone (workflow shut down)
                let _ = tx.send(decision);
            }
            entry.request.clone()
        };

        info!(
            request_id = %request_id,
            workflow_id = %resolved.workflow_id,
            decision = %decision,
            actor = actor,
            "Approval request resolved"
        );
        self.record_resolution(&resolved);
        Ok(resolved)
    }

    /// Expire every pending request whose deadline is at or before `now`.
    /// Returns the ids that this sweep expired.
    pub fn sweep_expired(&self, now: Instant) -> Vec<ApprovalRequestId> {
        let mut expired = Vec::new();

        for mut entry in self.entries.iter_mut() {
            if !entry.request.decision.is_pending() || entry.deadline > now {
                continue;
            }
            match entry
                .request
                .resolve(ApprovalDecision::Expired, EXPIRY_ACTOR, None)
            {
                Ok(()) => {
                    if let Some(tx) = entry.notify.take() {
                        let _ = tx.send(ApprovalDecision::Expired);
                    }
                    expired.push(entry.request.clone());
                }
                Err(e) => debug!(request_id = %entry.request.id, "Sweep lost race: {}", e),
            }
        }

        for request in &expired {
            warn!(
                request_id = %request.id,
                workflow_id = %request.workflow_id,
                action = %request.action,
                "Approval request expired without a decision"
            );
            self.record_resolution(request);
        }

        expired.into_iter().map(|r| r.id).collect()
    }

    fn record_resolution(&self, request: &ApprovalRequest) {
        metrics::counter!("shim_approvals_total", "status" => request.decision.as_str()).increment(1);
        self.event_bus.publish_approval_event(ApprovalEvent::ApprovalResolved {
            request_id: request.id,
            workflow_id: request.workflow_id,
            decision: request.decision,
            resolved_at: request.decided_at.unwrap_or_else(Utc::now),
        });
    }

    pub fn get(&self, request_id: ApprovalRequestId) -> Option<ApprovalRequest> {
        self.entries.get(&request_id).map(|e| e.request.clone())
    }

    /// Pending requests, oldest first
    pub fn list_pending(&self) -> Vec<ApprovalRequest> {
        let mut pending: Vec<ApprovalRequest> = self
            .entries
            .iter()
            .filter(|e| e.request.decision.is_pending())
            .map(|e| e.request.clone())
            .collect();
        pending.sort_by_key(|r| r.requested_at);
        pending
    }

    /// Drop resolved requests decided before `cutoff`
    pub fn prune_resolved(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| {
            e.request.decision.is_pending()
                || e.request.decided_at.map(|at| at >= cutoff).unwrap_or(true)
        });
        before - self.entries.len()
    }
}
