// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Remediation Coordinator
//!
//! Owns every live [`RemediationWorkflow`] and the background loops that move
//! them along in time.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Responsibility:** Intake, at-most-one-active-remediation per
//!   `(target, symptom class)`, cancellation, approval routing, expiry sweeps
//!   and archival
//!
//! The key reservation goes through `DashMap::entry`, so two concurrent
//! submissions for the same key can never both win. With a capacity limit the
//! count check and the insert run under one admission lock. A key is released
//! only when its workflow reaches a terminal state; halted workflows keep
//! theirs.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::application::workflow_runner::{
    RunOutcome, WorkflowHandle, WorkflowRunner, WorkflowServices,
};
use crate::domain::approval::{ApprovalDecision, ApprovalError, ApprovalRequest, ApprovalRequestId};
use crate::domain::audit::{AuditEntry, AuditError, AuditEvent, NewAuditEntry};
use crate::domain::events::RemediationEvent;
use crate::domain::incident::{Incident, IncidentError, RemediationKey};
use crate::domain::workflow::{RemediationWorkflow, WorkflowId, WorkflowState};

/// Coordinator-level knobs that are not part of the per-workflow policy
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub max_active_workflows: Option<usize>,
    pub approval_sweep_interval: Duration,
    pub history_retention: Duration,
    pub janitor_interval: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_active_workflows: None,
            approval_sweep_interval: Duration::from_secs(1),
            history_retention: Duration::from_secs(7 * 24 * 60 * 60),
            janitor_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Workflow {existing} is already remediating {key}")]
    ConflictingWorkflow {
        key: RemediationKey,
        existing: WorkflowId,
    },

    #[error("Coordinator is at capacity ({0} active workflows)")]
    AtCapacity(usize),

    #[error("Workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("Workflow {0} is executing and cannot be cancelled")]
    CannotCancelExecuting(WorkflowId),

    #[error("Workflow {id} cannot be cancelled in state {state}")]
    InvalidState { id: WorkflowId, state: WorkflowState },

    #[error("Invalid incident: {0}")]
    InvalidIncident(#[from] IncidentError),

    #[error("Audit storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error("Coordinator is shutting down")]
    ShuttingDown,
}

impl From<AuditError> for CoordinatorError {
    fn from(err: AuditError) -> Self {
        CoordinatorError::StorageUnavailable(err.to_string())
    }
}

pub struct Coordinator {
    services: WorkflowServices,
    settings: CoordinatorSettings,
    workflows: DashMap<WorkflowId, Arc<WorkflowHandle>>,
    active_keys: Arc<DashMap<RemediationKey, WorkflowId>>,
    /// Serializes capacity-limited reservations
    admission: Mutex<()>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(services: WorkflowServices, settings: CoordinatorSettings) -> Arc<Self> {
        Arc::new(Self {
            services,
            settings,
            workflows: DashMap::new(),
            active_keys: Arc::new(DashMap::new()),
            admission: Mutex::new(()),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn services(&self) -> &WorkflowServices {
        &self.services
    }

    /// Spawn the approval sweeper and the janitor
    pub fn start_background_tasks(self: &Arc<Self>) {
        let sweeper = Arc::clone(self);
        self.tracker.spawn(async move { sweeper.run_approval_sweeper().await });

        let janitor = Arc::clone(self);
        self.tracker.spawn(async move { janitor.run_janitor().await });
    }

    pub async fn submit(&self, incident: Incident) -> Result<WorkflowId, CoordinatorError> {
        if self.shutdown.is_cancelled() {
            return Err(CoordinatorError::ShuttingDown);
        }
        incident.validate()?;

        let key = incident.remediation_key();
        let workflow_id = WorkflowId::new();
        self.reserve_key(&key, workflow_id)?;

        let opened = NewAuditEntry::new(
            incident.id,
            workflow_id,
            AuditEvent::IncidentOpened {
                incident: incident.clone(),
            },
        );
        if let Err(e) = self.services.audit.append(opened).await {
            self.active_keys.remove(&key);
            warn!(key = %key, "Rejecting incident, audit log unavailable: {}", e);
            return Err(e.into());
        }

        let workflow = RemediationWorkflow::new(workflow_id, incident);
        let incident_id = workflow.incident.id;
        let handle = Arc::new(WorkflowHandle::new(workflow));
        self.workflows.insert(workflow_id, Arc::clone(&handle));

        info!(
            workflow_id = %workflow_id,
            incident_id = %incident_id,
            key = %key,
            "Incident accepted"
        );
        metrics::counter!("shim_workflows_submitted_total").increment(1);
        metrics::gauge!("shim_active_workflows").set(self.active_keys.len() as f64);
        self.services
            .event_bus
            .publish_remediation_event(RemediationEvent::WorkflowSubmitted {
                workflow_id,
                incident_id,
                key: key.clone(),
                submitted_at: Utc::now(),
            });

        let runner = WorkflowRunner::new(handle, self.services.clone());
        let active_keys = Arc::clone(&self.active_keys);
        self.tracker.spawn(async move {
            match runner.run().await {
                RunOutcome::Terminal(_) => {
                    active_keys.remove_if(&key, |_, id| *id == workflow_id);
                    metrics::gauge!("shim_active_workflows").set(active_keys.len() as f64);
                }
                RunOutcome::Halted(reason) => {
                    warn!(workflow_id = %workflow_id, key = %key, "Key held by halted workflow: {}", reason);
                }
            }
        });

        Ok(workflow_id)
    }

    fn reserve_key(&self, key: &RemediationKey, workflow_id: WorkflowId) -> Result<(), CoordinatorError> {
        // Releases only shrink the map, so holding the lock across the count
        // and the insert is enough to keep it at or below the limit
        let _admission = match self.settings.max_active_workflows {
            Some(max) => {
                let guard = self.admission.lock();
                if self.active_keys.len() >= max {
                    return Err(CoordinatorError::AtCapacity(max));
                }
                Some(guard)
            }
            None => None,
        };

        match self.active_keys.entry(key.clone()) {
            Entry::Occupied(existing) => Err(CoordinatorError::ConflictingWorkflow {
                key: key.clone(),
                existing: *existing.get(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(workflow_id);
                Ok(())
            }
        }
    }

    pub fn status(&self, workflow_id: WorkflowId) -> Result<RemediationWorkflow, CoordinatorError> {
        self.handle(workflow_id).map(|h| h.snapshot())
    }

    /// Snapshots of every tracked workflow, newest first
    pub fn list(&self) -> Vec<RemediationWorkflow> {
        let mut workflows: Vec<RemediationWorkflow> =
            self.workflows.iter().map(|h| h.snapshot()).collect();
        workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        workflows
    }

    pub fn subscribe(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<watch::Receiver<RemediationWorkflow>, CoordinatorError> {
        self.handle(workflow_id).map(|h| h.subscribe())
    }

    pub async fn wait_for_terminal(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<RemediationWorkflow, CoordinatorError> {
        let handle = self.handle(workflow_id)?;
        Ok(handle.wait_for_terminal().await)
    }

    pub async fn read_audit(&self, workflow_id: WorkflowId) -> Result<Vec<AuditEntry>, CoordinatorError> {
        use futures::TryStreamExt;

        let handle = self.handle(workflow_id)?;
        let entries: Vec<AuditEntry> = self
            .services
            .audit
            .read(handle.incident_id())
            .try_collect()
            .await?;
        Ok(entries)
    }

    /// Cancel a workflow that has not started executing.
    ///
    /// Accepted only in `deciding` and `awaiting_approval`. The cancellation is
    /// audited before it takes effect and beats any approval that lands after it.
    pub async fn cancel(&self, workflow_id: WorkflowId, reason: &str) -> Result<(), CoordinatorError> {
        let handle = self.handle(workflow_id)?;
        let mut cell = handle.lock().await;
        let state = cell.workflow.state;

        if state.is_executing_class() {
            return Err(CoordinatorError::CannotCancelExecuting(workflow_id));
        }
        if !state.is_cancellable() || cell.workflow.halted.is_some() {
            return Err(CoordinatorError::InvalidState { id: workflow_id, state });
        }
        if cell.cancel_reason.is_some() {
            return Ok(());
        }

        self.services
            .audit
            .append(NewAuditEntry::new(
                handle.incident_id(),
                workflow_id,
                AuditEvent::CancellationRequested {
                    reason: reason.to_string(),
                },
            ))
            .await?;
        cell.cancel_reason = Some(reason.to_string());

        if let Some(request) = cell.workflow.approval.as_ref().filter(|r| r.decision.is_pending()) {
            if let Err(e) = self.services.gate.withdraw(request.id, reason) {
                debug!(workflow_id = %workflow_id, "Approval already resolved at cancellation: {}", e);
            }
        }

        info!(workflow_id = %workflow_id, state = %state, "Cancellation accepted: {}", reason);
        Ok(())
    }

    /// Record a human decision on a pending request.
    ///
    /// The decision is audited before it reaches the gate. When the audit log
    /// cannot take it the request stays pending and the caller gets
    /// [`CoordinatorError::StorageUnavailable`].
    pub async fn decide_approval(
        &self,
        request_id: ApprovalRequestId,
        decision: ApprovalDecision,
        actor: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, CoordinatorError> {
        if !matches!(decision, ApprovalDecision::Approved | ApprovalDecision::Denied) {
            return Err(ApprovalError::InvalidDecision(decision).into());
        }
        let request = self
            .services
            .gate
            .get(request_id)
            .ok_or(ApprovalError::NotFound(request_id))?;
        if !request.decision.is_pending() {
            return Err(ApprovalError::AlreadyResolved {
                id: request_id,
                decision: request.decision,
            }
            .into());
        }

        self.services
            .audit
            .append(NewAuditEntry::new(
                request.incident_id,
                request.workflow_id,
                AuditEvent::ApprovalDecisionReceived {
                    request_id,
                    decision,
                    actor: actor.to_string(),
                    reason: reason.clone(),
                },
            ))
            .await?;

        Ok(self.services.gate.decide(request_id, decision, actor, reason)?)
    }

    pub fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.services.gate.list_pending()
    }

    /// Number of remediation keys currently held
    pub fn active_count(&self) -> usize {
        self.active_keys.len()
    }

    fn handle(&self, workflow_id: WorkflowId) -> Result<Arc<WorkflowHandle>, CoordinatorError> {
        self.workflows
            .get(&workflow_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or(CoordinatorError::NotFound(workflow_id))
    }

    async fn run_approval_sweeper(&self) {
        let mut ticker = tokio::time::interval(self.settings.approval_sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let expired = self.services.gate.sweep_expired(tokio::time::Instant::now());
                    if !expired.is_empty() {
                        debug!("Approval sweep expired {} request(s)", expired.len());
                    }
                }
            }
        }
        debug!("Approval sweeper stopped");
    }

    async fn run_janitor(&self) {
        let mut ticker = tokio::time::interval(self.settings.janitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.archive_expired();
                }
            }
        }
        debug!("Janitor stopped");
    }

    /// Drop terminal workflows older than the retention window. Audit entries
    /// are never touched.
    pub fn archive_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.settings.history_retention)
            .unwrap_or_else(|_| chrono::Duration::days(3650));
        let cutoff = Utc::now() - retention;

        let expired: Vec<WorkflowId> = self
            .workflows
            .iter()
            .filter(|h| {
                let snapshot = h.snapshot();
                snapshot.terminal_at.map(|at| at < cutoff).unwrap_or(false)
            })
            .map(|h| h.value().id())
            .collect();

        for workflow_id in &expired {
            if let Some((_, handle)) = self.workflows.remove(workflow_id) {
                self.services.audit.release(handle.incident_id());
            }
            self.services
                .event_bus
                .publish_remediation_event(RemediationEvent::WorkflowArchived {
                    workflow_id: *workflow_id,
                    archived_at: Utc::now(),
                });
        }

        let pruned = self.services.gate.prune_resolved(cutoff);
        if !expired.is_empty() || pruned > 0 {
            info!(
                archived = expired.len(),
                approvals_pruned = pruned,
                "Janitor archived expired history"
            );
        }
        expired.len()
    }

    /// Stop background loops and wait for running workflows to settle
    pub async fn shutdown(&self) {
        info!("Coordinator shutting down");
        self.shutdown.cancel();
        // Runners still in diagnosing or deciding are refused by the closed
        // gate, so none can park on a request nobody will resolve
        let withdrawn = self.services.gate.close("coordinator shutting down");
        debug!(withdrawn = withdrawn.len(), "Pending approvals withdrawn");
        self.tracker.close();
        self.tracker.wait().await;
        info!("Coordinator stopped");
    }
}
