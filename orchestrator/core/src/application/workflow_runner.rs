// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Runner
//!
//! Drives one [`RemediationWorkflow`] from `diagnosing` to a terminal state.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Responsibility:** Sequence the state machine, talk to collaborators,
//!   keep every transition atomic with its audit entry
//!
//! # Flow
//!
//! 1. Take the incident's diagnosis or ask the diagnostician
//! 2. Decide on an action (see [`crate::application::decision`])
//! 3. Park on the approval gate when the action needs approval
//! 4. Capture the state the rollback needs, then execute with bounded retries
//!    and exponential backoff
//! 5. Verify target health
//! 6. Roll back, or escalate to `failed_permanent` when recovery is impossible
//!
//! An audit entry is appended before the in-memory state changes. If the
//! append fails the workflow halts where it is: nothing further executes and
//! the remediation key stays held by the coordinator.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::application::action_registry::ActionRegistry;
use crate::application::approval_gate::{ApprovalGate, COORDINATOR_ACTOR};
use crate::application::decision::{decide, Decision};
use crate::domain::action::RemediationAction;
use crate::domain::audit::{AuditError, AuditEvent, NewAuditEntry, SequenceNumber};
use crate::domain::collaborators::{
    ActionExecutor, ActionInvocation, ActionOutput, Diagnostician, HealthChecker, HealthReport,
};
use crate::domain::events::{AlertEvent, RemediationEvent};
use crate::domain::execution::{ExecutionKind, ExecutionOutcome, ExecutionRecord, ExecutionRecordId};
use crate::domain::incident::{Diagnosis, IncidentId, RemediationKey};
use crate::domain::policy::RemediationPolicy;
use crate::domain::repository::AuditLog;
use crate::domain::workflow::{ChosenAction, RemediationWorkflow, WorkflowId, WorkflowState};
use crate::infrastructure::event_bus::EventBus;

/// Requester recorded on approval requests raised by the engine
pub const ENGINE_REQUESTER: &str = "shim-engine";

/// Shared collaborators of every workflow
#[derive(Clone)]
pub struct WorkflowServices {
    pub registry: Arc<ActionRegistry>,
    pub gate: Arc<ApprovalGate>,
    pub audit: Arc<dyn AuditLog>,
    pub diagnostician: Arc<dyn Diagnostician>,
    pub executor: Arc<dyn ActionExecutor>,
    pub health_checker: Arc<dyn HealthChecker>,
    pub event_bus: EventBus,
    pub policy: Arc<RemediationPolicy>,
}

/// Mutable state of a live workflow, guarded by the handle's lock
pub struct WorkflowCell {
    pub workflow: RemediationWorkflow,
    /// Set by an accepted cancellation; checked before leaving `deciding`
    /// and `awaiting_approval`
    pub cancel_reason: Option<String>,
}

/// Shared handle to a live workflow
pub struct WorkflowHandle {
    id: WorkflowId,
    incident_id: IncidentId,
    key: RemediationKey,
    cell: Mutex<WorkflowCell>,
    snapshot: watch::Sender<RemediationWorkflow>,
}

impl WorkflowHandle {
    pub fn new(workflow: RemediationWorkflow) -> Self {
        let (snapshot, _) = watch::channel(workflow.clone());
        Self {
            id: workflow.id,
            incident_id: workflow.incident.id,
            key: workflow.incident.remediation_key(),
            cell: Mutex::new(WorkflowCell {
                workflow,
                cancel_reason: None,
            }),
            snapshot,
        }
    }

    pub fn id(&self) -> WorkflowId {
        self.id
    }

    pub fn incident_id(&self) -> IncidentId {
        self.incident_id
    }

    pub fn key(&self) -> &RemediationKey {
        &self.key
    }

    /// Latest published state
    pub fn snapshot(&self) -> RemediationWorkflow {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RemediationWorkflow> {
        self.snapshot.subscribe()
    }

    /// Resolves once the workflow is terminal or halted
    pub async fn wait_for_terminal(&self) -> RemediationWorkflow {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(|w| w.is_terminal() || w.halted.is_some())
            .await
            .map(|w| w.clone());
        match settled {
            Ok(workflow) => workflow,
            Err(_) => self.snapshot(),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, WorkflowCell> {
        self.cell.lock().await
    }

    pub fn publish(&self, workflow: &RemediationWorkflow) {
        self.snapshot.send_replace(workflow.clone());
    }
}

/// How a runner finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Terminal(WorkflowState),
    /// The audit log rejected a write; the workflow stopped in place
    Halted(String),
}

#[derive(Debug)]
struct Halt(String);

impl From<AuditError> for Halt {
    fn from(err: AuditError) -> Self {
        Halt(err.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
enum RecoveryCause {
    ExecutionFailed,
    Regressed,
}

pub struct WorkflowRunner {
    handle: Arc<WorkflowHandle>,
    services: WorkflowServices,
}

impl WorkflowRunner {
    pub fn new(handle: Arc<WorkflowHandle>, services: WorkflowServices) -> Self {
        Self { handle, services }
    }

    pub async fn run(self) -> RunOutcome {
        match self.drive().await {
            Ok(state) => {
                info!(
                    workflow_id = %self.handle.id(),
                    incident_id = %self.handle.incident_id(),
                    state = %state,
                    "Workflow reached terminal state"
                );
                RunOutcome::Terminal(state)
            }
            Err(halt) => self.halt(halt).await,
        }
    }

    async fn drive(&self) -> Result<WorkflowState, Halt> {
        let diagnosis = match self.obtain_diagnosis().await {
            Ok(diagnosis) => diagnosis,
            Err(reason) => {
                let mut cell = self.handle.lock().await;
                return self
                    .finish(&mut cell, WorkflowState::Closed, format!("no diagnosis: {}", reason))
                    .await;
            }
        };

        {
            let mut cell = self.handle.lock().await;
            self.record(AuditEvent::DiagnosisAttached {
                diagnosis: diagnosis.clone(),
            })
            .await?;
            cell.workflow.diagnosis = Some(diagnosis.clone());
            self.transition(
                &mut cell,
                WorkflowState::Deciding,
                format!("diagnosis attached: {}", diagnosis.root_cause),
            )
            .await?;
        }

        let incident = self.handle.snapshot().incident;
        let decision = decide(
            &incident,
            &diagnosis,
            &self.services.registry,
            &self.services.policy,
        );

        let (action, waiter) = {
            let mut cell = self.handle.lock().await;
            if let Some(reason) = cell.cancel_reason.clone() {
                return self
                    .finish(&mut cell, WorkflowState::Closed, format!("cancelled: {}", reason))
                    .await;
            }

            match decision {
                Decision::Reject(reason) => {
                    warn!(workflow_id = %self.handle.id(), "Diagnosis rejected: {}", reason);
                    return self
                        .finish(
                            &mut cell,
                            WorkflowState::Closed,
                            format!("diagnosis rejected: {}", reason),
                        )
                        .await;
                }
                Decision::Execute(action) => {
                    self.choose(&mut cell, &action).await?;
                    self.transition(
                        &mut cell,
                        WorkflowState::Executing,
                        format!("action '{}' is {}", action.name, action.risk_tier),
                    )
                    .await?;
                    (action, None)
                }
                Decision::RequestApproval(action) => {
                    self.choose(&mut cell, &action).await?;
                    let requested = self.services.gate.request_approval(
                        self.handle.id(),
                        self.handle.incident_id(),
                        &action,
                        ENGINE_REQUESTER,
                        self.services.policy.approval_timeout,
                    );
                    let (request, waiter) = match requested {
                        Ok(pair) => pair,
                        Err(e) => {
                            debug!(workflow_id = %self.handle.id(), "Approval not requested: {}", e);
                            return self
                                .finish(
                                    &mut cell,
                                    WorkflowState::Closed,
                                    "coordinator shutting down".to_string(),
                                )
                                .await;
                        }
                    };
                    cell.workflow.approval = Some(request.clone());
                    self.record(AuditEvent::ApprovalRequested { request }).await?;
                    self.transition(
                        &mut cell,
                        WorkflowState::AwaitingApproval,
                        format!("action '{}' ({}) requires approval", action.name, action.risk_tier),
                    )
                    .await?;
                    (action, Some(waiter))
                }
            }
        };

        if let Some(waiter) = waiter {
            let request_id = waiter.request_id();
            let decision = waiter.wait().await;

            let mut cell = self.handle.lock().await;
            let resolved = self.services.gate.get(request_id);
            let actor = resolved.as_ref().and_then(|r| r.decided_by.clone());
            let withdrawn_reason = resolved.as_ref().and_then(|r| r.reason.clone());
            self.record(AuditEvent::ApprovalResolved {
                request_id,
                decision,
                actor: actor.clone(),
            })
            .await?;
            if let Some(resolved) = resolved {
                cell.workflow.approval = Some(resolved);
            }

            if let Some(reason) = cell.cancel_reason.clone() {
                return self
                    .finish(&mut cell, WorkflowState::Closed, format!("cancelled: {}", reason))
                    .await;
            }
            if !decision.permits_execution() {
                let reason = match (actor.as_deref(), withdrawn_reason) {
                    (Some(COORDINATOR_ACTOR), Some(why)) => format!("approval withdrawn: {}", why),
                    _ => format!("approval {}", decision),
                };
                return self.finish(&mut cell, WorkflowState::Closed, reason).await;
            }
            self.transition(
                &mut cell,
                WorkflowState::Executing,
                format!("approved by {}", actor.as_deref().unwrap_or("unknown")),
            )
            .await?;
        }

        self.execute_with_retries(&action).await
    }

    async fn obtain_diagnosis(&self) -> Result<Diagnosis, String> {
        let incident = self.handle.snapshot().incident;
        if let Some(diagnosis) = incident.diagnosis.clone() {
            diagnosis.validate().map_err(|e| e.to_string())?;
            return Ok(diagnosis);
        }

        let limit = self.services.policy.timeouts.diagnosis;
        match timeout(limit, self.services.diagnostician.diagnose(&incident)).await {
            Ok(Ok(Some(diagnosis))) => {
                diagnosis.validate().map_err(|e| e.to_string())?;
                Ok(diagnosis)
            }
            Ok(Ok(None)) => Err("diagnostician produced no diagnosis".to_string()),
            Ok(Err(e)) => Err(format!("diagnostician failed: {}", e)),
            Err(_) => Err(format!("diagnosis timed out after {:?}", limit)),
        }
    }

    async fn choose(&self, cell: &mut WorkflowCell, action: &RemediationAction) -> Result<(), Halt> {
        self.record(AuditEvent::ActionChosen {
            action: action.name.clone(),
            risk_tier: action.risk_tier,
        })
        .await?;
        cell.workflow.chosen_action = Some(ChosenAction {
            name: action.name.clone(),
            risk_tier: action.risk_tier,
            idempotent: action.idempotent,
            has_rollback: action.has_rollback(),
        });
        Ok(())
    }

    async fn execute_with_retries(&self, action: &RemediationAction) -> Result<WorkflowState, Halt> {
        self.capture_state(action).await?;

        let max_attempts = self.services.policy.max_attempts_for(action);
        let mut attempt = 1;

        loop {
            let record = self
                .run_action(action, ExecutionKind::Remediation, attempt, None)
                .await;
            let outcome = record.outcome;

            let mut cell = self.handle.lock().await;
            self.record_execution(&mut cell, record).await?;

            if outcome.is_success() {
                self.transition(
                    &mut cell,
                    WorkflowState::Verifying,
                    format!("attempt {} succeeded", attempt),
                )
                .await?;
                break;
            }

            if attempt >= max_attempts {
                let reason = format!(
                    "action '{}' failed after {} attempt(s), last outcome {}",
                    action.name, attempt, outcome
                );
                return self.recover(cell, RecoveryCause::ExecutionFailed, reason).await;
            }
            drop(cell);

            attempt += 1;
            let delay = self.services.policy.backoff.delay_before(attempt);
            debug!(
                workflow_id = %self.handle.id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Backing off before retry"
            );
            tokio::time::sleep(delay).await;

            let mut cell = self.handle.lock().await;
            self.transition(
                &mut cell,
                WorkflowState::Executing,
                format!("retry attempt {} of {} after {}", attempt, max_attempts, outcome),
            )
            .await?;
        }

        self.verify().await
    }

    /// Read the values the rollback renders from. A failed capture is
    /// recorded and the action still runs; a rollback that needs the missing
    /// value escalates to `failed_permanent` instead of guessing.
    async fn capture_state(&self, action: &RemediationAction) -> Result<(), Halt> {
        if action.capture.is_empty() {
            return Ok(());
        }

        let invocation = self.invocation(action, ExecutionKind::Remediation, 1);
        let limit = self.services.policy.execution_timeout_for(action);
        let captured = match timeout(limit, self.services.executor.capture_state(&invocation)).await {
            Ok(Ok(values)) => Ok(values),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("state capture timed out after {:?}", limit)),
        };

        let mut cell = self.handle.lock().await;
        match captured {
            Ok(values) => {
                self.record(AuditEvent::StateCaptured {
                    action: action.name.clone(),
                    values: values.clone(),
                })
                .await?;
                debug!(workflow_id = %self.handle.id(), keys = values.len(), "State captured");
                cell.workflow.captured_state = values;
                self.handle.publish(&cell.workflow);
            }
            Err(error) => {
                warn!(
                    workflow_id = %self.handle.id(),
                    action = %action.name,
                    "State capture failed: {}",
                    error
                );
                self.record(AuditEvent::StateCaptureFailed {
                    action: action.name.clone(),
                    error,
                })
                .await?;
            }
        }
        Ok(())
    }

    async fn verify(&self) -> Result<WorkflowState, Halt> {
        let incident = self.handle.snapshot().incident;
        let limit = self.services.policy.timeouts.verification;
        let report = match timeout(limit, self.services.health_checker.check(&incident)).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => HealthReport::unhealthy(0.0, format!("health check failed: {}", e)),
            Err(_) => HealthReport::unhealthy(0.0, format!("health check timed out after {:?}", limit)),
        };

        let mut cell = self.handle.lock().await;
        self.record(AuditEvent::HealthChecked {
            report: report.clone(),
        })
        .await?;
        cell.workflow.health = Some(report.clone());

        if report.healthy && report.score >= self.services.policy.min_health_score {
            return self
                .finish(
                    &mut cell,
                    WorkflowState::Resolved,
                    format!("target healthy (score {:.2})", report.score),
                )
                .await;
        }

        let reason = format!(
            "target unhealthy after remediation (score {:.2}){}",
            report.score,
            report
                .detail
                .as_deref()
                .map(|d| format!(": {}", d))
                .unwrap_or_default()
        );
        self.recover(cell, RecoveryCause::Regressed, reason).await
    }

    /// Roll back exactly once, or escalate when that is impossible
    async fn recover(
        &self,
        mut cell: MutexGuard<'_, WorkflowCell>,
        cause: RecoveryCause,
        reason: String,
    ) -> Result<WorkflowState, Halt> {
        let Some(chosen) = cell.workflow.chosen_action.clone() else {
            return self
                .fail_permanently(&mut cell, format!("{}; no action recorded", reason))
                .await;
        };

        let rollback_enabled = match cause {
            RecoveryCause::ExecutionFailed => self.services.policy.rollback_on_failure,
            RecoveryCause::Regressed => true,
        };
        let inverse = match self.services.registry.rollback_for(chosen.name.as_str()) {
            Ok(inverse) if rollback_enabled => inverse,
            Ok(_) => {
                return self
                    .fail_permanently(&mut cell, format!("{}; rollback on failure is disabled", reason))
                    .await;
            }
            Err(e) => {
                return self
                    .fail_permanently(&mut cell, format!("{}; {}", reason, e))
                    .await;
            }
        };

        self.transition(&mut cell, WorkflowState::RollingBack, reason).await?;
        let undoes = cell
            .workflow
            .executions
            .iter()
            .rev()
            .find(|r| r.kind == ExecutionKind::Remediation)
            .map(|r| r.id);
        drop(cell);

        let record = self
            .run_action(&inverse, ExecutionKind::Rollback, 1, undoes)
            .await;
        let rollback_id = record.id;
        let succeeded = record.outcome.is_success();
        let summary = format!("{}: {}", record.outcome, record.output);

        let mut cell = self.handle.lock().await;
        self.record_execution(&mut cell, record).await?;
        cell.workflow.link_rollback(rollback_id);
        self.handle.publish(&cell.workflow);

        if succeeded {
            self.finish(&mut cell, WorkflowState::RolledBack, "rollback succeeded".to_string())
                .await
        } else {
            self.fail_permanently(&mut cell, format!("rollback failed ({})", summary))
                .await
        }
    }

    async fn fail_permanently(
        &self,
        cell: &mut WorkflowCell,
        reason: String,
    ) -> Result<WorkflowState, Halt> {
        self.record(AuditEvent::ManualInterventionRequired {
            reason: reason.clone(),
        })
        .await?;
        let state = self
            .finish(cell, WorkflowState::FailedPermanent, reason.clone())
            .await?;

        error!(
            workflow_id = %self.handle.id(),
            incident_id = %self.handle.incident_id(),
            key = %self.handle.key(),
            "Manual intervention required: {}",
            reason
        );
        self.services
            .event_bus
            .publish_alert(AlertEvent::ManualInterventionRequired {
                workflow_id: self.handle.id(),
                incident_id: self.handle.incident_id(),
                key: self.handle.key().clone(),
                reason,
                raised_at: Utc::now(),
            });
        Ok(state)
    }

    async fn finish(
        &self,
        cell: &mut WorkflowCell,
        state: WorkflowState,
        reason: String,
    ) -> Result<WorkflowState, Halt> {
        self.transition(cell, state, reason).await?;
        Ok(state)
    }

    /// Append the transition's audit entry, then apply it
    async fn transition(
        &self,
        cell: &mut WorkflowCell,
        to: WorkflowState,
        reason: String,
    ) -> Result<(), Halt> {
        let from = cell.workflow.state;
        if !from.can_transition_to(to) {
            return Err(Halt(format!("invalid transition from {} to {}", from, to)));
        }

        self.record(AuditEvent::Transition {
            from,
            to,
            reason: reason.clone(),
        })
        .await?;

        cell.workflow
            .transition_to(to)
            .map_err(|e| Halt(e.to_string()))?;
        if to.is_terminal() {
            cell.workflow.outcome_reason = Some(reason.clone());
        }
        self.handle.publish(&cell.workflow);

        info!(
            workflow_id = %self.handle.id(),
            from = %from,
            to = %to,
            "{}",
            reason
        );
        metrics::counter!("shim_workflow_transitions_total", "to" => to.as_str()).increment(1);
        self.services
            .event_bus
            .publish_remediation_event(RemediationEvent::StateChanged {
                workflow_id: self.handle.id(),
                incident_id: self.handle.incident_id(),
                from,
                to,
                reason,
                changed_at: Utc::now(),
            });
        Ok(())
    }

    async fn record(&self, event: AuditEvent) -> Result<SequenceNumber, Halt> {
        let entry = NewAuditEntry::new(self.handle.incident_id(), self.handle.id(), event);
        Ok(self.services.audit.append(entry).await?)
    }

    async fn record_execution(
        &self,
        cell: &mut WorkflowCell,
        record: ExecutionRecord,
    ) -> Result<(), Halt> {
        self.record(AuditEvent::ExecutionCompleted {
            record: record.clone(),
        })
        .await?;

        self.services
            .event_bus
            .publish_remediation_event(RemediationEvent::ActionExecuted {
                workflow_id: self.handle.id(),
                action: record.action.clone(),
                kind: record.kind,
                attempt: record.attempt,
                outcome: record.outcome,
                executed_at: record.ended_at,
            });
        cell.workflow.record_execution(record);
        self.handle.publish(&cell.workflow);
        Ok(())
    }

    /// Diagnosis parameters, plus the captured state when rolling back
    fn invocation(&self, action: &RemediationAction, kind: ExecutionKind, attempt: u32) -> ActionInvocation {
        let snapshot = self.handle.snapshot();
        let mut parameters = snapshot
            .diagnosis
            .map(|d| d.parameters)
            .unwrap_or_default();
        if kind == ExecutionKind::Rollback {
            parameters.extend(snapshot.captured_state);
        }

        ActionInvocation {
            workflow_id: self.handle.id(),
            incident_id: self.handle.incident_id(),
            target: snapshot.incident.target,
            action: action.clone(),
            kind,
            attempt,
            parameters,
        }
    }

    /// Run one attempt against the executor, bounded by the action timeout
    async fn run_action(
        &self,
        action: &RemediationAction,
        kind: ExecutionKind,
        attempt: u32,
        rollback_of: Option<ExecutionRecordId>,
    ) -> ExecutionRecord {
        let invocation = self.invocation(action, kind, attempt);

        let limit = self.services.policy.execution_timeout_for(action);
        let started_at = Utc::now();
        let timer = Instant::now();
        let (outcome, output) =
            match timeout(limit, self.services.executor.execute(&invocation)).await {
                Ok(Ok(output)) => {
                    let outcome = if output.success {
                        ExecutionOutcome::Success
                    } else {
                        ExecutionOutcome::Failure
                    };
                    (outcome, output)
                }
                Ok(Err(e)) => (ExecutionOutcome::Failure, ActionOutput::failure(e.to_string())),
                Err(_) => (
                    ExecutionOutcome::Timeout,
                    ActionOutput::failure(format!("timed out after {:?}", limit)),
                ),
            };

        metrics::counter!(
            "shim_action_executions_total",
            "kind" => kind.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        metrics::histogram!("shim_action_duration_seconds", "kind" => kind.as_str())
            .record(timer.elapsed().as_secs_f64());

        if outcome.is_success() {
            info!(
                workflow_id = %self.handle.id(),
                action = %action.name,
                kind = kind.as_str(),
                attempt,
                dry_run = output.dry_run,
                "Action succeeded"
            );
        } else {
            warn!(
                workflow_id = %self.handle.id(),
                action = %action.name,
                kind = kind.as_str(),
                attempt,
                outcome = %outcome,
                "Action did not succeed"
            );
        }

        let mut record = ExecutionRecord::new(
            self.handle.id(),
            self.handle.incident_id(),
            action.name.clone(),
            kind,
            attempt,
            started_at,
            outcome,
            output.output,
        );
        record.dry_run = output.dry_run;
        record.rollback_of = rollback_of;
        record
    }

    async fn halt(&self, halt: Halt) -> RunOutcome {
        let mut cell = self.handle.lock().await;
        let state = cell.workflow.state;
        error!(
            workflow_id = %self.handle.id(),
            incident_id = %self.handle.incident_id(),
            state = %state,
            error = %halt.0,
            "Workflow halted; remediation key stays held"
        );

        cell.workflow.halted = Some(halt.0.clone());
        self.handle.publish(&cell.workflow);

        if let Some(request) = cell
            .workflow
            .approval
            .as_ref()
            .filter(|r| r.decision.is_pending())
        {
            let _ = self.services.gate.withdraw(request.id, "workflow halted");
        }

        self.services.event_bus.publish_alert(AlertEvent::WorkflowHalted {
            workflow_id: self.handle.id(),
            incident_id: self.handle.incident_id(),
            state,
            error: halt.0.clone(),
            halted_at: Utc::now(),
        });
        RunOutcome::Halted(halt.0)
    }
}
