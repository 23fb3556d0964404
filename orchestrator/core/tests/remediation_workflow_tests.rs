// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end remediation workflows driven through the coordinator with
//! scripted collaborators and an in-memory audit log.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use common::*;
use shim_core::application::CoordinatorError;
use shim_core::domain::approval::ApprovalDecision;
use shim_core::domain::audit::{AuditEvent, SequenceNumber};
use shim_core::domain::events::AlertEvent;
use shim_core::domain::execution::{ExecutionKind, ExecutionOutcome};
use shim_core::domain::workflow::WorkflowState;
use shim_core::infrastructure::event_bus::DomainEvent;

async fn wait_for_release(harness: &Harness) {
    for _ in 0..200 {
        if harness.coordinator.active_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("remediation key was never released");
}

#[tokio::test]
async fn test_safe_action_resolves_without_approval() {
    let harness = HarnessBuilder::new().build();
    let incident = incident("db-1", "high_memory", &["clear_cache"]);

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();

    assert_eq!(workflow.state, WorkflowState::Resolved);
    assert_eq!(workflow.executions.len(), 1);
    assert_eq!(workflow.executions[0].outcome, ExecutionOutcome::Success);
    assert!(workflow.approval.is_none());
    assert_eq!(harness.executor.remediation_calls(), 1);

    let trail = audit_trail(&harness, &incident).await;
    assert_eq!(
        transitions(&trail),
        vec![
            WorkflowState::Deciding,
            WorkflowState::Executing,
            WorkflowState::Verifying,
            WorkflowState::Resolved,
        ]
    );
    assert_eq!(approval_requests(&trail), 0);
    assert_eq!(trail[0].event.kind(), "incident_opened");

    wait_for_release(&harness).await;
}

#[tokio::test]
async fn test_denied_approval_closes_without_executing() {
    let harness = HarnessBuilder::new().build();
    let incident = incident("api-1", "service_down", &["restart_service"]);

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let waiting = wait_until(&harness, workflow_id, |w| {
        w.state == WorkflowState::AwaitingApproval
    })
    .await;
    let request = waiting.approval.expect("approval request attached");
    assert_eq!(request.action.as_str(), "restart_service");

    harness
        .coordinator
        .decide_approval(
            request.id,
            ApprovalDecision::Denied,
            "oncall",
            Some("maintenance window".to_string()),
        )
        .await
        .unwrap();

    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();
    assert_eq!(workflow.state, WorkflowState::Closed);
    assert!(workflow.executions.is_empty());
    assert_eq!(workflow.outcome_reason.as_deref(), Some("approval denied"));
    assert_eq!(harness.executor.remediation_calls(), 0);

    let trail = audit_trail(&harness, &incident).await;
    assert_eq!(count_events(&trail, "execution_completed"), 0);
    assert_eq!(
        transitions(&trail),
        vec![
            WorkflowState::Deciding,
            WorkflowState::AwaitingApproval,
            WorkflowState::Closed,
        ]
    );
}

#[tokio::test]
async fn test_approved_action_executes_once_approved() {
    let harness = HarnessBuilder::new().build();
    let incident = incident("api-1", "service_down", &["restart_service"]);

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let waiting = wait_until(&harness, workflow_id, |w| {
        w.state == WorkflowState::AwaitingApproval
    })
    .await;
    assert_eq!(harness.executor.remediation_calls(), 0);

    let request = waiting.approval.unwrap();
    harness
        .coordinator
        .decide_approval(request.id, ApprovalDecision::Approved, "oncall", None)
        .await
        .unwrap();
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();
    assert_eq!(workflow.state, WorkflowState::Resolved);
    assert_eq!(workflow.approval.unwrap().decided_by.as_deref(), Some("oncall"));

    // Second decision on the same request loses
    let second = harness
        .coordinator
        .decide_approval(request.id, ApprovalDecision::Denied, "someone-else", None)
        .await;
    assert!(matches!(second, Err(CoordinatorError::Approval(_))));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_roll_back_once() {
    let harness = HarnessBuilder::new()
        .executor(ScriptedExecutor::new().remediation_outcomes(&[false, false, false]))
        .build();
    let incident = incident("queue-1", "queue_backlog", &["flush_queue"]);

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();

    assert_eq!(workflow.state, WorkflowState::RolledBack);
    assert_eq!(harness.executor.remediation_calls(), 3);
    assert_eq!(harness.executor.rollback_calls(), 1);

    let remediations: Vec<_> = workflow
        .executions
        .iter()
        .filter(|r| r.kind == ExecutionKind::Remediation)
        .collect();
    assert_eq!(remediations.len(), 3);
    assert!(remediations.iter().all(|r| r.outcome == ExecutionOutcome::Failure));
    assert_eq!(
        remediations.iter().map(|r| r.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let rollbacks: Vec<_> = workflow.rollback_records().collect();
    assert_eq!(rollbacks.len(), 1);
    let last = remediations.last().unwrap();
    assert_eq!(rollbacks[0].rollback_of, Some(last.id));
    assert_eq!(last.rolled_back_by, Some(rollbacks[0].id));

    let trail = audit_trail(&harness, &incident).await;
    let executing = transitions(&trail)
        .into_iter()
        .filter(|s| *s == WorkflowState::Executing)
        .count();
    assert_eq!(executing, 3, "one entry per attempt with max_retries = 3");

    let recorded: Vec<ExecutionKind> = trail
        .iter()
        .filter_map(|e| match &e.event {
            AuditEvent::ExecutionCompleted { record } => Some(record.kind),
            _ => None,
        })
        .collect();
    assert_eq!(
        recorded,
        vec![
            ExecutionKind::Remediation,
            ExecutionKind::Remediation,
            ExecutionKind::Remediation,
            ExecutionKind::Rollback,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failure_without_rollback_needs_manual_intervention() {
    let harness = HarnessBuilder::new()
        .executor(ScriptedExecutor::new().remediation_outcomes(&[false, false, false]))
        .build();
    let mut alerts = harness.event_bus.subscribe();
    let incident = incident("cache-1", "stale_cache", &["clear_cache"]);

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();

    assert_eq!(workflow.state, WorkflowState::FailedPermanent);
    assert_eq!(harness.executor.rollback_calls(), 0);
    assert!(workflow
        .outcome_reason
        .as_deref()
        .unwrap()
        .contains("No rollback defined"));

    let trail = audit_trail(&harness, &incident).await;
    assert_eq!(count_events(&trail, "manual_intervention_required"), 1);

    let mut alerted = false;
    while let Ok(event) = alerts.try_recv() {
        if matches!(event, DomainEvent::Alert(AlertEvent::ManualInterventionRequired { .. })) {
            alerted = true;
        }
    }
    assert!(alerted);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_approval_expires() {
    let harness = HarnessBuilder::new()
        .policy(|p| p.approval_timeout = Duration::from_secs(60))
        .build();
    let incident = incident("api-2", "service_down", &["restart_service"]);

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();

    assert_eq!(workflow.state, WorkflowState::Closed);
    assert_eq!(workflow.outcome_reason.as_deref(), Some("approval expired"));
    assert_eq!(workflow.approval.unwrap().decision, ApprovalDecision::Expired);
    assert_eq!(harness.executor.remediation_calls(), 0);
    assert!(harness.coordinator.pending_approvals().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_for_one_key_admit_one() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = HarnessBuilder::new()
        .executor(ScriptedExecutor::new().blocked_on(Arc::clone(&gate)))
        .build();

    let submissions = (0..8).map(|_| {
        let coordinator = Arc::clone(&harness.coordinator);
        let incident = incident("db-1", "high_memory", &["clear_cache"]);
        tokio::spawn(async move { coordinator.submit(incident).await })
    });
    let results: Vec<_> = futures::future::join_all(submissions)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let accepted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(CoordinatorError::ConflictingWorkflow { .. })))
        .count();
    assert_eq!(accepted.len(), 1);
    assert_eq!(conflicts, 7);

    gate.add_permits(1);
    let workflow = harness
        .coordinator
        .wait_for_terminal(*accepted[0])
        .await
        .unwrap();
    assert_eq!(workflow.state, WorkflowState::Resolved);
    wait_for_release(&harness).await;

    // The key is free again once the workflow is terminal
    harness
        .coordinator
        .submit(incident("db-1", "high_memory", &["clear_cache"]))
        .await
        .unwrap();
    gate.add_permits(1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_audit_sequences_are_gap_free_per_incident() {
    let harness = HarnessBuilder::new().build();

    let incidents: Vec<_> = (0..10)
        .map(|i| incident(&format!("node-{}", i), "high_cpu", &["clear_cache"]))
        .collect();
    let mut workflow_ids = Vec::new();
    for incident in &incidents {
        workflow_ids.push(harness.coordinator.submit(incident.clone()).await.unwrap());
    }
    for workflow_id in &workflow_ids {
        harness.coordinator.wait_for_terminal(*workflow_id).await.unwrap();
    }

    for incident in &incidents {
        let trail = audit_trail(&harness, incident).await;
        let sequences: Vec<u64> = trail.iter().map(|e| e.sequence.value()).collect();
        let expected: Vec<u64> = (1..=trail.len() as u64).collect();
        assert_eq!(sequences, expected);
        assert!(trail.iter().all(|e| e.incident_id == incident.id));
        assert_eq!(trail[0].sequence, SequenceNumber::FIRST);
    }
}

#[tokio::test(start_paused = true)]
async fn test_audit_failure_halts_and_holds_key() {
    let harness = HarnessBuilder::new()
        .policy(|p| p.approval_timeout = Duration::from_secs(60))
        .build();
    let mut events = harness.event_bus.subscribe();
    let first = incident("api-3", "service_down", &["restart_service"]);

    let workflow_id = harness.coordinator.submit(first).await.unwrap();
    wait_until(&harness, workflow_id, |w| {
        w.state == WorkflowState::AwaitingApproval
    })
    .await;

    // The expiry sweep resolves the request; recording that outcome fails
    harness.audit.set_available(false);

    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();
    assert!(workflow.halted.is_some());
    assert_eq!(workflow.state, WorkflowState::AwaitingApproval);
    assert_eq!(harness.executor.remediation_calls(), 0);

    harness.audit.set_available(true);
    let retry = harness
        .coordinator
        .submit(incident("api-3", "service_down", &["restart_service"]))
        .await;
    assert!(matches!(
        retry,
        Err(CoordinatorError::ConflictingWorkflow { existing, .. }) if existing == workflow_id
    ));

    let mut halted_alert = false;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::Alert(AlertEvent::WorkflowHalted { workflow_id: id, .. }) = event {
            halted_alert = id == workflow_id;
        }
    }
    assert!(halted_alert);
}

#[tokio::test]
async fn test_decision_refused_while_audit_unavailable() {
    let harness = HarnessBuilder::new().build();
    let incident = incident("api-7", "service_down", &["restart_service"]);

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let waiting = wait_until(&harness, workflow_id, |w| {
        w.state == WorkflowState::AwaitingApproval
    })
    .await;
    let request_id = waiting.approval.unwrap().id;

    harness.audit.set_available(false);
    let refused = harness
        .coordinator
        .decide_approval(request_id, ApprovalDecision::Approved, "oncall", None)
        .await;
    assert!(matches!(refused, Err(CoordinatorError::StorageUnavailable(_))));

    // Nothing was decided: the request is still open and the workflow waits
    let pending = harness.coordinator.pending_approvals();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, request_id);
    let status = harness.coordinator.status(workflow_id).unwrap();
    assert_eq!(status.state, WorkflowState::AwaitingApproval);
    assert!(status.halted.is_none());

    harness.audit.set_available(true);
    harness
        .coordinator
        .decide_approval(request_id, ApprovalDecision::Approved, "oncall", None)
        .await
        .unwrap();
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();
    assert_eq!(workflow.state, WorkflowState::Resolved);

    let trail = audit_trail(&harness, &incident).await;
    assert_eq!(count_events(&trail, "approval_decision_received"), 1);
    let received_at = trail
        .iter()
        .position(|e| e.event.kind() == "approval_decision_received")
        .unwrap();
    let resolved_at = trail
        .iter()
        .position(|e| e.event.kind() == "approval_resolved")
        .unwrap();
    assert!(received_at < resolved_at);
}

#[tokio::test]
async fn test_submit_rejected_while_audit_unavailable() {
    let harness = HarnessBuilder::new().build();
    harness.audit.set_available(false);

    let result = harness
        .coordinator
        .submit(incident("db-2", "high_memory", &["clear_cache"]))
        .await;
    assert!(matches!(result, Err(CoordinatorError::StorageUnavailable(_))));
    assert_eq!(harness.coordinator.active_count(), 0);
    assert!(harness.coordinator.list().is_empty());

    harness.audit.set_available(true);
    let workflow_id = harness
        .coordinator
        .submit(incident("db-2", "high_memory", &["clear_cache"]))
        .await
        .unwrap();
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();
    assert_eq!(workflow.state, WorkflowState::Resolved);
}

#[tokio::test]
async fn test_cancel_while_awaiting_approval_closes() {
    let harness = HarnessBuilder::new().build();
    let incident = incident("api-4", "service_down", &["restart_service"]);

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let waiting = wait_until(&harness, workflow_id, |w| {
        w.state == WorkflowState::AwaitingApproval
    })
    .await;

    harness
        .coordinator
        .cancel(workflow_id, "false alarm")
        .await
        .unwrap();

    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();
    assert_eq!(workflow.state, WorkflowState::Closed);
    assert_eq!(workflow.outcome_reason.as_deref(), Some("cancelled: false alarm"));
    assert_eq!(harness.executor.remediation_calls(), 0);

    // A late approval cannot revive it
    let late = harness
        .coordinator
        .decide_approval(waiting.approval.unwrap().id, ApprovalDecision::Approved, "oncall", None)
        .await;
    assert!(late.is_err());

    let trail = audit_trail(&harness, &incident).await;
    let cancelled_at = trail
        .iter()
        .position(|e| matches!(e.event, AuditEvent::CancellationRequested { .. }))
        .unwrap();
    let closed_at = trail
        .iter()
        .position(|e| e.event.transition_target() == Some(WorkflowState::Closed))
        .unwrap();
    assert!(cancelled_at < closed_at);

    // Cancelling a terminal workflow is refused
    assert!(matches!(
        harness.coordinator.cancel(workflow_id, "again").await,
        Err(CoordinatorError::InvalidState { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_executing_is_refused() {
    let gate = Arc::new(Semaphore::new(0));
    let executor = ScriptedExecutor::new().blocked_on(Arc::clone(&gate));
    let started = executor.started();
    let harness = HarnessBuilder::new().executor(executor).build();

    let workflow_id = harness
        .coordinator
        .submit(incident("cache-2", "stale_cache", &["clear_cache"]))
        .await
        .unwrap();
    started.notified().await;

    let result = harness.coordinator.cancel(workflow_id, "too late").await;
    assert!(matches!(result, Err(CoordinatorError::CannotCancelExecuting(id)) if id == workflow_id));

    gate.add_permits(1);
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();
    assert_eq!(workflow.state, WorkflowState::Resolved);
}

#[tokio::test]
async fn test_health_regression_rolls_back() {
    let harness = HarnessBuilder::new()
        .health(FixedHealth::unhealthy())
        .build();
    let incident = incident("queue-2", "queue_backlog", &["flush_queue"]);

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();

    assert_eq!(workflow.state, WorkflowState::RolledBack);
    assert_eq!(harness.executor.remediation_calls(), 1);
    assert_eq!(harness.executor.rollback_calls(), 1);
    assert!(!workflow.health.unwrap().healthy);

    let trail = audit_trail(&harness, &incident).await;
    assert_eq!(
        transitions(&trail),
        vec![
            WorkflowState::Deciding,
            WorkflowState::Executing,
            WorkflowState::Verifying,
            WorkflowState::RollingBack,
            WorkflowState::RolledBack,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_scale_rollback_restores_captured_capacity() {
    let harness = HarnessBuilder::new()
        .executor(
            ScriptedExecutor::new()
                .remediation_outcomes(&[false, false, false])
                .captures(&[("previous_capacity", "3")]),
        )
        .build();
    let mut incident = incident("web", "high_load", &["scale_up"]);
    if let Some(diagnosis) = incident.diagnosis.as_mut() {
        diagnosis
            .parameters
            .insert("target_capacity".to_string(), serde_json::json!(5));
    }

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let waiting = wait_until(&harness, workflow_id, |w| {
        w.state == WorkflowState::AwaitingApproval
    })
    .await;
    harness
        .coordinator
        .decide_approval(waiting.approval.unwrap().id, ApprovalDecision::Approved, "oncall", None)
        .await
        .unwrap();

    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();
    assert_eq!(workflow.state, WorkflowState::RolledBack);
    assert_eq!(workflow.captured_state["previous_capacity"], "3");

    let rollbacks = harness.executor.rollback_parameters();
    assert_eq!(rollbacks.len(), 1);
    assert_eq!(rollbacks[0]["previous_capacity"], "3");
    assert_eq!(rollbacks[0]["target_capacity"], 5);

    // Captured once, before the first attempt
    let trail = audit_trail(&harness, &incident).await;
    assert_eq!(count_events(&trail, "state_captured"), 1);
    let captured_at = trail
        .iter()
        .position(|e| e.event.kind() == "state_captured")
        .unwrap();
    let first_attempt_at = trail
        .iter()
        .position(|e| e.event.kind() == "execution_completed")
        .unwrap();
    assert!(captured_at < first_attempt_at);
}

#[tokio::test]
async fn test_failed_rollback_escalates() {
    let harness = HarnessBuilder::new()
        .executor(ScriptedExecutor::new().rollback_outcomes(&[false]))
        .health(FixedHealth::unhealthy())
        .build();
    let mut events = harness.event_bus.subscribe();
    let incident = incident("queue-3", "queue_backlog", &["flush_queue"]);

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();

    assert_eq!(workflow.state, WorkflowState::FailedPermanent);
    assert_eq!(harness.executor.rollback_calls(), 1);
    assert!(workflow
        .outcome_reason
        .as_deref()
        .unwrap()
        .starts_with("rollback failed"));

    let mut reason = None;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::Alert(AlertEvent::ManualInterventionRequired { reason: r, .. }) = event {
            reason = Some(r);
        }
    }
    assert!(reason.unwrap().starts_with("rollback failed"));
}

#[tokio::test]
async fn test_non_idempotent_action_is_attempted_once() {
    let harness = HarnessBuilder::new()
        .executor(ScriptedExecutor::new().remediation_outcomes(&[false]))
        .build();
    let incident = incident("worker-1", "runaway_process", &["kill_process"]).with_override();

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let waiting = wait_until(&harness, workflow_id, |w| {
        w.state == WorkflowState::AwaitingApproval
    })
    .await;
    harness
        .coordinator
        .decide_approval(
            waiting.approval.unwrap().id,
            ApprovalDecision::Approved,
            "oncall",
            None,
        )
        .await
        .unwrap();

    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();
    assert_eq!(harness.executor.remediation_calls(), 1);
    assert_eq!(workflow.remediation_attempts(), 1);
    assert_eq!(workflow.state, WorkflowState::RolledBack);
}

#[tokio::test]
async fn test_forbidden_action_without_override_is_rejected() {
    let harness = HarnessBuilder::new().build();
    let incident = incident("worker-2", "runaway_process", &["kill_process"]);

    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();

    assert_eq!(workflow.state, WorkflowState::Closed);
    assert!(workflow
        .outcome_reason
        .unwrap()
        .contains("forbidden without an operator override"));
    assert!(harness.coordinator.pending_approvals().is_empty());
}

#[tokio::test]
async fn test_low_confidence_diagnosis_is_rejected() {
    let harness = HarnessBuilder::new()
        .policy(|p| p.min_confidence = 0.95)
        .build();

    let workflow_id = harness
        .coordinator
        .submit(incident("db-3", "high_memory", &["clear_cache"]))
        .await
        .unwrap();
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();

    assert_eq!(workflow.state, WorkflowState::Closed);
    assert!(workflow.executions.is_empty());
    assert_eq!(harness.executor.remediation_calls(), 0);
}

#[tokio::test]
async fn test_missing_diagnosis_closes() {
    let harness = HarnessBuilder::new().build();
    let mut incident = incident("db-4", "high_memory", &[]);
    incident.diagnosis = None;

    let workflow_id = harness.coordinator.submit(incident).await.unwrap();
    let workflow = harness.coordinator.wait_for_terminal(workflow_id).await.unwrap();

    assert_eq!(workflow.state, WorkflowState::Closed);
    assert!(workflow
        .outcome_reason
        .unwrap()
        .starts_with("no diagnosis"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_capacity_limit_rejects_new_keys() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = HarnessBuilder::new()
        .executor(ScriptedExecutor::new().blocked_on(Arc::clone(&gate)))
        .settings(|s| s.max_active_workflows = Some(1))
        .build();

    let first = harness
        .coordinator
        .submit(incident("db-5", "high_memory", &["clear_cache"]))
        .await
        .unwrap();
    let second = harness
        .coordinator
        .submit(incident("db-6", "high_memory", &["clear_cache"]))
        .await;
    assert!(matches!(second, Err(CoordinatorError::AtCapacity(1))));

    gate.add_permits(1);
    harness.coordinator.wait_for_terminal(first).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_never_exceed_capacity() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = HarnessBuilder::new()
        .executor(ScriptedExecutor::new().blocked_on(Arc::clone(&gate)))
        .settings(|s| s.max_active_workflows = Some(2))
        .build();

    let submissions = (0..16).map(|i| {
        let coordinator = Arc::clone(&harness.coordinator);
        let incident = incident(&format!("db-{}", 10 + i), "high_memory", &["clear_cache"]);
        tokio::spawn(async move { coordinator.submit(incident).await })
    });
    let results: Vec<_> = futures::future::join_all(submissions)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let accepted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(CoordinatorError::AtCapacity(2))))
        .count();
    assert_eq!(accepted.len(), 2);
    assert_eq!(refused, 14);
    assert_eq!(harness.coordinator.active_count(), 2);

    gate.add_permits(2);
    for workflow_id in accepted {
        harness.coordinator.wait_for_terminal(*workflow_id).await.unwrap();
    }
}

#[tokio::test]
async fn test_shutdown_right_after_submit_completes() {
    let harness = HarnessBuilder::new().build();
    let workflow_id = harness
        .coordinator
        .submit(incident("api-8", "service_down", &["restart_service"]))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), harness.coordinator.shutdown())
        .await
        .expect("shutdown completes");

    let workflow = harness.coordinator.status(workflow_id).unwrap();
    assert_eq!(workflow.state, WorkflowState::Closed);
    assert!(harness.coordinator.pending_approvals().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_closes_workflow_still_diagnosing() {
    let hold = Arc::new(Semaphore::new(0));
    let diagnostician = BlockedDiagnosis::new(Arc::clone(&hold), &["restart_service"]);
    let started = diagnostician.started();
    let harness = HarnessBuilder::new().diagnostician(diagnostician).build();

    let mut incident = incident("api-9", "service_down", &[]);
    incident.diagnosis = None;
    let workflow_id = harness.coordinator.submit(incident.clone()).await.unwrap();
    started.notified().await;

    let coordinator = Arc::clone(&harness.coordinator);
    let stopping = tokio::spawn(async move { coordinator.shutdown().await });
    while !harness.coordinator.services().gate.is_closed() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The diagnosis arrives after the gate closed
    hold.add_permits(1);
    tokio::time::timeout(Duration::from_secs(5), stopping)
        .await
        .expect("shutdown completes")
        .unwrap();

    let workflow = harness.coordinator.status(workflow_id).unwrap();
    assert_eq!(workflow.state, WorkflowState::Closed);
    assert_eq!(workflow.outcome_reason.as_deref(), Some("coordinator shutting down"));

    let trail = audit_trail(&harness, &incident).await;
    assert_eq!(approval_requests(&trail), 0);
}

#[tokio::test]
async fn test_shutdown_refuses_new_work() {
    let harness = HarnessBuilder::new().build();
    let workflow_id = harness
        .coordinator
        .submit(incident("api-5", "service_down", &["restart_service"]))
        .await
        .unwrap();
    wait_until(&harness, workflow_id, |w| {
        w.state == WorkflowState::AwaitingApproval
    })
    .await;

    harness.coordinator.shutdown().await;

    let workflow = harness.coordinator.status(workflow_id).unwrap();
    assert_eq!(workflow.state, WorkflowState::Closed);
    assert_eq!(
        workflow.outcome_reason.as_deref(),
        Some("approval withdrawn: coordinator shutting down")
    );
    assert!(matches!(
        harness
            .coordinator
            .submit(incident("api-6", "service_down", &["restart_service"]))
            .await,
        Err(CoordinatorError::ShuttingDown)
    ));
}
