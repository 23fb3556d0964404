// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared harness for engine integration tests: scripted collaborators and a
//! coordinator wired to an in-memory audit log.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

use futures::TryStreamExt;
use shim_core::application::{
    ActionRegistry, ApprovalGate, Coordinator, CoordinatorSettings, WorkflowServices,
};
use shim_core::domain::action::{ActionName, CommandDescriptor, RemediationAction, RiskTier};
use shim_core::domain::audit::{AuditEntry, AuditEvent};
use shim_core::domain::collaborators::{
    ActionExecutor, ActionInvocation, ActionOutput, CapturedState, CollaboratorError, Diagnostician,
    HealthChecker, HealthReport,
};
use shim_core::domain::execution::ExecutionKind;
use shim_core::domain::incident::{Diagnosis, Incident, Severity, Symptom, SymptomClass, TargetRef};
use shim_core::domain::policy::{BackoffPolicy, RemediationPolicy};
use shim_core::domain::repository::AuditLog;
use shim_core::domain::workflow::{RemediationWorkflow, WorkflowId, WorkflowState};
use shim_core::infrastructure::event_bus::EventBus;
use shim_core::infrastructure::repositories::InMemoryAuditLog;

/// Executor whose outcomes are scripted per execution kind. When a script
/// runs dry, remediation attempts succeed and rollbacks succeed.
#[derive(Default)]
pub struct ScriptedExecutor {
    remediation: Mutex<VecDeque<bool>>,
    rollback: Mutex<VecDeque<bool>>,
    remediation_calls: AtomicUsize,
    rollback_calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    started: Arc<Notify>,
    captured: CapturedState,
    rollback_parameters: Mutex<Vec<HashMap<String, serde_json::Value>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remediation_outcomes(self, outcomes: &[bool]) -> Self {
        *self.remediation.lock() = outcomes.iter().copied().collect();
        self
    }

    pub fn rollback_outcomes(self, outcomes: &[bool]) -> Self {
        *self.rollback.lock() = outcomes.iter().copied().collect();
        self
    }

    /// Every execution waits for a permit from `gate`
    pub fn blocked_on(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// State returned for every capture request
    pub fn captures(mut self, values: &[(&str, &str)]) -> Self {
        self.captured = values
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        self
    }

    /// Parameters each rollback was invoked with, in order
    pub fn rollback_parameters(&self) -> Vec<HashMap<String, serde_json::Value>> {
        self.rollback_parameters.lock().clone()
    }

    /// Notified whenever an execution starts
    pub fn started(&self) -> Arc<Notify> {
        Arc::clone(&self.started)
    }

    pub fn remediation_calls(&self) -> usize {
        self.remediation_calls.load(Ordering::SeqCst)
    }

    pub fn rollback_calls(&self) -> usize {
        self.rollback_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn execute(&self, invocation: &ActionInvocation) -> Result<ActionOutput, CollaboratorError> {
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let succeeded = match invocation.kind {
            ExecutionKind::Remediation => {
                self.remediation_calls.fetch_add(1, Ordering::SeqCst);
                self.remediation.lock().pop_front().unwrap_or(true)
            }
            ExecutionKind::Rollback => {
                self.rollback_calls.fetch_add(1, Ordering::SeqCst);
                self.rollback_parameters.lock().push(invocation.parameters.clone());
                self.rollback.lock().pop_front().unwrap_or(true)
            }
        };

        if succeeded {
            Ok(ActionOutput::success(format!("{} ok", invocation.action.name)))
        } else {
            Ok(ActionOutput::failure(format!("{} failed", invocation.action.name)))
        }
    }

    async fn capture_state(&self, _: &ActionInvocation) -> Result<CapturedState, CollaboratorError> {
        Ok(self.captured.clone())
    }
}

pub struct FixedHealth(pub HealthReport);

impl FixedHealth {
    pub fn healthy() -> Self {
        Self(HealthReport::healthy(1.0))
    }

    pub fn unhealthy() -> Self {
        Self(HealthReport::unhealthy(0.1, "error rate still elevated"))
    }
}

#[async_trait]
impl HealthChecker for FixedHealth {
    async fn check(&self, _: &Incident) -> Result<HealthReport, CollaboratorError> {
        Ok(self.0.clone())
    }
}

pub struct NoDiagnosis;

#[async_trait]
impl Diagnostician for NoDiagnosis {
    async fn diagnose(&self, _: &Incident) -> Result<Option<Diagnosis>, CollaboratorError> {
        Ok(None)
    }
}

/// Holds every diagnosis until a permit is added, then suggests `actions`
pub struct BlockedDiagnosis {
    gate: Arc<Semaphore>,
    started: Arc<Notify>,
    actions: Vec<ActionName>,
}

impl BlockedDiagnosis {
    pub fn new(gate: Arc<Semaphore>, actions: &[&str]) -> Self {
        Self {
            gate,
            started: Arc::new(Notify::new()),
            actions: actions.iter().map(|a| ActionName::new(*a).unwrap()).collect(),
        }
    }

    pub fn started(&self) -> Arc<Notify> {
        Arc::clone(&self.started)
    }
}

#[async_trait]
impl Diagnostician for BlockedDiagnosis {
    async fn diagnose(&self, incident: &Incident) -> Result<Option<Diagnosis>, CollaboratorError> {
        self.started.notify_one();
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        Ok(Some(Diagnosis::new(
            format!("held diagnosis for {}", incident.target.as_str()),
            0.9,
            self.actions.clone(),
        )))
    }
}

pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub audit: InMemoryAuditLog,
    pub executor: Arc<ScriptedExecutor>,
    pub event_bus: EventBus,
}

pub struct HarnessBuilder {
    executor: ScriptedExecutor,
    diagnostician: Arc<dyn Diagnostician>,
    health: FixedHealth,
    policy: RemediationPolicy,
    settings: CoordinatorSettings,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            executor: ScriptedExecutor::new(),
            diagnostician: Arc::new(NoDiagnosis),
            health: FixedHealth::healthy(),
            policy: RemediationPolicy {
                backoff: BackoffPolicy {
                    initial: Duration::from_millis(100),
                    multiplier: 2.0,
                    max: Duration::from_secs(1),
                },
                ..RemediationPolicy::default()
            },
            settings: CoordinatorSettings {
                approval_sweep_interval: Duration::from_millis(500),
                ..CoordinatorSettings::default()
            },
        }
    }

    pub fn executor(mut self, executor: ScriptedExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn diagnostician(mut self, diagnostician: impl Diagnostician + 'static) -> Self {
        self.diagnostician = Arc::new(diagnostician);
        self
    }

    pub fn health(mut self, health: FixedHealth) -> Self {
        self.health = health;
        self
    }

    pub fn policy(mut self, configure: impl FnOnce(&mut RemediationPolicy)) -> Self {
        configure(&mut self.policy);
        self
    }

    pub fn settings(mut self, configure: impl FnOnce(&mut CoordinatorSettings)) -> Self {
        configure(&mut self.settings);
        self
    }

    pub fn build(self) -> Harness {
        let registry = ActionRegistry::with_builtin_catalog().unwrap();
        registry.register(flush_queue()).unwrap();

        let event_bus = EventBus::new(1024);
        let audit = InMemoryAuditLog::new();
        let executor = Arc::new(self.executor);
        let services = WorkflowServices {
            registry: Arc::new(registry),
            gate: Arc::new(ApprovalGate::new(event_bus.clone())),
            audit: Arc::new(audit.clone()) as Arc<dyn AuditLog>,
            diagnostician: self.diagnostician,
            executor: executor.clone(),
            health_checker: Arc::new(self.health),
            event_bus: event_bus.clone(),
            policy: Arc::new(self.policy),
        };

        let coordinator = Coordinator::new(services, self.settings);
        coordinator.start_background_tasks();
        Harness {
            coordinator,
            audit,
            executor,
            event_bus,
        }
    }
}

/// Safe action that declares a rollback
pub fn flush_queue() -> RemediationAction {
    RemediationAction::new(
        ActionName::new("flush_queue").unwrap(),
        CommandDescriptor::new("queue-admin").args(["flush", "{{target}}"]),
        RiskTier::Safe,
    )
    .with_rollback(CommandDescriptor::new("queue-admin").args(["restore", "{{target}}"]))
}

pub fn incident(target: &str, class: &str, actions: &[&str]) -> Incident {
    Incident::new(
        TargetRef::new(target).unwrap(),
        vec![Symptom::new(SymptomClass::new(class).unwrap())],
        Severity::High,
    )
    .unwrap()
    .with_diagnosis(Diagnosis::new(
        format!("{} on {}", class, target),
        0.9,
        actions.iter().map(|a| ActionName::new(*a).unwrap()).collect(),
    ))
}

/// Wait until the workflow's published snapshot satisfies `predicate`
pub async fn wait_until(
    harness: &Harness,
    workflow_id: WorkflowId,
    predicate: impl FnMut(&RemediationWorkflow) -> bool,
) -> RemediationWorkflow {
    let mut rx = harness.coordinator.subscribe(workflow_id).unwrap();
    let workflow = rx.wait_for(predicate).await.unwrap().clone();
    workflow
}

pub async fn audit_trail(harness: &Harness, incident: &Incident) -> Vec<AuditEntry> {
    harness.audit.read(incident.id).try_collect().await.unwrap()
}

/// States entered, in order, as recorded by the audit log
pub fn transitions(entries: &[AuditEntry]) -> Vec<WorkflowState> {
    entries
        .iter()
        .filter_map(|e| e.event.transition_target())
        .collect()
}

pub fn count_events(entries: &[AuditEntry], kind: &str) -> usize {
    entries.iter().filter(|e| e.event.kind() == kind).count()
}

pub fn approval_requests(entries: &[AuditEntry]) -> usize {
    entries
        .iter()
        .filter(|e| matches!(e.event, AuditEvent::ApprovalRequested { .. }))
        .count()
}
