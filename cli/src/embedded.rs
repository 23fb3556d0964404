// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Embedded mode execution (when daemon is not running)
//!
//! Builds the engine in-process, runs a single incident to a terminal state
//! and drains the coordinator. Approval-gated actions cannot be answered
//! without the HTTP API, so they wait out their timeout and close.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use shim_core::{
    application::Coordinator,
    domain::events::AlertEvent,
    domain::workflow::RemediationWorkflow,
    infrastructure::{DomainEvent, EventBusError},
    presentation::api::SubmitIncidentRequest,
};

use crate::daemon::server::{build_coordinator, load_config};

pub struct EmbeddedEngine {
    coordinator: Arc<Coordinator>,
}

impl EmbeddedEngine {
    pub async fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config = load_config(config_path)?;
        let coordinator = build_coordinator(&config)
            .await
            .context("Failed to initialize embedded engine")?;
        Ok(Self { coordinator })
    }

    /// Submit an incident and block until its workflow is terminal
    pub async fn run_incident(
        &self,
        request: SubmitIncidentRequest,
        mut on_event: impl FnMut(&DomainEvent),
    ) -> Result<RemediationWorkflow> {
        // Subscribe before submitting so the first transitions are not missed
        let mut events = self.coordinator.services().event_bus.subscribe();

        let incident = request.into_incident()?;
        let workflow_id = self.coordinator.submit(incident).await?;
        debug!(workflow_id = %workflow_id, "Incident submitted in embedded mode");

        let terminal = self.coordinator.wait_for_terminal(workflow_id);
        tokio::pin!(terminal);
        let mut events_open = true;

        loop {
            tokio::select! {
                workflow = &mut terminal => {
                    while let Ok(event) = events.try_recv() {
                        if event.workflow_id() == workflow_id {
                            on_event(&event);
                        }
                    }
                    return Ok(workflow?);
                }
                event = events.recv(), if events_open => match event {
                    Ok(event) if event.workflow_id() == workflow_id => {
                        on_event(&event);
                        if let DomainEvent::Alert(AlertEvent::WorkflowHalted { error, .. }) = &event {
                            anyhow::bail!("Workflow {} halted: {}", workflow_id, error);
                        }
                    }
                    Ok(_) | Err(EventBusError::Lagged(_)) => {}
                    Err(e) => {
                        debug!("Event stream ended: {}", e);
                        events_open = false;
                    }
                },
            }
        }
    }

    pub async fn shutdown(self) {
        self.coordinator.shutdown().await;
    }
}
