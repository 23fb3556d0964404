// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with daemon API

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use shim_core::domain::action::RemediationAction;
use shim_core::domain::approval::{ApprovalDecision, ApprovalRequest, ApprovalRequestId};
use shim_core::domain::audit::AuditEntry;
use shim_core::domain::workflow::{RemediationWorkflow, WorkflowId};
use shim_core::infrastructure::DomainEvent;
use shim_core::presentation::api::{
    CancelRequest, DecisionRequest, SubmitIncidentRequest, SubmitIncidentResponse,
};

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl DaemonClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        // No global timeout: event streams are long-lived
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: super::base_url(host, port),
        })
    }

    pub async fn submit_incident(&self, request: &SubmitIncidentRequest) -> Result<SubmitIncidentResponse> {
        let response = self
            .client
            .post(format!("{}/v1/incidents", self.base_url))
            .json(request)
            .send()
            .await
            .context("Failed to submit incident")?;
        parse(response, "submit incident").await
    }

    pub async fn get_workflow(&self, workflow_id: WorkflowId) -> Result<RemediationWorkflow> {
        let response = self
            .client
            .get(format!("{}/v1/workflows/{}", self.base_url, workflow_id))
            .send()
            .await
            .context("Failed to get workflow")?;
        parse(response, "get workflow").await
    }

    pub async fn list_workflows(&self) -> Result<Vec<RemediationWorkflow>> {
        let response = self
            .client
            .get(format!("{}/v1/workflows", self.base_url))
            .send()
            .await
            .context("Failed to list workflows")?;
        parse(response, "list workflows").await
    }

    pub async fn cancel_workflow(&self, workflow_id: WorkflowId, reason: String) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v1/workflows/{}/cancel", self.base_url, workflow_id))
            .json(&CancelRequest { reason })
            .send()
            .await
            .context("Failed to cancel workflow")?;
        check(response, "cancel workflow").await.map(|_| ())
    }

    pub async fn audit_trail(&self, workflow_id: WorkflowId) -> Result<Vec<AuditEntry>> {
        let response = self
            .client
            .get(format!("{}/v1/workflows/{}/audit", self.base_url, workflow_id))
            .send()
            .await
            .context("Failed to read audit trail")?;
        parse(response, "read audit trail").await
    }

    pub async fn list_approvals(&self) -> Result<Vec<ApprovalRequest>> {
        let response = self
            .client
            .get(format!("{}/v1/approvals", self.base_url))
            .send()
            .await
            .context("Failed to list approvals")?;
        parse(response, "list approvals").await
    }

    pub async fn decide_approval(
        &self,
        request_id: ApprovalRequestId,
        decision: ApprovalDecision,
        actor: String,
        reason: Option<String>,
    ) -> Result<ApprovalRequest> {
        let response = self
            .client
            .post(format!("{}/v1/approvals/{}/decision", self.base_url, request_id))
            .json(&DecisionRequest {
                decision,
                actor,
                reason,
            })
            .send()
            .await
            .context("Failed to submit approval decision")?;
        parse(response, "decide approval").await
    }

    pub async fn list_actions(&self) -> Result<Vec<RemediationAction>> {
        let response = self
            .client
            .get(format!("{}/v1/actions", self.base_url))
            .send()
            .await
            .context("Failed to list actions")?;
        parse(response, "list actions").await
    }

    /// Follow a workflow's server-sent events until `until` returns true or
    /// the stream ends
    pub async fn stream_events(
        &self,
        workflow_id: WorkflowId,
        mut on_event: impl FnMut(&DomainEvent),
        until: impl Fn(&DomainEvent) -> bool,
    ) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/v1/workflows/{}/events", self.base_url, workflow_id))
            .send()
            .await
            .context("Failed to connect to event stream")?;
        let response = check(response, "stream events").await?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read event stream chunk")?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let Some(data) = line.trim_end().strip_prefix("data:") else {
                    continue;
                };
                if let Ok(event) = serde_json::from_str::<DomainEvent>(data.trim_start()) {
                    on_event(&event);
                    if until(&event) {
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }
}

async fn check(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or(text);
    anyhow::bail!("Failed to {} (HTTP {}): {}", what, status.as_u16(), message)
}

async fn parse<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    check(response, what)
        .await?
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(server: &mockito::ServerGuard) -> DaemonClient {
        let url = server.url();
        let (host, port) = url.rsplit_once(':').unwrap();
        DaemonClient::new(host, port.parse().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_conflict_surfaces_server_message() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/incidents")
            .with_status(409)
            .with_body(r#"{"error":"Workflow 123 is already remediating db-1/high_memory"}"#)
            .create_async()
            .await;

        let request: SubmitIncidentRequest = serde_json::from_value(serde_json::json!({
            "target": "db-1",
            "symptoms": [{"class": "high_memory"}],
        }))
        .unwrap();
        let err = client(&server).submit_incident(&request).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("HTTP 409"));
        assert!(message.contains("already remediating"));
    }

    #[tokio::test]
    async fn test_list_approvals_empty() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/approvals")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let approvals = client(&server).list_approvals().await.unwrap();
        mock.assert_async().await;
        assert!(approvals.is_empty());
    }

    #[tokio::test]
    async fn test_stream_stops_at_predicate() {
        let workflow_id = WorkflowId::new();
        let event = |to: &str| {
            serde_json::json!({
                "type": "remediation",
                "event": "state_changed",
                "workflow_id": workflow_id,
                "incident_id": uuid::Uuid::new_v4(),
                "from": "verifying",
                "to": to,
                "reason": "test",
                "changed_at": "2026-01-01T00:00:00Z",
            })
        };
        let body = format!(
            "data: {}\n\ndata: {}\n\ndata: {}\n\n",
            event("verifying"),
            event("resolved"),
            event("closed")
        );

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/v1/workflows/{}/events", workflow_id).as_str())
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let mut seen = 0;
        client(&server)
            .stream_events(
                workflow_id,
                |_| seen += 1,
                |e| matches!(
                    e,
                    DomainEvent::Remediation(shim_core::domain::events::RemediationEvent::StateChanged { to, .. })
                        if to.is_terminal()
                ),
            )
            .await
            .unwrap();
        assert_eq!(seen, 2);
    }
}
