// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP API
//!
//! JSON surface over the [`Coordinator`]: incident intake, workflow status,
//! cancellation, the human approval channel and the action catalog. Workflow
//! events are streamed over SSE.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::application::coordinator::{Coordinator, CoordinatorError};
use crate::domain::approval::{ApprovalDecision, ApprovalError, ApprovalRequestId};
use crate::domain::incident::{Diagnosis, Incident, Severity, Symptom, SymptomClass, TargetRef};
use crate::domain::workflow::WorkflowId;
use crate::infrastructure::event_bus::EventBusError;

pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub started_at: Instant,
}

pub fn app(coordinator: Arc<Coordinator>) -> Router {
    let state = Arc::new(AppState {
        coordinator,
        started_at: Instant::now(),
    });

    Router::new()
        .route("/health", get(health))
        .route("/v1/incidents", post(submit_incident))
        .route("/v1/workflows", get(list_workflows))
        .route("/v1/workflows/{id}", get(get_workflow))
        .route("/v1/workflows/{id}/cancel", post(cancel_workflow))
        .route("/v1/workflows/{id}/audit", get(workflow_audit))
        .route("/v1/workflows/{id}/events", get(stream_workflow_events))
        .route("/v1/approvals", get(list_approvals))
        .route("/v1/approvals/{id}/decision", post(decide_approval))
        .route("/v1/actions", get(list_actions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomInput {
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitIncidentRequest {
    pub target: String,
    pub symptoms: Vec<SymptomInput>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
    #[serde(default)]
    pub override_forbidden: bool,
}

impl SubmitIncidentRequest {
    pub fn into_incident(self) -> Result<Incident, ApiError> {
        let target = TargetRef::new(self.target).map_err(ApiError::bad_request)?;
        let symptoms = self
            .symptoms
            .into_iter()
            .map(|s| {
                let class = SymptomClass::new(s.class).map_err(ApiError::bad_request)?;
                let symptom = Symptom::new(class);
                Ok(match s.description {
                    Some(description) => symptom.with_description(description),
                    None => symptom,
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;

        let mut incident = Incident::new(target, symptoms, self.severity).map_err(ApiError::bad_request)?;
        if let Some(diagnosis) = self.diagnosis {
            incident = incident.with_diagnosis(diagnosis);
        }
        if self.override_forbidden {
            incident = incident.with_override();
        }
        Ok(incident)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitIncidentResponse {
    pub workflow_id: WorkflowId,
    pub incident_id: crate::domain::incident::IncidentId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    #[serde(default = "default_cancel_reason")]
    pub reason: String,
}

fn default_cancel_reason() -> String {
    "cancelled by operator".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub decision: ApprovalDecision,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(err: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::BAD_REQUEST, err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        let status = match &err {
            CoordinatorError::ConflictingWorkflow { .. }
            | CoordinatorError::CannotCancelExecuting(_)
            | CoordinatorError::InvalidState { .. }
            | CoordinatorError::Approval(ApprovalError::AlreadyResolved { .. }) => StatusCode::CONFLICT,
            CoordinatorError::NotFound(_) | CoordinatorError::Approval(ApprovalError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            CoordinatorError::InvalidIncident(_)
            | CoordinatorError::Approval(ApprovalError::InvalidDecision(_)) => StatusCode::BAD_REQUEST,
            CoordinatorError::AtCapacity(_) => StatusCode::TOO_MANY_REQUESTS,
            CoordinatorError::StorageUnavailable(_)
            | CoordinatorError::ShuttingDown
            | CoordinatorError::Approval(ApprovalError::GateClosed) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, err.to_string())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, "API error: {}", self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn parse_workflow_id(raw: &str) -> Result<WorkflowId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid workflow id '{}'", raw)))
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "active_workflows": state.coordinator.active_count(),
    }))
}

async fn submit_incident(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitIncidentRequest>,
) -> Result<(StatusCode, Json<SubmitIncidentResponse>), ApiError> {
    let incident = request.into_incident()?;
    let incident_id = incident.id;
    let workflow_id = state.coordinator.submit(incident).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitIncidentResponse {
            workflow_id,
            incident_id,
        }),
    ))
}

async fn list_workflows(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.coordinator.list())
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workflow_id = parse_workflow_id(&id)?;
    Ok(Json(state.coordinator.status(workflow_id)?))
}

async fn cancel_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let workflow_id = parse_workflow_id(&id)?;
    let reason = body.map(|Json(b)| b.reason).unwrap_or_else(default_cancel_reason);
    state.coordinator.cancel(workflow_id, &reason).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "workflow_id": workflow_id, "cancelled": true, "reason": reason })),
    ))
}

async fn workflow_audit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workflow_id = parse_workflow_id(&id)?;
    Ok(Json(state.coordinator.read_audit(workflow_id).await?))
}

async fn stream_workflow_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let workflow_id = parse_workflow_id(&id)?;
    state.coordinator.status(workflow_id)?;

    let receiver = state.coordinator.services().event_bus.subscribe_workflow(workflow_id);
    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(Event::default().data(data)), receiver));
                }
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn list_approvals(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.coordinator.pending_approvals())
}

async fn decide_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id: ApprovalRequestId = id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid approval request id '{}'", id)))?;
    if request.actor.trim().is_empty() {
        return Err(ApiError::bad_request("actor must not be empty"));
    }

    let resolved = state
        .coordinator
        .decide_approval(request_id, request.decision, &request.actor, request.reason)
        .await?;
    Ok(Json(resolved))
}

async fn list_actions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.coordinator.services().registry.list())
}
