// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP Health Checker
//!
//! Checks a target over HTTP after remediation. The endpoint is a Handlebars
//! template rendered per incident (`{{target}}`, `{{symptom_class}}`,
//! `{{incident_id}}`).
//!
//! A 2xx response is healthy with score 1.0 unless the body is JSON carrying
//! its own `healthy` / `score` fields. Any other status is unhealthy.
//! Transport errors surface as `Unavailable`; the engine treats them as a
//! failed check.

use async_trait::async_trait;
use handlebars::Handlebars;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::domain::collaborators::{CollaboratorError, HealthChecker, HealthReport};
use crate::domain::incident::Incident;

#[derive(Debug, Default, Deserialize)]
struct HealthBody {
    healthy: Option<bool>,
    score: Option<f64>,
    #[serde(alias = "message")]
    detail: Option<String>,
}

pub struct HttpHealthChecker {
    client: reqwest::Client,
    endpoint: String,
    templates: Handlebars<'static>,
}

impl HttpHealthChecker {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CollaboratorError::Unavailable(format!("cannot build HTTP client: {}", e)))?;

        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        templates.register_escape_fn(handlebars::no_escape);

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            templates,
        })
    }

    fn url_for(&self, incident: &Incident) -> Result<String, CollaboratorError> {
        let context = serde_json::json!({
            "target": incident.target.as_str(),
            "symptom_class": incident.symptom_class().as_str(),
            "incident_id": incident.id.to_string(),
        });
        self.templates
            .render_template(&self.endpoint, &context)
            .map_err(|e| CollaboratorError::InvalidInvocation(format!("health endpoint: {}", e)))
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check(&self, incident: &Incident) -> Result<HealthReport, CollaboratorError> {
        let url = self.url_for(incident)?;
        debug!(incident_id = %incident.id, url = %url, "Probing target health");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: HealthBody = serde_json::from_str(&text).unwrap_or_default();

        if !status.is_success() {
            let detail = body
                .detail
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Ok(HealthReport::unhealthy(body.score.unwrap_or(0.0), detail));
        }

        let score = body.score.unwrap_or(1.0).clamp(0.0, 1.0);
        if body.healthy.unwrap_or(true) {
            Ok(HealthReport::healthy(score))
        } else {
            Ok(HealthReport::unhealthy(
                score,
                body.detail.unwrap_or_else(|| "target reports unhealthy".to_string()),
            ))
        }
    }
}
