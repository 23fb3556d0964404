// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Incident Domain Model
//!
//! An [`Incident`] is a detected infrastructure problem being tracked through
//! remediation. Incidents are owned exclusively by their workflow instance.
//!
//! # Architectural Context
//!
//! - **Bounded Context:** Remediation Context
//! - **Aggregate Root:** Incident (owned by the remediation workflow)
//!
//! A [`Diagnosis`] is produced outside the engine (playbooks, LLM agents) and is
//! treated as untrusted input: it is validated here for shape and later checked
//! against the action registry before anything is executed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::action::ActionName;

// ============================================================================
// Value Objects: Identifiers
// ============================================================================

/// Unique identifier for an Incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IncidentId(pub Uuid);

impl IncidentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IncidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the infrastructure resource an incident is about
/// (e.g. `db-1`, `infra://aws/ec2/i-12345`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetRef(String);

impl TargetRef {
    pub fn new(target: impl Into<String>) -> Result<Self, IncidentError> {
        let target = target.into();
        if target.trim().is_empty() {
            return Err(IncidentError::EmptyTarget);
        }
        Ok(Self(target))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Class of a symptom (e.g. `high_memory`, `service_down`).
///
/// Classes are normalised to lowercase so `High_Memory` and `high_memory`
/// compete for the same remediation slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymptomClass(String);

impl SymptomClass {
    pub fn new(class: impl Into<String>) -> Result<Self, IncidentError> {
        let class = class.into().trim().to_ascii_lowercase();
        if class.is_empty() {
            return Err(IncidentError::EmptySymptomClass);
        }
        Ok(Self(class))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SymptomClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key under which at most one non-terminal workflow may exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemediationKey {
    pub target: TargetRef,
    pub symptom_class: SymptomClass,
}

impl std::fmt::Display for RemediationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.target, self.symptom_class)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Incident severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Medium
    }
}

/// A single observed symptom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symptom {
    pub class: SymptomClass,

    /// Human readable detail (metric value, log excerpt, ...)
    #[serde(default)]
    pub description: Option<String>,
}

impl Symptom {
    pub fn new(class: SymptomClass) -> Self {
        Self {
            class,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Incident Aggregate
///
/// # Invariants
/// - At least one symptom; the first one is the primary symptom whose class
///   forms the remediation key together with the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub target: TargetRef,
    pub symptoms: Vec<Symptom>,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,

    /// Diagnosis supplied together with the incident (e.g. by an LLM agent).
    /// When absent the engine asks its diagnostic collaborator.
    #[serde(default)]
    pub diagnosis: Option<Diagnosis>,

    /// Operator override allowing `forbidden_without_override` actions
    /// to be proposed for approval.
    #[serde(default)]
    pub override_forbidden: bool,
}

impl Incident {
    pub fn new(
        target: TargetRef,
        symptoms: Vec<Symptom>,
        severity: Severity,
    ) -> Result<Self, IncidentError> {
        if symptoms.is_empty() {
            return Err(IncidentError::NoSymptoms);
        }

        Ok(Self {
            id: IncidentId::new(),
            target,
            symptoms,
            severity,
            created_at: Utc::now(),
            diagnosis: None,
            override_forbidden: false,
        })
    }

    pub fn with_diagnosis(mut self, diagnosis: Diagnosis) -> Self {
        self.diagnosis = Some(diagnosis);
        self
    }

    pub fn with_override(mut self) -> Self {
        self.override_forbidden = true;
        self
    }

    /// Class of the primary symptom
    pub fn symptom_class(&self) -> &SymptomClass {
        &self.symptoms[0].class
    }

    pub fn remediation_key(&self) -> RemediationKey {
        RemediationKey {
            target: self.target.clone(),
            symptom_class: self.symptom_class().clone(),
        }
    }

    /// Re-check invariants on incidents that arrived through deserialization.
    pub fn validate(&self) -> Result<(), IncidentError> {
        if self.symptoms.is_empty() {
            return Err(IncidentError::NoSymptoms);
        }
        if self.target.as_str().trim().is_empty() {
            return Err(IncidentError::EmptyTarget);
        }
        if let Some(diagnosis) = &self.diagnosis {
            diagnosis.validate()?;
        }
        Ok(())
    }
}

/// Diagnosis attached read-only to an incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Root-cause hypothesis
    pub root_cause: String,

    /// Confidence score in `[0.0, 1.0]`
    pub confidence: f64,

    /// Suggested actions, most preferred first
    pub suggested_actions: Vec<ActionName>,

    /// Parameters made available to command templates as `{{params.*}}`
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,

    /// Who produced the diagnosis (playbook, agent name, operator)
    #[serde(default)]
    pub produced_by: Option<String>,
}

impl Diagnosis {
    pub fn new(root_cause: impl Into<String>, confidence: f64, suggested_actions: Vec<ActionName>) -> Self {
        Self {
            root_cause: root_cause.into(),
            confidence,
            suggested_actions,
            parameters: HashMap::new(),
            produced_by: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn produced_by(mut self, producer: impl Into<String>) -> Self {
        self.produced_by = Some(producer.into());
        self
    }

    pub fn validate(&self) -> Result<(), IncidentError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(IncidentError::InvalidConfidence(self.confidence));
        }
        Ok(())
    }
}

// ============================================================================
// Domain Errors
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IncidentError {
    #[error("Incident target cannot be empty")]
    EmptyTarget,

    #[error("Symptom class cannot be empty")]
    EmptySymptomClass,

    #[error("Incident must have at least one symptom")]
    NoSymptoms,

    #[error("Diagnosis confidence must be within 0.0..=1.0, got {0}")]
    InvalidConfidence(f64),
}
