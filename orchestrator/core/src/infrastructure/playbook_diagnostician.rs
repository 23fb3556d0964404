// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Playbook Diagnostician
//!
//! Deterministic diagnostic source: maps symptom classes to a root cause and
//! a list of suggested actions, as declared under `spec.playbooks` in the node
//! configuration. Incidents carrying their own diagnosis (for example one
//! produced by an LLM agent) never reach it.
//!
//! Symptoms are matched in order, so the primary symptom wins over secondary
//! ones. An incident with no matching playbook gets no diagnosis.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use crate::domain::collaborators::{CollaboratorError, Diagnostician};
use crate::domain::incident::{Diagnosis, Incident, SymptomClass};
use crate::domain::node_config::PlaybookConfig;

pub const PRODUCER: &str = "playbook";

pub struct PlaybookDiagnostician {
    playbooks: HashMap<SymptomClass, PlaybookConfig>,
}

impl PlaybookDiagnostician {
    /// Later playbooks for the same symptom class replace earlier ones
    pub fn new(playbooks: impl IntoIterator<Item = PlaybookConfig>) -> Result<Self, CollaboratorError> {
        let mut by_class = HashMap::new();
        for playbook in playbooks {
            let class = SymptomClass::new(playbook.symptom_class.clone())
                .map_err(|e| CollaboratorError::InvalidInvocation(e.to_string()))?;
            by_class.insert(class, playbook);
        }
        Ok(Self { playbooks: by_class })
    }

    pub fn len(&self) -> usize {
        self.playbooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playbooks.is_empty()
    }
}

#[async_trait]
impl Diagnostician for PlaybookDiagnostician {
    async fn diagnose(&self, incident: &Incident) -> Result<Option<Diagnosis>, CollaboratorError> {
        let matched = incident
            .symptoms
            .iter()
            .find_map(|symptom| self.playbooks.get(&symptom.class));

        let Some(playbook) = matched else {
            debug!(incident_id = %incident.id, "No playbook matches incident symptoms");
            return Ok(None);
        };

        let mut diagnosis = Diagnosis::new(
            playbook.root_cause.clone(),
            playbook.confidence,
            playbook.actions.clone(),
        )
        .produced_by(PRODUCER);
        for (key, value) in &playbook.parameters {
            diagnosis = diagnosis.with_parameter(key.clone(), value.clone());
        }
        Ok(Some(diagnosis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::ActionName;
    use crate::domain::incident::{Severity, Symptom, TargetRef};

    fn playbook(class: &str, action: &str) -> PlaybookConfig {
        PlaybookConfig {
            symptom_class: class.to_string(),
            root_cause: format!("{} detected", class),
            confidence: 0.8,
            actions: vec![ActionName::new(action).unwrap()],
            parameters: HashMap::new(),
        }
    }

    fn incident(classes: &[&str]) -> Incident {
        Incident::new(
            TargetRef::new("cache-1").unwrap(),
            classes
                .iter()
                .map(|c| Symptom::new(SymptomClass::new(*c).unwrap()))
                .collect(),
            Severity::Medium,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_primary_symptom_wins() {
        let diagnostician = PlaybookDiagnostician::new(vec![
            playbook("high_memory", "clear_cache"),
            playbook("pod_crashloop", "restart_pod"),
        ])
        .unwrap();

        let diagnosis = diagnostician
            .diagnose(&incident(&["pod_crashloop", "high_memory"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(diagnosis.suggested_actions[0].as_str(), "restart_pod");
        assert_eq!(diagnosis.produced_by.as_deref(), Some(PRODUCER));
    }

    #[tokio::test]
    async fn test_falls_back_to_secondary_symptom() {
        let diagnostician =
            PlaybookDiagnostician::new(vec![playbook("high_memory", "clear_cache")]).unwrap();
        let diagnosis = diagnostician
            .diagnose(&incident(&["disk_pressure", "HIGH_MEMORY"]))
            .await
            .unwrap();
        assert!(diagnosis.is_some());
    }

    #[tokio::test]
    async fn test_no_match_means_no_diagnosis() {
        let diagnostician = PlaybookDiagnostician::new(Vec::new()).unwrap();
        assert!(diagnostician.is_empty());
        assert!(diagnostician.diagnose(&incident(&["high_cpu"])).await.unwrap().is_none());
    }
}
