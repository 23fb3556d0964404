// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Decision Service
//!
//! Turns an untrusted [`Diagnosis`] into a remediation decision.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Responsibility:** Validate diagnosis output against the action registry
//!   and the remediation policy, then pick the action and its gating
//!
//! # Rules
//!
//! 1. Diagnoses below `min_confidence` are rejected outright
//! 2. Suggested actions are tried in order; the first one that resolves in the
//!    registry, is on the allow-list and passes the override check wins
//! 3. `safe` actions execute directly unless `require_approval_for_safe` is set;
//!    every other tier goes through the approval gate

use std::sync::Arc;

use crate::application::action_registry::ActionRegistry;
use crate::domain::action::{RemediationAction, RiskTier};
use crate::domain::incident::{Diagnosis, Incident};
use crate::domain::policy::RemediationPolicy;

#[derive(Debug, Clone)]
pub enum Decision {
    Execute(Arc<RemediationAction>),
    RequestApproval(Arc<RemediationAction>),
    Reject(String),
}

pub fn decide(
    incident: &Incident,
    diagnosis: &Diagnosis,
    registry: &ActionRegistry,
    policy: &RemediationPolicy,
) -> Decision {
    if diagnosis.confidence < policy.min_confidence {
        return Decision::Reject(format!(
            "diagnosis confidence {:.2} is below the minimum {:.2}",
            diagnosis.confidence, policy.min_confidence
        ));
    }

    if diagnosis.suggested_actions.is_empty() {
        return Decision::Reject("diagnosis suggests no action".to_string());
    }

    let mut rejections = Vec::new();
    for suggested in &diagnosis.suggested_actions {
        let action = match registry.resolve(suggested.as_str()) {
            Ok(action) => action,
            Err(e) => {
                rejections.push(e.to_string());
                continue;
            }
        };

        if !policy.is_allowed(&action.name) {
            rejections.push(format!("action '{}' is not on the allow-list", action.name));
            continue;
        }

        if action.risk_tier == RiskTier::ForbiddenWithoutOverride && !incident.override_forbidden {
            rejections.push(format!(
                "action '{}' is forbidden without an operator override",
                action.name
            ));
            continue;
        }

        let needs_approval =
            action.risk_tier != RiskTier::Safe || policy.require_approval_for_safe;
        return if needs_approval {
            Decision::RequestApproval(action)
        } else {
            Decision::Execute(action)
        };
    }

    Decision::Reject(rejections.join("; "))
}
