// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Remediation Policy
//!
//! Retry, backoff, approval and timeout parameters applied to every workflow.
//! Built from the `remediation` section of the node configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::action::{ActionName, RemediationAction};

/// Exponential backoff between failed attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub initial: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: default_initial_backoff(),
            multiplier: default_multiplier(),
            max: default_max_backoff(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `next_attempt` (2-based: the first retry is attempt 2).
    pub fn delay_before(&self, next_attempt: u32) -> Duration {
        let exponent = next_attempt.saturating_sub(2) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs)
    }
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(60)
}

/// Per-step timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTimeouts {
    #[serde(with = "humantime_serde", default = "default_step_timeout")]
    pub diagnosis: Duration,

    /// Default for actions that do not declare their own timeout
    #[serde(with = "humantime_serde", default = "default_step_timeout")]
    pub execution: Duration,

    #[serde(with = "humantime_serde", default = "default_step_timeout")]
    pub verification: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            diagnosis: default_step_timeout(),
            execution: default_step_timeout(),
            verification: default_step_timeout(),
        }
    }
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemediationPolicy {
    /// Maximum attempts per action, the first attempt included
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub rollback_on_failure: bool,
    pub approval_timeout: Duration,
    /// Route even `safe` actions through the approval gate
    pub require_approval_for_safe: bool,
    /// Empty means every registered action is allowed
    pub allowed_actions: Vec<ActionName>,
    pub min_confidence: f64,
    pub min_health_score: f64,
    pub timeouts: StepTimeouts,
}

impl Default for RemediationPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            rollback_on_failure: true,
            approval_timeout: Duration::from_secs(60),
            require_approval_for_safe: false,
            allowed_actions: Vec::new(),
            min_confidence: 0.5,
            min_health_score: 0.0,
            timeouts: StepTimeouts::default(),
        }
    }
}

impl RemediationPolicy {
    pub fn is_allowed(&self, action: &ActionName) -> bool {
        self.allowed_actions.is_empty() || self.allowed_actions.contains(action)
    }

    /// Non-idempotent actions get exactly one attempt.
    pub fn max_attempts_for(&self, action: &RemediationAction) -> u32 {
        if action.idempotent {
            self.max_retries.max(1)
        } else {
            1
        }
    }

    pub fn execution_timeout_for(&self, action: &RemediationAction) -> Duration {
        action.command.timeout.unwrap_or(self.timeouts.execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::{CommandDescriptor, RiskTier};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = BackoffPolicy {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(5),
        };
        assert_eq!(backoff.delay_before(2), Duration::from_secs(1));
        assert_eq!(backoff.delay_before(3), Duration::from_secs(2));
        assert_eq!(backoff.delay_before(4), Duration::from_secs(4));
        assert_eq!(backoff.delay_before(5), Duration::from_secs(5));
        assert_eq!(backoff.delay_before(60), Duration::from_secs(5));
    }

    #[test]
    fn test_non_idempotent_actions_get_one_attempt() {
        let policy = RemediationPolicy::default();
        let action = RemediationAction::new(
            ActionName::new("kill_process").unwrap(),
            CommandDescriptor::new("kill"),
            RiskTier::Safe,
        );
        assert_eq!(policy.max_attempts_for(&action), 3);
        assert_eq!(policy.max_attempts_for(&action.clone().non_idempotent()), 1);
    }

    #[test]
    fn test_empty_allow_list_allows_everything() {
        let mut policy = RemediationPolicy::default();
        let name = ActionName::new("restart_pod").unwrap();
        assert!(policy.is_allowed(&name));

        policy.allowed_actions = vec![ActionName::new("clear_cache").unwrap()];
        assert!(!policy.is_allowed(&name));
    }

    #[test]
    fn test_action_timeout_overrides_default() {
        let policy = RemediationPolicy::default();
        let action = RemediationAction::new(
            ActionName::new("scale_down").unwrap(),
            CommandDescriptor::new("kubectl").with_timeout(Duration::from_secs(300)),
            RiskTier::Safe,
        );
        assert_eq!(policy.execution_timeout_for(&action), Duration::from_secs(300));
    }
}
