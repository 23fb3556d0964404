// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::action::ActionName;
use crate::domain::incident::IncidentId;
use crate::domain::workflow::WorkflowId;

/// Captured output is truncated to this many bytes before it is recorded.
pub const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionRecordId(pub Uuid);

impl ExecutionRecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionRecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success,
    Failure,
    Timeout,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failure => "failure",
            ExecutionOutcome::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    Remediation,
    Rollback,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionKind::Remediation => "remediation",
            ExecutionKind::Rollback => "rollback",
        }
    }
}

/// One action attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionRecordId,
    pub workflow_id: WorkflowId,
    pub incident_id: IncidentId,
    pub action: ActionName,
    pub kind: ExecutionKind,
    /// 1-based attempt number; rollbacks always carry 1
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
    pub output: String,

    /// Set when the executor ran in dry-run mode and did nothing
    #[serde(default)]
    pub dry_run: bool,

    /// On a rollback record: the remediation record it undoes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_of: Option<ExecutionRecordId>,

    /// On a remediation record: the rollback record that undid it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_by: Option<ExecutionRecordId>,
}

impl ExecutionRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow_id: WorkflowId,
        incident_id: IncidentId,
        action: ActionName,
        kind: ExecutionKind,
        attempt: u32,
        started_at: DateTime<Utc>,
        outcome: ExecutionOutcome,
        output: impl Into<String>,
    ) -> Self {
        Self {
            id: ExecutionRecordId::new(),
            workflow_id,
            incident_id,
            action,
            kind,
            attempt,
            started_at,
            ended_at: Utc::now(),
            outcome,
            output: truncate_output(output.into()),
            dry_run: false,
            rollback_of: None,
            rolled_back_by: None,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

/// Truncate on a char boundary so the stored output stays valid UTF-8.
pub fn truncate_output(mut output: String) -> String {
    if output.len() <= MAX_CAPTURED_OUTPUT {
        return output;
    }
    let mut cut = MAX_CAPTURED_OUTPUT;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str("\n[output truncated]");
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_output_keeps_short_output() {
        assert_eq!(truncate_output("ok".into()), "ok");
    }

    #[test]
    fn test_truncate_output_respects_char_boundary() {
        let long = "é".repeat(MAX_CAPTURED_OUTPUT);
        let truncated = truncate_output(long);
        assert!(truncated.ends_with("[output truncated]"));
        assert!(truncated.len() <= MAX_CAPTURED_OUTPUT + 32);
    }
}
