// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shell Action Executor
//!
//! Runs remediation commands as child processes on the orchestrator host.
//! Commands are spawned directly (no shell), with argv rendered from the
//! action's templates. The engine bounds each attempt with its own timeout;
//! the child is killed when that future is dropped.
//!
//! In dry-run mode nothing is spawned; every invocation succeeds and reports
//! the command it would have run. Captured state is then the capture command
//! itself, as `$(...)`, so a dry-run rollback shows where its value comes from.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::collaborators::{
    ActionExecutor, ActionInvocation, ActionOutput, CapturedState, CollaboratorError,
};
use crate::domain::execution::ExecutionKind;
use crate::infrastructure::command_template::{
    CommandContext, CommandTemplateEngine, RenderedCommand,
};

pub struct ShellExecutor {
    templates: CommandTemplateEngine,
    dry_run: bool,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl ShellExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self {
            templates: CommandTemplateEngine::new(),
            dry_run,
            working_dir: None,
            env: HashMap::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    async fn spawn(&self, rendered: &RenderedCommand) -> Result<std::process::Output, CollaboratorError> {
        let mut cmd = Command::new(&rendered.program);
        cmd.args(&rendered.args)
            .envs(&self.env)
            .envs(&rendered.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.output().await.map_err(|e| {
            CollaboratorError::Unavailable(format!("failed to spawn '{}': {}", rendered.program, e))
        })
    }
}

#[async_trait]
impl ActionExecutor for ShellExecutor {
    async fn execute(&self, invocation: &ActionInvocation) -> Result<ActionOutput, CollaboratorError> {
        let context = CommandContext::from_invocation(invocation);
        let rendered = self.templates.render(&invocation.action.command, &context)?;
        let line = rendered.display_line();

        if self.dry_run {
            info!(
                workflow_id = %invocation.workflow_id,
                action = %invocation.action.name,
                command = %line,
                "Dry run: command not executed"
            );
            return Ok(ActionOutput::dry_run(format!("[dry-run] {}", line)));
        }

        debug!(
            workflow_id = %invocation.workflow_id,
            action = %invocation.action.name,
            rollback = invocation.kind == ExecutionKind::Rollback,
            command = %line,
            "Spawning action command"
        );

        let output = self.spawn(&rendered).await?;

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !captured.is_empty() && !captured.ends_with('\n') {
                captured.push('\n');
            }
            captured.push_str(&stderr);
        }

        if output.status.success() {
            Ok(ActionOutput::success(captured))
        } else {
            let status = output
                .status
                .code()
                .map(|c| format!("exit code {}", c))
                .unwrap_or_else(|| "terminated by signal".to_string());
            Ok(ActionOutput::failure(format!("{}: {}", status, captured.trim_end())))
        }
    }

    async fn capture_state(&self, invocation: &ActionInvocation) -> Result<CapturedState, CollaboratorError> {
        let context = CommandContext::from_invocation(invocation);
        let mut state = CapturedState::new();

        for (key, descriptor) in &invocation.action.capture {
            let rendered = self.templates.render(descriptor, &context)?;
            let line = rendered.display_line();

            if self.dry_run {
                state.insert(key.clone(), serde_json::Value::String(format!("$({})", line)));
                continue;
            }

            debug!(
                workflow_id = %invocation.workflow_id,
                action = %invocation.action.name,
                key = %key,
                command = %line,
                "Capturing pre-remediation state"
            );
            let output = self.spawn(&rendered).await?;
            if !output.status.success() {
                return Err(CollaboratorError::Failed(format!(
                    "capture of '{}' failed: {}",
                    key,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if value.is_empty() {
                return Err(CollaboratorError::Failed(format!(
                    "capture of '{}' produced no output",
                    key
                )));
            }
            state.insert(key.clone(), serde_json::Value::String(value));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::{ActionName, CommandDescriptor, RemediationAction, RiskTier};
    use crate::domain::incident::{IncidentId, TargetRef};
    use crate::domain::workflow::WorkflowId;

    fn invocation(command: CommandDescriptor) -> ActionInvocation {
        ActionInvocation {
            workflow_id: WorkflowId::new(),
            incident_id: IncidentId::new(),
            target: TargetRef::new("db-1").unwrap(),
            action: RemediationAction::new(ActionName::new("run_command").unwrap(), command, RiskTier::Safe),
            kind: ExecutionKind::Remediation,
            attempt: 1,
            parameters: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_dry_run_spawns_nothing() {
        let executor = ShellExecutor::new(true);
        let output = executor
            .execute(&invocation(
                CommandDescriptor::new("definitely-not-a-real-binary").arg("{{target}}"),
            ))
            .await
            .unwrap();

        assert!(output.success);
        assert!(output.dry_run);
        assert!(output.output.contains("definitely-not-a-real-binary db-1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout() {
        let executor = ShellExecutor::new(false);
        let output = executor
            .execute(&invocation(CommandDescriptor::new("echo").args(["healing", "{{target}}"])))
            .await
            .unwrap();

        assert!(output.success);
        assert!(!output.dry_run);
        assert_eq!(output.output.trim(), "healing db-1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let executor = ShellExecutor::new(false);
        let output = executor
            .execute(&invocation(CommandDescriptor::new("false")))
            .await
            .unwrap();

        assert!(!output.success);
        assert!(output.output.starts_with("exit code 1"));
    }

    #[tokio::test]
    async fn test_dry_run_rollback_renders_captured_capacity() {
        let registry = crate::application::ActionRegistry::with_builtin_catalog().unwrap();
        let scale_up = registry.resolve("scale_up").unwrap().as_ref().clone();
        let executor = ShellExecutor::new(true);

        let mut remediation = invocation(scale_up.command.clone());
        remediation.target = TargetRef::new("web").unwrap();
        remediation.action = scale_up;
        remediation
            .parameters
            .insert("target_capacity".to_string(), serde_json::json!(5));

        let state = executor.capture_state(&remediation).await.unwrap();
        assert_eq!(
            state["previous_capacity"],
            "$(kubectl get deployment/web -o jsonpath={.spec.replicas})"
        );

        let mut rollback = remediation.clone();
        rollback.action = registry.rollback_for("scale_up").unwrap();
        rollback.kind = ExecutionKind::Rollback;
        rollback.parameters.extend(state);
        let output = executor.execute(&rollback).await.unwrap();
        assert_eq!(
            output.output,
            "[dry-run] kubectl scale deployment/web --replicas=$(kubectl get deployment/web -o jsonpath={.spec.replicas})"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_reads_trimmed_stdout() {
        let executor = ShellExecutor::new(false);
        let mut inv = invocation(CommandDescriptor::new("true"));
        inv.action = inv
            .action
            .clone()
            .with_capture("previous_capacity", CommandDescriptor::new("echo").arg("3"));

        let state = executor.capture_state(&inv).await.unwrap();
        assert_eq!(state["previous_capacity"], "3");

        inv.action = inv
            .action
            .clone()
            .with_capture("broken", CommandDescriptor::new("false"));
        assert!(matches!(
            executor.capture_state(&inv).await,
            Err(CollaboratorError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let executor = ShellExecutor::new(false);
        let err = executor
            .execute(&invocation(CommandDescriptor::new("definitely-not-a-real-binary")))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable(_)));
    }
}
