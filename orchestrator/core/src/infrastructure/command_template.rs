// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Command Template Engine
//!
//! Renders action command descriptors into concrete invocations, using
//! Handlebars for placeholder substitution.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Turn a [`CommandDescriptor`] plus an incident into argv
//! - **Integration:** Action registry templates → shell executor
//!
//! # Supported Placeholders
//!
//! - `{{target}}` - Target resource of the incident
//! - `{{incident_id}}` - Incident identifier
//! - `{{workflow_id}}` - Workflow identifier
//! - `{{attempt}}` - Attempt number (1-based)
//! - `{{kind}}` - `remediation` or `rollback`
//! - `{{params.<name>}}` - Diagnosis parameters over the action's defaults
//!
//! Rendering is strict: a placeholder without a value is an error, never an
//! empty argument. Output is not HTML-escaped.

use handlebars::Handlebars;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::action::CommandDescriptor;
use crate::domain::collaborators::{ActionInvocation, CollaboratorError};

// ============================================================================
// Template Context
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CommandContext {
    pub target: String,
    pub incident_id: String,
    pub workflow_id: String,
    pub attempt: u32,
    pub kind: &'static str,
    pub params: BTreeMap<String, serde_json::Value>,
}

impl CommandContext {
    pub fn from_invocation(invocation: &ActionInvocation) -> Self {
        let mut params = invocation.action.default_params.clone();
        for (key, value) in &invocation.parameters {
            params.insert(key.clone(), value.clone());
        }

        Self {
            target: invocation.target.as_str().to_string(),
            incident_id: invocation.incident_id.to_string(),
            workflow_id: invocation.workflow_id.to_string(),
            attempt: invocation.attempt,
            kind: invocation.kind.as_str(),
            params,
        }
    }
}

/// A fully rendered command, ready to spawn
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl RenderedCommand {
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// Template Engine
// ============================================================================

pub struct CommandTemplateEngine {
    handlebars: Handlebars<'static>,
}

impl CommandTemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    pub fn render_str(&self, template: &str, context: &CommandContext) -> Result<String, CollaboratorError> {
        self.handlebars
            .render_template(template, context)
            .map_err(|e| {
                CollaboratorError::InvalidInvocation(format!("cannot render '{}': {}", template, e))
            })
    }

    pub fn render(
        &self,
        descriptor: &CommandDescriptor,
        context: &CommandContext,
    ) -> Result<RenderedCommand, CollaboratorError> {
        let program = self.render_str(&descriptor.program, context)?;
        let args = descriptor
            .args
            .iter()
            .map(|arg| self.render_str(arg, context))
            .collect::<Result<Vec<_>, _>>()?;
        let env = descriptor
            .env
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.render_str(value, context)?)))
            .collect::<Result<BTreeMap<_, _>, CollaboratorError>>()?;

        Ok(RenderedCommand { program, args, env })
    }

    /// Validate template syntax without rendering
    pub fn validate_template(template: &str) -> Result<(), String> {
        handlebars::template::Template::compile(template)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

impl Default for CommandTemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> CommandContext {
        let mut params = BTreeMap::new();
        params.insert("target_capacity".to_string(), serde_json::json!(4));
        CommandContext {
            target: "api-gateway".into(),
            incident_id: "inc-1".into(),
            workflow_id: "wf-1".into(),
            attempt: 2,
            kind: "remediation",
            params,
        }
    }

    #[test]
    fn test_renders_target_and_params() {
        let engine = CommandTemplateEngine::new();
        let descriptor = CommandDescriptor::new("kubectl").args([
            "scale",
            "deployment/{{target}}",
            "--replicas={{params.target_capacity}}",
        ]);

        let rendered = engine.render(&descriptor, &context()).unwrap();
        assert_eq!(rendered.program, "kubectl");
        assert_eq!(
            rendered.args,
            vec!["scale", "deployment/api-gateway", "--replicas=4"]
        );
    }

    #[test]
    fn test_missing_placeholder_is_an_error() {
        let engine = CommandTemplateEngine::new();
        let descriptor = CommandDescriptor::new("kill").arg("{{params.pid}}");
        let err = engine.render(&descriptor, &context()).unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidInvocation(_)));
    }

    #[test]
    fn test_output_is_not_escaped() {
        let engine = CommandTemplateEngine::new();
        let mut ctx = context();
        ctx.target = "a&b<c>".into();
        assert_eq!(engine.render_str("{{target}}", &ctx).unwrap(), "a&b<c>");
    }

    #[test]
    fn test_env_values_are_rendered() {
        let engine = CommandTemplateEngine::new();
        let descriptor = CommandDescriptor::new("true").env("ATTEMPT", "{{attempt}}");
        let rendered = engine.render(&descriptor, &context()).unwrap();
        assert_eq!(rendered.env.get("ATTEMPT").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_validate_template_syntax() {
        assert!(CommandTemplateEngine::validate_template("{{target}}").is_ok());
        assert!(CommandTemplateEngine::validate_template("{{#if x}}").is_err());
    }
}
