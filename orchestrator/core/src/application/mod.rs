// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod action_registry;
pub mod approval_gate;
pub mod coordinator;
pub mod decision;
pub mod repository_factory;
pub mod workflow_runner;

// Re-export use cases for convenience
pub use action_registry::ActionRegistry;
pub use approval_gate::{ApprovalGate, ApprovalWaiter};
pub use coordinator::{Coordinator, CoordinatorError, CoordinatorSettings};
pub use decision::{decide, Decision};
pub use repository_factory::create_audit_log;
pub use workflow_runner::{RunOutcome, WorkflowHandle, WorkflowRunner, WorkflowServices};
