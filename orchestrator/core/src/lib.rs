// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SHIM Core
//!
//! Remediation orchestration engine of the self-healing infrastructure
//! monitor: ingests diagnoses, decides on remediation actions, gates risky
//! actions behind human approval, executes with bounded retries, rolls back on
//! failure and keeps a durable audit trail.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Layers:** `domain` (model and ports), `application` (registry, approval
//!   gate, workflow runner, coordinator), `infrastructure` (audit backends,
//!   collaborator adapters, event bus), `presentation` (HTTP API)

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
