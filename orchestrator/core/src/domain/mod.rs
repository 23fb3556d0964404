// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Layer (`shim-core`)
//!
//! Entities, value objects and ports of the Remediation Context. Nothing in
//! this layer performs I/O; persistence and collaborator traits are
//! implemented in `crate::infrastructure`.

pub mod action;
pub mod approval;
pub mod audit;
pub mod collaborators;
pub mod events;
pub mod execution;
pub mod incident;
pub mod node_config;
pub mod policy;
pub mod repository;
pub mod workflow;
