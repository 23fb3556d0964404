// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod command_template;
pub mod db;
pub mod event_bus;
pub mod http_health_checker;
pub mod playbook_diagnostician;
pub mod repositories;
pub mod shell_executor;

pub use event_bus::{DomainEvent, EventBus, EventBusError};
pub use http_health_checker::HttpHealthChecker;
pub use playbook_diagnostician::PlaybookDiagnostician;
pub use shell_executor::ShellExecutor;
