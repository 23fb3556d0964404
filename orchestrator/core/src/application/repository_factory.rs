// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the concrete [`AuditLog`] for the configured storage backend, so
//! the domain layer stays free of infrastructure dependencies.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select and initialise the audit log backend at startup

use std::sync::Arc;
use tracing::info;

use crate::domain::audit::AuditError;
use crate::domain::repository::{AuditLog, StorageBackend};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{FileAuditLog, InMemoryAuditLog, PostgresAuditLog};

/// Creates an AuditLog implementation based on the configured backend
pub async fn create_audit_log(backend: &StorageBackend) -> Result<Arc<dyn AuditLog>, AuditError> {
    match backend {
        StorageBackend::InMemory => {
            info!("Audit log: in-memory (not durable)");
            Ok(Arc::new(InMemoryAuditLog::new()))
        }
        StorageBackend::File(dir) => {
            info!(dir = %dir.display(), "Audit log: file");
            Ok(Arc::new(FileAuditLog::open(dir.clone()).await?))
        }
        StorageBackend::PostgreSQL(config) => {
            let database = Database::connect(config).await?;
            let log = PostgresAuditLog::new(database.get_pool().clone());
            log.ensure_schema().await?;
            info!("Audit log: postgres");
            Ok(Arc::new(log))
        }
    }
}
