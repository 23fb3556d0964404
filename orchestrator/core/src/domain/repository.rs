// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts defined in the domain layer and implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Records | Implementations |
//! |-------|---------|----------------|
//! | `AuditLog` | `AuditEntry` | `InMemoryAuditLog`, `FileAuditLog`, `PostgresAuditLog` |
//!
//! ## Storage Backend Abstraction
//!
//! The backend is selected at startup from the `audit` section of
//! `shim-config.yaml`. The in-memory log is for development and tests; the
//! file and PostgreSQL logs are durable.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::PathBuf;

use crate::domain::audit::{AuditEntry, AuditError, NewAuditEntry, SequenceNumber};
use crate::domain::incident::IncidentId;

/// Storage backend for the audit log
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    File(PathBuf),
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Lazy, ordered stream of audit entries
pub type AuditStream = BoxStream<'static, Result<AuditEntry, AuditError>>;

/// Append-only audit trail
///
/// Appends for the same incident are serialized and receive consecutive
/// sequence numbers starting at 1. Appends for different incidents may run
/// concurrently. An append is durable once it returns `Ok`.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Persist an entry and return its sequence number.
    ///
    /// Fails with [`AuditError::StorageUnavailable`] when the medium cannot be
    /// written; in that case nothing was recorded.
    async fn append(&self, entry: NewAuditEntry) -> Result<SequenceNumber, AuditError>;

    /// Entries of `incident_id` with `sequence >= from`, in order.
    ///
    /// The stream is restartable: a consumer that stopped after sequence `n`
    /// resumes with `read_from(incident_id, n.next())`.
    fn read_from(&self, incident_id: IncidentId, from: SequenceNumber) -> AuditStream;

    /// All entries of `incident_id`, in order
    fn read(&self, incident_id: IncidentId) -> AuditStream {
        self.read_from(incident_id, SequenceNumber::FIRST)
    }

    /// Drop in-process append state kept for `incident_id`. Called once the
    /// incident's workflow is archived; recorded entries are untouched and a
    /// later append still continues the sequence.
    fn release(&self, _incident_id: IncidentId) {}
}
