// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Audit Log Implementations
//!
//! Infrastructure implementations of the [`AuditLog`] contract defined in the
//! domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and replay audit entries
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **InMemoryAuditLog** - Process-local, for tests and development
//! - **FileAuditLog** - One fsync'd JSON-lines file per incident
//! - **PostgresAuditLog** - `shim_audit_log` table behind a `sqlx` pool
//!
//! # Usage
//!
//! ```no_run
//! use shim_core::infrastructure::repositories::FileAuditLog;
//!
//! # async fn example() -> Result<(), shim_core::domain::audit::AuditError> {
//! let log = FileAuditLog::open("/var/lib/shim/audit").await?;
//! # Ok(())
//! # }
//! ```

pub mod file_audit_log;
pub mod postgres_audit_log;

pub use file_audit_log::FileAuditLog;
pub use postgres_audit_log::PostgresAuditLog;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::audit::{AuditEntry, AuditError, NewAuditEntry, SequenceNumber};
use crate::domain::incident::IncidentId;
use crate::domain::repository::{AuditLog, AuditStream};

/// Process-local audit log.
///
/// Can be switched unavailable to exercise the storage failure paths.
#[derive(Clone)]
pub struct InMemoryAuditLog {
    entries: Arc<RwLock<HashMap<IncidentId, Vec<AuditEntry>>>>,
    available: Arc<AtomicBool>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// While unavailable every append fails with `StorageUnavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of entries recorded for an incident
    pub fn len(&self, incident_id: IncidentId) -> usize {
        self.entries
            .read()
            .get(&incident_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().values().all(Vec::is_empty)
    }

    /// Copy of an incident's entries, in order
    pub fn entries(&self, incident_id: IncidentId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .get(&incident_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: NewAuditEntry) -> Result<SequenceNumber, AuditError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(AuditError::StorageUnavailable(
                "in-memory audit log switched unavailable".to_string(),
            ));
        }

        let mut entries = self.entries.write();
        let trail = entries.entry(entry.incident_id).or_default();
        let sequence = SequenceNumber(trail.len() as u64 + 1);
        trail.push(entry.into_entry(sequence, Utc::now()));
        Ok(sequence)
    }

    fn read_from(&self, incident_id: IncidentId, from: SequenceNumber) -> AuditStream {
        let slice: Vec<Result<AuditEntry, AuditError>> = self
            .entries
            .read()
            .get(&incident_id)
            .map(|trail| {
                trail
                    .iter()
                    .filter(|e| e.sequence >= from)
                    .cloned()
                    .map(Ok)
                    .collect()
            })
            .unwrap_or_default();
        Box::pin(stream::iter(slice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::AuditEvent;
    use crate::domain::workflow::WorkflowId;
    use futures::TryStreamExt;

    fn cancellation(incident_id: IncidentId) -> NewAuditEntry {
        NewAuditEntry::new(
            incident_id,
            WorkflowId::new(),
            AuditEvent::CancellationRequested {
                reason: "operator".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_sequences_are_per_incident() {
        let log = InMemoryAuditLog::new();
        let a = IncidentId::new();
        let b = IncidentId::new();

        assert_eq!(log.append(cancellation(a)).await.unwrap(), SequenceNumber(1));
        assert_eq!(log.append(cancellation(b)).await.unwrap(), SequenceNumber(1));
        assert_eq!(log.append(cancellation(a)).await.unwrap(), SequenceNumber(2));

        let read: Vec<AuditEntry> = log.read(a).try_collect().await.unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].sequence, SequenceNumber(2));
    }

    #[tokio::test]
    async fn test_read_restarts_from_sequence() {
        let log = InMemoryAuditLog::new();
        let id = IncidentId::new();
        for _ in 0..5 {
            log.append(cancellation(id)).await.unwrap();
        }

        let tail: Vec<AuditEntry> = log.read_from(id, SequenceNumber(4)).try_collect().await.unwrap();
        let sequences: Vec<u64> = tail.iter().map(|e| e.sequence.value()).collect();
        assert_eq!(sequences, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_unavailable_log_records_nothing() {
        let log = InMemoryAuditLog::new();
        let id = IncidentId::new();
        log.set_available(false);

        let result = log.append(cancellation(id)).await;
        assert!(matches!(result, Err(AuditError::StorageUnavailable(_))));
        assert_eq!(log.len(id), 0);

        log.set_available(true);
        assert_eq!(log.append(cancellation(id)).await.unwrap(), SequenceNumber(1));
    }
}
