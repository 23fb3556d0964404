// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL Audit Log
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE shim_audit_log (
//!     incident_id UUID        NOT NULL,
//!     sequence    BIGINT      NOT NULL,
//!     workflow_id UUID        NOT NULL,
//!     recorded_at TIMESTAMPTZ NOT NULL,
//!     event       JSONB       NOT NULL,
//!     PRIMARY KEY (incident_id, sequence)
//! );
//! ```
//!
//! The sequence is assigned inside the `INSERT` from the current maximum of
//! the incident. Two writers racing on the same incident collide on the
//! primary key; the loser retries. Commit happens before `append` returns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use futures::TryStreamExt;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::domain::audit::{AuditEntry, AuditError, AuditEvent, NewAuditEntry, SequenceNumber};
use crate::domain::incident::IncidentId;
use crate::domain::repository::{AuditLog, AuditStream};
use crate::domain::workflow::WorkflowId;

const PAGE_SIZE: i64 = 256;
const MAX_INSERT_ATTEMPTS: usize = 5;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS shim_audit_log (
        incident_id UUID        NOT NULL,
        sequence    BIGINT      NOT NULL,
        workflow_id UUID        NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL,
        event       JSONB       NOT NULL,
        PRIMARY KEY (incident_id, sequence)
    )
"#;

#[derive(Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the audit table if it does not exist
    pub async fn ensure_schema(&self) -> Result<(), AuditError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        debug!("shim_audit_log schema ready");
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn append(&self, entry: NewAuditEntry) -> Result<SequenceNumber, AuditError> {
        let event = serde_json::to_value(&entry.event)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = sqlx::query(
                r#"
                INSERT INTO shim_audit_log (incident_id, sequence, workflow_id, recorded_at, event)
                SELECT $1, COALESCE(MAX(sequence), 0) + 1, $2, $3, $4
                FROM shim_audit_log
                WHERE incident_id = $1
                RETURNING sequence
                "#,
            )
            .bind(entry.incident_id.as_uuid())
            .bind(entry.workflow_id.as_uuid())
            .bind(Utc::now())
            .bind(&event)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(row) => {
                    let sequence: i64 = row.try_get("sequence")?;
                    return Ok(SequenceNumber(sequence as u64));
                }
                Err(e) if is_unique_violation(&e) && attempt < MAX_INSERT_ATTEMPTS => {
                    debug!(incident_id = %entry.incident_id, attempt, "Audit sequence collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_from(&self, incident_id: IncidentId, from: SequenceNumber) -> AuditStream {
        let pool = self.pool.clone();

        let pages = stream::try_unfold(Some(from), move |cursor| {
            let pool = pool.clone();
            async move {
                let Some(cursor) = cursor else {
                    return Ok::<_, AuditError>(None);
                };

                let entries = fetch_page(&pool, incident_id, cursor).await?;
                if entries.is_empty() {
                    return Ok(None);
                }
                let next = match entries.last() {
                    Some(last) if entries.len() as i64 == PAGE_SIZE => Some(last.sequence.next()),
                    _ => None,
                };
                let page = stream::iter(entries.into_iter().map(Ok::<_, AuditError>));
                Ok(Some((page, next)))
            }
        });

        Box::pin(pages.try_flatten())
    }
}

async fn fetch_page(
    pool: &PgPool,
    incident_id: IncidentId,
    from: SequenceNumber,
) -> Result<Vec<AuditEntry>, AuditError> {
    let rows = sqlx::query(
        r#"
        SELECT incident_id, sequence, workflow_id, recorded_at, event
        FROM shim_audit_log
        WHERE incident_id = $1 AND sequence >= $2
        ORDER BY sequence
        LIMIT $3
        "#,
    )
    .bind(incident_id.as_uuid())
    .bind(from.value() as i64)
    .bind(PAGE_SIZE)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_entry).collect()
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<AuditEntry, AuditError> {
    let incident_id = IncidentId::from_uuid(row.try_get::<Uuid, _>("incident_id")?);
    let sequence: i64 = row.try_get("sequence")?;
    let event_json: serde_json::Value = row.try_get("event")?;
    let event: AuditEvent = serde_json::from_value(event_json).map_err(|e| AuditError::Corrupt {
        incident_id,
        sequence: sequence as u64,
        detail: e.to_string(),
    })?;

    Ok(AuditEntry {
        incident_id,
        workflow_id: WorkflowId::from_uuid(row.try_get::<Uuid, _>("workflow_id")?),
        sequence: SequenceNumber(sequence as u64),
        recorded_at: row.try_get::<DateTime<Utc>, _>("recorded_at")?,
        event,
    })
}
