// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! File Audit Log
//!
//! Durable audit log backed by one JSON-lines file per incident.
//!
//! # Layout
//!
//! ```text
//! <dir>/<incident_id>.jsonl    one AuditEntry per line, sequence 1..n
//! ```
//!
//! Each append is `write_all` followed by `sync_data` before it returns. A
//! trailing line without a newline can only be left by a crash mid-write; it
//! is truncated the first time the incident is touched again and the next
//! sequence number is recovered from the complete lines.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::stream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::audit::{AuditEntry, AuditError, NewAuditEntry, SequenceNumber};
use crate::domain::incident::IncidentId;
use crate::domain::repository::{AuditLog, AuditStream};

/// Append cursor of a single incident file
#[derive(Debug, Default)]
struct Cursor {
    /// `None` until recovered from disk, and again after a failed write
    next: Option<SequenceNumber>,
}

pub struct FileAuditLog {
    dir: PathBuf,
    cursors: DashMap<IncidentId, Arc<Mutex<Cursor>>>,
}

impl FileAuditLog {
    /// Open (and create if needed) an audit directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            AuditError::StorageUnavailable(format!("cannot create {}: {}", dir.display(), e))
        })?;
        debug!(dir = %dir.display(), "File audit log opened");
        Ok(Self {
            dir,
            cursors: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, incident_id: IncidentId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", incident_id))
    }

    fn cursor(&self, incident_id: IncidentId) -> Arc<Mutex<Cursor>> {
        self.cursors
            .entry(incident_id)
            .or_insert_with(|| Arc::new(Mutex::new(Cursor::default())))
            .clone()
    }

    /// Truncate a torn tail and return the next sequence number
    async fn recover(&self, incident_id: IncidentId) -> Result<SequenceNumber, AuditError> {
        let path = self.path_for(incident_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SequenceNumber::FIRST),
            Err(e) => return Err(e.into()),
        };

        let complete_len = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);

        if complete_len < bytes.len() {
            warn!(
                incident_id = %incident_id,
                torn_bytes = bytes.len() - complete_len,
                "Truncating torn audit record"
            );
            let file = OpenOptions::new().write(true).open(&path).await?;
            file.set_len(complete_len as u64).await?;
            file.sync_data().await?;
        }

        let mut expected = SequenceNumber::FIRST;
        for line in bytes[..complete_len].split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_slice(line).map_err(|e| AuditError::Corrupt {
                incident_id,
                sequence: expected.value(),
                detail: e.to_string(),
            })?;
            if entry.sequence != expected {
                return Err(AuditError::Corrupt {
                    incident_id,
                    sequence: expected.value(),
                    detail: format!("found sequence {}", entry.sequence),
                });
            }
            expected = expected.next();
        }
        Ok(expected)
    }

    async fn write_line(&self, incident_id: IncidentId, line: &[u8]) -> Result<(), AuditError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(incident_id))
            .await?;
        file.write_all(line).await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl AuditLog for FileAuditLog {
    async fn append(&self, entry: NewAuditEntry) -> Result<SequenceNumber, AuditError> {
        let incident_id = entry.incident_id;
        let cursor = self.cursor(incident_id);
        let mut cursor = cursor.lock().await;

        let sequence = match cursor.next {
            Some(next) => next,
            None => self.recover(incident_id).await?,
        };

        let record = entry.into_entry(sequence, Utc::now());
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        if let Err(e) = self.write_line(incident_id, &line).await {
            // A partial write may have left a torn line behind
            cursor.next = None;
            return Err(e);
        }

        cursor.next = Some(sequence.next());
        Ok(sequence)
    }

    fn read_from(&self, incident_id: IncidentId, from: SequenceNumber) -> AuditStream {
        let path = self.path_for(incident_id);

        enum ReadState {
            Unopened(PathBuf),
            Reading(BufReader<File>),
            Done,
        }

        let reader = stream::unfold(ReadState::Unopened(path), move |state| async move {
            let mut reader = match state {
                ReadState::Done => return None,
                ReadState::Reading(reader) => reader,
                ReadState::Unopened(path) => match File::open(&path).await {
                    Ok(file) => BufReader::new(file),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
                    Err(e) => return Some((Err(AuditError::from(e)), ReadState::Done)),
                },
            };

            loop {
                let mut line = Vec::new();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => return None,
                    // A line without its newline is still being written, or torn
                    Ok(_) if line.last() != Some(&b'\n') => return None,
                    Ok(_) => {}
                    Err(e) => return Some((Err(AuditError::from(e)), ReadState::Done)),
                }

                let entry: AuditEntry = match serde_json::from_slice(&line) {
                    Ok(entry) => entry,
                    Err(e) => {
                        let corrupt = AuditError::Corrupt {
                            incident_id,
                            sequence: 0,
                            detail: e.to_string(),
                        };
                        return Some((Err(corrupt), ReadState::Done));
                    }
                };
                if entry.sequence >= from {
                    return Some((Ok(entry), ReadState::Reading(reader)));
                }
            }
        });

        Box::pin(reader)
    }

    fn release(&self, incident_id: IncidentId) {
        // A cursor still held by an in-flight append stays; the next release
        // or a fresh recovery from disk covers it
        let released = self
            .cursors
            .remove_if(&incident_id, |_, cursor| Arc::strong_count(cursor) == 1)
            .is_some();
        if released {
            debug!(incident_id = %incident_id, "Audit cursor released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::AuditEvent;
    use crate::domain::workflow::WorkflowId;
    use futures::TryStreamExt;
    use std::io::Write;
    use tempfile::TempDir;

    fn entry(incident_id: IncidentId, reason: &str) -> NewAuditEntry {
        NewAuditEntry::new(
            incident_id,
            WorkflowId::new(),
            AuditEvent::CancellationRequested {
                reason: reason.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let log = FileAuditLog::open(dir.path()).await.unwrap();
        let id = IncidentId::new();

        for i in 0..3 {
            let seq = log.append(entry(id, &format!("r{}", i))).await.unwrap();
            assert_eq!(seq.value(), i + 1);
        }

        let entries: Vec<AuditEntry> = log.read(id).try_collect().await.unwrap();
        assert_eq!(entries.len(), 3);
        let tail: Vec<AuditEntry> = log.read_from(id, SequenceNumber(3)).try_collect().await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].sequence, SequenceNumber(3));
    }

    #[tokio::test]
    async fn test_sequence_recovered_after_reopen() {
        let dir = TempDir::new().unwrap();
        let id = IncidentId::new();
        {
            let log = FileAuditLog::open(dir.path()).await.unwrap();
            log.append(entry(id, "first")).await.unwrap();
            log.append(entry(id, "second")).await.unwrap();
        }

        let log = FileAuditLog::open(dir.path()).await.unwrap();
        assert_eq!(log.append(entry(id, "third")).await.unwrap(), SequenceNumber(3));
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let id = IncidentId::new();
        {
            let log = FileAuditLog::open(dir.path()).await.unwrap();
            log.append(entry(id, "complete")).await.unwrap();
        }

        let path = dir.path().join(format!("{}.jsonl", id));
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"incident_id":"#).unwrap();
        drop(file);

        let log = FileAuditLog::open(dir.path()).await.unwrap();
        let before: Vec<AuditEntry> = log.read(id).try_collect().await.unwrap();
        assert_eq!(before.len(), 1);

        assert_eq!(log.append(entry(id, "after crash")).await.unwrap(), SequenceNumber(2));
        let after: Vec<AuditEntry> = log.read(id).try_collect().await.unwrap();
        assert_eq!(after.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_incident_reads_empty() {
        let dir = TempDir::new().unwrap();
        let log = FileAuditLog::open(dir.path()).await.unwrap();
        let entries: Vec<AuditEntry> = log.read(IncidentId::new()).try_collect().await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_release_drops_cursor_and_sequence_continues() {
        let dir = TempDir::new().unwrap();
        let log = FileAuditLog::open(dir.path()).await.unwrap();
        let archived = IncidentId::new();
        let live = IncidentId::new();

        log.append(entry(archived, "opened")).await.unwrap();
        log.append(entry(archived, "closed")).await.unwrap();
        log.append(entry(live, "opened")).await.unwrap();
        assert_eq!(log.cursors.len(), 2);

        log.release(archived);
        assert_eq!(log.cursors.len(), 1);
        assert!(log.cursors.contains_key(&live));

        // Releasing is idempotent and never loses the on-disk position
        log.release(archived);
        assert_eq!(log.append(entry(archived, "late note")).await.unwrap(), SequenceNumber(3));
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_gap_free() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(FileAuditLog::open(dir.path()).await.unwrap());
        let id = IncidentId::new();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let log = Arc::clone(&log);
            tasks.push(tokio::spawn(async move {
                log.append(entry(id, &format!("r{}", i))).await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let entries: Vec<AuditEntry> = log.read(id).try_collect().await.unwrap();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence.value()).collect();
        assert_eq!(sequences, (1..=20).collect::<Vec<u64>>());
    }
}
