//! Immutable audit ledger
//!
//! Every detection, classification, link and transformation decision lands
//! here as an append-only entry. Appends from concurrent stage workers are
//! serialized through one async mutex, so sequence numbers form a total,
//! gap-free order per run. Entries are never updated or removed.
//!
//! An optional JSONL sink writes each entry through to disk at append time;
//! a sink failure is a [`crate::error::Error::LedgerWrite`] and the caller
//! must treat it as fatal to the batch, since no unaudited transformation may
//! exist.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Pipeline stage an audit entry originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Ingest,
    Detect,
    Classify,
    Link,
    Transform,
    Batch,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingest => write!(f, "ingest"),
            Self::Detect => write!(f, "detect"),
            Self::Classify => write!(f, "classify"),
            Self::Link => write!(f, "link"),
            Self::Transform => write!(f, "transform"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

/// Outcome recorded with an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Decision applied as intended
    Ok,
    /// An error was recovered without data loss
    Recovered,
    /// Merge performed on conflicting evidence; detail in the action text
    LinkAmbiguity,
    /// The subject failed at this stage
    Failed,
    /// Batch cancelled with committed work already audited
    Incomplete,
}

/// One immutable ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Strictly increasing, gap-free per run
    pub sequence_no: u64,
    pub timestamp: DateTime<Utc>,
    pub stage: PipelineStage,
    /// What the decision was about (record ref, detection ref, cluster id)
    pub subject: String,
    pub action: String,
    pub outcome: AuditOutcome,
}

/// Write-through destination for appended entries. A write error must be
/// surfaced as [`Error::LedgerWrite`]; the ledger treats it as fatal and
/// never assigns the entry's sequence number.
#[async_trait]
pub trait AuditSink: Send {
    /// Persist one serialized entry, newline included
    async fn write_line(&mut self, line: &[u8]) -> Result<()>;
}

/// JSONL file sink, one entry per line, flushed per append
struct JsonlSink {
    file: tokio::fs::File,
}

#[async_trait]
impl AuditSink for JsonlSink {
    async fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.file
            .write_all(line)
            .await
            .map_err(|e| Error::LedgerWrite(e.to_string()))?;
        self.file
            .flush()
            .await
            .map_err(|e| Error::LedgerWrite(e.to_string()))
    }
}

struct LedgerInner {
    next_seq: u64,
    entries: Vec<AuditEntry>,
    sink: Option<Box<dyn AuditSink>>,
}

/// Append-only audit ledger with a single logical writer
pub struct AuditLedger {
    inner: Mutex<LedgerInner>,
}

impl AuditLedger {
    /// In-memory ledger
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                next_seq: 0,
                entries: Vec::new(),
                sink: None,
            }),
        }
    }

    /// Ledger with a JSONL write-through sink. The file is created (or
    /// truncated) for this run; one JSON entry per line.
    pub async fn with_sink(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::LedgerWrite(format!("create {}: {}", parent.display(), e)))?;
        }
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| Error::LedgerWrite(format!("open {}: {}", path.display(), e)))?;
        Ok(Self::from_sink(Box::new(JsonlSink { file })))
    }

    /// Ledger writing through an arbitrary sink
    pub fn from_sink(sink: Box<dyn AuditSink>) -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                next_seq: 0,
                entries: Vec::new(),
                sink: Some(sink),
            }),
        }
    }

    /// Append one entry and return its sequence number.
    ///
    /// The sequence number is assigned inside the lock and the sink write
    /// happens before the entry becomes visible, so a failed write leaves no
    /// gap: the number is simply never assigned.
    pub async fn append(
        &self,
        stage: PipelineStage,
        subject: impl Into<String>,
        action: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let entry = AuditEntry {
            sequence_no: inner.next_seq,
            timestamp: Utc::now(),
            stage,
            subject: subject.into(),
            action: action.into(),
            outcome,
        };

        if let Some(sink) = inner.sink.as_mut() {
            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            sink.write_line(&line).await?;
        }

        let seq = entry.sequence_no;
        inner.entries.push(entry);
        inner.next_seq += 1;
        Ok(seq)
    }

    /// Entries with `from <= sequence_no <= to`, in order
    pub async fn read_range(&self, from: u64, to: u64) -> Vec<AuditEntry> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .filter(|e| e.sequence_no >= from && e.sequence_no <= to)
            .cloned()
            .collect()
    }

    /// All entries whose subject matches, in sequence order
    pub async fn read_by_subject(&self, subject: &str) -> Vec<AuditEntry> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .filter(|e| e.subject == subject)
            .cloned()
            .collect()
    }

    /// Number of appended entries
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// True when nothing has been appended
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of all entries, in sequence order
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().await.entries.clone()
    }
}

impl Default for AuditLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_append_assigns_sequential_numbers() {
        let ledger = AuditLedger::new();
        for expected in 0..5u64 {
            let seq = ledger
                .append(PipelineStage::Detect, "r-1", "detect", AuditOutcome::Ok)
                .await
                .unwrap();
            assert_eq!(seq, expected);
        }
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_gap_free() {
        let ledger = Arc::new(AuditLedger::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .append(
                        PipelineStage::Classify,
                        format!("r-{i}"),
                        "classify",
                        AuditOutcome::Ok,
                    )
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let entries = ledger.entries().await;
        assert_eq!(entries.len(), 50);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.sequence_no, i as u64, "gap or reorder at {i}");
        }
    }

    #[tokio::test]
    async fn test_read_range_inclusive() {
        let ledger = AuditLedger::new();
        for i in 0..10 {
            ledger
                .append(
                    PipelineStage::Link,
                    format!("ent-{i}"),
                    "link",
                    AuditOutcome::Ok,
                )
                .await
                .unwrap();
        }
        let range = ledger.read_range(3, 6).await;
        assert_eq!(range.len(), 4);
        assert_eq!(range[0].sequence_no, 3);
        assert_eq!(range.last().unwrap().sequence_no, 6);
    }

    #[tokio::test]
    async fn test_read_by_subject() {
        let ledger = AuditLedger::new();
        ledger
            .append(PipelineStage::Detect, "r-1", "detect", AuditOutcome::Ok)
            .await
            .unwrap();
        ledger
            .append(PipelineStage::Detect, "r-2", "detect", AuditOutcome::Ok)
            .await
            .unwrap();
        ledger
            .append(PipelineStage::Classify, "r-1", "classify", AuditOutcome::Ok)
            .await
            .unwrap();

        let entries = ledger.read_by_subject("r-1").await;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].sequence_no < entries[1].sequence_no);
    }

    struct BoundedSink {
        remaining: usize,
    }

    #[async_trait]
    impl AuditSink for BoundedSink {
        async fn write_line(&mut self, _line: &[u8]) -> Result<()> {
            if self.remaining == 0 {
                return Err(Error::LedgerWrite("no space left on device".to_string()));
            }
            self.remaining -= 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_sink_write_assigns_no_sequence() {
        let ledger = AuditLedger::from_sink(Box::new(BoundedSink { remaining: 2 }));
        for _ in 0..2 {
            ledger
                .append(PipelineStage::Detect, "r-1", "detect", AuditOutcome::Ok)
                .await
                .unwrap();
        }

        let err = ledger
            .append(PipelineStage::Transform, "ent-1", "mask", AuditOutcome::Ok)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LedgerWrite(_)));

        // The failed append left no gap and no phantom entry
        let entries = ledger.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.last().unwrap().sequence_no, 1);
    }

    #[tokio::test]
    async fn test_sink_writes_jsonl() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("audit").join("run.jsonl");
        let ledger = AuditLedger::with_sink(&path).await.unwrap();

        ledger
            .append(PipelineStage::Transform, "ent-1", "mask", AuditOutcome::Ok)
            .await
            .unwrap();
        ledger
            .append(
                PipelineStage::Batch,
                "batch-1",
                "complete",
                AuditOutcome::Ok,
            )
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.sequence_no, 0);
        assert_eq!(first.subject, "ent-1");
    }
}
