//! Audit sinks: where records go.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, RwLock};
use tracing::error;

use crate::error::{AuditError, AuditResult};
use crate::record::AuditRecord;

/// Destination for audit records.
///
/// Implementations must be thread-safe; the proxy engine records from
/// many connection tasks concurrently. Append-only by contract: there
/// is no update or delete.
pub trait AuditSink: Send + Sync {
    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted. Callers log
    /// and continue; an audit failure never blocks message flow.
    fn record(&self, record: AuditRecord) -> AuditResult<()>;
}

/// In-memory sink, for tests and introspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: RwLock<Vec<AuditRecord>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    /// Whether no records have been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out all records written so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.entries
            .read()
            .map_or_else(|_| Vec::new(), |entries| entries.clone())
    }
}

impl AuditSink for MemorySink {
    fn record(&self, record: AuditRecord) -> AuditResult<()> {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.push(record);
                Ok(())
            },
            Err(poisoned) => {
                // A panicking writer never leaves a partial record; keep
                // accepting writes rather than losing the trail.
                poisoned.into_inner().push(record);
                Ok(())
            },
        }
    }
}

/// Newline-delimited JSON file sink.
///
/// Each record is one JSON object per line, flushed immediately so an
/// external audit consumer can tail the file.
pub struct JsonlSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    /// Open (or create) the audit file in append mode.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> AuditResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl AuditSink for JsonlSink {
    fn record(&self, record: AuditRecord) -> AuditResult<()> {
        let line = serde_json::to_string(&record)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for JsonlSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlSink").finish_non_exhaustive()
    }
}

/// Record to a sink, logging instead of propagating on failure.
///
/// The proxy engine must keep forwarding even when the audit file is
/// unwritable; the failure itself still lands in the tracing log.
pub fn record_or_log(sink: &dyn AuditSink, record: AuditRecord) {
    if let Err(e) = sink.record(record) {
        error!(error = %e, "failed to write audit record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AuditOutcome;

    fn sample(action: &str) -> AuditRecord {
        AuditRecord::new(None, "test", action, AuditOutcome::Allowed)
    }

    #[test]
    fn test_memory_sink_appends() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        sink.record(sample("one")).unwrap();
        sink.record(sample("two")).unwrap();

        let records = sink.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, "one");
        assert_eq!(records[1].action, "two");
    }

    #[test]
    fn test_jsonl_sink_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let sink = JsonlSink::open(&path).unwrap();
        sink.record(sample("open_file")).unwrap();
        sink.record(sample("apply_edit")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["action"], "open_file");
        assert_eq!(first["outcome"], "allowed");
    }

    #[test]
    fn test_jsonl_sink_appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        JsonlSink::open(&path).unwrap().record(sample("a")).unwrap();
        JsonlSink::open(&path).unwrap().record(sample("b")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
