//! Audit trail for ignore decisions and scans
//!
//! Provides a trait-based audit system so embedders can keep a record of
//! every suppression the user made, in whatever destination they prefer.

use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Audit event describing one accepted change
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Type of event
    pub event_type: AuditEventType,
    /// Package involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Permission involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
    /// Scan statistics for scan events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanSummary>,
}

impl AuditEvent {
    /// Create a new audit event stamped with the current time
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type,
            package: None,
            permission: None,
            scan: None,
        }
    }

    /// Attach a package
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Attach a permission
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    /// Attach scan statistics
    pub fn with_scan(mut self, scan: ScanSummary) -> Self {
        self.scan = Some(scan);
        self
    }
}

/// Type of audit event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    GlobalIgnoreAdded,
    GlobalIgnoreRemoved,
    AppIgnoreAdded,
    AppIgnoreRemoved,
    AppTemporarilyIgnored,
    AppTemporaryIgnoreLifted,
    ScanCompleted,
}

/// Scan statistics recorded with [`AuditEventType::ScanCompleted`]
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ScanSummary {
    pub applications: usize,
    pub listed: usize,
    pub vanished: usize,
    pub elapsed_ms: u64,
}

/// Error type for audit operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("Failed to serialize audit event: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Trait for audit event sinks
///
/// # Example
///
/// ```rust
/// use permwatch_host::audit::{AuditSink, AuditEvent, AuditError};
///
/// struct StderrAuditSink;
///
/// impl AuditSink for StderrAuditSink {
///     fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
///         eprintln!("{:?}", event);
///         Ok(())
///     }
///
///     fn flush(&self) -> Result<(), AuditError> {
///         Ok(())
///     }
/// }
/// ```
pub trait AuditSink: Send + Sync {
    /// Record an audit event
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Flush any buffered events
    fn flush(&self) -> Result<(), AuditError>;
}

// ============================================================================
// Default Implementations
// ============================================================================

/// File-based audit sink (JSONL format)
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    /// Create a new file audit sink, appending to an existing log
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Get the log file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(&event)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

/// In-memory audit sink for testing
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
    max_events: usize,
}

impl MemoryAuditSink {
    /// Create a new memory sink with default capacity (1000 events)
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a new memory sink with specified capacity
    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::with_capacity(max_events.min(1000))),
            max_events,
        }
    }

    /// Get all recorded events
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Get event count
    pub fn count(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Find events by type
    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.max_events {
            events.remove(0); // FIFO eviction
        }
        events.push(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("count", &self.count())
            .field("max_events", &self.max_events)
            .finish()
    }
}

/// Null audit sink (discards all events)
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink() {
        let sink = MemoryAuditSink::new();
        sink.record(
            AuditEvent::new(AuditEventType::AppIgnoreAdded)
                .with_package("com.example.a")
                .with_permission("CAMERA"),
        )
        .unwrap();

        assert_eq!(sink.count(), 1);
        let events = sink.find_by_type(AuditEventType::AppIgnoreAdded);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].package.as_deref(), Some("com.example.a"));
        assert!(sink.find_by_type(AuditEventType::ScanCompleted).is_empty());
    }

    #[test]
    fn test_memory_sink_eviction() {
        let sink = MemoryAuditSink::with_capacity(2);
        for i in 0..3 {
            sink.record(
                AuditEvent::new(AuditEventType::AppTemporarilyIgnored)
                    .with_package(format!("app-{}", i)),
            )
            .unwrap();
        }

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].package.as_deref(), Some("app-1"));
        assert_eq!(events[1].package.as_deref(), Some("app-2"));
    }

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(AuditEventType::ScanCompleted).with_scan(ScanSummary {
            applications: 2,
            listed: 10,
            vanished: 0,
            elapsed_ms: 12,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("scan_completed"));
        assert!(json.contains("\"listed\":10"));
        assert!(!json.contains("permission"));
        assert!(chrono::DateTime::parse_from_rfc3339(&event.timestamp).is_ok());
    }

    #[test]
    fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let sink = FileAuditSink::new(&path).unwrap();
        sink.record(AuditEvent::new(AuditEventType::GlobalIgnoreAdded).with_permission("CAMERA"))
            .unwrap();
        sink.record(AuditEvent::new(AuditEventType::GlobalIgnoreRemoved).with_permission("CAMERA"))
            .unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("global_ignore_added"));
    }

    #[test]
    fn test_null_sink() {
        let sink = NullAuditSink;
        assert!(sink.record(AuditEvent::new(AuditEventType::ScanCompleted)).is_ok());
        assert!(sink.flush().is_ok());
    }
}
