//! Audit trail of simulation lifecycle events.
//!
//! Entries are appended as JSON lines so a run can be reconstructed after
//! the fact: when the process started and stopped, every session the
//! operator started, and every backend fault.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Types of events that are logged in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Process startup
    SystemStart,
    /// Process shutdown
    SystemShutdown,
    /// A fresh backend and loop were started
    SessionStart,
    /// The operator restarted after a fault
    SessionRestart,
    /// The simulation backend failed
    StepperFault,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic timestamp in microseconds
    pub timestamp_us: u64,
    /// Wall-clock Unix timestamp in microseconds
    pub unix_us: u64,
    pub event_type: AuditEventType,
    /// Additional event-specific details
    pub details: serde_json::Value,
}

/// Thread-safe audit logger that writes to a JSONL file
pub struct AuditLogger {
    writer: Mutex<BufWriter<File>>,
}

impl AuditLogger {
    /// Create a new audit logger writing to the specified path.
    /// The file is opened in append mode to preserve existing logs.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
        })
    }

    /// Log an audit entry. This is thread-safe and can be called from any thread.
    pub fn log(&self, entry: AuditEntry) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        serde_json::to_writer(&mut *writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    pub fn log_event(
        &self,
        timestamp_us: u64,
        unix_us: u64,
        event_type: AuditEventType,
        details: serde_json::Value,
    ) -> std::io::Result<()> {
        self.log(AuditEntry {
            timestamp_us,
            unix_us,
            event_type,
            details,
        })
    }
}

/// Details for a stepper fault event
#[derive(Debug, Clone, Serialize)]
pub struct StepperFaultDetails {
    pub step: u64,
    pub sim_time_s: f64,
    pub error: String,
}
