//! Structured JSONL logger for monitoring messages.
//!
//! Every tab process appends to the same file, one JSON object per line:
//! - Monotonic sequence numbers for ordering within a tab
//! - ISO 8601 timestamps with microsecond precision
//! - Tab ID for correlation across processes
//! - The monitoring message and its structured context

use crate::monitoring::MonitoringSink;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Structured JSONL logger for monitoring messages.
pub struct StructuredLogger {
    tab_id: String,
    seq: AtomicU64,
    log_file: Mutex<File>,
    log_path: PathBuf,
}

/// A single log entry in JSONL format.
#[derive(Serialize, serde::Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number (unique within a tab)
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds
    pub ts: String,
    /// Tab that emitted the entry
    pub tab_id: String,
    /// Monitoring message
    pub message: String,
    /// Structured context
    pub context: Value,
}

impl StructuredLogger {
    /// Creates a logger appending to `<logs_dir>/monitoring.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The logs directory cannot be created
    /// - The log file cannot be opened
    pub fn new(tab_id: &str, logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let log_path = logs_dir.join("monitoring.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            tab_id: tab_id.to_string(),
            seq: AtomicU64::new(0),
            log_file: Mutex::new(file),
            log_path,
        })
    }

    /// Returns the next sequence number.
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Writes one entry as a single line.
    pub fn log(&self, message: &str, context: Value) {
        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            tab_id: self.tab_id.clone(),
            message: message.to_string(),
            context,
        };

        if let Ok(mut file) = self.log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

impl MonitoringSink for StructuredLogger {
    fn add_message(&self, message: &str, context: Value) {
        tracing::debug!(path = %self.log_path.display(), "{}", message);
        self.log(message, context);
    }
}

#[cfg(test)]
#[path = "tests/structured_logger_tests.rs"]
mod tests;
