//! Core event types for the event notifier
//!
//! This module defines the records delivered by the host event source and the
//! severity classification used to decide which of them may trigger a
//! notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Severity code that marks an error-class event
pub const ERROR_LEVEL: u8 = 2;

/// A single entry read from the host event log
///
/// Records arrive as one JSON object per line from the event source. Only
/// `level` is interpreted; everything else is carried for logging and for the
/// notification payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// When the entry was written
    pub timestamp: Timestamp,
    /// Event identifier assigned by the provider
    pub id: u32,
    /// Log channel the entry belongs to (e.g. "Application")
    pub log_name: String,
    /// Numeric severity code
    pub level: u8,
    /// Component that wrote the entry
    pub provider_name: String,
    /// Task category, empty when the source has none
    #[serde(default)]
    pub task_name: String,
    /// Opcode display name, empty when the source has none
    #[serde(default)]
    pub op_code: String,
    /// Host that produced the entry
    #[serde(default)]
    pub machine_name: String,
}

impl EventRecord {
    /// Parse a single JSON line emitted by the event source
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    /// Severity classification of this record
    pub fn severity(&self) -> EventLevel {
        EventLevel::from_code(self.level)
    }

    /// Whether this record is an error-class event
    pub fn is_error(&self) -> bool {
        self.level == ERROR_LEVEL
    }
}

/// Named severity levels of the host event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventLevel {
    LogAlways,
    Critical,
    Error,
    Warning,
    Information,
    Verbose,
    /// A code outside the well-known range
    Other(u8),
}

impl EventLevel {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => EventLevel::LogAlways,
            1 => EventLevel::Critical,
            ERROR_LEVEL => EventLevel::Error,
            3 => EventLevel::Warning,
            4 => EventLevel::Information,
            5 => EventLevel::Verbose,
            other => EventLevel::Other(other),
        }
    }
}
