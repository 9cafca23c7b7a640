//! Samples: one timestamped reading from one metric source.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::now_iso8601;

/// The kind of metric source a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Energy,
    CameraPresence,
    AcceleratorPresence,
    Temperature,
    MemoryDisk,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        Self::Energy,
        Self::CameraPresence,
        Self::AcceleratorPresence,
        Self::Temperature,
        Self::MemoryDisk,
    ];

    /// Key used for this source inside composite monitoring samples.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Energy => "energy",
            Self::CameraPresence => "camera",
            Self::AcceleratorPresence => "hailo",
            Self::Temperature => "temperature",
            Self::MemoryDisk => "memory_disk",
        }
    }

    /// Per-source append log file name.
    pub fn log_file_name(self) -> &'static str {
        match self {
            Self::Energy => "energy_log.json",
            Self::CameraPresence => "camera_log.json",
            Self::AcceleratorPresence => "hailo_log.json",
            Self::Temperature => "temp_stats.json",
            Self::MemoryDisk => "memory_log.json",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one `read()` on a metric source.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Present(Value),
    /// The source is not available on this host right now. Not an error.
    Absent,
    Error(String),
}

impl Reading {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// JSON form stored in composite monitoring samples.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Present(v) => v.clone(),
            Self::Absent => serde_json::json!({ "status": "absent" }),
            Self::Error(reason) => serde_json::json!({ "status": "error", "reason": reason }),
        }
    }
}

/// One reading from one metric source. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: String,
    pub source_kind: SourceKind,
    pub payload: Value,
}

impl Sample {
    pub fn new(source_kind: SourceKind, payload: Value) -> Self {
        Self {
            timestamp: now_iso8601(),
            source_kind,
            payload,
        }
    }
}
