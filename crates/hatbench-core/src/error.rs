//! Error taxonomy shared by every hatbench component.
//!
//! Only [`BenchError::Configuration`] aborts a benchmark session. Every other
//! variant is recorded (in a log entry and, where it applies, in the session
//! document) and the session carries on.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Errors raised by the telemetry and benchmark subsystem.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// Missing or invalid input. Fatal: raised before any run starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A metric source or the accelerator is not present on this host.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A single workload run failed.
    #[error("{kind}: {message}")]
    Workload { kind: String, message: String },

    /// A log, current-state or session write failed.
    #[error("persistence failure for {path}: {message}")]
    Persistence { path: PathBuf, message: String },

    /// The workload ran but its temporary artifact was zero bytes.
    #[error("recording produced an empty file: {0}")]
    EmptyOutput(PathBuf),

    /// The workload never produced its temporary artifact.
    #[error("no recording produced (missing file: {0})")]
    MissingOutput(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Stable taxonomy name. Workload failures carry their own finer kind,
    /// which [`ErrorInfo`] prefers.
    pub fn kind(&self) -> &str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::SourceUnavailable(_) => "SourceUnavailable",
            Self::Workload { .. } => "WorkloadFailure",
            Self::Persistence { .. } => "PersistenceFailure",
            Self::EmptyOutput(_) => "EmptyOutput",
            Self::MissingOutput(_) => "MissingOutput",
            Self::Io(_) => "IoError",
        }
    }

    /// Shorthand for a workload failure with an explicit kind.
    pub fn workload(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Workload {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Only configuration errors end a session early.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Serialized form of an error captured into a run result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&BenchError> for ErrorInfo {
    fn from(err: &BenchError) -> Self {
        match err {
            BenchError::Workload { kind, message } => Self {
                kind: kind.clone(),
                message: message.clone(),
            },
            other => Self {
                kind: other.kind().to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BenchError>;
