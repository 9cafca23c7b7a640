//! Abstract metric source trait.
//!
//! Every metric source implements [`MetricSource`], which provides metadata
//! via [`SourceInfo`] and one-shot readings. A source that is not present on
//! the host answers [`Reading::Absent`] instead of failing.

use serde_json::{Map, Value};

use crate::sample::{Reading, SourceKind};

/// Target platform for a metric source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Works on any platform.
    Any,
    /// Requires Linux (sysfs/procfs).
    Linux,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Linux => write!(f, "linux"),
        }
    }
}

/// Metadata about a metric source.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Unique identifier (e.g. `"temperature"`).
    pub name: &'static str,
    /// Which sample stream this source feeds.
    pub kind: SourceKind,
    /// One-line human-readable description.
    pub description: &'static str,
    /// Target platform.
    pub platform: Platform,
}

/// Trait that every metric source must implement.
pub trait MetricSource: Send + Sync {
    /// Source metadata.
    fn info(&self) -> &SourceInfo;

    /// Take one reading.
    fn read(&self) -> Reading;

    /// Partial current-state document derived from a present payload.
    ///
    /// The default stores the whole payload under the source's key.
    fn current_fields(&self, payload: &Value) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert(self.kind().as_str().to_string(), payload.clone());
        m
    }

    /// Convenience: kind from info.
    fn kind(&self) -> SourceKind {
        self.info().kind
    }

    /// Convenience: name from info.
    fn name(&self) -> &'static str {
        self.info().name
    }
}
