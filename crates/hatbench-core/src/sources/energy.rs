//! EnergySource — latest power reading from the external power monitor.
//!
//! The monitor writes a CSV; this source only reports its last row, tagged
//! with the host OS and architecture. No row yet means [`Reading::Absent`],
//! and so does a source built with [`EnergySource::disabled`], whatever CSV
//! an earlier session left on disk.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::clock::now_iso8601;
use crate::power::PowerMonitor;
use crate::sample::{Reading, SourceKind};
use crate::source::{MetricSource, Platform, SourceInfo};

static ENERGY_INFO: SourceInfo = SourceInfo {
    name: "energy",
    kind: SourceKind::Energy,
    description: "Last power sample written by the external power monitor (CSV tail)",
    platform: Platform::Any,
};

/// Reads the power monitor's most recent CSV record.
pub struct EnergySource {
    monitor: Option<Arc<PowerMonitor>>,
}

impl EnergySource {
    pub fn new(monitor: Arc<PowerMonitor>) -> Self {
        Self {
            monitor: Some(monitor),
        }
    }

    /// Power monitoring switched off: every read is absent.
    pub fn disabled() -> Self {
        Self { monitor: None }
    }
}

impl MetricSource for EnergySource {
    fn info(&self) -> &SourceInfo {
        &ENERGY_INFO
    }

    fn read(&self) -> Reading {
        let Some(monitor) = &self.monitor else {
            return Reading::Absent;
        };
        match monitor.read_latest() {
            Some(record) => Reading::Present(json!({
                "timestamp": now_iso8601(),
                "system": std::env::consts::OS,
                "machine": std::env::consts::ARCH,
                "energy": record,
            })),
            None => Reading::Absent,
        }
    }

    fn current_fields(&self, payload: &Value) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("energy".to_string(), payload["energy"].clone());
        m.insert("energy_timestamp".to_string(), payload["timestamp"].clone());
        m
    }
}
