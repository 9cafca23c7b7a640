//! The benchmark session document.
//!
//! One [`SessionRecord`] per orchestrated session, mirrored to
//! `testbench_hat_session.json` in the output directory. The orchestrator
//! and the sampler both write to it through a [`SessionHandle`], which holds
//! the lock across "mutate the record, then persist the whole record".
//!
//! # Layout
//!
//! ```text
//! {
//!   "id": "...", "started_at": "...", "ended_at": "...",
//!   "configuration": { "input": ..., "machine": {...}, ... },
//!   "runs": { "hailo": [RunResult], "cpu": [RunResult] },
//!   "events": [ { "timestamp", "event": "hailo_run_start", "run_index": 1 }, ... ],
//!   "monitoring_samples": [ { "timestamp", "energy": ..., "camera": ..., ... } ],
//!   "monitoring_logs": { "energy": [...], ..., "current": {...} }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clock::now_iso8601;
use crate::error::{ErrorInfo, Result};
use crate::store::write_json_atomic;
use crate::workload::RunStatistics;

/// File name of the session document inside the output directory.
pub const SESSION_FILE: &str = "testbench_hat_session.json";

// ---------------------------------------------------------------------------
// Machine info
// ---------------------------------------------------------------------------

/// Host identity captured at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub os: String,
    pub arch: String,
    pub chip: String,
    pub cores: usize,
    pub is_raspberry_pi: bool,
}

/// Detect machine information (best-effort).
pub fn detect_machine_info() -> MachineInfo {
    let os = match os_version() {
        Some(v) => format!("{} {v}", std::env::consts::OS),
        None => std::env::consts::OS.to_string(),
    };
    let model = board_model();
    let chip = detect_chip()
        .or_else(|| model.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    MachineInfo {
        os,
        arch: std::env::consts::ARCH.to_string(),
        chip,
        cores,
        is_raspberry_pi: model.as_deref().is_some_and(is_raspberry_pi_model),
    }
}

/// True when running on a Raspberry Pi board.
pub fn is_raspberry_pi() -> bool {
    board_model().as_deref().is_some_and(is_raspberry_pi_model)
}

fn is_raspberry_pi_model(model: &str) -> bool {
    model.contains("Raspberry Pi")
}

/// Device-tree board model, e.g. `Raspberry Pi 5 Model B Rev 1.0`.
fn board_model() -> Option<String> {
    ["/proc/device-tree/model", "/sys/firmware/devicetree/base/model"]
        .iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim_end_matches('\0').trim().to_string())
        .filter(|s| !s.is_empty())
}

fn os_version() -> Option<String> {
    let release = std::fs::read_to_string("/etc/os-release").ok()?;
    release
        .lines()
        .find(|l| l.starts_with("PRETTY_NAME="))
        .map(|l| l.trim_start_matches("PRETTY_NAME=").trim_matches('"').to_string())
}

fn detect_chip() -> Option<String> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    cpuinfo
        .lines()
        .find(|l| l.starts_with("model name"))
        .and_then(|l| l.split_once(':'))
        .map(|(_, v)| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// Parameters the session was started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfiguration {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub monitor_seconds: u64,
    pub sample_interval_ms: u64,
    pub runs_per_case: u32,
    pub frame_rate: u32,
    pub hailo_available: bool,
    pub machine: MachineInfo,
}

/// The two benchmarked pipelines, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Case {
    Hailo,
    Cpu,
}

impl Case {
    pub const ORDER: [Case; 2] = [Case::Hailo, Case::Cpu];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hailo => "hailo",
            Self::Cpu => "cpu",
        }
    }

    /// Final recording name for run `index` (1-based).
    pub fn artifact_name(self, index: u32) -> String {
        format!("{}_run_{index}.mp4", self.as_str())
    }

    pub fn start_event(self) -> EventKind {
        match self {
            Self::Hailo => EventKind::HailoRunStart,
            Self::Cpu => EventKind::CpuRunStart,
        }
    }

    pub fn end_event(self) -> EventKind {
        match self {
            Self::Hailo => EventKind::HailoRunEnd,
            Self::Cpu => EventKind::CpuRunEnd,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    HailoRunStart,
    HailoRunEnd,
    CpuRunStart,
    CpuRunEnd,
}

/// One entry of the run timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: String,
    pub event: EventKind,
    pub run_index: u32,
}

impl Event {
    pub fn now(event: EventKind, run_index: u32) -> Self {
        Self {
            timestamp: now_iso8601(),
            event,
            run_index,
        }
    }
}

/// Outcome of one run. A finished run carries either
/// `output_artifact_path` + `statistics` or `error`. A skipped case carries
/// only `skipped`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_artifact_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<RunStatistics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl RunResult {
    pub fn completed(
        run_index: u32,
        started_at: String,
        artifact: PathBuf,
        statistics: RunStatistics,
    ) -> Self {
        Self {
            run_index: Some(run_index),
            started_at: Some(started_at),
            ended_at: Some(now_iso8601()),
            output_artifact_path: Some(artifact),
            statistics: Some(statistics),
            ..Default::default()
        }
    }

    pub fn failed(run_index: u32, started_at: String, error: ErrorInfo) -> Self {
        Self {
            run_index: Some(run_index),
            started_at: Some(started_at),
            ended_at: Some(now_iso8601()),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.output_artifact_path.is_some() && self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Runs {
    pub hailo: Vec<RunResult>,
    pub cpu: Vec<RunResult>,
}

impl Runs {
    pub fn for_case(&self, case: Case) -> &[RunResult] {
        match case {
            Case::Hailo => &self.hailo,
            Case::Cpu => &self.cpu,
        }
    }

    pub fn for_case_mut(&mut self, case: Case) -> &mut Vec<RunResult> {
        match case {
            Case::Hailo => &mut self.hailo,
            Case::Cpu => &mut self.cpu,
        }
    }
}

/// Full rereads of every log at session end. `None` (null) when unreadable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringLogs {
    pub energy: Option<Value>,
    pub camera: Option<Value>,
    pub hailo: Option<Value>,
    pub temperature: Option<Value>,
    pub memory_disk: Option<Value>,
    pub current: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub configuration: SessionConfiguration,
    pub runs: Runs,
    pub events: Vec<Event>,
    pub monitoring_samples: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_logs: Option<MonitoringLogs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionRecord {
    pub fn new(configuration: SessionConfiguration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: now_iso8601(),
            ended_at: None,
            configuration,
            runs: Runs::default(),
            events: Vec::new(),
            monitoring_samples: Vec::new(),
            monitoring_logs: None,
            error: None,
        }
    }

    /// Load a session document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| crate::error::BenchError::Persistence {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Shared, lock-guarded session record with an on-disk mirror.
#[derive(Clone)]
pub struct SessionHandle {
    record: Arc<Mutex<SessionRecord>>,
    path: PathBuf,
}

impl SessionHandle {
    pub fn new(record: SessionRecord, path: impl Into<PathBuf>) -> Self {
        Self {
            record: Arc::new(Mutex::new(record)),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mutate the record and persist it, both under the session lock.
    ///
    /// A failed write is logged and swallowed; the in-memory record keeps
    /// the change and the next update writes it again.
    pub fn update<R>(&self, f: impl FnOnce(&mut SessionRecord) -> R) -> R {
        let (out, written) = self.apply(f);
        if let Err(e) = written {
            log::error!("session write failed: {e}");
        }
        out
    }

    /// Like [`update`](Self::update), but reports a failed write.
    pub fn try_update<R>(&self, f: impl FnOnce(&mut SessionRecord) -> R) -> Result<R> {
        let (out, written) = self.apply(f);
        written.map(|()| out)
    }

    fn apply<R>(&self, f: impl FnOnce(&mut SessionRecord) -> R) -> (R, Result<()>) {
        let mut record = self.record.lock().unwrap_or_else(|p| p.into_inner());
        let out = f(&mut record);
        let written = write_json_atomic(&self.path, &*record);
        (out, written)
    }

    /// Copy of the current record.
    pub fn snapshot(&self) -> SessionRecord {
        self.record
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}
