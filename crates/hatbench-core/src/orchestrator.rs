//! Benchmark session driver.
//!
//! Runs the accelerated and CPU-only workloads `runs_per_case` times each,
//! strictly one after another, while the sampler records telemetry in the
//! background and the power monitor writes its CSV. Every run is bracketed
//! by start/end events in the session timeline, and a failing run is
//! recorded without ending the session.
//!
//! ```text
//! Configuring -> MonitoringRunning -> Draining -> Summarizing -> Done
//! ```
//!
//! Only a missing input aborts early: a session document holding just the
//! error is written and [`BenchError::Configuration`] is returned.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::now_iso8601;
use crate::error::{BenchError, ErrorInfo, Result};
use crate::power::PowerMonitor;
use crate::sample::SourceKind;
use crate::sampler::{Sampler, SamplerConfig, StopOutcome};
use crate::session::{
    Case, Event, MonitoringLogs, RunResult, SESSION_FILE, SessionConfiguration, SessionHandle,
    SessionRecord, detect_machine_info,
};
use crate::source::MetricSource;
use crate::store::{SnapshotStore, read_json, write_json_atomic};
use crate::workload::{RunRequest, Workload};

/// Reason recorded when the accelerated case cannot run.
pub const HAILO_SKIPPED: &str = "Hailo not detected";

/// Session parameters.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Input video. Must exist.
    pub input: PathBuf,
    /// Receives the session document and per-case recordings.
    pub output_dir: PathBuf,
    /// Total monitoring time. Whatever is left after the runs is spent
    /// sampling cool-down telemetry.
    pub monitor_duration: Duration,
    pub sampler: SamplerConfig,
    pub runs_per_case: u32,
    pub frame_rate: u32,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("videoplayback.mp4"),
            output_dir: PathBuf::from("testbench_outputs"),
            monitor_duration: Duration::from_secs(60),
            sampler: SamplerConfig::default(),
            runs_per_case: 5,
            frame_rate: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Configuring,
    MonitoringRunning,
    Draining,
    Summarizing,
    Done,
}

/// What a completed session produced.
#[derive(Debug)]
pub struct SessionOutcome {
    pub path: PathBuf,
    pub record: SessionRecord,
    pub sampler_stop: StopOutcome,
}

pub struct Orchestrator {
    config: BenchConfig,
    store: Arc<SnapshotStore>,
    sources: Vec<Box<dyn MetricSource>>,
    power: Option<Arc<PowerMonitor>>,
    hailo: Box<dyn Workload>,
    cpu: Box<dyn Workload>,
    hailo_available: bool,
    phase: Phase,
}

impl Orchestrator {
    pub fn new(
        config: BenchConfig,
        store: Arc<SnapshotStore>,
        sources: Vec<Box<dyn MetricSource>>,
        hailo: Box<dyn Workload>,
        cpu: Box<dyn Workload>,
    ) -> Self {
        Self {
            config,
            store,
            sources,
            power: None,
            hailo,
            cpu,
            hailo_available: true,
            phase: Phase::Configuring,
        }
    }

    /// Start this monitor for the session and stop it when draining.
    pub fn with_power_monitor(mut self, power: Arc<PowerMonitor>) -> Self {
        self.power = Some(power);
        self
    }

    /// Whether the accelerator is attached. When false the hailo case is
    /// recorded as skipped.
    pub fn with_hailo_available(mut self, available: bool) -> Self {
        self.hailo_available = available;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        log::debug!("session phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Run the whole session. Can be called once.
    pub fn run(&mut self) -> Result<SessionOutcome> {
        if self.phase != Phase::Configuring {
            return Err(BenchError::Configuration(
                "orchestrator has already run".to_string(),
            ));
        }

        let session_path = self.config.output_dir.join(SESSION_FILE);
        let configuration = SessionConfiguration {
            input: self.config.input.clone(),
            output_dir: self.config.output_dir.clone(),
            monitor_seconds: self.config.monitor_duration.as_secs(),
            sample_interval_ms: self.config.sampler.interval.as_millis() as u64,
            runs_per_case: self.config.runs_per_case,
            frame_rate: self.config.frame_rate,
            hailo_available: self.hailo_available,
            machine: detect_machine_info(),
        };
        let mut record = SessionRecord::new(configuration);

        if !self.config.input.exists() {
            let message = format!("Video file not found: {}", self.config.input.display());
            record.ended_at = Some(now_iso8601());
            record.error = Some(message.clone());
            if let Err(e) = write_json_atomic(&session_path, &record) {
                log::error!("{e}");
            }
            self.enter(Phase::Done);
            return Err(BenchError::Configuration(message));
        }

        let session = SessionHandle::new(record, &session_path);
        session.update(|_| ());
        log::info!("session file: {}", session_path.display());

        // Monitoring + running
        self.enter(Phase::MonitoringRunning);
        let monitoring_started = Instant::now();

        let power = self.power.clone();
        let power_guard = match power.as_deref().map(PowerMonitor::start_scoped) {
            Some(Ok(guard)) => Some(guard),
            Some(Err(e)) => {
                log::warn!("power monitoring disabled: {e}");
                None
            }
            None => None,
        };

        let mut sampler = Sampler::new(std::mem::take(&mut self.sources), Arc::clone(&self.store))
            .with_session(session.clone());
        if let Err(e) = sampler.start(self.config.sampler.interval) {
            log::error!("sampler failed to start: {e}");
        }

        for case in Case::ORDER {
            if case == Case::Hailo && !self.hailo_available {
                log::warn!("{HAILO_SKIPPED}; skipping accelerated runs");
                session.update(|r| r.runs.hailo.push(RunResult::skipped(HAILO_SKIPPED)));
                continue;
            }
            for index in 1..=self.config.runs_per_case {
                self.run_once(&session, case, index);
            }
        }

        // Draining
        self.enter(Phase::Draining);
        let cool_down = self
            .config
            .monitor_duration
            .saturating_sub(monitoring_started.elapsed());
        if !cool_down.is_zero() {
            log::info!("sampling cool-down for {cool_down:?}");
            std::thread::sleep(cool_down);
        }
        let sampler_stop = sampler.stop(self.config.sampler.join_timeout);
        if let Some(Err(e)) = power_guard.map(|g| g.stop()) {
            log::warn!("power monitor stop failed: {e}");
        }

        // Summarizing
        self.enter(Phase::Summarizing);
        let logs = self.reread_logs();
        let written = session.try_update(|r| {
            r.ended_at = Some(now_iso8601());
            r.monitoring_logs = Some(logs);
        });
        if let Err(e) = written {
            log::error!("final session write failed: {e}");
        }

        self.enter(Phase::Done);
        log::info!("session written to {}", session_path.display());
        Ok(SessionOutcome {
            path: session_path,
            record: session.snapshot(),
            sampler_stop,
        })
    }

    fn run_once(&self, session: &SessionHandle, case: Case, index: u32) {
        let workload: &dyn Workload = match case {
            Case::Hailo => self.hailo.as_ref(),
            Case::Cpu => self.cpu.as_ref(),
        };
        let request = RunRequest {
            input: self.config.input.clone(),
            output_dir: self.config.output_dir.join(case.as_str()),
            file_name: case.artifact_name(index),
            frame_rate: self.config.frame_rate,
        };

        session.update(|r| r.events.push(Event::now(case.start_event(), index)));
        log::info!("[{}] run {index}/{} started", case.as_str(), self.config.runs_per_case);
        let started_at = now_iso8601();

        let outcome = catch_unwind(AssertUnwindSafe(|| workload.run(&request))).unwrap_or_else(
            |panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "workload panicked".to_string());
                Err(BenchError::workload("Panic", message))
            },
        );

        let result = match outcome {
            Ok(out) => {
                log::info!(
                    "[{}] run {index} done: {} frames, {:.2} fps",
                    case.as_str(),
                    out.statistics.frames_processed,
                    out.statistics.average_fps
                );
                RunResult::completed(index, started_at, out.artifact_path, out.statistics)
            }
            Err(e) => {
                log::error!("[{}] run {index} failed: {e}", case.as_str());
                RunResult::failed(index, started_at, ErrorInfo::from(&e))
            }
        };

        session.update(|r| {
            r.runs.for_case_mut(case).push(result);
            r.events.push(Event::now(case.end_event(), index));
        });
    }

    fn reread_logs(&self) -> MonitoringLogs {
        let log = |kind: SourceKind| self.store.read_log(kind.log_file_name());
        MonitoringLogs {
            energy: log(SourceKind::Energy),
            camera: log(SourceKind::CameraPresence),
            hailo: log(SourceKind::AcceleratorPresence),
            temperature: log(SourceKind::Temperature),
            memory_disk: log(SourceKind::MemoryDisk),
            current: read_json(&self.store.current_path()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{RunStatistics, WorkloadOutput};

    struct Never;

    impl Workload for Never {
        fn name(&self) -> &str {
            "never"
        }
        fn run(&self, _: &RunRequest) -> Result<WorkloadOutput> {
            panic!("must not run");
        }
    }

    struct Panics;

    impl Workload for Panics {
        fn name(&self) -> &str {
            "panics"
        }
        fn run(&self, _: &RunRequest) -> Result<WorkloadOutput> {
            panic!("decoder crashed");
        }
    }

    struct Ok1;

    impl Workload for Ok1 {
        fn name(&self) -> &str {
            "ok"
        }
        fn run(&self, req: &RunRequest) -> Result<WorkloadOutput> {
            Ok(WorkloadOutput {
                artifact_path: req.final_path(),
                statistics: RunStatistics::default(),
            })
        }
    }

    fn config(dir: &std::path::Path, input: PathBuf) -> BenchConfig {
        BenchConfig {
            input,
            output_dir: dir.join("out"),
            monitor_duration: Duration::ZERO,
            sampler: SamplerConfig {
                interval: Duration::from_millis(10),
                join_timeout: Duration::from_secs(2),
            },
            runs_per_case: 1,
            frame_rate: 5,
        }
    }

    #[test]
    fn missing_input_fails_fast() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(tmp.path().join("state")));
        let mut orch = Orchestrator::new(
            config(tmp.path(), tmp.path().join("missing.mp4")),
            store,
            Vec::new(),
            Box::new(Never),
            Box::new(Never),
        );
        let err = orch.run().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(orch.phase(), Phase::Done);

        let doc = read_json(&tmp.path().join("out").join(SESSION_FILE)).unwrap();
        assert!(doc["error"].as_str().unwrap().starts_with("Video file not found"));
        assert_eq!(doc["events"], serde_json::json!([]));
        assert!(orch.run().is_err());
    }

    #[test]
    fn panicking_workload_is_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.mp4");
        std::fs::write(&input, b"video").unwrap();
        let store = Arc::new(SnapshotStore::new(tmp.path().join("state")));
        let mut orch = Orchestrator::new(
            config(tmp.path(), input),
            store,
            Vec::new(),
            Box::new(Panics),
            Box::new(Ok1),
        );
        let outcome = orch.run().unwrap();
        let hailo = &outcome.record.runs.hailo;
        assert_eq!(hailo.len(), 1);
        let err = hailo[0].error.as_ref().unwrap();
        assert_eq!(err.kind, "Panic");
        assert_eq!(err.message, "decoder crashed");
        assert!(outcome.record.runs.cpu[0].is_success());
        assert_eq!(outcome.sampler_stop, StopOutcome::Stopped);
    }
}
