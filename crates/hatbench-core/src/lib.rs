//! # hatbench-core
//!
//! Telemetry sampling and benchmark orchestration for edge boards carrying a
//! Hailo AI accelerator HAT.
//!
//! While a benchmark session runs the accelerated and CPU-only detection
//! pipelines back to back, a background sampler records power draw,
//! temperature, memory/disk usage and peripheral presence. Everything lands
//! in crash-consistent JSON files.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use hatbench_core::{
//!     BenchConfig, CommandWorkload, CommandWorkloadConfig, Orchestrator, PowerMonitor,
//!     PowerMonitorConfig, SnapshotStore, default_sources,
//! };
//!
//! let power = Arc::new(PowerMonitor::new(PowerMonitorConfig::default()));
//! let store = Arc::new(SnapshotStore::new("."));
//! let hailo = CommandWorkloadConfig::from_command_line("hailo-detect {input} {output}")?;
//! let cpu = CommandWorkloadConfig::from_command_line("cpu-detect {input} {output}")?;
//!
//! let mut session = Orchestrator::new(
//!     BenchConfig::default(),
//!     store,
//!     default_sources(Some(Arc::clone(&power))),
//!     Box::new(CommandWorkload::new("hailo", hailo)),
//!     Box::new(CommandWorkload::new("cpu", cpu)),
//! )
//! .with_power_monitor(power);
//! let outcome = session.run()?;
//! println!("session written to {}", outcome.path.display());
//! # Ok::<(), hatbench_core::BenchError>(())
//! ```
//!
//! ## Architecture
//!
//! Sources → Sampler → SnapshotStore (+ session record)
//!
//! The [`Orchestrator`] owns the session: it starts the [`PowerMonitor`] and
//! the [`Sampler`], runs each [`Workload`] in turn, then drains and writes
//! the final [`SessionRecord`].

pub mod clock;
pub mod error;
pub mod orchestrator;
pub mod power;
pub mod recording;
pub mod sample;
pub mod sampler;
pub mod session;
pub mod source;
pub mod sources;
pub mod store;
pub mod tracking;
pub mod workload;

pub use error::{BenchError, ErrorInfo, Result};
pub use orchestrator::{BenchConfig, HAILO_SKIPPED, Orchestrator, Phase, SessionOutcome};
pub use power::{PowerMonitor, PowerMonitorConfig, PowerMonitorGuard, PowerRecord};
pub use recording::{finalize, temporary_path_for};
pub use sample::{Reading, Sample, SourceKind};
pub use sampler::{Sampler, SamplerConfig, SamplerState, StopOutcome, collect_tick};
pub use session::{
    Case, Event, EventKind, MachineInfo, MonitoringLogs, RunResult, SESSION_FILE,
    SessionConfiguration, SessionHandle, SessionRecord, detect_machine_info, is_raspberry_pi,
};
pub use source::{MetricSource, Platform, SourceInfo};
pub use sources::default_sources;
pub use store::{CURRENT_STATE_FILE, SnapshotStore};
pub use tracking::TrackResolver;
pub use workload::{
    CommandWorkload, CommandWorkloadConfig, DetectionStats, RunRequest, RunStatistics, Workload,
    WorkloadOutput,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
