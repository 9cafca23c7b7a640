//! Lifecycle wrapper for the external power-monitoring process.
//!
//! The monitor (joularcore by default) runs with elevated privileges and
//! appends one CSV row per measurement to an output file. We talk to it only
//! through that file and OS signals:
//!
//! - [`PowerMonitor::start`] spawns it once; further calls are no-ops
//! - [`PowerMonitor::stop`] sends SIGINT and waits for it to exit
//! - [`PowerMonitor::read_latest`] parses only the last CSV record
//!
//! One `PowerMonitor` manages at most one process. Dropping it stops the
//! process, and [`PowerMonitor::start_scoped`] returns a guard that stops it
//! when the guard goes out of scope.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{BenchError, Result};

/// Default CSV written by the power monitor.
pub const DEFAULT_POWER_CSV: &str = "energy_global.csv";

/// Bytes read from the end of the CSV when looking for the last record.
const TAIL_WINDOW: u64 = 64 * 1024;

/// One CSV row from the power monitor, keyed by header column.
pub type PowerRecord = BTreeMap<String, String>;

/// How to launch the power monitor.
#[derive(Debug, Clone)]
pub struct PowerMonitorConfig {
    /// Executable path. `HATBENCH_POWER_MONITOR` overrides the default.
    pub program: PathBuf,
    /// Arguments placed before the output flag.
    pub args: Vec<String>,
    /// Flag that introduces the CSV output path.
    pub output_flag: String,
    /// CSV file the process writes.
    pub output_path: PathBuf,
    /// Launch through `sudo` (reading RAPL/PMIC counters needs root).
    pub use_sudo: bool,
    /// How long to wait after SIGINT before killing the process.
    pub stop_grace: Duration,
}

impl Default for PowerMonitorConfig {
    fn default() -> Self {
        let program = std::env::var("HATBENCH_POWER_MONITOR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("joularcore"));
        Self {
            program,
            args: Vec::new(),
            output_flag: "-f".to_string(),
            output_path: PathBuf::from(DEFAULT_POWER_CSV),
            use_sudo: true,
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl PowerMonitorConfig {
    /// Full command line as (program, args).
    fn command_line(&self) -> (String, Vec<String>) {
        let mut args = Vec::new();
        let program = if self.use_sudo {
            args.push(self.program.to_string_lossy().into_owned());
            "sudo".to_string()
        } else {
            self.program.to_string_lossy().into_owned()
        };
        args.extend(self.args.iter().cloned());
        args.push(self.output_flag.clone());
        args.push(self.output_path.to_string_lossy().into_owned());
        (program, args)
    }
}

/// Owns the external power-monitor process.
pub struct PowerMonitor {
    config: PowerMonitorConfig,
    child: Mutex<Option<Child>>,
}

impl PowerMonitor {
    pub fn new(config: PowerMonitorConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PowerMonitorConfig {
        &self.config
    }

    pub fn output_path(&self) -> &Path {
        &self.config.output_path
    }

    /// Launch the monitor and return its pid.
    ///
    /// Idempotent: when a live process is already managed its pid is
    /// returned and nothing is spawned. A process that exited on its own is
    /// reaped and replaced.
    pub fn start(&self) -> Result<u32> {
        let mut guard = self.lock();

        if let Some(child) = guard.as_mut() {
            match child.try_wait() {
                Ok(None) => return Ok(child.id()),
                Ok(Some(status)) => {
                    log::warn!("power monitor exited on its own ({status}), restarting");
                }
                Err(e) => log::warn!("power monitor status unknown ({e}), restarting"),
            }
            *guard = None;
        }

        let (program, args) = self.config.command_line();
        log::info!("starting power monitor: {program} {}", args.join(" "));

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                BenchError::SourceUnavailable(format!("cannot launch power monitor {program}: {e}"))
            })?;
        let pid = child.id();
        *guard = Some(child);
        Ok(pid)
    }

    /// Like [`start`](Self::start), returning a guard that stops the monitor on drop.
    pub fn start_scoped(&self) -> Result<PowerMonitorGuard<'_>> {
        let pid = self.start()?;
        Ok(PowerMonitorGuard { monitor: self, pid })
    }

    /// Whether a managed process is currently alive.
    pub fn is_running(&self) -> bool {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Send SIGINT and wait for the process to exit.
    ///
    /// No-op (returns `Ok(None)`) when nothing is running. If the process
    /// ignores SIGINT past `stop_grace`, it is killed.
    pub fn stop(&self) -> Result<Option<ExitStatus>> {
        let Some(mut child) = self.lock().take() else {
            return Ok(None);
        };

        if let Ok(Some(status)) = child.try_wait() {
            return Ok(Some(status));
        }

        log::info!("stopping power monitor (pid {})", child.id());
        send_interrupt(child.id());

        let deadline = Instant::now() + self.config.stop_grace;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "power monitor ignored SIGINT for {:?}, killing it",
                    self.config.stop_grace
                );
                let _ = child.kill();
                return Ok(Some(child.wait()?));
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    /// Last record of the monitor's CSV, or `None` when there is no data yet.
    pub fn read_latest(&self) -> Option<PowerRecord> {
        match read_last_csv_record(&self.config.output_path) {
            Ok(record) => record,
            Err(e) => {
                log::warn!(
                    "failed to read power CSV {}: {e}",
                    self.config.output_path.display()
                );
                None
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for PowerMonitor {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("failed to stop power monitor on drop: {e}");
        }
    }
}

/// Stops the power monitor when dropped.
pub struct PowerMonitorGuard<'a> {
    monitor: &'a PowerMonitor,
    pid: u32,
}

impl PowerMonitorGuard<'_> {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Stop now instead of at drop.
    pub fn stop(self) -> Result<Option<ExitStatus>> {
        let result = self.monitor.stop();
        std::mem::forget(self);
        result
    }
}

impl Drop for PowerMonitorGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.monitor.stop() {
            log::warn!("failed to stop power monitor: {e}");
        }
    }
}

#[cfg(unix)]
fn send_interrupt(pid: u32) {
    // SAFETY: kill(2) has no memory-safety preconditions; a stale pid only
    // yields ESRCH.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc != 0 {
        log::warn!(
            "SIGINT to pid {pid} failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn send_interrupt(pid: u32) {
    log::warn!("graceful interrupt unsupported on this platform (pid {pid})");
}

// ---------------------------------------------------------------------------
// CSV tail parsing
// ---------------------------------------------------------------------------

/// Parse the header and the last data row of a CSV file.
///
/// `Ok(None)` when the file is absent, empty, or has no data row yet.
/// Malformed rows are reported as `InvalidData`.
pub fn read_last_csv_record(path: &Path) -> std::io::Result<Option<PowerRecord>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(None);
    }

    let mut reader = BufReader::new(file);
    let mut header_line = String::new();
    let header_len = reader.read_line(&mut header_line)? as u64;
    let header = split_csv_line(header_line.trim_end_matches(['\r', '\n']));
    if header.iter().all(|h| h.is_empty()) {
        return Ok(None);
    }

    let start = header_len.max(len.saturating_sub(TAIL_WINDOW));
    let mut reader = reader.into_inner();
    reader.seek(SeekFrom::Start(start))?;
    let mut tail = String::new();
    reader.read_to_string(&mut tail)?;

    // A window that starts mid-row leaves a partial first line; the last
    // complete-looking line is still whole because rows end with '\n' or EOF.
    let Some(last) = tail
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .last()
    else {
        return Ok(None);
    };

    let fields = split_csv_line(last);
    if fields.len() != header.len() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "last row has {} fields, header has {}",
                fields.len(),
                header.len()
            ),
        ));
    }
    Ok(Some(header.into_iter().zip(fields).collect()))
}

/// Split one CSV line, honouring double-quoted fields and `""` escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut cur)),
            _ => cur.push(c),
        }
    }
    fields.push(cur);
    fields.into_iter().map(|f| f.trim().to_string()).collect()
}
