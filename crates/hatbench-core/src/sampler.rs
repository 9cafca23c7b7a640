//! Periodic background collection of every metric source.
//!
//! The sampler runs on its own thread. Each tick it reads every source once,
//! appends present readings to their logs, merges them into the
//! current-state document and, when attached to a session, appends one
//! composite sample to `monitoring_samples`. Between ticks it waits on a
//! stop channel, so [`Sampler::stop`] interrupts the wait but never a tick
//! in progress.
//!
//! ```text
//! Idle --start--> Running --stop--> Stopping --loop exits--> Stopped
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::clock::now_iso8601;
use crate::error::{BenchError, Result};
use crate::sample::{Reading, Sample};
use crate::session::SessionHandle;
use crate::source::MetricSource;
use crate::store::SnapshotStore;

/// Sampler timing.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Pause between the end of one tick and the start of the next.
    pub interval: Duration,
    /// How long [`Sampler::stop`] waits for the loop to acknowledge.
    pub join_timeout: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// How a call to [`Sampler::stop`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The loop acknowledged and its thread was joined.
    Stopped,
    /// The loop did not acknowledge in time. It exits after its current tick.
    TimedOut,
    /// The sampler was never started or was already stopped.
    NotRunning,
}

/// Read every source once and persist the readings.
///
/// Returns the composite sample for this tick: the tick timestamp plus one
/// entry per source, keyed by source kind.
pub fn collect_tick(
    sources: &[Box<dyn MetricSource>],
    store: &SnapshotStore,
) -> Map<String, Value> {
    let mut composite = Map::new();
    composite.insert("timestamp".to_string(), Value::String(now_iso8601()));

    for source in sources {
        let kind = source.kind();
        let reading = source.read();
        match &reading {
            Reading::Present(payload) => {
                store.append_log(kind.log_file_name(), &Sample::new(kind, payload.clone()));
                store.merge_current(&source.current_fields(payload));
            }
            Reading::Absent => log::debug!("{}: no reading", source.name()),
            Reading::Error(reason) => log::warn!("{}: {reason}", source.name()),
        }
        composite.insert(kind.as_str().to_string(), reading.to_json());
    }
    composite
}

struct Running {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Background sampler over a fixed set of sources.
pub struct Sampler {
    sources: Arc<Vec<Box<dyn MetricSource>>>,
    store: Arc<SnapshotStore>,
    session: Option<SessionHandle>,
    state: Arc<Mutex<SamplerState>>,
    ticks: Arc<AtomicU64>,
    running: Option<Running>,
}

impl Sampler {
    pub fn new(sources: Vec<Box<dyn MetricSource>>, store: Arc<SnapshotStore>) -> Self {
        Self {
            sources: Arc::new(sources),
            store,
            session: None,
            state: Arc::new(Mutex::new(SamplerState::Idle)),
            ticks: Arc::new(AtomicU64::new(0)),
            running: None,
        }
    }

    /// Also append each composite sample to this session's record.
    pub fn with_session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    pub fn state(&self) -> SamplerState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Completed ticks so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Start sampling every `interval` on a dedicated thread.
    pub fn start(&mut self, interval: Duration) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if *state != SamplerState::Idle {
                return Err(BenchError::Configuration(format!(
                    "sampler cannot start from state {:?}",
                    *state
                )));
            }
            *state = SamplerState::Running;
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let sources = Arc::clone(&self.sources);
        let store = Arc::clone(&self.store);
        let session = self.session.clone();
        let state = Arc::clone(&self.state);
        let ticks = Arc::clone(&self.ticks);

        let spawned = std::thread::Builder::new()
            .name("hatbench-sampler".into())
            .spawn(move || {
                loop {
                    let composite = collect_tick(&sources, &store);
                    if let Some(session) = &session {
                        session.update(|rec| rec.monitoring_samples.push(Value::Object(composite)));
                    }
                    ticks.fetch_add(1, Ordering::Relaxed);

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                *state.lock().unwrap_or_else(|p| p.into_inner()) = SamplerState::Stopped;
                let _ = done_tx.send(());
            });

        match spawned {
            Ok(handle) => {
                log::info!(
                    "sampler started: {} sources every {:?}",
                    self.sources.len(),
                    interval
                );
                self.running = Some(Running {
                    stop_tx,
                    done_rx,
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                *self.state.lock().unwrap_or_else(|p| p.into_inner()) = SamplerState::Idle;
                Err(e.into())
            }
        }
    }

    /// Signal the loop and wait up to `timeout` for it to finish.
    pub fn stop(&mut self, timeout: Duration) -> StopOutcome {
        let Some(running) = self.running.take() else {
            return StopOutcome::NotRunning;
        };
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if *state == SamplerState::Running {
                *state = SamplerState::Stopping;
            }
        }
        let _ = running.stop_tx.send(());

        match running.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if running.handle.join().is_err() {
                    log::error!("sampler thread panicked");
                }
                log::info!("sampler stopped after {} ticks", self.ticks());
                StopOutcome::Stopped
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("sampler did not stop within {timeout:?}; detaching");
                StopOutcome::TimedOut
            }
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(());
        }
    }
}
