//! `hatbench monitor` — standalone telemetry sampling until Ctrl+C.

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use hatbench_core::{Sampler, SamplerConfig, SnapshotStore, default_sources};

pub fn run(
    interval: Duration,
    duration: Option<Duration>,
    state_dir: Option<&Path>,
    power_cmd: Option<&str>,
    no_power: bool,
) {
    let state_dir = super::state_dir(state_dir);
    let power = super::optional_power_monitor(&state_dir, power_cmd, no_power);

    // Power monitor first so the first energy sample has a chance of data.
    let guard = power.as_deref().and_then(|p| match p.start_scoped() {
        Ok(g) => Some(g),
        Err(e) => {
            eprintln!("Warning: {e}; continuing without power data");
            None
        }
    });

    let store = Arc::new(SnapshotStore::new(&state_dir));
    let mut sampler = Sampler::new(default_sources(power.clone()), Arc::clone(&store));

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        eprintln!("Warning: cannot install Ctrl+C handler: {e}");
    }

    if let Err(e) = sampler.start(interval) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    println!("Monitoring");
    println!("  State dir: {}", state_dir.display());
    println!("  Interval:  {}ms", interval.as_millis());
    match duration {
        Some(d) => println!("  Duration:  {}s", d.as_secs()),
        None => println!("  Duration:  until Ctrl+C"),
    }
    println!();

    let start = Instant::now();
    match duration {
        Some(d) => {
            let _ = stop_rx.recv_timeout(d);
        }
        None => {
            let _ = stop_rx.recv();
        }
    }

    let outcome = sampler.stop(SamplerConfig::default().join_timeout);
    if let Some(Err(e)) = guard.map(|g| g.stop()) {
        eprintln!("Warning: power monitor did not stop cleanly: {e}");
    }

    println!();
    println!(
        "Stopped after {:.1}s, {} ticks ({outcome:?})",
        start.elapsed().as_secs_f64(),
        sampler.ticks()
    );
    println!("Current state: {}", store.current_path().display());
}
