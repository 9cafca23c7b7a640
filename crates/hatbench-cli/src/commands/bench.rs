//! `hatbench bench` — accelerated vs CPU detection benchmark with telemetry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hatbench_core::sources::HailoPresenceSource;
use hatbench_core::{
    BenchConfig, Case, CommandWorkload, CommandWorkloadConfig, Orchestrator, RunResult,
    SamplerConfig, SnapshotStore, StopOutcome, default_sources,
};

pub const DEFAULT_HAILO_CMD: &str = "hailo-detect --input {input} --output {output} --fps {fps}";
pub const DEFAULT_CPU_CMD: &str = "cpu-detect --input {input} --output {output} --fps {fps}";

pub struct BenchArgs {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub monitor_duration: Duration,
    pub interval: Duration,
    pub runs: u32,
    pub frame_rate: u32,
    pub hailo_cmd: String,
    pub cpu_cmd: String,
    pub power_cmd: Option<String>,
    pub no_power: bool,
    pub state_dir: Option<PathBuf>,
}

pub fn run(args: BenchArgs) {
    let parse = |line: &str| {
        CommandWorkloadConfig::from_command_line(line).unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            std::process::exit(2);
        })
    };
    let hailo = parse(&args.hailo_cmd);
    let cpu = parse(&args.cpu_cmd);

    let state_dir = super::state_dir(args.state_dir.as_deref());
    let power = super::optional_power_monitor(
        &state_dir,
        args.power_cmd.as_deref(),
        args.no_power,
    );
    let hailo_available = HailoPresenceSource::default().is_present();

    println!("Benchmark session");
    println!("  Input:      {}", args.input.display());
    println!("  Output:     {}", args.output_dir.display());
    println!("  State dir:  {}", state_dir.display());
    println!("  Runs/case:  {}", args.runs);
    println!(
        "  Monitor:    {}s every {}ms",
        args.monitor_duration.as_secs(),
        args.interval.as_millis()
    );
    let hailo_status = if hailo_available {
        "detected"
    } else {
        "not detected"
    };
    println!("  Hailo:      {hailo_status}");
    println!(
        "  Power:      {}",
        if args.no_power { "disabled" } else { "enabled" }
    );
    println!();

    let config = BenchConfig {
        input: args.input,
        output_dir: args.output_dir,
        monitor_duration: args.monitor_duration,
        sampler: SamplerConfig {
            interval: args.interval,
            ..Default::default()
        },
        runs_per_case: args.runs,
        frame_rate: args.frame_rate,
    };

    let mut orchestrator = Orchestrator::new(
        config,
        Arc::new(SnapshotStore::new(&state_dir)),
        default_sources(power.clone()),
        Box::new(CommandWorkload::new("hailo", hailo)),
        Box::new(CommandWorkload::new("cpu", cpu)),
    )
    .with_hailo_available(hailo_available);
    if let Some(power) = power {
        orchestrator = orchestrator.with_power_monitor(power);
    }

    let outcome = match orchestrator.run() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    println!("{:<8} {:>4} {:>8} {:>8} {:>10}", "Case", "Run", "Status", "Frames", "Avg FPS");
    println!("{}", "-".repeat(42));
    for case in Case::ORDER {
        for run in outcome.record.runs.for_case(case) {
            print_run(case, run);
        }
    }
    println!();
    if outcome.sampler_stop == StopOutcome::TimedOut {
        println!("Warning: sampler did not stop in time; last samples may be missing");
    }
    println!(
        "Monitoring samples: {}",
        outcome.record.monitoring_samples.len()
    );
    println!("Summary written to: {}", outcome.path.display());
}

fn print_run(case: Case, run: &RunResult) {
    let index = run
        .run_index
        .map_or_else(|| "-".to_string(), |i| i.to_string());
    let (status, frames, fps) = match (&run.statistics, &run.error, &run.skipped) {
        (_, _, Some(_)) => ("skipped", "-".to_string(), "-".to_string()),
        (_, Some(_), _) => ("failed", "-".to_string(), "-".to_string()),
        (Some(s), None, None) => (
            "ok",
            s.frames_processed.to_string(),
            format!("{:.2}", s.average_fps),
        ),
        (None, None, None) => ("?", "-".to_string(), "-".to_string()),
    };
    println!(
        "{:<8} {:>4} {:>8} {:>8} {:>10}",
        case.as_str(),
        index,
        status,
        frames,
        fps
    );
    if let Some(err) = &run.error {
        println!("         {}: {}", err.kind, err.message);
    }
    if let Some(reason) = &run.skipped {
        println!("         {reason}");
    }
}
