//! CLI for hatbench — field telemetry and Hailo vs CPU detection benchmarks.

mod commands;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use commands::parse_duration;

#[derive(Parser)]
#[command(name = "hatbench")]
#[command(about = "hatbench — telemetry sampling and Hailo vs CPU detection benchmarks")]
#[command(version = hatbench_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a benchmark session: N accelerated runs, then N CPU runs, while
    /// sampling telemetry in the background
    Bench {
        /// Input video
        #[arg(long)]
        input: PathBuf,

        /// Directory for recordings and the session document
        #[arg(long, default_value = "testbench_outputs")]
        output_dir: PathBuf,

        /// Total monitoring time (e.g. "60s", "2m"); the remainder after the
        /// runs is spent recording cool-down telemetry
        #[arg(long, default_value = "60s", value_parser = parse_duration)]
        monitor_seconds: Duration,

        /// Sampling interval (e.g. "500ms", "5s")
        #[arg(long, default_value = "5s", value_parser = parse_duration)]
        interval: Duration,

        /// Runs per case
        #[arg(long, default_value = "5")]
        runs: u32,

        /// Frame rate passed to the workloads
        #[arg(long, default_value = "5")]
        frame_rate: u32,

        /// Accelerated workload command; {input}, {output} and {fps} are substituted
        #[arg(long, default_value = commands::bench::DEFAULT_HAILO_CMD)]
        hailo_cmd: String,

        /// CPU-only workload command; {input}, {output} and {fps} are substituted
        #[arg(long, default_value = commands::bench::DEFAULT_CPU_CMD)]
        cpu_cmd: String,

        /// Power monitor program (default: $HATBENCH_POWER_MONITOR or joularcore)
        #[arg(long)]
        power_cmd: Option<String>,

        /// Do not launch the power monitor
        #[arg(long)]
        no_power: bool,

        /// Directory for metric logs and the current-state file
        /// (default: $HATBENCH_STATE_DIR or the working directory)
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },

    /// Sample telemetry continuously until Ctrl+C (no workloads)
    Monitor {
        /// Sampling interval (e.g. "500ms", "5s")
        #[arg(long, default_value = "5s", value_parser = parse_duration)]
        interval: Duration,

        /// Stop after this long instead of waiting for Ctrl+C
        #[arg(long, value_parser = parse_duration)]
        duration: Option<Duration>,

        /// Directory for metric logs and the current-state file
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Power monitor program
        #[arg(long)]
        power_cmd: Option<String>,

        /// Do not launch the power monitor
        #[arg(long)]
        no_power: bool,
    },

    /// List metric sources and whether each yields a reading right now
    Scan,

    /// Print the current-state document
    Current {
        /// Directory holding the current-state file
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Bench {
            input,
            output_dir,
            monitor_seconds,
            interval,
            runs,
            frame_rate,
            hailo_cmd,
            cpu_cmd,
            power_cmd,
            no_power,
            state_dir,
        } => commands::bench::run(commands::bench::BenchArgs {
            input,
            output_dir,
            monitor_duration: monitor_seconds,
            interval,
            runs,
            frame_rate,
            hailo_cmd,
            cpu_cmd,
            power_cmd,
            no_power,
            state_dir,
        }),
        Commands::Monitor {
            interval,
            duration,
            state_dir,
            power_cmd,
            no_power,
        } => commands::monitor::run(
            interval,
            duration,
            state_dir.as_deref(),
            power_cmd.as_deref(),
            no_power,
        ),
        Commands::Scan => commands::scan::run(),
        Commands::Current { state_dir } => commands::current::run(state_dir.as_deref()),
    }
}
