//! Workload contract and the external-command implementation.
//!
//! A workload turns an input video into an annotated recording plus a
//! [`RunStatistics`] summary. The orchestrator treats the accelerated and
//! CPU-only pipelines the same way: both implement [`Workload`].
//!
//! [`CommandWorkload`] drives an external detection program. The program
//! writes its recording to the temporary path it is given and reports one
//! JSON line per processed frame on stdout:
//!
//! ```text
//! {"frame": 12, "detections": [{"track_id": 3, "label": "person"}, {"track_id": 7}]}
//! ```

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::clock::now_iso8601;
use crate::error::{BenchError, Result};
use crate::recording::{finalize, temporary_path_for};
use crate::sources::helpers::round2;
use crate::store::write_json_atomic;
use crate::tracking::{DEFAULT_STALE_FRAMES, TrackResolver};

/// Lines of stderr kept for the failure message.
const STDERR_TAIL_LINES: usize = 5;

/// What to run and where to put the recording.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Final artifact file name, e.g. `hailo_run_2.mp4`.
    pub file_name: String,
    pub frame_rate: u32,
}

impl RunRequest {
    pub fn final_path(&self) -> PathBuf {
        self.output_dir.join(&self.file_name)
    }
}

/// Result of one successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadOutput {
    pub artifact_path: PathBuf,
    pub statistics: RunStatistics,
}

/// A detection pipeline the orchestrator can benchmark.
pub trait Workload: Send + Sync {
    /// Short name used in logs (`"hailo"`, `"cpu"`).
    fn name(&self) -> &str;

    fn run(&self, request: &RunRequest) -> Result<WorkloadOutput>;
}

/// Serializable summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub frames_processed: u64,
    pub total_time_seconds: f64,
    pub average_fps: f64,
    pub total_detections: u64,
    pub peak_detections_per_frame: u64,
    pub unique_objects: u64,
}

/// Accumulates per-frame detection counts and resolves track identities.
pub struct DetectionStats {
    started: Instant,
    frames: u64,
    total_detections: u64,
    peak: u64,
    resolver: TrackResolver,
}

impl DetectionStats {
    pub fn new(stale_frames: u64) -> Self {
        Self {
            started: Instant::now(),
            frames: 0,
            total_detections: 0,
            peak: 0,
            resolver: TrackResolver::new(stale_frames),
        }
    }

    /// Record one frame. `track_ids` holds the tracker id of every detection
    /// that has one; `detections` counts all of them.
    pub fn record_frame(&mut self, frame_id: u64, detections: u64, track_ids: &[u64]) {
        self.frames += 1;
        self.total_detections += detections;
        self.peak = self.peak.max(detections);
        for &track_id in track_ids {
            self.resolver.resolve(track_id, frame_id);
        }
    }

    pub fn finish(&self) -> RunStatistics {
        let elapsed = self.started.elapsed().as_secs_f64();
        let average_fps = if elapsed > 0.0 {
            self.frames as f64 / elapsed
        } else {
            0.0
        };
        RunStatistics {
            frames_processed: self.frames,
            total_time_seconds: round2(elapsed),
            average_fps: round2(average_fps),
            total_detections: self.total_detections,
            peak_detections_per_frame: self.peak,
            unique_objects: self.resolver.issued(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FrameReport {
    frame: u64,
    #[serde(default)]
    detections: Vec<DetectionReport>,
}

#[derive(Debug, Deserialize)]
struct DetectionReport {
    #[serde(default)]
    track_id: Option<u64>,
}

/// How to launch an external detection program.
///
/// `{input}`, `{output}` and `{fps}` in `args` are replaced with the input
/// video, the temporary recording path and the frame rate.
#[derive(Debug, Clone)]
pub struct CommandWorkloadConfig {
    pub program: String,
    pub args: Vec<String>,
    pub stale_frames: u64,
}

impl CommandWorkloadConfig {
    /// Parse a shell-like command line (whitespace separated, no quoting).
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| BenchError::Configuration("empty workload command".into()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            stale_frames: DEFAULT_STALE_FRAMES,
        })
    }

    fn expand_args(&self, input: &Path, output: &Path, fps: u32) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        let fps = fps.to_string();
        self.args
            .iter()
            .map(|a| {
                a.replace("{input}", &input)
                    .replace("{output}", &output)
                    .replace("{fps}", &fps)
            })
            .collect()
    }
}

/// [`Workload`] backed by an external program.
pub struct CommandWorkload {
    name: String,
    config: CommandWorkloadConfig,
}

impl CommandWorkload {
    pub fn new(name: impl Into<String>, config: CommandWorkloadConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

impl Workload for CommandWorkload {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, request: &RunRequest) -> Result<WorkloadOutput> {
        let final_path = request.final_path();
        let temp_path = temporary_path_for(&final_path);
        std::fs::create_dir_all(&request.output_dir)?;

        let args = self
            .config
            .expand_args(&request.input, &temp_path, request.frame_rate);
        log::info!("[{}] {} {}", self.name, self.config.program, args.join(" "));

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BenchError::workload("SpawnError", format!("{}: {e}", self.config.program))
            })?;

        // Drain stderr on its own thread so a chatty program never blocks.
        let stderr_tail = child.stderr.take().map(|stderr| {
            std::thread::spawn(move || {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                for line in lossy_lines(stderr) {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Vec::from(tail).join("\n")
            })
        });

        let mut stats = DetectionStats::new(self.config.stale_frames);
        if let Some(stdout) = child.stdout.take() {
            for line in lossy_lines(stdout) {
                match serde_json::from_str::<FrameReport>(&line) {
                    Ok(report) => {
                        let ids: Vec<u64> =
                            report.detections.iter().filter_map(|d| d.track_id).collect();
                        stats.record_frame(report.frame, report.detections.len() as u64, &ids);
                    }
                    Err(_) => log::debug!("[{}] {line}", self.name),
                }
            }
        }

        let status = child.wait()?;
        let stderr_tail = stderr_tail
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        if !status.success() {
            return Err(BenchError::workload(
                "CommandFailed",
                format!("{} exited with {status}: {stderr_tail}", self.config.program),
            ));
        }

        let artifact_path = finalize(&temp_path, &final_path)?;
        let statistics = stats.finish();

        let sidecar = artifact_path.with_extension("json");
        let summary = serde_json::json!({
            "input": request.input,
            "recording": artifact_path,
            "frame_rate": request.frame_rate,
            "finished_at": now_iso8601(),
            "statistics": statistics,
        });
        if let Err(e) = write_json_atomic(&sidecar, &summary) {
            log::error!("[{}] {e}", self.name);
        }

        Ok(WorkloadOutput {
            artifact_path,
            statistics,
        })
    }
}

/// Newline-split lines of a pipe, decoded lossily so stray binary output
/// never ends the read early.
fn lossy_lines(pipe: impl Read) -> impl Iterator<Item = String> {
    BufReader::new(pipe)
        .split(b'\n')
        .map_while(|l| l.ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &Path) -> RunRequest {
        RunRequest {
            input: dir.join("input.mp4"),
            output_dir: dir.join("cpu"),
            file_name: "cpu_run_1.mp4".into(),
            frame_rate: 5,
        }
    }

    fn sh(script: &str) -> CommandWorkload {
        CommandWorkload::new(
            "cpu",
            CommandWorkloadConfig {
                program: "sh".into(),
                args: vec!["-c".into(), script.into(), "sh".into(), "{output}".into()],
                stale_frames: 30,
            },
        )
    }

    #[test]
    fn stats_count_detections_and_objects() {
        let mut stats = DetectionStats::new(30);
        stats.record_frame(0, 2, &[1, 2]);
        stats.record_frame(1, 3, &[1, 2, 3]);
        stats.record_frame(2, 0, &[]);
        stats.record_frame(100, 1, &[1]); // stale: new object
        let s = stats.finish();
        assert_eq!(s.frames_processed, 4);
        assert_eq!(s.total_detections, 6);
        assert_eq!(s.peak_detections_per_frame, 3);
        assert_eq!(s.unique_objects, 4);
    }

    #[test]
    fn placeholders_are_expanded() {
        let cfg = CommandWorkloadConfig::from_command_line(
            "detect --video {input} --record {output} --fps {fps}",
        )
        .unwrap();
        let args = cfg.expand_args(Path::new("/in.mp4"), Path::new("/o/r.tmp.mp4"), 5);
        assert_eq!(cfg.program, "detect");
        assert_eq!(
            args,
            vec!["--video", "/in.mp4", "--record", "/o/r.tmp.mp4", "--fps", "5"]
        );
        assert!(CommandWorkloadConfig::from_command_line("   ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_run_commits_recording_and_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        let script = r#"
            echo '{"frame": 0, "detections": [{"track_id": 4}, {"track_id": 5}]}'
            echo 'loading model...'
            echo '{"frame": 1, "detections": [{"track_id": 4}]}'
            printf 'video-bytes' > "$1"
        "#;
        let out = sh(script).run(&request(tmp.path())).unwrap();

        assert_eq!(out.artifact_path, tmp.path().join("cpu/cpu_run_1.mp4"));
        assert_eq!(std::fs::read(&out.artifact_path).unwrap(), b"video-bytes");
        assert!(!tmp.path().join("cpu/cpu_run_1.tmp.mp4").exists());
        assert_eq!(out.statistics.frames_processed, 2);
        assert_eq!(out.statistics.total_detections, 3);
        assert_eq!(out.statistics.unique_objects, 2);

        let sidecar = crate::store::read_json(&tmp.path().join("cpu/cpu_run_1.json")).unwrap();
        assert_eq!(sidecar["statistics"]["peak_detections_per_frame"], 2);
    }

    #[cfg(unix)]
    #[test]
    fn binary_output_lines_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let script = r#"
            printf 'progress \377\n'
            printf 'codec \377\376\n' >&2
            i=0
            while [ "$i" -lt 2000 ]; do
                echo "{\"frame\": $i, \"detections\": [{\"track_id\": 1}]}"
                i=$((i + 1))
            done
            printf 'video-bytes' > "$1"
        "#;
        let out = sh(script).run(&request(tmp.path())).unwrap();
        assert_eq!(out.statistics.frames_processed, 2000);
        assert_eq!(out.statistics.unique_objects, 1);
    }

    #[test]
    fn lossy_lines_keep_reading_past_invalid_utf8() {
        let input: &[u8] = b"a\r\n\xff\xfe\nb";
        let lines: Vec<String> = lossy_lines(input).collect();
        assert_eq!(lines, vec!["a", "\u{FFFD}\u{FFFD}", "b"]);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_a_workload_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let err = sh("echo 'model not found' >&2; exit 3")
            .run(&request(tmp.path()))
            .unwrap_err();
        match err {
            BenchError::Workload { kind, message } => {
                assert_eq!(kind, "CommandFailed");
                assert!(message.contains("model not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn empty_recording_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let err = sh(": > \"$1\"").run(&request(tmp.path())).unwrap_err();
        assert!(matches!(err, BenchError::EmptyOutput(_)));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let tmp = tempfile::tempdir().unwrap();
        let wl = CommandWorkload::new(
            "hailo",
            CommandWorkloadConfig::from_command_line("definitely-not-a-hatbench-binary {input}")
                .unwrap(),
        );
        let err = wl.run(&request(tmp.path())).unwrap_err();
        assert_eq!(crate::error::ErrorInfo::from(&err).kind, "SpawnError");
    }
}
