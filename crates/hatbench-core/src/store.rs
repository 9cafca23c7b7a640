//! Atomic JSON persistence for per-source logs and the current-state document.
//!
//! Every write goes to a temporary file in the target's directory which is
//! then renamed over the target, so a reader sees either the previous
//! version or the new one, never a truncated file.
//!
//! # Layout
//!
//! The store owns one directory containing:
//! - one append log per source (`energy_log.json`, `temp_stats.json`, ...),
//!   each a JSON array of [`Sample`]s in call order
//! - `current_monitoring_data.json`, a JSON object mapping metric key to the
//!   latest value

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{BenchError, Result};
use crate::sample::Sample;

/// Default name of the process-wide current-state document.
pub const CURRENT_STATE_FILE: &str = "current_monitoring_data.json";

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// The parent directory is created if missing.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let persistence = |message: String| BenchError::Persistence {
        path: path.to_path_buf(),
        message,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| persistence(e.to_string()))?;

    let json = serde_json::to_vec_pretty(value).map_err(|e| persistence(e.to_string()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| persistence(e.to_string()))?;
    tmp.write_all(&json).map_err(|e| persistence(e.to_string()))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| persistence(e.to_string()))?;
    tmp.persist(path)
        .map_err(|e| persistence(e.error.to_string()))?;
    Ok(())
}

/// Read and parse a JSON file. `None` when absent or unparseable.
pub fn read_json(path: &Path) -> Option<Value> {
    let contents = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("ignoring unparseable JSON in {}: {e}", path.display());
            None
        }
    }
}

/// Append logs plus one merged current-state document, all under `dir`.
pub struct SnapshotStore {
    dir: PathBuf,
    current_name: String,
    // Serializes read-modify-write cycles issued from this process.
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_current_name(dir, CURRENT_STATE_FILE)
    }

    pub fn with_current_name(dir: impl Into<PathBuf>, current_name: &str) -> Self {
        Self {
            dir: dir.into(),
            current_name: current_name.to_string(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self, log_name: &str) -> PathBuf {
        self.dir.join(log_name)
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(&self.current_name)
    }

    /// Append `sample` to the named log. Failures are logged, never returned.
    pub fn append_log(&self, log_name: &str, sample: &Sample) {
        if let Err(e) = self.try_append_log(log_name, sample) {
            log::error!("failed to append to {log_name}: {e}");
        }
    }

    /// Append `sample` to the named log, surfacing failures to the caller.
    ///
    /// A missing log starts empty. So does a corrupt one: the damaged file is
    /// replaced rather than treated as fatal.
    pub fn try_append_log(&self, log_name: &str, sample: &Sample) -> Result<()> {
        let path = self.log_path(log_name);
        let _guard = self.lock();

        let mut entries = match read_json(&path) {
            Some(Value::Array(entries)) => entries,
            Some(_) => {
                log::warn!("{} is not a JSON array, starting fresh", path.display());
                Vec::new()
            }
            None => Vec::new(),
        };
        let value = serde_json::to_value(sample).map_err(|e| BenchError::Persistence {
            path: path.clone(),
            message: e.to_string(),
        })?;
        entries.push(value);
        write_json_atomic(&path, &entries)
    }

    /// Shallow-merge `partial` into the current-state document.
    /// Failures are logged, never returned.
    pub fn merge_current(&self, partial: &Map<String, Value>) {
        let name = self.current_name.clone();
        self.merge_state(&name, partial);
    }

    /// Shallow-merge `partial` into the named state document.
    pub fn merge_state(&self, state_name: &str, partial: &Map<String, Value>) {
        if let Err(e) = self.try_merge_state(state_name, partial) {
            log::error!("failed to update snapshot {state_name}: {e}");
        }
    }

    /// Shallow-merge with error propagation. Keys in `partial` replace
    /// existing keys wholesale; other keys are left untouched.
    pub fn try_merge_state(&self, state_name: &str, partial: &Map<String, Value>) -> Result<()> {
        let path = self.dir.join(state_name);
        let _guard = self.lock();

        let mut current = match read_json(&path) {
            Some(Value::Object(map)) => map,
            Some(_) => {
                log::warn!("{} is not a JSON object, starting fresh", path.display());
                Map::new()
            }
            None => Map::new(),
        };
        for (k, v) in partial {
            current.insert(k.clone(), v.clone());
        }
        write_json_atomic(&path, &current)
    }

    /// Full reread of a log. `None` when missing or corrupt.
    pub fn read_log(&self, log_name: &str) -> Option<Value> {
        read_json(&self.log_path(log_name))
    }

    /// Current-state document, empty when missing or corrupt.
    pub fn read_current(&self) -> Map<String, Value> {
        match read_json(&self.current_path()) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SourceKind;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn append_keeps_call_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        for i in 0..5 {
            let sample = Sample::new(SourceKind::Energy, json!({ "i": i }));
            store.append_log("energy_log.json", &sample);
        }
        let log = store.read_log("energy_log.json").unwrap();
        let entries = log.as_array().unwrap();
        assert_eq!(entries.len(), 5);
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e["payload"]["i"], i as u64);
            assert_eq!(e["source_kind"], "energy");
        }
    }

    #[test]
    fn corrupt_log_starts_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        fs::write(store.log_path("temp_stats.json"), "[{\"trunc").unwrap();

        store
            .try_append_log("temp_stats.json", &Sample::new(SourceKind::Temperature, json!(40.0)))
            .unwrap();
        let log = store.read_log("temp_stats.json").unwrap();
        assert_eq!(log.as_array().unwrap().len(), 1);
    }

    #[test]
    fn non_array_log_starts_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        fs::write(store.log_path("camera_log.json"), "{\"a\": 1}").unwrap();
        store.append_log("camera_log.json", &Sample::new(SourceKind::CameraPresence, json!(true)));
        assert_eq!(store.read_log("camera_log.json").unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn merge_is_last_writer_wins_per_key() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        store.merge_current(&obj(json!({ "temperature": 40, "hailo_present": false })));
        store.merge_current(&obj(json!({ "camera_present": true })));
        store.merge_current(&obj(json!({ "temperature": 55 })));

        let cur = store.read_current();
        assert_eq!(cur["temperature"], 55);
        assert_eq!(cur["hailo_present"], false);
        assert_eq!(cur["camera_present"], true);
        assert_eq!(cur.len(), 3);
    }

    #[test]
    fn merge_replaces_nested_values_wholesale() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        store.merge_current(&obj(json!({ "memory": { "total": 8, "used": 2 } })));
        store.merge_current(&obj(json!({ "memory": { "used": 3 } })));
        let cur = store.read_current();
        assert_eq!(cur["memory"], json!({ "used": 3 }));
    }

    #[test]
    fn corrupt_current_starts_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        fs::write(store.current_path(), "not json").unwrap();
        assert!(store.read_current().is_empty());
        store.merge_current(&obj(json!({ "k": 1 })));
        assert_eq!(store.read_current()["k"], 1);
    }

    #[test]
    fn write_failure_is_swallowed() {
        let tmp = tempfile::tempdir().unwrap();
        // A regular file where the store directory should be.
        let blocker = tmp.path().join("blocked");
        fs::write(&blocker, b"x").unwrap();
        let store = SnapshotStore::new(&blocker);

        store.append_log("energy_log.json", &Sample::new(SourceKind::Energy, json!(1)));
        store.merge_current(&obj(json!({ "k": 1 })));
        assert!(store.read_log("energy_log.json").is_none());

        let err = store
            .try_append_log("energy_log.json", &Sample::new(SourceKind::Energy, json!(1)))
            .unwrap_err();
        assert_eq!(err.kind(), "PersistenceFailure");
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("doc.json");
        write_json_atomic(&path, &json!({ "a": 1 })).unwrap();
        write_json_atomic(&path, &json!({ "a": 2 })).unwrap();
        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(read_json(&path).unwrap()["a"], 2);
    }

    #[test]
    fn abandoned_temp_file_does_not_touch_target() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        store.append_log("memory_log.json", &Sample::new(SourceKind::MemoryDisk, json!(1)));
        store.merge_current(&obj(json!({ "memory": 1 })));

        // A writer that died between writing and renaming leaves this behind.
        let mut partial = tempfile::NamedTempFile::new_in(tmp.path()).unwrap();
        partial.write_all(b"[{\"timestamp\": \"2026-").unwrap();
        let (_, orphan) = partial.keep().unwrap();

        let log = store.read_log("memory_log.json").unwrap();
        assert_eq!(log.as_array().unwrap().len(), 1);
        assert_eq!(store.read_current()["memory"], 1);

        store.append_log("memory_log.json", &Sample::new(SourceKind::MemoryDisk, json!(2)));
        let log = store.read_log("memory_log.json").unwrap();
        assert_eq!(log[1]["payload"], 2);
        assert!(orphan.exists());
    }

    const KILLED_WRITER_DIR: &str = "HATBENCH_KILLED_WRITER_DIR";

    /// Body of the child process for `killed_writer_leaves_parseable_files`.
    #[test]
    #[ignore = "run as a child process by killed_writer_leaves_parseable_files"]
    fn writer_loop_until_killed() {
        let Some(dir) = std::env::var_os(KILLED_WRITER_DIR) else {
            return;
        };
        let store = SnapshotStore::new(PathBuf::from(dir));
        let bulk: Vec<u64> = (0..512).collect();
        for seq in 0u64.. {
            let sample = Sample::new(SourceKind::Energy, json!({ "seq": seq, "bulk": bulk }));
            store.try_append_log("energy_log.json", &sample).unwrap();
            store
                .try_merge_state(CURRENT_STATE_FILE, &obj(json!({ "seq": seq, "bulk": bulk })))
                .unwrap();
        }
    }

    #[cfg(unix)]
    #[test]
    fn killed_writer_leaves_parseable_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut child = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "store::tests::writer_loop_until_killed",
                "--exact",
                "--ignored",
                "--test-threads=1",
            ])
            .env(KILLED_WRITER_DIR, tmp.path())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap();

        let store = SnapshotStore::new(tmp.path());
        let started = std::time::Instant::now();
        while !store.current_path().exists() {
            assert!(started.elapsed() < std::time::Duration::from_secs(30));
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        std::thread::sleep(std::time::Duration::from_millis(300));
        child.kill().unwrap();
        child.wait().unwrap();

        let log = store.read_log("energy_log.json").unwrap();
        let entries = log.as_array().unwrap();
        assert!(!entries.is_empty());
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e["payload"]["seq"], i as u64);
        }
        let current = store.read_current();
        assert!(current["seq"].as_u64().is_some());

        // Only tempfile leftovers may sit beside the two documents.
        for entry in fs::read_dir(tmp.path()).unwrap().flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            assert!(
                name == "energy_log.json" || name == CURRENT_STATE_FILE || name.starts_with(".tmp"),
                "unexpected file {name}"
            );
        }

        store.append_log("energy_log.json", &Sample::new(SourceKind::Energy, json!("after")));
        let log = store.read_log("energy_log.json").unwrap();
        assert_eq!(log.as_array().unwrap().len(), entries.len() + 1);
    }

    #[test]
    fn concurrent_merges_do_not_lose_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(SnapshotStore::new(tmp.path()));
        std::thread::scope(|s| {
            for t in 0..4 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..10 {
                        let mut m = Map::new();
                        m.insert(format!("t{t}_{i}"), json!(i));
                        store.merge_current(&m);
                    }
                });
            }
        });
        assert_eq!(store.read_current().len(), 40);
    }
}
