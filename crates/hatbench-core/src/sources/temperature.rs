//! TemperatureSource — CPU and accelerator die temperature.
//!
//! CPU temperature is the median of every valid reading from the thermal
//! zones, with hwmon as a fallback. Raw sysfs values are usually
//! millidegrees and are scaled to °C. Values outside [-20, 125] °C or equal
//! to a known sentinel (0, -1, 85, 255, 32768, 65535) are discarded, since
//! drivers report those when a sensor is not ready.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value, json};

use crate::sample::{Reading, SourceKind};
use crate::source::{MetricSource, Platform, SourceInfo};

use super::helpers::{command_exists, median, read_trimmed, round2, run_command, sorted_entries};

const TEMP_MIN_C: f64 = -20.0;
const TEMP_MAX_C: f64 = 125.0;
const SENTINELS: [i64; 6] = [0, -1, 85, 255, 32768, 65535];

static TEMPERATURE_INFO: SourceInfo = SourceInfo {
    name: "temperature",
    kind: SourceKind::Temperature,
    description: "CPU temperature (thermal zones / hwmon median) and Hailo die temperature",
    platform: Platform::Linux,
};

pub struct TemperatureSource {
    pub thermal_root: PathBuf,
    pub hwmon_root: PathBuf,
    /// Query `hailortcli fw-control get-temperature`.
    pub probe_hailo: bool,
    /// Delay before the single retry of the thermal-zone scan.
    pub retry_delay: Duration,
}

impl Default for TemperatureSource {
    fn default() -> Self {
        Self {
            thermal_root: PathBuf::from("/sys/class/thermal"),
            hwmon_root: PathBuf::from("/sys/class/hwmon"),
            probe_hailo: true,
            retry_delay: Duration::from_millis(50),
        }
    }
}

impl TemperatureSource {
    /// Median CPU temperature in °C, rounded to 0.01.
    pub fn cpu_temperature(&self) -> Option<f64> {
        let mut temps = Vec::new();
        for attempt in 0..2 {
            temps = sorted_entries(&self.thermal_root, "thermal_zone")
                .iter()
                .filter_map(|zone| read_temp(&zone.join("temp")))
                .filter(|v| valid_temp(*v))
                .collect();
            if !temps.is_empty() {
                break;
            }
            if attempt == 0 {
                std::thread::sleep(self.retry_delay);
            }
        }

        if temps.is_empty() {
            temps = hwmon_inputs(&self.hwmon_root)
                .iter()
                .filter_map(|p| read_temp(p))
                .filter(|v| valid_temp(*v))
                .collect();
        }

        let med = median(&temps)?;
        log::debug!("temperature candidates={temps:?} median={med:.2}C");
        Some(round2(med))
    }

    fn hailo_temperature(&self) -> Option<f64> {
        if !self.probe_hailo || !command_exists("hailortcli") {
            return None;
        }
        run_command("hailortcli", &["fw-control", "get-temperature"])
            .and_then(|out| parse_hailo_temperature(&out))
    }
}

fn hwmon_inputs(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for dir in sorted_entries(root, "hwmon") {
        for p in sorted_entries(&dir, "temp") {
            if p.to_string_lossy().ends_with("_input") {
                out.push(p);
            }
        }
    }
    out
}

/// Read one sysfs temperature and normalise millidegrees to °C.
fn read_temp(path: &Path) -> Option<f64> {
    let v: f64 = read_trimmed(path)?.parse().ok()?;
    Some(if v.abs() > 1000.0 { v / 1000.0 } else { v })
}

fn valid_temp(v: f64) -> bool {
    if !v.is_finite() || SENTINELS.contains(&(v.trunc() as i64)) {
        return false;
    }
    (TEMP_MIN_C..=TEMP_MAX_C).contains(&v)
}

/// First `tsN: <value>` line of `hailortcli fw-control get-temperature`.
fn parse_hailo_temperature(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if !key.trim().starts_with("ts") {
            return None;
        }
        value.split_whitespace().next()?.parse::<f64>().ok()
    })
}

impl MetricSource for TemperatureSource {
    fn info(&self) -> &SourceInfo {
        &TEMPERATURE_INFO
    }

    fn read(&self) -> Reading {
        let Some(cpu) = self.cpu_temperature() else {
            log::warn!("no valid temperature readings found");
            return Reading::Absent;
        };
        Reading::Present(json!({
            "cpu_temperature_c": cpu,
            "hailo_temperature_c": self.hailo_temperature(),
        }))
    }

    fn current_fields(&self, payload: &Value) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("temperature".to_string(), payload.clone());
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(root: &Path, idx: usize, raw: &str) {
        let dir = root.join(format!("thermal_zone{idx}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("temp"), raw).unwrap();
    }

    fn source(root: &Path) -> TemperatureSource {
        TemperatureSource {
            thermal_root: root.join("thermal"),
            hwmon_root: root.join("hwmon"),
            probe_hailo: false,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn validity_rules() {
        assert!(valid_temp(45.2));
        assert!(!valid_temp(85.0));
        assert!(!valid_temp(0.0));
        assert!(!valid_temp(130.0));
        assert!(!valid_temp(-25.0));
        assert!(!valid_temp(f64::NAN));
    }

    #[test]
    fn median_of_valid_zones() {
        let tmp = tempfile::tempdir().unwrap();
        let thermal = tmp.path().join("thermal");
        zone(&thermal, 0, "48312\n");
        zone(&thermal, 1, "50100\n");
        zone(&thermal, 2, "85000\n"); // sentinel
        zone(&thermal, 3, "46000\n");
        assert_eq!(source(tmp.path()).cpu_temperature(), Some(48.31));
    }

    #[test]
    fn hwmon_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let hw = tmp.path().join("hwmon/hwmon0");
        std::fs::create_dir_all(&hw).unwrap();
        std::fs::write(hw.join("temp1_input"), "52000").unwrap();
        std::fs::write(hw.join("temp1_label"), "cpu").unwrap();
        assert_eq!(source(tmp.path()).cpu_temperature(), Some(52.0));
    }

    #[test]
    fn no_sensor_is_absent() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(source(tmp.path()).read(), Reading::Absent);
    }

    #[test]
    fn present_payload_and_current_fields() {
        let tmp = tempfile::tempdir().unwrap();
        zone(&tmp.path().join("thermal"), 0, "41000");
        let src = source(tmp.path());
        let Reading::Present(payload) = src.read() else {
            panic!("expected reading");
        };
        assert_eq!(payload["cpu_temperature_c"], 41.0);
        assert!(payload["hailo_temperature_c"].is_null());
        assert_eq!(src.current_fields(&payload)["temperature"]["cpu_temperature_c"], 41.0);
    }

    #[test]
    fn hailo_output_parsing() {
        let out = "Current temperature:\n  ts0: 46.49 C\n  ts1: 46.41 C\n";
        assert_eq!(parse_hailo_temperature(out), Some(46.49));
        assert_eq!(parse_hailo_temperature("nothing"), None);
    }
}
