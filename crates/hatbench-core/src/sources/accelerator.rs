//! HailoPresenceSource — is the Hailo accelerator HAT attached.
//!
//! The PCIe driver exposes `/dev/hailo0`, `/dev/hailo1`, ... per device. When
//! no node exists but `hailortcli` is installed, `hailortcli scan` is asked
//! as a fallback (it also covers Ethernet-attached devices).

use std::path::PathBuf;

use serde_json::{Map, Value, json};

use crate::sample::{Reading, SourceKind};
use crate::source::{MetricSource, Platform, SourceInfo};

use super::helpers::{command_exists, run_command, sorted_entries};

static HAILO_PRESENCE_INFO: SourceInfo = SourceInfo {
    name: "accelerator_presence",
    kind: SourceKind::AcceleratorPresence,
    description: "Hailo accelerator presence via /dev/hailo* or `hailortcli scan`",
    platform: Platform::Linux,
};

pub struct HailoPresenceSource {
    /// Directory holding device nodes.
    pub dev_root: PathBuf,
    /// Fall back to `hailortcli scan` when no node is found.
    pub probe_cli: bool,
}

impl Default for HailoPresenceSource {
    fn default() -> Self {
        Self {
            dev_root: PathBuf::from("/dev"),
            probe_cli: true,
        }
    }
}

impl HailoPresenceSource {
    /// Identifiers of the accelerators found.
    pub fn detect(&self) -> Vec<String> {
        let nodes: Vec<String> = sorted_entries(&self.dev_root, "hailo")
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        if !nodes.is_empty() || !self.probe_cli || !command_exists("hailortcli") {
            return nodes;
        }
        run_command("hailortcli", &["scan"])
            .map(|out| parse_scan_output(&out))
            .unwrap_or_default()
    }

    pub fn is_present(&self) -> bool {
        !self.detect().is_empty()
    }
}

/// Extract device ids from `hailortcli scan`, e.g. `[-] Device: 0001:01:00.0`.
fn parse_scan_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|l| l.split_once("Device:"))
        .map(|(_, id)| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

impl MetricSource for HailoPresenceSource {
    fn info(&self) -> &SourceInfo {
        &HAILO_PRESENCE_INFO
    }

    fn read(&self) -> Reading {
        let devices = self.detect();
        Reading::Present(json!({
            "hailo_present": !devices.is_empty(),
            "devices": devices,
        }))
    }

    fn current_fields(&self, payload: &Value) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("hailo_present".to_string(), payload["hailo_present"].clone());
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_output_parsing() {
        let out = "Hailo Devices:\n[-] Device: 0001:01:00.0\n[-] Device: 0002:01:00.0\n";
        assert_eq!(parse_scan_output(out), vec!["0001:01:00.0", "0002:01:00.0"]);
        assert!(parse_scan_output("Hailo Devices:\n").is_empty());
    }

    #[test]
    fn device_nodes_detected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hailo0"), b"").unwrap();
        std::fs::write(tmp.path().join("null"), b"").unwrap();
        let src = HailoPresenceSource {
            dev_root: tmp.path().to_path_buf(),
            probe_cli: false,
        };
        assert!(src.is_present());
        let Reading::Present(payload) = src.read() else {
            panic!("presence is always a reading");
        };
        assert_eq!(payload["hailo_present"], true);
        assert_eq!(payload["devices"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn no_nodes_no_cli_means_absent_hat() {
        let tmp = tempfile::tempdir().unwrap();
        let src = HailoPresenceSource {
            dev_root: tmp.path().to_path_buf(),
            probe_cli: false,
        };
        assert!(!src.is_present());
        let Reading::Present(payload) = src.read() else {
            panic!("presence is always a reading");
        };
        assert_eq!(src.current_fields(&payload)["hailo_present"], false);
    }
}
