//! CameraPresenceSource — which cameras are attached right now.
//!
//! Two discovery paths:
//! 1. V4L2 nodes under `/sys/class/video4linux` whose device sits beneath a
//!    USB bus (webcams). Codec and ISP nodes on the Pi are not USB and are
//!    skipped.
//! 2. The Raspberry Pi CSI camera, reported by `vcgencmd get_camera` as
//!    `supported=1 detected=1`.
//!
//! This source never answers [`Reading::Absent`]: "no camera" is itself a
//! valid reading.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::sample::{Reading, SourceKind};
use crate::source::{MetricSource, Platform, SourceInfo};

use super::helpers::{command_exists, read_trimmed, run_command, sorted_entries};

static CAMERA_PRESENCE_INFO: SourceInfo = SourceInfo {
    name: "camera_presence",
    kind: SourceKind::CameraPresence,
    description: "USB (V4L2) and Raspberry Pi CSI camera presence",
    platform: Platform::Linux,
};

/// One detected camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraDevice {
    pub device_node: String,
    pub name: String,
}

/// Camera discovery configuration.
pub struct CameraPresenceSource {
    /// Root of the V4L2 class directory.
    pub video4linux_root: PathBuf,
    /// Also ask the Pi firmware about a CSI camera.
    pub probe_vcgencmd: bool,
}

impl Default for CameraPresenceSource {
    fn default() -> Self {
        Self {
            video4linux_root: PathBuf::from("/sys/class/video4linux"),
            probe_vcgencmd: true,
        }
    }
}

impl CameraPresenceSource {
    /// All cameras currently visible.
    pub fn detect(&self) -> Vec<CameraDevice> {
        let mut cameras = list_usb_cameras(&self.video4linux_root);
        if self.probe_vcgencmd {
            cameras.extend(list_rpi_cameras());
        }
        cameras
    }
}

fn list_usb_cameras(root: &Path) -> Vec<CameraDevice> {
    let mut out = Vec::new();
    for node in sorted_entries(root, "video") {
        // `device` links into /sys/devices/...; USB webcams have a usb hop.
        let Ok(device) = std::fs::canonicalize(node.join("device")) else {
            continue;
        };
        if !device
            .components()
            .any(|c| c.as_os_str().to_string_lossy().starts_with("usb"))
        {
            continue;
        }
        let Some(file_name) = node.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let name = read_trimmed(&node.join("name")).unwrap_or_else(|| "Unknown".to_string());
        out.push(CameraDevice {
            device_node: format!("/dev/{file_name}"),
            name,
        });
    }
    out
}

fn list_rpi_cameras() -> Vec<CameraDevice> {
    if !command_exists("vcgencmd") {
        return Vec::new();
    }
    match run_command("vcgencmd", &["get_camera"]) {
        Some(output) if parse_vcgencmd_camera(&output) => vec![CameraDevice {
            device_node: "/dev/video0".to_string(),
            name: "Raspberry Pi Camera".to_string(),
        }],
        _ => Vec::new(),
    }
}

/// `supported=1 detected=1, libcamera interfaces=0` means a CSI camera is attached.
fn parse_vcgencmd_camera(output: &str) -> bool {
    let out = output.trim();
    out.contains("supported=1") && out.contains("detected=1")
}

impl MetricSource for CameraPresenceSource {
    fn info(&self) -> &SourceInfo {
        &CAMERA_PRESENCE_INFO
    }

    fn read(&self) -> Reading {
        let cameras = self.detect();
        Reading::Present(json!({
            "camera_present": !cameras.is_empty(),
            "cameras": cameras,
        }))
    }

    fn current_fields(&self, payload: &Value) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("camera_present".to_string(), payload["camera_present"].clone());
        m.insert("cameras".to_string(), payload["cameras"].clone());
        m
    }
}
