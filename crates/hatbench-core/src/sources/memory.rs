//! MemoryDiskSource — RAM, swap, and disk usage.
//!
//! Memory comes from `/proc/meminfo`. Disks are the block-device mounts
//! listed in `/proc/mounts` (source under `/dev/`, mountpoint at most one
//! level deep, no `/snap`), measured with `statvfs(3)`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::clock::now_iso8601;
use crate::sample::{Reading, SourceKind};
use crate::source::{MetricSource, Platform, SourceInfo};

use super::helpers::round2;

static MEMORY_DISK_INFO: SourceInfo = SourceInfo {
    name: "memory_disk",
    kind: SourceKind::MemoryDisk,
    description: "RAM/swap usage from /proc/meminfo and disk usage via statvfs",
    platform: Platform::Linux,
};

/// RAM and swap figures, in bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub total_ram: u64,
    pub available_ram: u64,
    pub used_ram: u64,
    pub free_ram: u64,
    pub ram_percent_used: f64,
    pub total_swap: u64,
    pub used_swap: u64,
    pub free_swap: u64,
    pub swap_percent_used: f64,
}

/// Usage of one mounted filesystem, in bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent_used: f64,
}

pub struct MemoryDiskSource {
    pub meminfo_path: PathBuf,
    pub mounts_path: PathBuf,
}

impl Default for MemoryDiskSource {
    fn default() -> Self {
        Self {
            meminfo_path: PathBuf::from("/proc/meminfo"),
            mounts_path: PathBuf::from("/proc/mounts"),
        }
    }
}

impl MemoryDiskSource {
    /// RAM and swap usage, `None` when meminfo cannot be read.
    pub fn memory(&self) -> Option<MemoryUsage> {
        let raw = std::fs::read_to_string(&self.meminfo_path).ok()?;
        let kb = parse_meminfo(&raw);
        let field = |key: &str| kb.get(key).copied().unwrap_or(0) * 1024;

        let total_ram = *kb.get("MemTotal")? * 1024;
        let free_ram = field("MemFree");
        let available_ram = if kb.contains_key("MemAvailable") {
            field("MemAvailable")
        } else {
            free_ram
        };
        let used_ram = total_ram.saturating_sub(available_ram);

        let total_swap = field("SwapTotal");
        let free_swap = field("SwapFree");
        let used_swap = total_swap.saturating_sub(free_swap);

        Some(MemoryUsage {
            total_ram,
            available_ram,
            used_ram,
            free_ram,
            ram_percent_used: percent(used_ram, total_ram),
            total_swap,
            used_swap,
            free_swap,
            swap_percent_used: percent(used_swap, total_swap),
        })
    }

    /// Usage per qualifying mountpoint. Mounts that fail `statvfs` are skipped.
    pub fn disks(&self) -> BTreeMap<String, DiskUsage> {
        let Ok(raw) = std::fs::read_to_string(&self.mounts_path) else {
            return BTreeMap::new();
        };
        parse_mounts(&raw)
            .into_iter()
            .filter_map(|m| {
                let (total, free) = match statvfs_bytes(Path::new(&m.mountpoint)) {
                    Ok(v) => v,
                    Err(e) => {
                        log::debug!("statvfs({}) failed: {e}", m.mountpoint);
                        return None;
                    }
                };
                let used = total.saturating_sub(free);
                let disk = DiskUsage {
                    total,
                    used,
                    free,
                    percent_used: percent(used, total),
                };
                Some((m.mountpoint, disk))
            })
            .collect()
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 * 100.0 / total as f64)
}

/// `Key:   value kB` lines into a map of kilobyte values.
fn parse_meminfo(raw: &str) -> BTreeMap<String, u64> {
    raw.lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim().to_string(), value))
        })
        .collect()
}

#[derive(Debug, PartialEq)]
struct Mount {
    device: String,
    mountpoint: String,
}

fn parse_mounts(raw: &str) -> Vec<Mount> {
    raw.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = unescape_mount_field(fields.next()?);
            let mountpoint = unescape_mount_field(fields.next()?);
            Some(Mount { device, mountpoint })
        })
        .filter(|m| m.device.starts_with("/dev/"))
        .filter(|m| !m.mountpoint.starts_with("/snap") && !m.mountpoint.contains("/snap/"))
        .filter(|m| m.mountpoint.trim_end_matches('/').matches('/').count() <= 1)
        .collect()
}

/// Decode the octal escapes the kernel uses for whitespace in mount paths.
fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

#[cfg(unix)]
fn statvfs_bytes(path: &Path) -> std::io::Result<(u64, u64)> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and st is a valid out pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let frsize = st.f_frsize as u64;
    Ok((st.f_blocks as u64 * frsize, st.f_bavail as u64 * frsize))
}

#[cfg(not(unix))]
fn statvfs_bytes(_path: &Path) -> std::io::Result<(u64, u64)> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "statvfs is unix-only",
    ))
}

impl MetricSource for MemoryDiskSource {
    fn info(&self) -> &SourceInfo {
        &MEMORY_DISK_INFO
    }

    fn read(&self) -> Reading {
        let Some(memory) = self.memory() else {
            return Reading::Absent;
        };
        Reading::Present(json!({
            "timestamp": now_iso8601(),
            "system": std::env::consts::OS,
            "machine": std::env::consts::ARCH,
            "memory": memory,
            "disks": self.disks(),
        }))
    }

    fn current_fields(&self, payload: &Value) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("memory".to_string(), payload["memory"].clone());
        m.insert("disks".to_string(), payload["disks"].clone());
        m
    }
}
