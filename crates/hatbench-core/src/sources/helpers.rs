//! Shared helpers used by multiple metric source implementations.

use std::path::Path;

// ---------------------------------------------------------------------------
// Shared command utilities
// ---------------------------------------------------------------------------

/// Check if a command exists by running `which`.
pub fn command_exists(name: &str) -> bool {
    std::process::Command::new("which")
        .arg(name)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run a subprocess command and return its stdout as a `String`.
///
/// Returns `None` if the command fails to execute or exits with a non-zero
/// status. Used by sources that shell out to `vcgencmd` or `hailortcli`.
pub fn run_command(program: &str, args: &[&str]) -> Option<String> {
    let output = std::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ---------------------------------------------------------------------------
// sysfs / procfs
// ---------------------------------------------------------------------------

/// Read a small text file, trimmed. `None` if missing or empty.
pub fn read_trimmed(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let v = raw.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

/// Sorted entries of `dir` whose file name starts with `prefix`.
pub fn sorted_entries(dir: &Path, prefix: &str) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    out.sort();
    out
}

/// Median of a non-empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = v.len() / 2;
    Some(if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    })
}

/// Round to two decimal places.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn round2_rounds() {
        assert_eq!(round2(41.236), 41.24);
        assert_eq!(round2(-3.001), -3.0);
    }

    #[test]
    fn read_trimmed_missing_and_blank() {
        let tmp = tempfile::tempdir().unwrap();
        let blank = tmp.path().join("blank");
        std::fs::write(&blank, "  \n").unwrap();
        assert!(read_trimmed(&blank).is_none());
        assert!(read_trimmed(&tmp.path().join("nope")).is_none());

        let val = tmp.path().join("val");
        std::fs::write(&val, "48312\n").unwrap();
        assert_eq!(read_trimmed(&val).as_deref(), Some("48312"));
    }

    #[test]
    fn sorted_entries_filters_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        for n in ["thermal_zone1", "thermal_zone0", "cooling_device0"] {
            std::fs::create_dir(tmp.path().join(n)).unwrap();
        }
        let got = sorted_entries(tmp.path(), "thermal_zone");
        let names: Vec<_> = got
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["thermal_zone0", "thermal_zone1"]);
    }

    #[test]
    fn command_exists_false_for_nonsense() {
        assert!(!command_exists("definitely-not-a-real-binary-hatbench"));
    }
}
