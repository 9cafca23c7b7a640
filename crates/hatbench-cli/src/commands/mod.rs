pub mod bench;
pub mod current;
pub mod monitor;
pub mod scan;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hatbench_core::power::DEFAULT_POWER_CSV;
use hatbench_core::{PowerMonitor, PowerMonitorConfig};

/// Environment variable naming the state directory.
pub const STATE_DIR_ENV: &str = "HATBENCH_STATE_DIR";

/// Parse a duration string like "5m", "30s", "1h", "100ms". Bare numbers are seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        (s, 1000)
    };

    let value: u64 = numeric
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {s}"))?;
    let millis = value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("invalid duration: {s}"))?;
    Ok(Duration::from_millis(millis))
}

/// State directory: the flag, else `$HATBENCH_STATE_DIR`, else the working directory.
pub fn state_dir(flag: Option<&Path>) -> PathBuf {
    resolve_state_dir(flag, std::env::var_os(STATE_DIR_ENV).map(PathBuf::from))
}

fn resolve_state_dir(flag: Option<&Path>, env: Option<PathBuf>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or(env)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Power monitor writing its CSV into `state_dir`.
pub fn power_monitor(state_dir: &Path, program: Option<&str>) -> Arc<PowerMonitor> {
    let mut config = PowerMonitorConfig {
        output_path: state_dir.join(DEFAULT_POWER_CSV),
        ..Default::default()
    };
    if let Some(p) = program {
        config.program = PathBuf::from(p);
    }
    Arc::new(PowerMonitor::new(config))
}

/// Power monitor for a run, or `None` when `--no-power` was given.
pub fn optional_power_monitor(
    state_dir: &Path,
    program: Option<&str>,
    no_power: bool,
) -> Option<Arc<PowerMonitor>> {
    (!no_power).then(|| power_monitor(state_dir, program))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hatbench_core::{Reading, SourceKind, default_sources};

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("100ms"), Ok(Duration::from_millis(100)));
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_duration_bare_seconds() {
        assert_eq!(parse_duration("60"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration(" 7 "), Ok(Duration::from_secs(7)));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert!(parse_duration("18446744073709551615h").is_err());
        assert!(parse_duration("18446744073709551615s").is_err());
        assert_eq!(
            parse_duration("18446744073709551615ms"),
            Ok(Duration::from_millis(u64::MAX))
        );
    }

    #[test]
    fn test_state_dir_precedence() {
        let env = Some(PathBuf::from("/var/lib/hatbench"));
        assert_eq!(
            resolve_state_dir(Some(Path::new("/tmp/x")), env.clone()),
            PathBuf::from("/tmp/x")
        );
        assert_eq!(
            resolve_state_dir(None, env),
            PathBuf::from("/var/lib/hatbench")
        );
        assert_eq!(resolve_state_dir(None, None), PathBuf::from("."));
    }

    #[test]
    fn test_power_monitor_csv_in_state_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let pm = power_monitor(tmp.path(), Some("/opt/joularcore"));
        assert_eq!(pm.output_path(), tmp.path().join(DEFAULT_POWER_CSV));
        assert_eq!(pm.config().program, PathBuf::from("/opt/joularcore"));
    }

    #[test]
    fn test_no_power_ignores_leftover_csv() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(DEFAULT_POWER_CSV),
            "Date,Total Power\n2026-01-01 10:00:00,4.2\n",
        )
        .unwrap();

        let live = default_sources(optional_power_monitor(tmp.path(), None, false));
        assert!(live[0].read().is_present());

        let off = default_sources(optional_power_monitor(tmp.path(), None, true));
        assert_eq!(off[0].kind(), SourceKind::Energy);
        assert_eq!(off[0].read(), Reading::Absent);
    }
}
