//! Commit a workload's temporary recording to its final path.
//!
//! Workloads record into `<stem>.tmp<ext>` next to the final artifact and
//! call [`finalize`] once the recorder has closed the file. The commit is a
//! rename, so the final path never holds a half-written file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{BenchError, Result};

/// Temporary sibling of `final_path`: `out/run_1.mp4` -> `out/run_1.tmp.mp4`.
pub fn temporary_path_for(final_path: &Path) -> PathBuf {
    let stem = final_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match final_path.extension() {
        Some(ext) => format!("{stem}.tmp.{}", ext.to_string_lossy()),
        None => format!("{stem}.tmp"),
    };
    final_path.with_file_name(name)
}

/// Move `temp_path` over `final_path`.
///
/// - missing temp file: [`BenchError::MissingOutput`]
/// - zero-byte temp file: removed, then [`BenchError::EmptyOutput`]
/// - otherwise the destination directory is created and the file renamed
pub fn finalize(temp_path: &Path, final_path: &Path) -> Result<PathBuf> {
    let meta = match fs::metadata(temp_path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(BenchError::MissingOutput(temp_path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    if meta.len() == 0 {
        if let Err(e) = fs::remove_file(temp_path) {
            log::warn!("could not remove empty recording {}: {e}", temp_path.display());
        }
        return Err(BenchError::EmptyOutput(temp_path.to_path_buf()));
    }

    if let Some(parent) = final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::rename(temp_path, final_path)?;
    log::info!("recording saved to {}", final_path.display());
    Ok(final_path.to_path_buf())
}
