//! Temp-file-then-rename writes.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use reportharvest_shared::{HarvestError, Result};
use tracing::{debug, warn};
use uuid::Uuid;

/// Removes the temp file unless disarmed after a successful rename.
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to remove temp file");
                }
            }
        }
    }
}

pub(crate) fn write_atomic<F>(dir: &Path, key: &str, target: &Path, write: F) -> Result<PathBuf>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let temp = dir.join(format!(".{key}.{}.tmp", Uuid::now_v7()));
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp)
        .map_err(|e| HarvestError::io(&temp, e))?;
    let mut guard = TempGuard {
        path: temp,
        armed: true,
    };

    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer.flush().map_err(|e| HarvestError::io(&guard.path, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| HarvestError::io(&guard.path, e.into_error()))?;
    file.sync_all().map_err(|e| HarvestError::io(&guard.path, e))?;
    drop(file);

    std::fs::rename(&guard.path, target).map_err(|e| HarvestError::io(target, e))?;
    guard.armed = false;

    debug!(path = %target.display(), "output published");
    Ok(target.to_path_buf())
}
