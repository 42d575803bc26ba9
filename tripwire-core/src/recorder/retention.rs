//! Evidence directory retention sweep.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Delete regular files in `dir` whose modification time is older than
/// `retention_days`. Returns the paths removed. Unreadable entries are
/// skipped, not fatal.
pub fn purge_old_files(dir: &Path, retention_days: u64) -> std::io::Result<Vec<PathBuf>> {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days * SECONDS_PER_DAY))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    purge_older_than(dir, cutoff)
}

fn purge_older_than(dir: &Path, cutoff: SystemTime) -> std::io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if modified < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "purged expired evidence file");
                    removed.push(path);
                }
                Err(err) => warn!(path = %path.display(), error = %err, "purge failed"),
            }
        }
    }
    Ok(removed)
}
