//! Filesystem janitor for the stream output root.
//!
//! Coarse backstop independent of per-session cleanup: sessions delete their
//! own output on teardown, but a crash can leave orphaned segment files
//! behind. The janitor sweeps the output root once at startup and then on a
//! fixed interval, deleting anything older than the retention threshold.
//!
//! Races with session teardown are expected: a file can vanish between stat
//! and unlink. Every failure is logged and skipped, never fatal to the scan.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::JanitorConfig;

/// Start the background sweep task. Runs one sweep immediately.
pub fn start(config: JanitorConfig, output_root: PathBuf) -> tokio::task::JoinHandle<()> {
    let retention = Duration::from_secs(config.retention_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let removed = sweep(&output_root, retention);
            if removed > 0 {
                info!(removed, "Janitor removed stale stream files");
            }
        }
    })
}

/// Delete every file under `root` whose modification time exceeds
/// `retention`, then prune directories left empty. Returns the number of
/// files removed.
pub fn sweep(root: &Path, retention: Duration) -> usize {
    let mut removed = 0;

    for entry in WalkDir::new(root).min_depth(1).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }

        let age = entry
            .metadata()
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|mtime| mtime.elapsed().ok());

        match age {
            Some(age) if age > retention => match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(path = ?entry.path(), age_secs = age.as_secs(), "Removed stale file");
                    removed += 1;
                }
                // The owning session may have deleted it between stat and
                // unlink; that is not a problem.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = ?entry.path(), "Failed to remove stale file: {}", e),
            },
            _ => {}
        }
    }

    // Prune session directories the sweep emptied. Non-empty ones fail the
    // remove and are kept.
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                let _ = std::fs::remove_dir(entry.path());
            }
        }
    }

    removed
}
