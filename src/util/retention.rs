use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{BackupError, ErrorKind};
use crate::snapshot::SNAPSHOT_EXTENSION;

/// Number of snapshots kept per switch if not configured otherwise.
pub const DEFAULT_MAX_BACKUPS: usize = 5;

/// Configure retention of snapshots.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct RetentionConfig {
    /// Defines how many snapshots to keep per switch.
    ///
    /// The newest snapshots are kept, older ones are deleted oldest first.
    pub max_backups: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

/// Rolling window of the newest snapshots of every switch.
#[derive(Copy, Clone, Debug)]
pub struct Retention {
    pub config: RetentionConfig,
}

impl From<RetentionConfig> for Retention {
    fn from(config: RetentionConfig) -> Self {
        Self::new(config)
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self::new(RetentionConfig::default())
    }
}

impl Retention {
    pub fn new(config: RetentionConfig) -> Self {
        Self { config }
    }

    /// Deletes the oldest snapshots in `device_dir` until at most
    /// [`max_backups`](RetentionConfig::max_backups) remain.
    ///
    /// Failures don't stop the rotation, they are logged and returned as
    /// [`ErrorKind::RetentionIo`] warnings.
    pub fn enforce(&self, device_dir: &Path) -> Vec<BackupError> {
        let files = match snapshot_files(device_dir) {
            Ok(files) => files,
            Err(e) => {
                log::error!(target: "retention", "Failed to manage retention for {}: {e}", device_dir.display());
                return vec![BackupError::new(
                    ErrorKind::RetentionIo,
                    format!("Listing {} failed: {e}", device_dir.display()),
                )];
            }
        };

        let mut warnings = Vec::new();
        for expired in expired(files, self.config.max_backups) {
            match fs::remove_file(&expired) {
                Ok(()) => {
                    log::info!(target: "retention", "Removed old backup {}", expired.display())
                }
                Err(e) => {
                    log::error!(target: "retention", "Failed to remove old backup {}: {e}", expired.display());
                    warnings.push(BackupError::new(
                        ErrorKind::RetentionIo,
                        format!("Removing {} failed: {e}", expired.display()),
                    ));
                }
            }
        }
        warnings
    }
}

/// Length of a rendered [`TIMESTAMP_FORMAT`](crate::snapshot::TIMESTAMP_FORMAT).
const TIMESTAMP_LEN: usize = 15;

/// Timestamp suffix of a snapshot file name.
fn timestamp(path: &Path) -> &str {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    stem.len()
        .checked_sub(TIMESTAMP_LEN)
        .and_then(|start| stem.get(start..))
        .unwrap_or(stem)
}

/// Snapshot files of a switch directory, newest first.
///
/// Ordered by the embedded timestamp, which sorts lexicographically, so a
/// changed switch address doesn't disturb the order.
pub fn snapshot_files(device_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(device_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_snapshot = path
            .extension()
            .is_some_and(|ext| ext == SNAPSHOT_EXTENSION);
        if is_snapshot && entry.file_type()?.is_file() {
            files.push(path);
        }
    }

    files.sort_by(|a, b| {
        (timestamp(b), b.file_name()).cmp(&(timestamp(a), a.file_name()))
    });
    Ok(files)
}

/// Splits off everything beyond the newest `max_backups` of `newest_first`,
/// returned oldest first.
fn expired(mut newest_first: Vec<PathBuf>, max_backups: usize) -> Vec<PathBuf> {
    let mut expired = Vec::new();
    while newest_first.len() > max_backups {
        if let Some(oldest) = newest_first.pop() {
            expired.push(oldest);
        }
    }
    expired
}
