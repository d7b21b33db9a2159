//! Storage of fetched configurations as snapshot files.
//!
//! A snapshot of switch `name` at `address` lives at
//! `<backup_root>/<name>/<name>_<address>_<YYYYMMDD_HHMMSS>.txt`,
//! where `name` and `address` are [sanitized](sanitize) first.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use derive_more::{Display, Error};

use crate::error::{BackupError, ErrorKind};

/// File extension of snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "txt";

/// Fixed width, so lexicographic order is chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Reduces `raw` to a token that is safe as a single path component.
///
/// Only ASCII alphanumerics and `-`, `_`, `.` survive. Leading dots are
/// stripped, so the result is never `.`, `..` or a hidden file.
pub fn sanitize(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    filtered.trim_start_matches('.').to_string()
}

#[derive(Debug, Display, Error)]
/// Errors on writing a snapshot.
pub enum SnapshotError {
    /// The device name has no usable characters left after sanitizing.
    #[display("Invalid switch name: {_0:?}")]
    InvalidName(#[error(ignore)] String),
    /// Creating the directory or file failed.
    #[display("Writing snapshot {path:?} failed: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl From<SnapshotError> for BackupError {
    fn from(err: SnapshotError) -> Self {
        BackupError::new(ErrorKind::SnapshotWriteFailed, err.to_string())
    }
}

/// Layout of the backup directory tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if root.is_relative() {
            log::warn!(target: "snapshot", "backup_root is relative: {}", root.display());
        }

        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all snapshots of one switch.
    pub fn device_dir(&self, name: &str) -> Result<PathBuf, SnapshotError> {
        let safe_name = sanitize(name);
        if safe_name.is_empty() {
            return Err(SnapshotError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(safe_name))
    }

    /// Path of the snapshot of a switch taken at `timestamp`.
    pub fn snapshot_path(
        &self,
        name: &str,
        address: &str,
        timestamp: NaiveDateTime,
    ) -> Result<PathBuf, SnapshotError> {
        let dir = self.device_dir(name)?;
        let file_name = format!(
            "{}_{}_{}.{SNAPSHOT_EXTENSION}",
            sanitize(name),
            sanitize(address),
            timestamp.format(TIMESTAMP_FORMAT)
        );
        Ok(dir.join(file_name))
    }

    /// Writes `config` as a new snapshot and returns its path.
    ///
    /// A snapshot taken in the same second as the previous one replaces it.
    pub fn write(&self, name: &str, address: &str, config: &str) -> Result<PathBuf, SnapshotError> {
        self.write_at(name, address, config, Local::now().naive_local())
    }

    /// Writes `config` as snapshot taken at `timestamp`.
    pub fn write_at(
        &self,
        name: &str,
        address: &str,
        config: &str,
        timestamp: NaiveDateTime,
    ) -> Result<PathBuf, SnapshotError> {
        let path = self.snapshot_path(name, address, timestamp)?;
        let io_err = |source| SnapshotError::Io {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        if path.exists() {
            log::debug!(target: "snapshot", "Replacing snapshot of the same second: {}", path.display());
        }
        let mut file = File::create(&path).map_err(io_err)?;
        file.write_all(config.as_bytes()).map_err(io_err)?;
        restrict_permissions(&path);
        log::debug!(target: "snapshot", "Saved snapshot: {}", path.display());

        Ok(path)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        log::warn!(target: "snapshot", "Failed to set permissions of {}: {e}", path.display());
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize("core-sw_01.lab"), "core-sw_01.lab");
        assert_eq!(sanitize("10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn sanitize_removes_traversal() {
        assert_eq!(sanitize("../evil"), "evil");
        assert_eq!(sanitize("..\\..\\evil"), "evil");
        assert_eq!(sanitize("/etc/passwd"), "etcpasswd");
        assert_eq!(sanitize(".."), "");
        assert_eq!(sanitize("sw 1/../2"), "sw1..2");
    }

    #[test]
    fn snapshot_path_stays_below_root() {
        let store = SnapshotStore::new("/backups");
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(2, 0, 5)
            .unwrap();
        let path = store.snapshot_path("../evil", "10.0.0.1/../x", ts).unwrap();

        assert_eq!(
            path,
            PathBuf::from("/backups/evil/evil_10.0.0.1..x_20240301_020005.txt")
        );
    }

    #[test]
    fn unusable_name_is_rejected() {
        let store = SnapshotStore::new("/backups");
        assert!(matches!(
            store.device_dir("../"),
            Err(SnapshotError::InvalidName(_))
        ));
    }

    #[test]
    fn write_creates_device_directory() {
        let root = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(root.path());

        let path = store.write("sw1", "10.0.0.1", "hostname sw1\n").unwrap();

        assert_eq!(path.parent().unwrap(), root.path().join("sw1"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "hostname sw1\n");
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("sw1_10.0.0.1_"));
        assert!(file_name.ends_with(".txt"));
    }

    #[test]
    fn snapshot_of_same_second_replaces_previous() {
        let root = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(root.path());
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(2, 0, 5)
            .unwrap();

        let first = store.write_at("sw1", "10.0.0.1", "hostname old\n", ts).unwrap();
        let second = store.write_at("sw1", "10.0.0.1", "hostname new\n", ts).unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&second).unwrap(), "hostname new\n");
        assert_eq!(fs::read_dir(root.path().join("sw1")).unwrap().count(), 1);
    }
}
