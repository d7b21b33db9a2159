//! Durable per-switch status of the latest backup.
//!
//! The table is keyed by switch name and rewritten after every switch and
//! after every mirror attempt, so an interrupted pass leaves the entries of
//! the switches processed so far intact.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};

use crate::error::{BackupError, ErrorKind};

/// Format of [`DeviceStatus::last_backup`].
pub const LAST_BACKUP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of the last backup of a switch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, serde::Serialize, serde::Deserialize)]
pub enum BackupState {
    Success,
    Failed,
}

/// Outcome of mirroring to one sink.
#[derive(Clone, Debug, Default, PartialEq, Eq, Display, serde::Serialize, serde::Deserialize)]
pub enum MirrorStatus {
    #[default]
    #[display("Not attempted")]
    NotAttempted,
    #[display("Skipped: {_0}")]
    Skipped(String),
    #[display("Success")]
    Success,
    #[display("Failed: {_0}")]
    Failed(String),
}

/// Status of one switch.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceStatus {
    pub name: String,
    pub ip: String,
    pub last_backup: String,
    pub status: BackupState,
    /// Why the last backup failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Mirror outcome per sink name.
    #[serde(default)]
    pub mirrors: BTreeMap<String, MirrorStatus>,
}

#[derive(Debug, Display, Error)]
/// Errors on loading or saving the status table.
pub enum StatusError {
    #[display("Accessing status file {path:?} failed: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[display("Status file {path:?} is malformed: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<StatusError> for BackupError {
    fn from(err: StatusError) -> Self {
        BackupError::new(ErrorKind::StatusPersistFailed, err.to_string())
    }
}

/// Status of all switches ever backed up, persisted as JSON.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusTable {
    path: PathBuf,
    entries: BTreeMap<String, DeviceStatus>,
}

impl StatusTable {
    /// Creates an empty table persisted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Loads the table at `path`. A missing file yields an empty table.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StatusError> {
        let path = path.into();
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!(target: "status", "Switch status file not found, initializing empty status");
                return Ok(Self::new(path));
            }
            Err(source) => return Err(StatusError::Io { path, source }),
        };

        match serde_json::from_slice(&content) {
            Ok(entries) => Ok(Self { path, entries }),
            Err(source) => Err(StatusError::Json { path, source }),
        }
    }

    /// Writes the table through a temporary file and renames it into place.
    pub fn save(&self) -> Result<(), StatusError> {
        let io_err = |source| StatusError::Io {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(&self.entries).map_err(|source| StatusError::Json {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        log::debug!(target: "status", "Switch status saved to {}", self.path.display());

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&DeviceStatus> {
        self.entries.get(name)
    }

    /// Inserts or replaces the entry of `status.name`.
    pub fn upsert(&mut self, status: DeviceStatus) {
        self.entries.insert(status.name.clone(), status);
    }

    /// Records `status` as outcome of `sink` for every switch.
    pub fn set_mirror_status(&mut self, sink: &str, status: &MirrorStatus) {
        for entry in self.entries.values_mut() {
            entry.mirrors.insert(sink.to_string(), status.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceStatus> {
        self.entries.values()
    }
}

impl fmt::Display for StatusTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<20} {:<16} {:<20} {:<8} Mirrors",
            "Name", "IP", "Last Backup", "Status"
        )?;
        for entry in self.iter() {
            let mirrors = entry
                .mirrors
                .iter()
                .map(|(sink, status)| format!("{sink}: {status}"))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                f,
                "{:<20} {:<16} {:<20} {:<8} {mirrors}",
                entry.name,
                entry.ip,
                entry.last_backup,
                entry.status.to_string(),
            )?;
        }
        Ok(())
    }
}
