//! Mirror sinks receiving a copy of the newest snapshot of every switch.
//!
//! Currently the following sinks are implemented:
//!
//! - [GitHubSink]: commits the snapshots into a GitHub repository.
//! - [S3Sink]: uploads the snapshots into an S3 compatible bucket (e.g. Wasabi).
//!
//! Sinks are only invoked by the orchestrator once every switch of a pass
//! was backed up, so an incomplete set of snapshots is never pushed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

use crate::error::{BackupError, ErrorKind};
use crate::status::MirrorStatus;
use crate::util::retention::snapshot_files;

pub mod github;
pub mod s3;

pub use github::{GitConfig, GitHubSink};
pub use s3::{S3Sink, StorageConfig};

#[derive(Debug, Display, Error, From)]
/// Errors on mirroring a snapshot.
pub enum MirrorError {
    /// The sink is enabled but not fully configured.
    #[display("{_0}")]
    Settings(#[error(ignore)] String),
    /// Reading the snapshot failed.
    #[display("Reading {path:?} failed: {source}")]
    Io { path: PathBuf, source: io::Error },
    /// The request didn't reach the remote.
    #[from]
    #[display("Request failed: {_0}")]
    Request(reqwest::Error),
    /// The remote answered with an error.
    #[display("Remote rejected upload with {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl From<MirrorError> for BackupError {
    fn from(err: MirrorError) -> Self {
        BackupError::new(ErrorKind::MirrorUploadFailed, err.to_string())
    }
}

impl MirrorError {
    /// Turns an unsuccessful response into [MirrorError::Rejected].
    fn rejected(response: reqwest::blocking::Response) -> Self {
        let status = response.status();
        let mut body = response.text().unwrap_or_default();
        body.truncate(200);
        Self::Rejected { status, body }
    }
}

/// Generic mirror sink.
pub trait MirrorSink: Send + Sync {
    /// Name under which the outcome is recorded in the status table.
    fn name(&self) -> &str;

    /// Uploads `file` to `relative_path` (always `/` separated) on the remote.
    fn upload(&self, file: &Path, relative_path: &str) -> Result<(), MirrorError>;
}

/// A configured sink, or the reason it can't be used.
pub enum MirrorSlot {
    Active(Box<dyn MirrorSink>),
    Skipped { name: String, reason: String },
}

impl MirrorSlot {
    pub fn name(&self) -> &str {
        match self {
            Self::Active(sink) => sink.name(),
            Self::Skipped { name, .. } => name,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
/// Configuration of all available mirror sinks.
pub struct MirrorsConfig {
    /// Configuration of the [GitHubSink].
    #[serde(default)]
    pub git: GitConfig,

    /// Configuration of the [S3Sink].
    #[serde(default)]
    pub storage: StorageConfig,
}

impl MirrorsConfig {
    /// Builds the enabled sinks in upload order, git before storage.
    pub fn build(&self) -> Vec<MirrorSlot> {
        let git = self
            .git
            .enabled
            .then(|| slot(github::NAME, GitHubSink::new(&self.git)));
        let storage = self
            .storage
            .enabled
            .then(|| slot(s3::NAME, S3Sink::new(&self.storage)));

        git.into_iter().chain(storage).collect()
    }
}

fn slot<S: MirrorSink + 'static>(name: &str, sink: Result<S, MirrorError>) -> MirrorSlot {
    match sink {
        Ok(sink) => MirrorSlot::Active(Box::new(sink)),
        Err(e) => {
            log::warn!(target: "mirror", "Mirror {name} skipped: {e}");
            MirrorSlot::Skipped {
                name: name.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

/// A snapshot selected for mirroring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorFile {
    pub path: PathBuf,
    /// `<switch dir>/<file name>`.
    pub relative_path: String,
}

/// Newest snapshot of every switch directory below `backup_root`.
pub fn latest_snapshots(backup_root: &Path) -> io::Result<Vec<MirrorFile>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(backup_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    let mut files = Vec::new();
    for dir in dirs {
        let Some(newest) = snapshot_files(&dir)?.into_iter().next() else {
            continue;
        };
        let names = (
            dir.file_name().and_then(|n| n.to_str()),
            newest.file_name().and_then(|n| n.to_str()),
        );
        match names {
            (Some(dir_name), Some(file_name)) => {
                let relative_path = format!("{dir_name}/{file_name}");
                files.push(MirrorFile {
                    path: newest,
                    relative_path,
                });
            }
            _ => log::warn!(target: "mirror", "Skipping non UTF-8 snapshot {}", newest.display()),
        }
    }

    Ok(files)
}

/// Uploads every file to `sink`, collecting failures instead of stopping.
pub fn mirror_files(sink: &dyn MirrorSink, files: &[MirrorFile]) -> MirrorStatus {
    let failures: Vec<String> = files
        .iter()
        .filter_map(|file| {
            let result = sink.upload(&file.path, &file.relative_path);
            match result {
                Ok(()) => {
                    log::debug!(target: "mirror", "Mirrored {} to {}", file.relative_path, sink.name());
                    None
                }
                Err(e) => {
                    log::error!(target: "mirror", "Mirroring {} to {} failed: {e}", file.relative_path, sink.name());
                    Some(format!("{}: {e}", file.relative_path))
                }
            }
        })
        .collect();

    if failures.is_empty() {
        log::info!(target: "mirror", "{} upload successful", sink.name());
        MirrorStatus::Success
    } else {
        MirrorStatus::Failed(failures.join("; "))
    }
}

/// Reads a snapshot for upload.
fn read_snapshot(path: &Path) -> Result<Vec<u8>, MirrorError> {
    fs::read(path).map_err(|source| MirrorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording {
        uploads: Mutex<Vec<String>>,
        fail: Option<&'static str>,
    }

    impl MirrorSink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn upload(&self, _file: &Path, relative_path: &str) -> Result<(), MirrorError> {
            self.uploads.lock().unwrap().push(relative_path.to_string());
            match self.fail {
                Some(path) if path == relative_path => {
                    Err(MirrorError::Settings("boom".to_string()))
                }
                _ => Ok(()),
            }
        }
    }

    fn setup() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for (dir, files) in [
            ("sw1", &["sw1_10.0.0.1_20240101_020000.txt", "sw1_10.0.0.1_20240102_020000.txt"][..]),
            ("sw2", &["sw2_10.0.0.2_20240101_020000.txt"][..]),
            ("empty", &[][..]),
        ] {
            fs::create_dir(root.path().join(dir)).unwrap();
            for file in files {
                fs::write(root.path().join(dir).join(file), "hostname\n").unwrap();
            }
        }
        root
    }

    #[test]
    fn picks_newest_snapshot_per_switch() {
        let root = setup();
        let files = latest_snapshots(root.path()).unwrap();
        let relative: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();

        assert_eq!(
            relative,
            [
                "sw1/sw1_10.0.0.1_20240102_020000.txt",
                "sw2/sw2_10.0.0.2_20240101_020000.txt",
            ]
        );
    }

    #[test]
    fn failure_of_one_file_does_not_stop_the_others() {
        let root = setup();
        let files = latest_snapshots(root.path()).unwrap();
        let sink = Recording {
            fail: Some("sw1/sw1_10.0.0.1_20240102_020000.txt"),
            ..Default::default()
        };

        let status = mirror_files(&sink, &files);

        assert_eq!(sink.uploads.lock().unwrap().len(), 2);
        assert!(
            matches!(status, MirrorStatus::Failed(ref reason) if reason.starts_with("sw1/"))
        );
    }

    #[test]
    fn disabled_sinks_are_not_built() {
        assert!(MirrorsConfig::default().build().is_empty());
    }

    #[test]
    fn incomplete_sinks_are_skipped_in_order() {
        let config = MirrorsConfig {
            git: GitConfig {
                enabled: true,
                ..Default::default()
            },
            storage: StorageConfig {
                enabled: true,
                ..Default::default()
            },
        };

        let slots = config.build();

        let names: Vec<_> = slots.iter().map(MirrorSlot::name).collect();
        assert_eq!(names, [github::NAME, s3::NAME]);
        assert!(slots
            .iter()
            .all(|slot| matches!(slot, MirrorSlot::Skipped { .. })));
    }
}
