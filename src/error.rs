//! Structured error kinds shared by all components.
//!
//! Component errors (e.g. [`InventoryError`](crate::inventory::InventoryError) or
//! [`FetchError`](crate::device::FetchError)) stay specific to their module and
//! are folded into a [`BackupError`] once they reach the orchestrator, so that
//! callers can branch on the [`ErrorKind`] instead of parsing messages.

use derive_more::{Display, Error};

/// Classification of everything that can go wrong during a pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// The inventory file does not exist.
    #[display("inventory not found")]
    InventoryNotFound,
    /// The inventory lacks required columns or values.
    #[display("inventory schema invalid")]
    InventorySchemaInvalid,
    /// The reachability probe failed. Never retried.
    #[display("device unreachable")]
    DeviceUnreachable,
    /// Login or configuration download failed on every attempt.
    #[display("device authentication or fetch failed")]
    DeviceAuthOrFetchFailed,
    /// The fetched configuration could not be stored.
    #[display("snapshot write failed")]
    SnapshotWriteFailed,
    /// Rotating old snapshots failed. Only a warning, the backup itself succeeded.
    #[display("retention i/o error")]
    RetentionIo,
    /// Mirroring a snapshot to a remote sink failed.
    #[display("mirror upload failed")]
    MirrorUploadFailed,
    /// The status table could not be written.
    #[display("status persist failed")]
    StatusPersistFailed,
}

/// An [`ErrorKind`] together with a human readable detail.
#[derive(Clone, Debug, PartialEq, Eq, Display, Error)]
#[display("{kind}: {detail}")]
pub struct BackupError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl BackupError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_detail() {
        let err = BackupError::new(ErrorKind::DeviceUnreachable, "10.0.0.1 timed out");
        assert_eq!(err.to_string(), "device unreachable: 10.0.0.1 timed out");
        assert_eq!(err.kind(), ErrorKind::DeviceUnreachable);
    }
}
