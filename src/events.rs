//! Progress of a backup pass for whoever is interested.

use std::path::PathBuf;
use std::sync::mpsc::Sender;

use derive_more::Display;

use crate::error::BackupError;
use crate::status::MirrorStatus;

/// What started a pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum Trigger {
    #[display("manual")]
    Manual,
    #[display("automatic")]
    Scheduled,
}

/// Overall result of a pass.
#[derive(Clone, Debug, PartialEq, Eq, Display)]
pub enum PassOutcome {
    /// Another pass held the run guard, nothing was done.
    #[display("already running")]
    AlreadyRunning,
    /// The pass stopped before any switch was attempted.
    #[display("aborted: {_0}")]
    Aborted(BackupError),
    /// Every switch was backed up.
    #[display("completed")]
    Completed,
    /// At least one switch failed.
    #[display("partially completed")]
    PartiallyCompleted,
}

/// Events emitted while a pass runs, in this order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackupEvent {
    AlreadyRunning {
        trigger: Trigger,
    },
    PassStarted {
        trigger: Trigger,
    },
    DeviceStarted {
        name: String,
        address: String,
        /// 1-based position in the inventory.
        index: usize,
        total: usize,
    },
    DeviceCompleted {
        name: String,
        result: Result<PathBuf, BackupError>,
    },
    MirrorCompleted {
        sink: String,
        status: MirrorStatus,
    },
    PassCompleted {
        trigger: Trigger,
        outcome: PassOutcome,
    },
}

/// Receives [BackupEvent]s.
pub trait BackupObserver: Send + Sync {
    fn notify(&self, event: &BackupEvent);
}

impl BackupObserver for Sender<BackupEvent> {
    fn notify(&self, event: &BackupEvent) {
        // a hung up receiver isn't the pass's problem
        let _ = self.send(event.clone());
    }
}
