//! One backup pass over the whole inventory.
//!
//! A pass runs behind the [RunGuard] and processes the switches one after the
//! other in inventory order:
//!
//! 1. fetch the running configuration ([ConfigFetcher]),
//! 2. store it as snapshot ([SnapshotStore]) and rotate old ones ([Retention]),
//! 3. record the outcome in the [StatusTable] and persist it right away.
//!
//! A failing switch never stops the pass. Only if every switch succeeded the
//! newest snapshots are handed to the mirror sinks, git before storage.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Local;

use crate::credentials::{CredentialStore, Credentials};
use crate::device::ConfigFetcher;
use crate::error::{BackupError, ErrorKind};
use crate::events::{BackupEvent, BackupObserver, PassOutcome, Trigger};
use crate::guard::RunGuard;
use crate::inventory::{Inventory, InventoryRecord};
use crate::mirror::{latest_snapshots, mirror_files, MirrorSlot};
use crate::snapshot::SnapshotStore;
use crate::status::{BackupState, DeviceStatus, MirrorStatus, StatusTable, LAST_BACKUP_FORMAT};
use crate::util::retention::{Retention, RetentionConfig};

/// Locations and limits of a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// CSV inventory, re-read at the start of every pass.
    pub inventory: PathBuf,
    /// Directory containing one sub directory per switch.
    pub backup_root: PathBuf,
    pub retention: RetentionConfig,
}

/// Outcome of one switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceReport {
    pub name: String,
    pub address: String,
    /// Path of the new snapshot.
    pub result: Result<PathBuf, BackupError>,
}

/// Everything that happened during a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub trigger: Trigger,
    pub outcome: PassOutcome,
    pub devices: Vec<DeviceReport>,
    /// Outcome per mirror sink, empty if the mirrors were not attempted.
    pub mirrors: Vec<(String, MirrorStatus)>,
    /// Errors that didn't affect the outcome, e.g. failing to persist the status.
    pub warnings: Vec<BackupError>,
}

impl RunReport {
    fn new(trigger: Trigger, outcome: PassOutcome) -> Self {
        Self {
            trigger,
            outcome,
            devices: Vec::new(),
            mirrors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.devices.iter().filter(|d| d.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.devices.iter().filter(|d| d.result.is_err()).count()
    }
}

/// Runs backup passes. Share it behind an [Arc](std::sync::Arc) between the
/// scheduler and manual triggers.
pub struct BackupOrchestrator {
    settings: OrchestratorSettings,
    store: SnapshotStore,
    retention: Retention,
    fetcher: ConfigFetcher,
    credentials: Box<dyn CredentialStore>,
    mirrors: Vec<MirrorSlot>,
    observers: Vec<Box<dyn BackupObserver>>,
    status: Mutex<StatusTable>,
    guard: RunGuard,
}

impl BackupOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        fetcher: ConfigFetcher,
        credentials: impl CredentialStore + 'static,
        status: StatusTable,
    ) -> Self {
        Self {
            store: SnapshotStore::new(&settings.backup_root),
            retention: Retention::new(settings.retention),
            settings,
            fetcher,
            credentials: Box::new(credentials),
            mirrors: Vec::new(),
            observers: Vec::new(),
            status: Mutex::new(status),
            guard: RunGuard::new(),
        }
    }

    /// Appends mirror sinks, they are invoked in the order added.
    pub fn with_mirrors(mut self, mirrors: impl IntoIterator<Item = MirrorSlot>) -> Self {
        self.mirrors.extend(mirrors);
        self
    }

    pub fn with_observer(mut self, observer: impl BackupObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Whether a pass is in progress right now.
    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    /// Copy of the current status table.
    pub fn status(&self) -> StatusTable {
        self.lock_status().clone()
    }

    /// Runs a full pass unless another one is in progress.
    ///
    /// Never panics on backup errors, they are logged and folded into the
    /// returned [RunReport].
    pub fn run(&self, trigger: Trigger) -> RunReport {
        let Some(permit) = self.guard.try_acquire() else {
            log::warn!(target: "orchestrator", "Backup already in progress, {trigger} backup skipped");
            self.emit(BackupEvent::AlreadyRunning { trigger });
            return RunReport::new(trigger, PassOutcome::AlreadyRunning);
        };

        log::info!(target: "orchestrator", "Starting {trigger} backup");
        self.emit(BackupEvent::PassStarted { trigger });

        let report = self.run_pass(trigger);
        permit.release();

        log::info!(
            target: "orchestrator",
            "{trigger} backup {}: {} succeeded, {} failed",
            report.outcome,
            report.succeeded(),
            report.failed()
        );
        self.emit(BackupEvent::PassCompleted {
            trigger,
            outcome: report.outcome.clone(),
        });

        report
    }

    fn run_pass(&self, trigger: Trigger) -> RunReport {
        let inventory = match Inventory::read(&self.settings.inventory) {
            Ok(inventory) => inventory,
            Err(e) => {
                log::error!(target: "orchestrator", "{e}");
                return RunReport::new(trigger, PassOutcome::Aborted(e.into()));
            }
        };

        let defaults = self.credentials.default_credentials();
        let mut report = RunReport::new(trigger, PassOutcome::Completed);

        let total = inventory.len();
        for (index, record) in inventory.iter().enumerate() {
            log::info!(target: "orchestrator", "Backing up {} ({}) [{}/{total}]", record.name, record.address, index + 1);
            self.emit(BackupEvent::DeviceStarted {
                name: record.name.clone(),
                address: record.address.clone(),
                index: index + 1,
                total,
            });

            let result = self.backup_device(record, &defaults, &mut report.warnings);
            if let Err(e) = &result {
                log::error!(target: "orchestrator", "Backup of {} ({}) failed: {e}", record.name, record.address);
            }

            let entry = self.device_status(record, &result);
            self.update_status(&mut report, |status| status.upsert(entry));

            self.emit(BackupEvent::DeviceCompleted {
                name: record.name.clone(),
                result: result.clone(),
            });
            report.devices.push(DeviceReport {
                name: record.name.clone(),
                address: record.address.clone(),
                result,
            });
        }

        if report.failed() == 0 {
            self.mirror(&mut report);
        } else {
            log::warn!(target: "orchestrator", "Skipping mirrors, {} switch(es) failed", report.failed());
            report.outcome = PassOutcome::PartiallyCompleted;
        }

        report
    }

    fn backup_device(
        &self,
        record: &InventoryRecord,
        defaults: &Credentials,
        warnings: &mut Vec<BackupError>,
    ) -> Result<PathBuf, BackupError> {
        // reject unusable names before talking to the switch
        self.store.device_dir(&record.name)?;

        let credentials = record.credentials(defaults);
        let config = self.fetcher.fetch(&record.address, &credentials)?;

        let path = self.store.write(&record.name, &record.address, &config)?;
        if let Some(device_dir) = path.parent() {
            warnings.extend(self.retention.enforce(device_dir));
        }
        log::info!(target: "orchestrator", "Saved config for {} ({})", record.name, record.address);

        Ok(path)
    }

    fn device_status(
        &self,
        record: &InventoryRecord,
        result: &Result<PathBuf, BackupError>,
    ) -> DeviceStatus {
        let (status, error) = match result {
            Ok(_) => (BackupState::Success, None),
            Err(e) => (BackupState::Failed, Some(e.to_string())),
        };

        DeviceStatus {
            name: record.name.clone(),
            ip: record.address.clone(),
            last_backup: Local::now().format(LAST_BACKUP_FORMAT).to_string(),
            status,
            error,
            mirrors: self
                .mirrors
                .iter()
                .map(|slot| (slot.name().to_string(), MirrorStatus::NotAttempted))
                .collect(),
        }
    }

    fn mirror(&self, report: &mut RunReport) {
        if self.mirrors.is_empty() {
            return;
        }

        let files = latest_snapshots(self.store.root()).map_err(|e| {
            log::error!(target: "orchestrator", "Listing snapshots for mirroring failed: {e}");
            format!("Listing snapshots failed: {e}")
        });

        for slot in &self.mirrors {
            let outcome = match (slot, &files) {
                (MirrorSlot::Skipped { reason, .. }, _) => MirrorStatus::Skipped(reason.clone()),
                (MirrorSlot::Active(sink), Ok(files)) => mirror_files(sink.as_ref(), files),
                (MirrorSlot::Active(_), Err(reason)) => MirrorStatus::Failed(reason.clone()),
            };
            if let MirrorStatus::Failed(reason) = &outcome {
                report.warnings.push(BackupError::new(
                    ErrorKind::MirrorUploadFailed,
                    format!("{}: {reason}", slot.name()),
                ));
            }

            self.update_status(report, |status| status.set_mirror_status(slot.name(), &outcome));

            self.emit(BackupEvent::MirrorCompleted {
                sink: slot.name().to_string(),
                status: outcome.clone(),
            });
            report.mirrors.push((slot.name().to_string(), outcome));
        }
    }

    /// Applies `update` and persists the table right away.
    fn update_status(&self, report: &mut RunReport, update: impl FnOnce(&mut StatusTable)) {
        let mut status = self.lock_status();
        update(&mut status);
        if let Err(e) = status.save() {
            log::error!(target: "orchestrator", "Failed to save switch status: {e}");
            report.warnings.push(e.into());
        }
    }

    fn lock_status(&self) -> MutexGuard<'_, StatusTable> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: BackupEvent) {
        for observer in &self.observers {
            observer.notify(&event);
        }
    }
}
