use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use super::persist::{PersistedStatus, StatusStore, STATUS_VERSION};
use super::size::{infer_from_size, SizeEstimator, SizeInfo};
use super::transition::{can_transition, can_transition_ab};
use super::{AbStatus, UpdateMode, UpdateModeStatus};
use crate::error::JobError;
use crate::observer::{NoopObserver, Observer};

struct Inner {
    statuses: BTreeMap<UpdateMode, UpdateModeStatus>,
    checked: UpdateMode,
    can_upgrade: bool,
    ab_status: AbStatus,
    ab_error: Option<String>,
    trigger_backing_up_type: UpdateMode,
    /// Bumped on every accepted change; orders concurrent persist calls.
    revision: u64,
}

impl Inner {
    fn status(&self, mode: UpdateMode) -> UpdateModeStatus {
        self.statuses
            .get(&mode)
            .copied()
            .unwrap_or(UpdateModeStatus::NotDownload)
    }

    fn recompute_can_upgrade(&mut self) {
        self.can_upgrade = self
            .checked
            .single_bits()
            .any(|m| self.status(m).can_upgrade());
    }

    fn to_persisted(&self, boot_id: Option<&str>) -> PersistedStatus {
        PersistedStatus {
            version: STATUS_VERSION,
            boot_id: boot_id.map(str::to_string),
            modes: self
                .statuses
                .iter()
                .filter_map(|(m, s)| m.name().map(|n| (n.to_string(), *s)))
                .collect(),
            ab_status: self.ab_status,
            ab_error: self.ab_error.clone(),
            trigger_backing_up_type: self.trigger_backing_up_type.bits(),
            can_upgrade: self.can_upgrade,
            updated_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    /// Apply `to` to one mode bit if the deny table allows it.
    fn apply(&mut self, mode: UpdateMode, to: UpdateModeStatus) -> bool {
        let from = self.status(mode);
        if !can_transition(from, to) {
            if from != to {
                tracing::debug!(%mode, %from, %to, "mode status change denied");
            }
            return false;
        }
        tracing::info!(%mode, %from, %to, "mode status changed");
        self.statuses.insert(mode, to);
        true
    }
}

/// Reset statuses left dangling by a crash or restart.
fn reset_dangling(status: &mut PersistedStatus, first_boot: bool) {
    for s in status.modes.values_mut() {
        *s = match *s {
            UpdateModeStatus::IsDownloading => UpdateModeStatus::NotDownload,
            UpdateModeStatus::WaitRunUpgrade => UpdateModeStatus::CanUpgrade,
            UpdateModeStatus::Upgrading => UpdateModeStatus::UpgradeErr,
            UpdateModeStatus::Upgraded if first_boot => UpdateModeStatus::NoUpdate,
            other => other,
        };
    }
    status.ab_status = match status.ab_status {
        AbStatus::BackingUp => {
            status.ab_error = Some("backup interrupted by restart".to_string());
            AbStatus::BackupFailed
        }
        AbStatus::HasBackedUp | AbStatus::BackupFailed if first_boot => {
            status.ab_error = None;
            AbStatus::NotBackup
        }
        other => other,
    };
}

/// Tracks one [`UpdateModeStatus`] per update mode plus the AB backup status.
pub struct UpdateModeStatusManager {
    inner: RwLock<Inner>,
    store: Option<StatusStore>,
    boot_id: Option<String>,
    observer: Arc<dyn Observer>,
    last_persisted: Mutex<u64>,
    last_notified: Mutex<u64>,
}

impl UpdateModeStatusManager {
    /// Manager without persistence, every mode starting at NotDownload.
    pub fn in_memory(checked: UpdateMode) -> Self {
        Self::from_persisted(PersistedStatus::default(), checked, None, None)
    }

    /// Load persisted state, apply the restart reset rule and write the result back.
    ///
    /// A boot id differing from the persisted one marks the first start after a
    /// reboot, which additionally clears finished upgrade and backup states.
    pub fn load(store: StatusStore, checked: UpdateMode, boot_id: Option<String>) -> Result<Self> {
        let mut persisted = store.load()?.unwrap_or_default();
        let first_boot = match (&persisted.boot_id, &boot_id) {
            (Some(old), Some(new)) => old != new,
            (None, Some(_)) => true,
            _ => false,
        };
        reset_dangling(&mut persisted, first_boot);
        if first_boot {
            tracing::info!("first start after reboot: cleared finished upgrade state");
        }
        let mgr = Self::from_persisted(persisted, checked, Some(store), boot_id);
        mgr.persist_now();
        Ok(mgr)
    }

    fn from_persisted(
        persisted: PersistedStatus,
        checked: UpdateMode,
        store: Option<StatusStore>,
        boot_id: Option<String>,
    ) -> Self {
        let statuses = persisted
            .modes
            .iter()
            .filter_map(|(name, s)| UpdateMode::from_name(name).map(|m| (m, *s)))
            .collect();
        let mut inner = Inner {
            statuses,
            checked,
            can_upgrade: false,
            ab_status: persisted.ab_status,
            ab_error: persisted.ab_error,
            trigger_backing_up_type: UpdateMode::from_bits_truncate(
                persisted.trigger_backing_up_type,
            ),
            revision: 0,
        };
        inner.recompute_can_upgrade();
        Self {
            inner: RwLock::new(inner),
            store,
            boot_id,
            observer: Arc::new(NoopObserver),
            last_persisted: Mutex::new(0),
            last_notified: Mutex::new(0),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Status of a single-bit mode. Untracked modes report NotDownload.
    pub fn status(&self, mode: UpdateMode) -> UpdateModeStatus {
        self.read().status(mode)
    }

    /// Status of every checked mode.
    pub fn statuses(&self) -> BTreeMap<UpdateMode, UpdateModeStatus> {
        let inner = self.read();
        inner
            .checked
            .single_bits()
            .map(|m| (m, inner.status(m)))
            .collect()
    }

    pub fn checked_modes(&self) -> UpdateMode {
        self.read().checked
    }

    pub fn set_checked_modes(&self, checked: UpdateMode) {
        let snapshot = {
            let mut inner = self.write();
            inner.checked = checked;
            inner.recompute_can_upgrade();
            inner.revision += 1;
            (inner.revision, inner.to_persisted(self.boot_id.as_deref()))
        };
        self.publish(snapshot);
    }

    /// True iff at least one checked mode is CanUpgrade or UpgradeErr.
    pub fn can_upgrade(&self) -> bool {
        self.read().can_upgrade
    }

    /// Apply `to` to every checked bit of `mode` whose current status allows it.
    /// Returns the bits that actually changed.
    pub fn set_update_status(&self, mode: UpdateMode, to: UpdateModeStatus) -> UpdateMode {
        let (changed, snapshot) = {
            let mut inner = self.write();
            let targets = mode & inner.checked;
            let mut changed = UpdateMode::empty();
            for bit in targets.single_bits() {
                if inner.apply(bit, to) {
                    changed |= bit;
                }
            }
            if changed.is_empty() {
                return changed;
            }
            inner.recompute_can_upgrade();
            inner.revision += 1;
            (
                changed,
                (inner.revision, inner.to_persisted(self.boot_id.as_deref())),
            )
        };
        self.publish(snapshot);
        changed
    }

    /// Checked bits of `mask` whose status allows starting a download.
    pub fn get_can_prepare_dist_upgrade_mode(&self, mask: UpdateMode) -> UpdateMode {
        self.filter_mask(mask, UpdateModeStatus::can_prepare)
    }

    /// Checked bits of `mask` whose status allows starting an install.
    pub fn get_can_dist_upgrade_mode(&self, mask: UpdateMode) -> UpdateMode {
        self.filter_mask(mask, UpdateModeStatus::can_upgrade)
    }

    fn filter_mask(&self, mask: UpdateMode, pred: fn(UpdateModeStatus) -> bool) -> UpdateMode {
        let inner = self.read();
        (mask & inner.checked)
            .single_bits()
            .filter(|m| pred(inner.status(*m)))
            .fold(UpdateMode::empty(), |acc, m| acc | m)
    }

    /// Recompute statuses of checked modes from current download sizes.
    ///
    /// Size queries run concurrently, one per mode; results are written back
    /// under the status lock in mode order. Modes whose query fails keep
    /// their status.
    pub fn update_mode_status_by_size(&self, estimator: &dyn SizeEstimator) -> UpdateMode {
        let modes: Vec<UpdateMode> = self.checked_modes().single_bits().collect();
        let sizes: Vec<(UpdateMode, Option<SizeInfo>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = modes
                .iter()
                .map(|&mode| (mode, scope.spawn(move || estimator.download_size(mode))))
                .collect();
            handles
                .into_iter()
                .map(|(mode, handle)| {
                    let size = match handle.join() {
                        Ok(Ok(size)) => Some(size),
                        Ok(Err(e)) => {
                            tracing::warn!(%mode, "size query failed: {:#}", e);
                            None
                        }
                        Err(_) => {
                            tracing::warn!(%mode, "size query panicked");
                            None
                        }
                    };
                    (mode, size)
                })
                .collect()
        });

        let (changed, snapshot) = {
            let mut inner = self.write();
            let mut changed = UpdateMode::empty();
            for (mode, size) in sizes {
                let Some(size) = size else { continue };
                let current = inner.status(mode);
                if let Some(to) = infer_from_size(current, size) {
                    if inner.apply(mode, to) {
                        changed |= mode;
                    }
                }
            }
            if changed.is_empty() {
                return changed;
            }
            inner.recompute_can_upgrade();
            inner.revision += 1;
            (
                changed,
                (inner.revision, inner.to_persisted(self.boot_id.as_deref())),
            )
        };
        self.publish(snapshot);
        changed
    }

    pub fn ab_status(&self) -> (AbStatus, Option<String>) {
        let inner = self.read();
        (inner.ab_status, inner.ab_error.clone())
    }

    pub fn trigger_backing_up_type(&self) -> UpdateMode {
        self.read().trigger_backing_up_type
    }

    /// Start a backup on behalf of `mode`. A finished previous backup is
    /// reset to NotBackup first.
    pub fn trigger_backup(&self, mode: UpdateMode) -> Result<(), JobError> {
        let snapshot = {
            let mut inner = self.write();
            let from = inner.ab_status;
            if matches!(from, AbStatus::HasBackedUp | AbStatus::BackupFailed) {
                inner.ab_status = AbStatus::NotBackup;
            }
            if !can_transition_ab(inner.ab_status, AbStatus::BackingUp) {
                inner.ab_status = from;
                return Err(JobError::NotSupported(format!(
                    "cannot start backup while {:?}",
                    from
                )));
            }
            inner.ab_status = AbStatus::BackingUp;
            inner.ab_error = None;
            inner.trigger_backing_up_type = mode;
            inner.revision += 1;
            (inner.revision, inner.to_persisted(self.boot_id.as_deref()))
        };
        tracing::info!(%mode, "backup started");
        self.publish(snapshot);
        Ok(())
    }

    /// Record the outcome of the running backup.
    pub fn finish_backup(&self, error: Option<String>) -> Result<(), JobError> {
        let to = if error.is_some() {
            AbStatus::BackupFailed
        } else {
            AbStatus::HasBackedUp
        };
        let snapshot = {
            let mut inner = self.write();
            if !can_transition_ab(inner.ab_status, to) {
                return Err(JobError::NotSupported(format!(
                    "cannot move backup status from {:?} to {:?}",
                    inner.ab_status, to
                )));
            }
            inner.ab_status = to;
            inner.ab_error = error;
            inner.revision += 1;
            (inner.revision, inner.to_persisted(self.boot_id.as_deref()))
        };
        tracing::info!(status = ?to, "backup finished");
        self.publish(snapshot);
        Ok(())
    }

    /// Full status blob as persisted.
    pub fn blob(&self) -> PersistedStatus {
        self.read().to_persisted(self.boot_id.as_deref())
    }

    fn persist_now(&self) {
        let snapshot = {
            let mut inner = self.write();
            inner.revision += 1;
            (inner.revision, inner.to_persisted(self.boot_id.as_deref()))
        };
        self.persist(snapshot.0, &snapshot.1);
    }

    /// Persist, then notify. Revisions older than the last one written or
    /// announced are dropped.
    fn publish(&self, (revision, status): (u64, PersistedStatus)) {
        self.persist(revision, &status);
        let mut last = self
            .last_notified
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if revision <= *last {
            return;
        }
        match serde_json::to_string(&status) {
            Ok(blob) => {
                *last = revision;
                self.observer.mode_status_changed(&blob);
            }
            Err(e) => tracing::warn!("serialize update status: {}", e),
        }
    }

    fn persist(&self, revision: u64, status: &PersistedStatus) {
        let Some(store) = &self.store else { return };
        let mut last = self
            .last_persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if revision <= *last {
            return;
        }
        match store.save(status) {
            Ok(()) => *last = revision,
            Err(e) => tracing::warn!(path = %store.path().display(), "persist update status: {:#}", e),
        }
    }
}
