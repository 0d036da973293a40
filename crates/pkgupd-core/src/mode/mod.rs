//! Per-repository-category update status.
//!
//! Each update mode (a single bit of [`UpdateMode`]) carries an
//! [`UpdateModeStatus`] that evolves independently of any job. Job hooks and
//! the periodic size pass both feed [`UpdateModeStatusManager`], which
//! filters every change through the deny table in [`transition`] and
//! persists the result.

mod manager;
mod persist;
mod size;
pub mod transition;

pub use manager::UpdateModeStatusManager;
pub use persist::{current_boot_id, PersistedStatus, StatusStore};
pub use size::{infer_from_size, BackendSizeEstimator, SizeEstimator, SizeInfo};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Repository categories whose updates are tracked separately.
    pub struct UpdateMode: u64 {
        const SYSTEM = 1 << 0;
        const APPSTORE = 1 << 1;
        const SECURITY = 1 << 2;
        const UNKNOWN = 1 << 3;
        const OTHER_SYSTEM = 1 << 4;
        const APPEND = 1 << 5;
    }
}

const MODE_NAMES: [(UpdateMode, &str); 6] = [
    (UpdateMode::SYSTEM, "system"),
    (UpdateMode::APPSTORE, "appstore"),
    (UpdateMode::SECURITY, "security"),
    (UpdateMode::UNKNOWN, "unknown"),
    (UpdateMode::OTHER_SYSTEM, "other_system"),
    (UpdateMode::APPEND, "append"),
];

impl UpdateMode {
    /// Name of a single-bit mode; `None` for empty or multi-bit masks.
    pub fn name(self) -> Option<&'static str> {
        MODE_NAMES.iter().find(|(m, _)| *m == self).map(|(_, n)| *n)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        MODE_NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name.trim()))
            .map(|(m, _)| *m)
    }

    /// Parse a comma-separated list of mode names.
    pub fn parse_list(list: &str) -> Option<Self> {
        let mut mask = UpdateMode::empty();
        for part in list.split(',').filter(|p| !p.trim().is_empty()) {
            mask |= UpdateMode::from_name(part)?;
        }
        Some(mask)
    }

    /// The single-bit modes contained in this mask, lowest bit first.
    pub fn single_bits(self) -> impl Iterator<Item = UpdateMode> {
        MODE_NAMES
            .into_iter()
            .map(|(m, _)| m)
            .filter(move |m| self.contains(*m))
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.single_bits().filter_map(|m| m.name()).collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(","))
        }
    }
}

/// Upgrade-readiness status of one update mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateModeStatus {
    NoUpdate,
    NotDownload,
    IsDownloading,
    DownloadPause,
    DownloadErr,
    CanUpgrade,
    WaitRunUpgrade,
    Upgrading,
    UpgradeErr,
    Upgraded,
}

impl UpdateModeStatus {
    pub const ALL: [UpdateModeStatus; 10] = [
        UpdateModeStatus::NoUpdate,
        UpdateModeStatus::NotDownload,
        UpdateModeStatus::IsDownloading,
        UpdateModeStatus::DownloadPause,
        UpdateModeStatus::DownloadErr,
        UpdateModeStatus::CanUpgrade,
        UpdateModeStatus::WaitRunUpgrade,
        UpdateModeStatus::Upgrading,
        UpdateModeStatus::UpgradeErr,
        UpdateModeStatus::Upgraded,
    ];

    /// Statuses from which a download may be started.
    pub fn can_prepare(self) -> bool {
        matches!(
            self,
            UpdateModeStatus::NotDownload
                | UpdateModeStatus::DownloadPause
                | UpdateModeStatus::DownloadErr
        )
    }

    /// Statuses from which an install may be started.
    pub fn can_upgrade(self) -> bool {
        matches!(self, UpdateModeStatus::CanUpgrade | UpdateModeStatus::UpgradeErr)
    }

    /// Statuses owned by an in-flight job.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            UpdateModeStatus::IsDownloading
                | UpdateModeStatus::WaitRunUpgrade
                | UpdateModeStatus::Upgrading
        )
    }
}

impl fmt::Display for UpdateModeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Backup (AB snapshot) status tracked alongside mode status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbStatus {
    #[default]
    NotBackup,
    BackingUp,
    HasBackedUp,
    BackupFailed,
}
