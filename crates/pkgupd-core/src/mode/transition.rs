//! Allow/deny tables for mode status and AB status.

use super::{AbStatus, UpdateModeStatus};

use UpdateModeStatus::*;

/// Mode-status changes that are never applied. Everything else is allowed.
const DENIED: &[(UpdateModeStatus, UpdateModeStatus)] = &[
    // A finished download cannot go back to downloading.
    (CanUpgrade, IsDownloading),
    // An installed mode must be reset explicitly.
    (Upgraded, NotDownload),
    (Upgraded, IsDownloading),
    (Upgraded, DownloadPause),
    (Upgraded, DownloadErr),
    // Install in flight or queued: download-phase statuses are stale.
    (Upgrading, NotDownload),
    (Upgrading, IsDownloading),
    (Upgrading, DownloadPause),
    (Upgrading, DownloadErr),
    (WaitRunUpgrade, NotDownload),
    (WaitRunUpgrade, IsDownloading),
    (WaitRunUpgrade, DownloadPause),
    (WaitRunUpgrade, DownloadErr),
    // Nothing to download: pause or failure events are stale.
    (NoUpdate, DownloadPause),
    (NoUpdate, DownloadErr),
];

pub fn can_transition(from: UpdateModeStatus, to: UpdateModeStatus) -> bool {
    from != to && !DENIED.contains(&(from, to))
}

pub fn can_transition_ab(from: AbStatus, to: AbStatus) -> bool {
    matches!(
        (from, to),
        (AbStatus::NotBackup, AbStatus::BackingUp)
            | (AbStatus::BackingUp, AbStatus::HasBackedUp)
            | (AbStatus::BackingUp, AbStatus::BackupFailed)
            | (AbStatus::HasBackedUp, AbStatus::NotBackup)
            | (AbStatus::BackupFailed, AbStatus::NotBackup)
    )
}
