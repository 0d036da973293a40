//! Job hooks that drive the update-mode status machine.

use std::sync::Arc;

use crate::job::{Job, JobBuilder, JobStatus, JobType};
use crate::mode::{UpdateMode, UpdateModeStatus, UpdateModeStatusManager};

/// Register the mode hooks for one stage. Stages without a mode, or whose
/// kind does not touch mode status, are returned unchanged.
pub(super) fn with_mode_hooks(
    builder: JobBuilder,
    kind: JobType,
    mode: UpdateMode,
    modes: &Arc<UpdateModeStatusManager>,
) -> JobBuilder {
    if mode.is_empty() {
        return builder;
    }
    if kind == JobType::Backup {
        return with_backup_hooks(builder, mode, modes);
    }
    let table: &[(JobStatus, UpdateModeStatus)] = if kind.is_download_stage() {
        &[
            (JobStatus::Running, UpdateModeStatus::IsDownloading),
            (JobStatus::Paused, UpdateModeStatus::DownloadPause),
            (JobStatus::Failed, UpdateModeStatus::DownloadErr),
            (JobStatus::Succeed, UpdateModeStatus::CanUpgrade),
        ]
    } else if kind.is_upgrade_stage() {
        &[
            (JobStatus::Ready, UpdateModeStatus::WaitRunUpgrade),
            (JobStatus::Running, UpdateModeStatus::Upgrading),
            (JobStatus::Failed, UpdateModeStatus::UpgradeErr),
            (JobStatus::Succeed, UpdateModeStatus::Upgraded),
        ]
    } else {
        &[]
    };
    table.iter().fold(builder, |b, &(job_status, mode_status)| {
        let modes = Arc::clone(modes);
        b.hook(job_status, move |_job: &Job| {
            modes.set_update_status(mode, mode_status);
        })
    })
}

fn with_backup_hooks(
    builder: JobBuilder,
    mode: UpdateMode,
    modes: &Arc<UpdateModeStatusManager>,
) -> JobBuilder {
    let (on_run, on_ok, on_fail) = (Arc::clone(modes), Arc::clone(modes), Arc::clone(modes));
    builder
        .hook(JobStatus::Running, move |job: &Job| {
            if let Err(e) = on_run.trigger_backup(mode) {
                tracing::warn!(job_id = %job.id(), %mode, "cannot start backup: {}", e);
            }
        })
        .hook(JobStatus::Succeed, move |job: &Job| {
            if let Err(e) = on_ok.finish_backup(None) {
                tracing::warn!(job_id = %job.id(), "cannot record backup: {}", e);
            }
        })
        .hook(JobStatus::Failed, move |job: &Job| {
            if let Err(e) = on_fail.finish_backup(Some(job.description())) {
                tracing::warn!(job_id = %job.id(), "cannot record backup failure: {}", e);
            }
        })
}
