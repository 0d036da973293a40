//! Change notification for external subscribers (IPC layer, CLI, tests).

use crate::job::JobSnapshot;

/// Receives coalesced change events. All methods default to no-ops so
/// subscribers implement only what they care about.
///
/// Callbacks run on the thread that caused the change (dispatch tick,
/// pipe pump or exit waiter) and must not call back into JobManager mutators.
pub trait Observer: Send + Sync {
    /// A job's externally visible fields changed.
    fn job_changed(&self, _job: &JobSnapshot) {}

    /// JobManager's job-list membership changed.
    fn jobs_changed(&self, _jobs: &[JobSnapshot]) {}

    /// An update-mode status changed; `blob` is the full persisted status JSON.
    fn mode_status_changed(&self, _blob: &str) {}
}

/// Observer that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}
