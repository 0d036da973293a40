//! Dispatch tick and the periodic loop driving it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::JobManager;
use crate::command::{Indicator, RunnerEvent};
use crate::error::{JobError, Result};
use crate::job::{Job, JobStatus};
use crate::progress::ProgressInfo;

impl JobManager {
    /// One scheduling pass: retire ended jobs (promoting chained follow-ups),
    /// then start whatever each queue has room for. Per-job failures are
    /// logged; the pass always completes.
    pub fn tick(&self) {
        let _guard = self.lock_dispatch();
        let mut membership_changed = false;

        for queue in &self.queues {
            for ended in queue.take_ended() {
                membership_changed = true;
                tracing::debug!(job_id = %ended.id(), queue = queue.name(), "job retired");
                if let Some(next) = ended.take_next() {
                    let (id, kind) = (next.id().to_string(), next.kind());
                    match self.enqueue(next) {
                        Ok(()) => tracing::info!(job_id = %id, %kind, "chained job promoted"),
                        Err(e) => tracing::warn!(job_id = %id, %kind, "cannot promote chained job: {}", e),
                    }
                }
            }
        }

        for queue in &self.queues {
            // A paused job may be re-marked Ready before its aborted backend
            // has been reaped.
            let control = self.control();
            for job in queue.pending_jobs_except(|job| control.is_running(job.id())) {
                if let Err(e) = self.start_job(&job) {
                    tracing::warn!(job_id = %job.id(), queue = queue.name(), "cannot start job: {}", e);
                }
            }
        }

        if membership_changed {
            self.notify_jobs_changed();
        }
    }

    fn start_job(&self, job: &Arc<Job>) -> Result<()> {
        if job.status() == JobStatus::Failed {
            job.transition(JobStatus::Ready)?;
            tracing::info!(job_id = %job.id(), retry_left = job.retry(), "retrying failed job");
        }
        let process = self.runner.spawn(job)?;
        if let Err(e) = job.transition(JobStatus::Running) {
            process.discard();
            return Err(e);
        }
        let indicator = progress_indicator(Arc::clone(job), job.run());
        if let Err(e) = process.attach(indicator) {
            job.set_description(e.to_string());
            job.transition(JobStatus::Failed)?;
            return Err(e);
        }
        tracing::info!(job_id = %job.id(), kind = %job.kind(), queue = job.queue_name(), "job started");
        Ok(())
    }

    /// Tick every `interval` until `shutdown` turns true or its sender is dropped.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = interval.as_millis() as u64, "dispatch loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mgr = Arc::clone(&self);
                    if let Err(e) = tokio::task::spawn_blocking(move || mgr.tick()).await {
                        tracing::warn!("dispatch tick panicked: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("dispatch loop stopped");
    }
}

/// Route runner events for one run of `job`. Progress never changes status;
/// the exit event does, unless the job already left that run.
fn progress_indicator(job: Arc<Job>, run: u64) -> Indicator {
    Arc::new(move |event| match event {
        RunnerEvent::Progress(info) => {
            job.apply_progress(&info);
        }
        RunnerEvent::Exited(info) => finish_run(&job, run, info),
    })
}

fn finish_run(job: &Job, run: u64, info: ProgressInfo) {
    if job.status() != JobStatus::Running || job.run() != run {
        tracing::debug!(job_id = %job.id(), status = %job.status(), "stale exit event ignored");
        return;
    }
    if info.status == JobStatus::Failed {
        let err = JobError::BackendExit {
            id: job.id().to_string(),
            detail: info.description.clone(),
        };
        tracing::warn!("{}", err);
        job.set_description(info.description);
    }
    if let Err(e) = job.transition(info.status) {
        tracing::debug!(job_id = %job.id(), "exit transition rejected: {}", e);
    }
}
