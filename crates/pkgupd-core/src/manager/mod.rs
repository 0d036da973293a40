//! JobManager: job creation, start/pause/clean and the dispatch loop.
//!
//! The manager owns two queues (download and system-change). Caller
//! operations only change a job's eligibility; the dispatch tick in
//! [`dispatch`] is the only place that starts backends and retires jobs.
//! A manager-wide dispatch lock serializes ticks against caller operations.

mod dispatch;
mod hooks;
mod ids;

pub use ids::{IdGenerator, SequenceIds};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::Backend;
use crate::command::CommandRunner;
use crate::config::UpdaterConfig;
use crate::control::JobControl;
use crate::error::{JobError, Result};
use crate::job::{Job, JobSnapshot, JobStatus, JobType, DOWNLOAD_QUEUE, SYSTEM_CHANGE_QUEUE};
use crate::mode::{UpdateMode, UpdateModeStatus, UpdateModeStatusManager};
use crate::observer::{NoopObserver, Observer};
use crate::queue::JobQueue;

/// Per-creation options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Modes whose status this job drives; empty for plain package jobs.
    pub update_mode: UpdateMode,
    /// Retry budget override. `None` gives download stages the configured
    /// budget and every other stage none.
    pub retry: Option<u32>,
    /// Start as soon as a slot frees up; otherwise the job waits Paused
    /// until `mark_start`.
    pub auto_start: bool,
    /// Take a system backup before a dist-upgrade.
    pub backup: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            update_mode: UpdateMode::empty(),
            retry: None,
            auto_start: true,
            backup: false,
        }
    }
}

/// Stages a caller-visible operation expands into, head first.
fn stages(kind: JobType, backup: bool) -> Vec<JobType> {
    match kind {
        JobType::Install | JobType::Update => vec![JobType::Download, kind],
        JobType::DistUpgrade if backup => vec![JobType::Backup, kind],
        _ => vec![kind],
    }
}

pub struct JobManager {
    queues: [JobQueue; 2],
    runner: CommandRunner,
    modes: Arc<UpdateModeStatusManager>,
    ids: Arc<dyn IdGenerator>,
    observer: Arc<dyn Observer>,
    download_retry: u32,
    seq: AtomicU64,
    dispatch_lock: Mutex<()>,
}

impl JobManager {
    pub fn new(
        cfg: &UpdaterConfig,
        backend: Arc<dyn Backend>,
        modes: Arc<UpdateModeStatusManager>,
    ) -> Self {
        let (download_cap, system_cap) = cfg.queue_capacities();
        Self {
            queues: [
                JobQueue::new(DOWNLOAD_QUEUE, download_cap),
                JobQueue::new(SYSTEM_CHANGE_QUEUE, system_cap),
            ],
            runner: CommandRunner::new(backend, Arc::new(JobControl::new())),
            modes,
            ids: Arc::new(SequenceIds::new()),
            observer: Arc::new(NoopObserver),
            download_retry: cfg.download_retry,
            seq: AtomicU64::new(0),
            dispatch_lock: Mutex::new(()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn modes(&self) -> &Arc<UpdateModeStatusManager> {
        &self.modes
    }

    pub fn control(&self) -> &Arc<JobControl> {
        self.runner.control()
    }

    fn lock_dispatch(&self) -> MutexGuard<'_, ()> {
        self.dispatch_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_for(&self, kind: JobType) -> &JobQueue {
        let name = kind.queue_name();
        match self.queues.iter().find(|q| q.name() == name) {
            Some(q) => q,
            None => &self.queues[1],
        }
    }

    /// Queued job with this id (the head of its chain).
    pub fn find(&self, id: &str) -> Option<Arc<Job>> {
        self.queues.iter().find_map(|q| q.find(id))
    }

    fn get(&self, id: &str) -> Result<Arc<Job>> {
        self.find(id)
            .ok_or_else(|| JobError::NotFound(format!("job {id}")))
    }

    /// Live job performing `kind` on `packages`, directly or as the tail of
    /// its chain. An ended head awaiting retirement answers with its pending
    /// follow-up stage.
    pub fn find_by_type(&self, kind: JobType, packages: &[String]) -> Option<Arc<Job>> {
        self.queues
            .iter()
            .flat_map(|q| q.all_jobs())
            .find_map(|job| live_stage(job, kind, packages))
    }

    /// Snapshots of every queued job, download queue first, each queue in
    /// dispatch order.
    pub fn list(&self) -> Vec<JobSnapshot> {
        self.queues
            .iter()
            .flat_map(|q| q.all_jobs())
            .map(|job| job.snapshot())
            .collect()
    }

    /// Create a job, or return the existing one doing the same thing.
    /// The returned flag is true when the job already existed.
    pub fn create_job(
        &self,
        kind: JobType,
        packages: Vec<String>,
        environ: HashMap<String, String>,
        opts: JobOptions,
    ) -> Result<(bool, Arc<Job>)> {
        let _guard = self.lock_dispatch();
        if let Some(existing) = self.find_by_type(kind, &packages) {
            tracing::debug!(job_id = %existing.id(), %kind, "job already exists");
            return Ok((true, existing));
        }
        if kind.needs_packages() && packages.is_empty() {
            return Err(JobError::NotSupported(format!("{kind} requires packages")));
        }

        let id = self.ids.next_id(kind);
        let mut next: Option<Arc<Job>> = None;
        for (pos, stage) in stages(kind, opts.backup).into_iter().enumerate().rev() {
            let mut builder = self.stage_builder(&id, stage, &packages, &environ, &opts);
            if let Some(n) = next.take() {
                builder = builder.next(n);
            }
            next = Some(builder.paused(pos == 0 && !opts.auto_start).build());
        }
        let job = next.ok_or_else(|| JobError::NotSupported(format!("{kind} has no stages")))?;

        self.enqueue(Arc::clone(&job))?;
        tracing::info!(
            job_id = %job.id(),
            %kind,
            queue = job.queue_name(),
            mode = %opts.update_mode,
            "job created"
        );
        self.notify_jobs_changed();
        Ok((false, job))
    }

    fn stage_builder(
        &self,
        id: &str,
        kind: JobType,
        packages: &[String],
        environ: &HashMap<String, String>,
        opts: &JobOptions,
    ) -> crate::job::JobBuilder {
        let retry = opts.retry.unwrap_or(if kind.is_download_stage() {
            self.download_retry
        } else {
            0
        });
        let control = Arc::clone(self.runner.control());
        let builder = Job::builder(id, kind)
            .packages(packages.to_vec())
            .environ(environ.clone())
            .seq(self.seq.fetch_add(1, Ordering::Relaxed))
            .retry(retry)
            .update_mode(opts.update_mode)
            .observer(Arc::clone(&self.observer))
            .hook(JobStatus::End, move |job: &Job| control.unregister(job.id()));
        hooks::with_mode_hooks(builder, kind, opts.update_mode, &self.modes)
    }

    /// Put a job into its queue. An upgrade stage entering the queue Ready
    /// means its mode is waiting for the install to run.
    fn enqueue(&self, job: Arc<Job>) -> Result<()> {
        let queue = self.queue_for(job.kind());
        queue.add(Arc::clone(&job))?;
        let mode = job.update_mode();
        if job.kind().is_upgrade_stage() && !mode.is_empty() && job.status() == JobStatus::Ready {
            self.modes.set_update_status(mode, UpdateModeStatus::WaitRunUpgrade);
        }
        Ok(())
    }

    /// Make a job eligible to run and move it to the front of its queue.
    pub fn mark_start(&self, id: &str) -> Result<()> {
        let _guard = self.lock_dispatch();
        let job = self.get(id)?;
        if job.status() != JobStatus::Ready {
            job.transition(JobStatus::Ready)?;
        }
        self.queue_for(job.kind()).raise(id)?;
        tracing::info!(job_id = id, "job marked to start");
        Ok(())
    }

    /// Pause a job. A running job must be cancelable; its backend process
    /// group is aborted first and the job is paused only if that succeeded.
    pub fn pause_job(&self, id: &str) -> Result<()> {
        let _guard = self.lock_dispatch();
        let job = self.get(id)?;
        let status = job.status();
        if !status.can_transition(JobStatus::Paused) {
            return Err(JobError::NotSupported(format!(
                "job {id} cannot be paused while {status}"
            )));
        }
        if status == JobStatus::Running {
            if !job.cancelable() {
                return Err(JobError::NotSupported(format!(
                    "job {id} is past the point where it can be aborted"
                )));
            }
            self.runner.control().request_abort(id)?;
        }
        match job.transition(JobStatus::Paused) {
            Ok(()) => {}
            // The exit waiter may have observed the abort first.
            Err(_) if job.status() == JobStatus::Paused => {}
            Err(e) => return Err(e),
        }
        tracing::info!(job_id = id, "job paused");
        Ok(())
    }

    /// End a job and drop its pending chain; it leaves its queue on the
    /// next dispatch tick.
    pub fn clean_job(&self, id: &str) -> Result<()> {
        let _guard = self.lock_dispatch();
        let job = self.get(id)?;
        job.transition(JobStatus::End)?;
        if let Some(next) = job.take_next() {
            tracing::debug!(job_id = id, next = %next.kind(), "dropped chained job");
        }
        tracing::info!(job_id = id, "job cleaned");
        Ok(())
    }

    fn notify_jobs_changed(&self) {
        self.observer.jobs_changed(&self.list());
    }
}

/// Walk past ended stages to the one still pending, if it does `kind` on `packages`.
fn live_stage(job: Arc<Job>, kind: JobType, packages: &[String]) -> Option<Arc<Job>> {
    let mut stage = job;
    while stage.status() == JobStatus::End {
        stage = stage.next()?;
    }
    stage.matches_operation(kind, packages).then_some(stage)
}
