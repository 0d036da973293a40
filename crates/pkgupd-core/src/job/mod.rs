//! The schedulable unit: identity, kind, status, progress and per-status hooks.
//!
//! A `Job` is shared as `Arc<Job>` between its queue, the dispatch loop and
//! the subprocess pumps. Identity fields are immutable; everything that moves
//! (status, progress, description, retry budget, chained follow-up) lives
//! behind the job's own mutex and is read through [`Job::snapshot`].

mod hooks;
mod kind;
mod status;

pub use hooks::{Hook, HookMap};
pub use kind::{JobType, DOWNLOAD_QUEUE, SYSTEM_CHANGE_QUEUE};
pub use status::JobStatus;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{JobError, Result};
use crate::mode::UpdateMode;
use crate::observer::{NoopObserver, Observer};
use crate::progress::ProgressInfo;

/// Point-in-time copy of a job's externally visible fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub kind: JobType,
    pub packages: Vec<String>,
    pub status: JobStatus,
    pub progress: f64,
    pub description: String,
    pub cancelable: bool,
    pub retry: u32,
    pub queue: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Kind of the chained follow-up job, if any.
    pub next: Option<JobType>,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    progress: f64,
    description: String,
    cancelable: bool,
    retry: u32,
    /// Number of times the job has entered Running.
    run: u64,
    next: Option<Arc<Job>>,
}

pub struct Job {
    id: String,
    kind: JobType,
    packages: Vec<String>,
    environ: HashMap<String, String>,
    queue_name: &'static str,
    create_time: SystemTime,
    seq: u64,
    update_mode: UpdateMode,
    hooks: HookMap,
    observer: Arc<dyn Observer>,
    state: Mutex<JobState>,
}

impl Job {
    pub fn builder(id: impl Into<String>, kind: JobType) -> JobBuilder {
        JobBuilder::new(id.into(), kind)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> JobType {
        self.kind
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn environ(&self) -> &HashMap<String, String> {
        &self.environ
    }

    pub fn queue_name(&self) -> &'static str {
        self.queue_name
    }

    pub fn create_time(&self) -> SystemTime {
        self.create_time
    }

    /// Creation sequence number, used to break ties between equal timestamps.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn update_mode(&self) -> UpdateMode {
        self.update_mode
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    pub fn progress(&self) -> f64 {
        self.lock().progress
    }

    pub fn description(&self) -> String {
        self.lock().description.clone()
    }

    pub fn cancelable(&self) -> bool {
        self.lock().cancelable
    }

    pub fn retry(&self) -> u32 {
        self.lock().retry
    }

    /// Run counter; terminal events from an earlier run are stale.
    pub fn run(&self) -> u64 {
        self.lock().run
    }

    pub fn next(&self) -> Option<Arc<Job>> {
        self.lock().next.clone()
    }

    /// Detach and return the chained follow-up job.
    pub fn take_next(&self) -> Option<Arc<Job>> {
        self.lock().next.take()
    }

    /// Kind of the last job in this job's chain (itself when unchained).
    pub fn chain_tail_kind(&self) -> JobType {
        match self.next() {
            Some(next) => next.chain_tail_kind(),
            None => self.kind,
        }
    }

    /// True if this job is `kind` for `packages`, or heads a chain ending in `kind`.
    pub fn matches_operation(&self, kind: JobType, packages: &[String]) -> bool {
        self.packages == packages && (self.kind == kind || self.chain_tail_kind() == kind)
    }

    /// Consume one unit of retry budget if this job is Failed and has any left.
    pub(crate) fn take_retry(&self) -> bool {
        let mut st = self.lock();
        if st.status == JobStatus::Failed && st.retry > 0 {
            st.retry -= 1;
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let st = self.lock();
        JobSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            packages: self.packages.clone(),
            status: st.status,
            progress: st.progress,
            description: st.description.clone(),
            cancelable: st.cancelable,
            retry: st.retry,
            queue: self.queue_name.to_string(),
            created_at_ms: self
                .create_time
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            next: st.next.as_ref().map(|n| n.kind),
        }
    }

    /// Move the job to `to` if the status table allows it, then fire the hooks
    /// registered for `to`. Entering `Succeed` is immediately followed by `End`.
    /// `End` never produces a change notification.
    pub fn transition(&self, to: JobStatus) -> Result<()> {
        let from = {
            let mut st = self.lock();
            let from = st.status;
            if !from.can_transition(to) {
                return Err(JobError::InvalidTransition {
                    id: self.id.clone(),
                    from,
                    to,
                });
            }
            st.status = to;
            match to {
                JobStatus::Failed => st.progress = -1.0,
                JobStatus::Succeed => st.progress = 1.0,
                JobStatus::Ready if from == JobStatus::Failed => st.progress = 0.0,
                JobStatus::Running => {
                    st.run += 1;
                    st.cancelable = true;
                }
                _ => {}
            }
            from
        };
        tracing::debug!(job_id = %self.id, %from, %to, "job status changed");

        self.hooks.fire(to, self);
        if to != JobStatus::End {
            self.observer.job_changed(&self.snapshot());
        }
        if to == JobStatus::Succeed {
            self.transition(JobStatus::End)?;
        }
        Ok(())
    }

    /// Apply a non-terminal progress event while the job is Running.
    /// Returns false (and changes nothing) when the job is not Running.
    ///
    /// Within one run progress only moves forward (error lines excepted) and
    /// a job that reported it can no longer be aborted stays that way.
    pub fn apply_progress(&self, info: &ProgressInfo) -> bool {
        let changed = {
            let mut st = self.lock();
            if st.status != JobStatus::Running {
                return false;
            }
            let mut changed = false;
            if info.progress > st.progress || (info.progress < 0.0 && st.progress >= 0.0) {
                st.progress = info.progress;
                changed = true;
            }
            if !info.description.is_empty() && st.description != info.description {
                st.description = info.description.clone();
                changed = true;
            }
            if st.cancelable && !info.cancelable {
                st.cancelable = false;
                changed = true;
            }
            changed
        };
        if changed {
            self.observer.job_changed(&self.snapshot());
        }
        true
    }

    /// Replace the description, e.g. with a structured failure payload before
    /// the Failed transition.
    pub fn set_description(&self, description: impl Into<String>) {
        self.lock().description = description.into();
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("packages", &self.packages)
            .field("queue", &self.queue_name)
            .field("state", &*self.lock())
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Builder for [`Job`]; hooks can only be registered here.
pub struct JobBuilder {
    id: String,
    kind: JobType,
    packages: Vec<String>,
    environ: HashMap<String, String>,
    create_time: SystemTime,
    seq: u64,
    retry: u32,
    update_mode: UpdateMode,
    paused: bool,
    hooks: HookMap,
    observer: Arc<dyn Observer>,
    next: Option<Arc<Job>>,
}

impl JobBuilder {
    fn new(id: String, kind: JobType) -> Self {
        Self {
            id,
            kind,
            packages: Vec::new(),
            environ: HashMap::new(),
            create_time: SystemTime::now(),
            seq: 0,
            retry: 0,
            update_mode: UpdateMode::empty(),
            paused: false,
            hooks: HookMap::default(),
            observer: Arc::new(NoopObserver),
            next: None,
        }
    }

    pub fn packages(mut self, packages: Vec<String>) -> Self {
        self.packages = packages;
        self
    }

    pub fn environ(mut self, environ: HashMap<String, String>) -> Self {
        self.environ = environ;
        self
    }

    pub fn create_time(mut self, t: SystemTime) -> Self {
        self.create_time = t;
        self
    }

    pub fn seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Build the job already Paused. No hooks fire for the initial status.
    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub fn hook(mut self, status: JobStatus, hook: impl Fn(&Job) + Send + Sync + 'static) -> Self {
        self.hooks.add(status, Box::new(hook));
        self
    }

    pub fn next(mut self, next: Arc<Job>) -> Self {
        self.next = Some(next);
        self
    }

    pub fn build(self) -> Arc<Job> {
        Arc::new(Job {
            id: self.id,
            kind: self.kind,
            packages: self.packages,
            environ: self.environ,
            queue_name: self.kind.queue_name(),
            create_time: self.create_time,
            seq: self.seq,
            update_mode: self.update_mode,
            hooks: self.hooks,
            observer: self.observer,
            state: Mutex::new(JobState {
                status: if self.paused {
                    JobStatus::Paused
                } else {
                    JobStatus::Ready
                },
                progress: 0.0,
                description: String::new(),
                cancelable: true,
                retry: self.retry,
                run: 0,
                next: self.next,
            }),
        })
    }
}
