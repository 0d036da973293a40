//! Named, capacity-bounded job queue.
//!
//! The queue owns an ordered list of jobs and answers "which jobs may start
//! now" against its running-slot capacity. Every operation takes the queue
//! lock exactly once; none of them may be called from inside a job hook that
//! runs while the same queue's lock is held.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{JobError, Result};
use crate::job::{Job, JobStatus, JobType};

struct Entry {
    job: Arc<Job>,
    /// Set by `raise`; higher values were raised more recently.
    raised: Option<u64>,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    raise_counter: u64,
}

impl Inner {
    fn sort(&mut self) {
        self.entries.sort_by(compare_entries);
    }
}

/// UpdateSource first, then raised jobs (latest raise first), then FIFO.
fn compare_entries(a: &Entry, b: &Entry) -> Ordering {
    let a_src = a.job.kind() == JobType::UpdateSource;
    let b_src = b.job.kind() == JobType::UpdateSource;
    b_src
        .cmp(&a_src)
        .then_with(|| b.raised.cmp(&a.raised))
        .then_with(|| a.job.create_time().cmp(&b.job.create_time()))
        .then_with(|| a.job.seq().cmp(&b.job.seq()))
}

pub struct JobQueue {
    name: String,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl JobQueue {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job; rejects a second live job with the same kind and
    /// packages. Ended entries awaiting retirement do not count.
    pub fn add(&self, job: Arc<Job>) -> Result<()> {
        let mut inner = self.lock();
        if inner.entries.iter().any(|e| {
            e.job.kind() == job.kind()
                && e.job.packages() == job.packages()
                && e.job.status() != JobStatus::End
        }) {
            return Err(JobError::AlreadyExists(format!(
                "{} job for {:?} in queue {}",
                job.kind(),
                job.packages(),
                self.name
            )));
        }
        tracing::debug!(queue = %self.name, job_id = %job.id(), "job queued");
        inner.entries.push(Entry { job, raised: None });
        inner.sort();
        Ok(())
    }

    /// Detach the job with `id`.
    pub fn remove(&self, id: &str) -> Result<Arc<Job>> {
        let mut inner = self.lock();
        let pos = inner
            .entries
            .iter()
            .position(|e| e.job.id() == id)
            .ok_or_else(|| JobError::NotFound(format!("job {} in queue {}", id, self.name)))?;
        Ok(inner.entries.remove(pos).job)
    }

    /// Move the job with `id` ahead of everything except UpdateSource jobs.
    pub fn raise(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.raise_counter += 1;
        let rank = inner.raise_counter;
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| e.job.id() == id)
            .ok_or_else(|| JobError::NotFound(format!("job {} in queue {}", id, self.name)))?;
        entry.raised = Some(rank);
        inner.sort();
        Ok(())
    }

    pub fn find(&self, id: &str) -> Option<Arc<Job>> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.job.id() == id)
            .map(|e| Arc::clone(&e.job))
    }

    /// Jobs in queue order.
    pub fn all_jobs(&self) -> Vec<Arc<Job>> {
        self.lock().entries.iter().map(|e| Arc::clone(&e.job)).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every job whose status is End.
    pub fn take_ended(&self) -> Vec<Arc<Job>> {
        let mut inner = self.lock();
        let (ended, kept): (Vec<Entry>, Vec<Entry>) = inner
            .entries
            .drain(..)
            .partition(|e| e.job.status() == JobStatus::End);
        inner.entries = kept;
        ended.into_iter().map(|e| e.job).collect()
    }

    /// Jobs that may start right now, in queue order.
    ///
    /// Ready jobs are eligible; Failed jobs are eligible while they have retry
    /// budget, and selecting one consumes a unit of it. At most
    /// `capacity - running` jobs are returned.
    pub fn pending_jobs(&self) -> Vec<Arc<Job>> {
        self.pending_jobs_except(|_| false)
    }

    /// Like [`pending_jobs`](Self::pending_jobs), passing over jobs for which
    /// `busy` holds without touching their retry budget.
    pub fn pending_jobs_except(&self, busy: impl Fn(&Job) -> bool) -> Vec<Arc<Job>> {
        let inner = self.lock();
        let running = inner
            .entries
            .iter()
            .filter(|e| e.job.status() == JobStatus::Running)
            .count();
        let available = self.capacity.saturating_sub(running);

        let mut out = Vec::with_capacity(available);
        for entry in &inner.entries {
            if out.len() >= available {
                break;
            }
            if busy(&entry.job) {
                continue;
            }
            let eligible = match entry.job.status() {
                JobStatus::Ready => true,
                JobStatus::Failed => entry.job.take_retry(),
                _ => false,
            };
            if eligible {
                out.push(Arc::clone(&entry.job));
            }
        }
        out
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn job(id: &str, kind: JobType, pkg: &str, offset_secs: u64) -> Arc<Job> {
        Job::builder(id, kind)
            .packages(vec![pkg.to_string()])
            .create_time(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000 + offset_secs))
            .build()
    }

    fn ids(jobs: &[Arc<Job>]) -> Vec<&str> {
        jobs.iter().map(|j| j.id()).collect()
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let q = JobQueue::new("system-change", 1);
        q.add(job("1install", JobType::Install, "vim", 0)).unwrap();
        let err = q.add(job("2install", JobType::Install, "vim", 1)).unwrap_err();
        assert!(matches!(err, JobError::AlreadyExists(_)));
        q.add(job("3remove", JobType::Remove, "vim", 2)).unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn ended_entry_does_not_block_add() {
        let q = JobQueue::new("download", 2);
        let old = job("1install", JobType::Download, "vim", 0);
        q.add(Arc::clone(&old)).unwrap();
        old.transition(JobStatus::Paused).unwrap();
        old.transition(JobStatus::End).unwrap();
        q.add(job("2install", JobType::Download, "vim", 1)).unwrap();
        assert_eq!(ids(&q.take_ended()), vec!["1install"]);
        assert_eq!(ids(&q.all_jobs()), vec!["2install"]);
    }

    #[test]
    fn busy_jobs_are_passed_over_without_spending_retry() {
        let q = JobQueue::new("download", 1);
        let j = Job::builder("r", JobType::Download)
            .packages(vec!["x".into()])
            .retry(1)
            .build();
        q.add(Arc::clone(&j)).unwrap();
        j.transition(JobStatus::Running).unwrap();
        j.transition(JobStatus::Failed).unwrap();

        assert!(q.pending_jobs_except(|job| job.id() == "r").is_empty());
        assert_eq!(j.retry(), 1);
        assert_eq!(ids(&q.pending_jobs()), vec!["r"]);
        assert_eq!(j.retry(), 0);
    }

    #[test]
    fn update_source_sorts_first_then_fifo() {
        let q = JobQueue::new("system-change", 4);
        q.add(job("b", JobType::Install, "b", 2)).unwrap();
        q.add(job("a", JobType::Install, "a", 1)).unwrap();
        q.add(job("src", JobType::UpdateSource, "", 9)).unwrap();
        assert_eq!(ids(&q.all_jobs()), vec!["src", "a", "b"]);
    }

    #[test]
    fn raise_moves_behind_update_source_only() {
        let q = JobQueue::new("system-change", 4);
        q.add(job("a", JobType::Install, "a", 1)).unwrap();
        q.add(job("b", JobType::Install, "b", 2)).unwrap();
        q.add(job("c", JobType::Install, "c", 3)).unwrap();
        q.add(job("src", JobType::UpdateSource, "", 9)).unwrap();
        q.raise("c").unwrap();
        assert_eq!(ids(&q.all_jobs()), vec!["src", "c", "a", "b"]);
        q.raise("b").unwrap();
        assert_eq!(ids(&q.all_jobs()), vec!["src", "b", "c", "a"]);
        assert!(matches!(q.raise("zzz"), Err(JobError::NotFound(_))));
    }

    #[test]
    fn remove_missing_is_not_found() {
        let q = JobQueue::new("download", 2);
        assert!(matches!(q.remove("nope"), Err(JobError::NotFound(_))));
        q.add(job("a", JobType::Download, "a", 0)).unwrap();
        assert_eq!(q.remove("a").unwrap().id(), "a");
        assert!(q.is_empty());
    }

    #[test]
    fn capacity_one_starts_oldest_then_next_after_end() {
        let q = JobQueue::new("system-change", 1);
        let a = job("a", JobType::Install, "a", 1);
        let b = job("b", JobType::Install, "b", 2);
        q.add(Arc::clone(&b)).unwrap();
        q.add(Arc::clone(&a)).unwrap();

        assert_eq!(ids(&q.pending_jobs()), vec!["a"]);
        a.transition(JobStatus::Running).unwrap();
        assert!(q.pending_jobs().is_empty());

        a.transition(JobStatus::Succeed).unwrap();
        assert_eq!(ids(&q.take_ended()), vec!["a"]);
        assert_eq!(ids(&q.pending_jobs()), vec!["b"]);
    }

    #[test]
    fn pending_never_exceeds_free_slots() {
        let q = JobQueue::new("download", 2);
        let jobs: Vec<_> = (0..5)
            .map(|i| job(&format!("d{i}"), JobType::Download, &format!("p{i}"), i))
            .collect();
        for j in &jobs {
            q.add(Arc::clone(j)).unwrap();
        }
        assert_eq!(q.pending_jobs().len(), 2);
        jobs[0].transition(JobStatus::Running).unwrap();
        assert_eq!(ids(&q.pending_jobs()), vec!["d1"]);
        jobs[1].transition(JobStatus::Running).unwrap();
        assert!(q.pending_jobs().is_empty());
    }

    #[test]
    fn failed_job_is_retried_at_most_budget_times() {
        let q = JobQueue::new("download", 1);
        let j = Job::builder("r", JobType::Download)
            .packages(vec!["x".into()])
            .retry(2)
            .build();
        q.add(Arc::clone(&j)).unwrap();

        let mut selections = 0;
        for _ in 0..10 {
            if j.status() == JobStatus::Ready {
                j.transition(JobStatus::Running).unwrap();
            }
            if j.status() == JobStatus::Running {
                j.transition(JobStatus::Failed).unwrap();
            }
            if !q.pending_jobs().is_empty() {
                selections += 1;
                j.transition(JobStatus::Ready).unwrap();
            }
        }
        assert_eq!(selections, 2);
        assert_eq!(j.status(), JobStatus::Failed);
        assert_eq!(j.retry(), 0);
    }
}
