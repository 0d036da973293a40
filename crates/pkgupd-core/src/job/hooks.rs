//! Per-status hook lists, fired in registration order.

use super::{Job, JobStatus};

/// Side-effecting callback run once per transition into a status.
pub type Hook = Box<dyn Fn(&Job) + Send + Sync>;

#[derive(Default)]
pub struct HookMap {
    entries: Vec<(JobStatus, Hook)>,
}

impl HookMap {
    pub fn add(&mut self, status: JobStatus, hook: Hook) {
        self.entries.push((status, hook));
    }

    pub fn fire(&self, status: JobStatus, job: &Job) {
        for (_, hook) in self.entries.iter().filter(|(s, _)| *s == status) {
            hook(job);
        }
    }
}

impl std::fmt::Debug for HookMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for (status, _) in &self.entries {
            list.entry(status);
        }
        list.finish()
    }
}
