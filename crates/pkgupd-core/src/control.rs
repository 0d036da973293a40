//! Running-process registry used for abort.
//!
//! Each spawned backend is registered with its process group and an abort
//! flag. A pause request sets the flag (so the exit waiter reports a pause
//! rather than a failure) and signals the whole group, so helpers forked by
//! the package manager die with it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::JobError;

struct Registered {
    pgid: i32,
    aborted: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct JobControl {
    jobs: RwLock<HashMap<String, Registered>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly spawned backend; `pid` leads its own process group.
    /// Returns the abort flag the exit waiter consults.
    pub fn register(&self, job_id: &str, pid: u32) -> Arc<AtomicBool> {
        let aborted = Arc::new(AtomicBool::new(false));
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                job_id.to_string(),
                Registered {
                    pgid: pid as i32,
                    aborted: Arc::clone(&aborted),
                },
            );
        aborted
    }

    /// Unregister a job (call when its backend has exited).
    pub fn unregister(&self, job_id: &str) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_id)
    }

    /// Mark the job aborted and send SIGTERM to its process group.
    pub fn request_abort(&self, job_id: &str) -> Result<(), JobError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let reg = jobs
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(format!("no running backend for job {job_id}")))?;
        reg.aborted.store(true, Ordering::SeqCst);
        kill_group(reg.pgid)?;
        tracing::info!(job_id, pgid = reg.pgid, "abort requested");
        Ok(())
    }
}

/// SIGTERM a process group. A group that is already gone is not an error.
pub(crate) fn kill_group(pgid: i32) -> Result<(), JobError> {
    if pgid <= 1 {
        return Err(JobError::NotSupported(format!(
            "refusing to signal process group {pgid}"
        )));
    }
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid, libc::SIGTERM) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(JobError::Io(err));
        }
    }
    Ok(())
}

/// Default path for the control socket (same XDG state dir as the status file).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("pkgupd")?.get_state_home();
    Ok(dir.join("control.sock"))
}
