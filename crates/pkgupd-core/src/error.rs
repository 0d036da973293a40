//! Error taxonomy shared by jobs, queues, the manager and the subprocess runner.

use crate::job::JobStatus;

/// Errors returned synchronously by job, queue and manager operations.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Job or queue lookup miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation is not valid for the job's current state, or unknown job type.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A status transition rejected by the job state table.
    #[error("invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// A job with the same kind and packages is already queued.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Backend subprocess could not be spawned.
    #[error("backend start failed for job {id}: {source}")]
    BackendStart {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// Backend subprocess exited abnormally.
    #[error("backend exited abnormally for job {id}: {detail}")]
    BackendExit { id: String, detail: String },

    /// A status line from the backend pipe did not parse.
    #[error("cannot parse status line {line:?}: {reason}")]
    Protocol { line: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// True for the NotSupported family (including rejected transitions).
    pub fn is_not_supported(&self) -> bool {
        matches!(
            self,
            JobError::NotSupported(_) | JobError::InvalidTransition { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
