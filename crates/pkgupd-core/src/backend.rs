//! Package-manager backend contract.

use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::process::Command;

use crate::error::JobError;
use crate::job::Job;

/// File descriptor number on which backends write status lines.
pub const STATUS_FD: RawFd = 3;

/// Builds the subprocess for a job.
///
/// The runner owns stdio, the status pipe (wired to [`STATUS_FD`]) and the
/// process group; a backend only chooses program, arguments and environment.
pub trait Backend: Send + Sync {
    fn command(&self, job: &Job) -> Result<Command, JobError>;
}

/// Invokes one executable for every job:
/// `<program> [args..] <kind> --status-fd 3 [packages..]`.
#[derive(Debug, Clone)]
pub struct ScriptBackend {
    program: PathBuf,
    args: Vec<String>,
}

impl ScriptBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the job kind.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

impl Backend for ScriptBackend {
    fn command(&self, job: &Job) -> Result<Command, JobError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(job.kind().as_str())
            .arg("--status-fd")
            .arg(STATUS_FD.to_string())
            .args(job.packages())
            .envs(job.environ());
        Ok(cmd)
    }
}
