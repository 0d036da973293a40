//! Status-pipe line protocol spoken by backend subprocesses.
//!
//! Each line is `<kind>:<field1>:<field2>:<rest>`:
//!
//! - `dummy:<status>:<percent>:<text>`: raw status literal.
//! - `dlstatus:<pkg>:<percent>:<text>`: download phase, mapped into `[0, 0.5]`.
//! - `pmstatus:<pkg>:<percent>:<text>`: install phase, mapped into `[0.5, 1]`;
//!   the job can no longer be aborted once this phase is reported.
//! - `pmerror:<pkg>:<percent>:<text>`: failure; progress becomes -1.
//!
//! `<rest>` may itself contain colons.

mod exit_error;

pub use exit_error::{parse_exit_error, ExitError, ExitErrorKind};

use crate::error::JobError;
use crate::job::JobStatus;

/// One structured progress event for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    pub job_id: String,
    pub status: JobStatus,
    /// Fraction in `[0, 1]`, or -1 on error.
    pub progress: f64,
    pub description: String,
    pub cancelable: bool,
    pub error: Option<ExitError>,
}

impl ProgressInfo {
    pub fn running(
        job_id: impl Into<String>,
        progress: f64,
        description: impl Into<String>,
        cancelable: bool,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Running,
            progress,
            description: description.into(),
            cancelable,
            error: None,
        }
    }

    /// Terminal success event synthesized when the backend exits cleanly.
    pub fn succeeded(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Succeed,
            progress: 1.0,
            description: String::new(),
            cancelable: false,
            error: None,
        }
    }

    /// Terminal failure event carrying a structured error.
    pub fn failed(job_id: impl Into<String>, error: ExitError) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            progress: -1.0,
            description: error.to_json(),
            cancelable: false,
            error: Some(error),
        }
    }

    /// Terminal event for a deliberately aborted backend.
    pub fn paused(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Paused,
            progress: 0.0,
            description: String::new(),
            cancelable: true,
            error: None,
        }
    }
}

const DOWNLOAD_KIND: &str = "dlstatus";
const INSTALL_KIND: &str = "pmstatus";
const ERROR_KIND: &str = "pmerror";
const RAW_KIND: &str = "dummy";

/// Parse one status-pipe line for `job_id`.
pub fn parse_line(job_id: &str, line: &str) -> Result<ProgressInfo, JobError> {
    let protocol_err = |reason: &str| JobError::Protocol {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = line.splitn(4, ':');
    let (Some(kind), Some(field1), Some(field2), Some(rest)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(protocol_err("expected 4 colon-separated fields"));
    };
    let rest = rest.trim();

    let percent = || -> Result<f64, JobError> {
        let v: f64 = field2
            .trim()
            .parse()
            .map_err(|_| protocol_err("percent is not a number"))?;
        if !v.is_finite() {
            return Err(protocol_err("percent is not finite"));
        }
        Ok(v.clamp(0.0, 100.0))
    };

    match kind {
        DOWNLOAD_KIND => Ok(ProgressInfo::running(job_id, percent()? / 200.0, rest, true)),
        INSTALL_KIND => Ok(ProgressInfo::running(
            job_id,
            0.5 + percent()? / 200.0,
            rest,
            false,
        )),
        ERROR_KIND => {
            let error = ExitError::from_message(rest);
            Ok(ProgressInfo {
                job_id: job_id.to_string(),
                status: JobStatus::Failed,
                progress: -1.0,
                description: error.to_json(),
                cancelable: false,
                error: Some(error),
            })
        }
        RAW_KIND => {
            let status = JobStatus::parse(field1.trim())
                .ok_or_else(|| protocol_err("unknown status literal"))?;
            Ok(ProgressInfo {
                job_id: job_id.to_string(),
                status,
                progress: percent()? / 100.0,
                description: rest.to_string(),
                cancelable: status != JobStatus::Succeed,
                error: None,
            })
        }
        _ => Err(protocol_err("unknown line kind")),
    }
}
