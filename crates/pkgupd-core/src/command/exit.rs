//! Map a finished backend process to its terminal outcome.

use std::process::ExitStatus;

use crate::progress::{parse_exit_error, ExitError};

/// How a backend run ended, as far as the job is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Failure(ExitError),
    /// Deliberate abort; the job is paused, not failed.
    Pause,
}

/// Captured data about one finished run.
#[derive(Debug, Default)]
pub struct ExitReport {
    pub success: bool,
    /// Abort was requested before the process ended.
    pub aborted: bool,
    /// Last error reported on the status pipe.
    pub pipe_error: Option<ExitError>,
    pub stdout: String,
    pub stderr: String,
}

impl ExitReport {
    pub fn from_status(status: ExitStatus) -> Self {
        Self {
            success: status.success(),
            ..Self::default()
        }
    }
}

/// Classify a finished run.
///
/// A non-zero exit whose output contains nothing recognizable as an error is
/// treated as success: an error that cannot be explained is non-fatal.
pub fn classify_exit(report: ExitReport) -> ExitOutcome {
    if report.aborted {
        return ExitOutcome::Pause;
    }
    if report.success {
        return match report.pipe_error {
            Some(e) => ExitOutcome::Failure(e),
            None => ExitOutcome::Success,
        };
    }
    match parse_exit_error(&report.stderr, &report.stdout).or(report.pipe_error) {
        Some(e) => ExitOutcome::Failure(e),
        None => {
            tracing::warn!("backend failed without a recognizable error; treating as success");
            ExitOutcome::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ExitErrorKind;

    #[test]
    fn abort_wins() {
        let report = ExitReport {
            aborted: true,
            stderr: "E: Could not get lock".into(),
            ..ExitReport::default()
        };
        assert_eq!(classify_exit(report), ExitOutcome::Pause);
    }

    #[test]
    fn clean_exit_is_success_unless_pipe_reported_error() {
        let ok = ExitReport {
            success: true,
            ..ExitReport::default()
        };
        assert_eq!(classify_exit(ok), ExitOutcome::Success);

        let reported = ExitReport {
            success: true,
            pipe_error: Some(ExitError::from_message("Failed to fetch x")),
            ..ExitReport::default()
        };
        assert!(matches!(
            classify_exit(reported),
            ExitOutcome::Failure(ExitError {
                kind: ExitErrorKind::FetchFailed,
                ..
            })
        ));
    }

    #[test]
    fn failure_parses_output() {
        let report = ExitReport {
            stderr: "E: Unmet dependencies. Try 'apt --fix-broken install'\n".into(),
            ..ExitReport::default()
        };
        match classify_exit(report) {
            ExitOutcome::Failure(e) => assert_eq!(e.kind, ExitErrorKind::DependenciesBroken),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn unexplained_failure_is_success() {
        let report = ExitReport {
            stderr: "Segmentation fault\n".into(),
            ..ExitReport::default()
        };
        assert_eq!(classify_exit(report), ExitOutcome::Success);
    }
}
