//! Structured failure payload recovered from backend output.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitErrorKind {
    FetchFailed,
    DpkgInterrupted,
    DependenciesBroken,
    InsufficientSpace,
    LockFailed,
    PackageNotFound,
    Unknown,
}

/// Machine-parseable error stored as JSON in a failed job's description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitError {
    #[serde(rename = "type")]
    pub kind: ExitErrorKind,
    pub detail: String,
}

const PATTERNS: &[(&str, ExitErrorKind)] = &[
    ("Failed to fetch", ExitErrorKind::FetchFailed),
    ("dpkg was interrupted", ExitErrorKind::DpkgInterrupted),
    ("Unmet dependencies", ExitErrorKind::DependenciesBroken),
    ("broken packages", ExitErrorKind::DependenciesBroken),
    ("enough free space", ExitErrorKind::InsufficientSpace),
    ("Could not get lock", ExitErrorKind::LockFailed),
    ("Unable to acquire the dpkg frontend lock", ExitErrorKind::LockFailed),
    ("Unable to locate package", ExitErrorKind::PackageNotFound),
];

impl ExitError {
    /// Classify a single error message.
    pub fn from_message(msg: &str) -> Self {
        let msg = msg.trim();
        let kind = PATTERNS
            .iter()
            .find(|(needle, _)| msg.contains(needle))
            .map(|(_, kind)| *kind)
            .unwrap_or(ExitErrorKind::Unknown);
        Self {
            kind,
            detail: msg.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.detail.clone())
    }
}

/// Scan captured stderr/stdout for `E: ` lines. Returns `None` when nothing
/// recognizable as an error is present.
pub fn parse_exit_error(stderr: &str, stdout: &str) -> Option<ExitError> {
    let errors: Vec<&str> = stderr
        .lines()
        .chain(stdout.lines())
        .filter_map(|l| l.trim().strip_prefix("E: "))
        .collect();
    let first = errors.first()?;

    // Prefer the first specific classification; fall back to the first line.
    let specific = errors
        .iter()
        .map(|l| ExitError::from_message(l))
        .find(|e| e.kind != ExitErrorKind::Unknown);
    let mut error = specific.unwrap_or_else(|| ExitError::from_message(first));
    error.detail = errors.join("\n");
    Some(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_error_from_stderr() {
        let stderr = "W: something\nE: Could not get lock /var/lib/dpkg/lock-frontend\n";
        let err = parse_exit_error(stderr, "").unwrap();
        assert_eq!(err.kind, ExitErrorKind::LockFailed);
        assert!(err.detail.contains("lock-frontend"));
    }

    #[test]
    fn specific_kind_wins_over_earlier_unknown() {
        let stderr = "E: Sub-process returned an error code\nE: Failed to fetch http://x/y.deb 404\n";
        let err = parse_exit_error(stderr, "").unwrap();
        assert_eq!(err.kind, ExitErrorKind::FetchFailed);
        assert_eq!(err.detail.lines().count(), 2);
    }

    #[test]
    fn no_error_lines_is_unexplained() {
        assert!(parse_exit_error("W: just a warning\n", "Reading package lists...\n").is_none());
    }

    #[test]
    fn json_payload_shape() {
        let err = ExitError::from_message("You don't have enough free space in /var/cache");
        let v: serde_json::Value = serde_json::from_str(&err.to_json()).unwrap();
        assert_eq!(v["type"], "insufficient_space");
    }
}
