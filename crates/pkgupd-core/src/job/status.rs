//! Job status machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ready,
    Running,
    Failed,
    Succeed,
    Paused,
    End,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Ready,
        JobStatus::Running,
        JobStatus::Failed,
        JobStatus::Succeed,
        JobStatus::Paused,
        JobStatus::End,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
            JobStatus::Succeed => "succeed",
            JobStatus::Paused => "paused",
            JobStatus::End => "end",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        JobStatus::ALL.into_iter().find(|st| st.as_str() == s)
    }

    /// Statuses reachable from `self` in one step.
    pub fn successors(self) -> &'static [JobStatus] {
        match self {
            JobStatus::Ready => &[JobStatus::Running, JobStatus::Paused],
            JobStatus::Running => &[JobStatus::Failed, JobStatus::Succeed, JobStatus::Paused],
            JobStatus::Failed => &[JobStatus::Ready, JobStatus::End],
            JobStatus::Succeed => &[JobStatus::End],
            // Paused -> End lets a paused job be cleaned.
            JobStatus::Paused => &[JobStatus::Ready, JobStatus::End],
            JobStatus::End => &[],
        }
    }

    pub fn can_transition(self, to: JobStatus) -> bool {
        self.successors().contains(&to)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGAL: &[(JobStatus, JobStatus)] = &[
        (JobStatus::Ready, JobStatus::Running),
        (JobStatus::Ready, JobStatus::Paused),
        (JobStatus::Running, JobStatus::Failed),
        (JobStatus::Running, JobStatus::Succeed),
        (JobStatus::Running, JobStatus::Paused),
        (JobStatus::Failed, JobStatus::Ready),
        (JobStatus::Failed, JobStatus::End),
        (JobStatus::Succeed, JobStatus::End),
        (JobStatus::Paused, JobStatus::Ready),
        (JobStatus::Paused, JobStatus::End),
    ];

    #[test]
    fn transition_table_matches_legal_pairs() {
        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                assert_eq!(
                    from.can_transition(to),
                    LEGAL.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn end_is_terminal() {
        assert!(JobStatus::End.successors().is_empty());
    }

    #[test]
    fn parse_roundtrip_names() {
        for st in JobStatus::ALL {
            assert_eq!(JobStatus::parse(st.as_str()), Some(st));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }
}
