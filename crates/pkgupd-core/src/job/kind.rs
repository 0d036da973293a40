//! Closed set of job kinds and their queue routing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::JobError;

/// Name of the small-capacity queue holding download-only jobs.
pub const DOWNLOAD_QUEUE: &str = "download";
/// Name of the capacity-1 queue holding jobs that change the installed system.
pub const SYSTEM_CHANGE_QUEUE: &str = "system-change";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Download,
    Install,
    Remove,
    Update,
    DistUpgrade,
    UpdateSource,
    CheckSystem,
    FixError,
    PrepareDistUpgrade,
    Backup,
}

impl JobType {
    pub const ALL: [JobType; 10] = [
        JobType::Download,
        JobType::Install,
        JobType::Remove,
        JobType::Update,
        JobType::DistUpgrade,
        JobType::UpdateSource,
        JobType::CheckSystem,
        JobType::FixError,
        JobType::PrepareDistUpgrade,
        JobType::Backup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Download => "download",
            JobType::Install => "install",
            JobType::Remove => "remove",
            JobType::Update => "update",
            JobType::DistUpgrade => "dist_upgrade",
            JobType::UpdateSource => "update_source",
            JobType::CheckSystem => "check_system",
            JobType::FixError => "fix_error",
            JobType::PrepareDistUpgrade => "prepare_dist_upgrade",
            JobType::Backup => "backup",
        }
    }

    /// Queue that owns jobs of this kind.
    pub fn queue_name(self) -> &'static str {
        match self {
            JobType::Download | JobType::PrepareDistUpgrade => DOWNLOAD_QUEUE,
            JobType::Install
            | JobType::Remove
            | JobType::Update
            | JobType::DistUpgrade
            | JobType::UpdateSource
            | JobType::CheckSystem
            | JobType::FixError
            | JobType::Backup => SYSTEM_CHANGE_QUEUE,
        }
    }

    /// True for kinds that only fetch archives and leave the system untouched.
    pub fn is_download_stage(self) -> bool {
        matches!(self, JobType::Download | JobType::PrepareDistUpgrade)
    }

    /// True for kinds that install packages into the running system.
    pub fn is_upgrade_stage(self) -> bool {
        matches!(self, JobType::Install | JobType::Update | JobType::DistUpgrade)
    }

    /// Kinds that operate on an explicit package list.
    pub fn needs_packages(self) -> bool {
        matches!(
            self,
            JobType::Download | JobType::Install | JobType::Remove | JobType::Update
        )
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| JobError::NotSupported(format!("unknown job type {s:?}")))
    }
}
