//! Size-based status inference.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Command;

use super::{UpdateMode, UpdateModeStatus};

/// Bytes involved in upgrading one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeInfo {
    /// Bytes still to be downloaded.
    pub need_download: u64,
    /// Total size of the mode's upgradable package set.
    pub all_package_size: u64,
}

/// Answers "how many bytes would downloading this mode's updates need right now".
pub trait SizeEstimator: Send + Sync {
    fn download_size(&self, mode: UpdateMode) -> Result<SizeInfo>;
}

/// Status implied by sizes alone, or `None` when the current status must be kept.
///
/// Job-owned statuses are never overridden, and an error status is only
/// replaced when the sizes show the failed phase is no longer relevant.
pub fn infer_from_size(current: UpdateModeStatus, size: SizeInfo) -> Option<UpdateModeStatus> {
    let target = match (size.need_download, size.all_package_size) {
        (0, 0) => UpdateModeStatus::NoUpdate,
        (0, _) => UpdateModeStatus::CanUpgrade,
        _ => UpdateModeStatus::NotDownload,
    };
    if current.is_in_progress() {
        return None;
    }
    match (current, target) {
        (
            UpdateModeStatus::DownloadPause | UpdateModeStatus::DownloadErr,
            UpdateModeStatus::NotDownload,
        ) => None,
        (UpdateModeStatus::UpgradeErr, UpdateModeStatus::CanUpgrade) => None,
        _ if current == target => None,
        _ => Some(target),
    }
}

/// Asks the backend program: `<program> download-size <mode>` printing `<need> <all>`.
#[derive(Debug, Clone)]
pub struct BackendSizeEstimator {
    program: PathBuf,
    args: Vec<String>,
}

impl BackendSizeEstimator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before `download-size <mode>`.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

fn parse_size_output(out: &str) -> Result<SizeInfo> {
    let mut it = out.split_whitespace();
    let need = it
        .next()
        .context("missing download size")?
        .parse()
        .context("download size is not a number")?;
    let all = it
        .next()
        .context("missing package set size")?
        .parse()
        .context("package set size is not a number")?;
    Ok(SizeInfo {
        need_download: need,
        all_package_size: all,
    })
}

impl SizeEstimator for BackendSizeEstimator {
    fn download_size(&self, mode: UpdateMode) -> Result<SizeInfo> {
        let name = mode
            .name()
            .with_context(|| format!("size query needs a single mode, got {mode}"))?;
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("download-size")
            .arg(name)
            .output()
            .with_context(|| format!("run {}", self.program.display()))?;
        if !output.status.success() {
            anyhow::bail!(
                "{} download-size {} exited with {}",
                self.program.display(),
                name,
                output.status
            );
        }
        parse_size_output(&String::from_utf8_lossy(&output.stdout))
    }
}
