//! Persist update-mode status to disk (JSON under XDG state dir) so it survives restarts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{AbStatus, UpdateModeStatus};

/// Current on-disk format version.
pub const STATUS_VERSION: u32 = 1;

const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";

/// The single status blob owned by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedStatus {
    pub version: u32,
    /// Kernel boot id at the time of the last write.
    #[serde(default)]
    pub boot_id: Option<String>,
    /// Mode name -> status.
    pub modes: BTreeMap<String, UpdateModeStatus>,
    #[serde(default)]
    pub ab_status: AbStatus,
    #[serde(default)]
    pub ab_error: Option<String>,
    /// Mode bits that most recently triggered a backup.
    #[serde(default)]
    pub trigger_backing_up_type: u64,
    /// Aggregate flag over checked modes.
    #[serde(default)]
    pub can_upgrade: bool,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub updated_at: u64,
}

impl Default for PersistedStatus {
    fn default() -> Self {
        Self {
            version: STATUS_VERSION,
            boot_id: None,
            modes: BTreeMap::new(),
            ab_status: AbStatus::NotBackup,
            ab_error: None,
            trigger_backing_up_type: 0,
            can_upgrade: false,
            updated_at: 0,
        }
    }
}

/// Location of the persisted status file.
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default path: `~/.local/state/pkgupd/status.json`.
    pub fn default_path() -> Result<PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("pkgupd")?;
        Ok(xdg_dirs.get_state_home().join("status.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the blob atomically (temp file + rename).
    pub fn save(&self, status: &PersistedStatus) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(status).context("serialize update status")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("write update status: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename update status: {}", self.path.display()))?;
        Ok(())
    }

    /// Load the blob. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<PersistedStatus>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("read update status: {}", self.path.display()))
            }
        };
        let status: PersistedStatus = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse update status: {}", self.path.display()))?;
        Ok(Some(status))
    }
}

/// Current kernel boot id, if the platform exposes one.
pub fn current_boot_id() -> Option<String> {
    std::fs::read_to_string(BOOT_ID_PATH)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_none() {
        let dir = tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("nested").join("status.json"));
        let mut status = PersistedStatus::default();
        status.modes.insert("system".into(), UpdateModeStatus::CanUpgrade);
        status.ab_status = AbStatus::HasBackedUp;
        status.boot_id = Some("abc".into());
        store.save(&status).unwrap();
        assert_eq!(store.load().unwrap().unwrap(), status);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(StatusStore::new(path).load().is_err());
    }
}
