use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::mode::UpdateMode;

/// Global configuration loaded from `~/.config/pkgupd/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Interval between dispatch ticks in milliseconds.
    pub tick_interval_ms: u64,
    /// Maximum number of concurrently running jobs in the download queue.
    pub download_queue_capacity: usize,
    /// Maximum number of concurrently running jobs in the system-change queue.
    pub system_queue_capacity: usize,
    /// Automatic retry budget given to download-stage jobs.
    pub download_retry: u32,
    /// Backend executable invoked for every job and for size queries.
    pub backend_program: PathBuf,
    /// Update modes whose status feeds the aggregate "can upgrade" flag.
    pub checked_modes: Vec<String>,
    /// Seconds between size-based status recomputation passes.
    pub size_check_interval_secs: u64,
    /// Optional override for the persisted status file.
    #[serde(default)]
    pub status_file: Option<PathBuf>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            download_queue_capacity: 3,
            system_queue_capacity: 1,
            download_retry: 3,
            backend_program: PathBuf::from("/usr/libexec/pkgupd/backend"),
            checked_modes: vec![
                "system".to_string(),
                "security".to_string(),
                "unknown".to_string(),
            ],
            size_check_interval_secs: 600,
            status_file: None,
        }
    }
}

impl UpdaterConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn size_check_interval(&self) -> Duration {
        Duration::from_secs(self.size_check_interval_secs.max(1))
    }

    /// Queue capacities, clamped so that every queue can run at least one job.
    pub fn queue_capacities(&self) -> (usize, usize) {
        (
            self.download_queue_capacity.max(1),
            self.system_queue_capacity.max(1),
        )
    }

    /// Parse `checked_modes` into a mask. Unknown names are logged and skipped.
    pub fn checked_mode_mask(&self) -> UpdateMode {
        let mut mask = UpdateMode::empty();
        for name in &self.checked_modes {
            match UpdateMode::from_name(name) {
                Some(m) => mask |= m,
                None => tracing::warn!(mode = %name, "ignoring unknown update mode in config"),
            }
        }
        mask
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("pkgupd")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<UpdaterConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = UpdaterConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: UpdaterConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = UpdaterConfig::default();
        assert_eq!(cfg.tick_interval(), Duration::from_millis(500));
        assert_eq!(cfg.queue_capacities(), (3, 1));
        assert_eq!(cfg.download_retry, 3);
        assert_eq!(
            cfg.checked_mode_mask(),
            UpdateMode::SYSTEM | UpdateMode::SECURITY | UpdateMode::UNKNOWN
        );
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = UpdaterConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: UpdaterConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.tick_interval_ms, cfg.tick_interval_ms);
        assert_eq!(parsed.backend_program, cfg.backend_program);
        assert_eq!(parsed.checked_modes, cfg.checked_modes);
        assert!(parsed.status_file.is_none());
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            tick_interval_ms = 100
            download_queue_capacity = 0
            system_queue_capacity = 2
            download_retry = 1
            backend_program = "/opt/backend"
            checked_modes = ["system", "bogus", "appstore"]
            size_check_interval_secs = 30
            status_file = "/var/lib/pkgupd/status.json"
        "#;
        let cfg: UpdaterConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.queue_capacities(), (1, 2));
        assert_eq!(cfg.checked_mode_mask(), UpdateMode::SYSTEM | UpdateMode::APPSTORE);
        assert_eq!(cfg.size_check_interval(), Duration::from_secs(30));
        assert_eq!(
            cfg.status_file.as_deref(),
            Some(std::path::Path::new("/var/lib/pkgupd/status.json"))
        );
    }
}
