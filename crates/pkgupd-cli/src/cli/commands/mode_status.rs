//! `pkgupd mode-status` – print the persisted update-mode status blob.

use anyhow::{Context, Result};
use pkgupd_core::config::UpdaterConfig;
use pkgupd_core::mode::StatusStore;

pub fn run_mode_status(cfg: &UpdaterConfig) -> Result<()> {
    let store = match &cfg.status_file {
        Some(path) => StatusStore::new(path),
        None => StatusStore::new(StatusStore::default_path()?),
    };
    match store.load()? {
        Some(status) => {
            let json = serde_json::to_string_pretty(&status).context("encode status")?;
            println!("{json}");
        }
        None => println!("No update-mode status recorded at {}", store.path().display()),
    }
    Ok(())
}
