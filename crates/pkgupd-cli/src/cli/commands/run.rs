//! `pkgupd run` – host the daemon until Ctrl-C.

use anyhow::{Context, Result};
use pkgupd_core::backend::ScriptBackend;
use pkgupd_core::config::UpdaterConfig;
use pkgupd_core::manager::JobManager;
use pkgupd_core::mode::{current_boot_id, BackendSizeEstimator, StatusStore, UpdateModeStatusManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::cli::control_socket;

pub async fn run_daemon(cfg: &UpdaterConfig) -> Result<()> {
    let store = match &cfg.status_file {
        Some(path) => StatusStore::new(path),
        None => StatusStore::new(StatusStore::default_path()?),
    };
    let modes = UpdateModeStatusManager::load(store, cfg.checked_mode_mask(), current_boot_id())
        .context("load update-mode status")?;
    let modes = Arc::new(modes);

    let backend = ScriptBackend::new(&cfg.backend_program);
    let manager = Arc::new(JobManager::new(cfg, Arc::new(backend), Arc::clone(&modes)));

    let socket_path = pkgupd_core::control::default_control_socket_path()?;
    let listener = control_socket::spawn_control_listener(Arc::clone(&manager), &socket_path)?;
    tracing::info!(path = %socket_path.display(), "control socket listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatch = tokio::spawn(Arc::clone(&manager).run(cfg.tick_interval(), shutdown_rx.clone()));
    let sizes = tokio::spawn(size_check_loop(
        Arc::clone(&modes),
        BackendSizeEstimator::new(&cfg.backend_program),
        cfg.size_check_interval(),
        shutdown_rx,
    ));
    println!("pkgupd running; control socket at {}", socket_path.display());

    tokio::signal::ctrl_c().await.context("wait for Ctrl-C")?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    let _ = dispatch.await;
    let _ = sizes.await;
    listener.abort();
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Periodically re-infer mode statuses from backend size estimates.
async fn size_check_loop(
    modes: Arc<UpdateModeStatusManager>,
    estimator: BackendSizeEstimator,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let estimator = Arc::new(estimator);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (modes, estimator) = (Arc::clone(&modes), Arc::clone(&estimator));
                match tokio::task::spawn_blocking(move || modes.update_mode_status_by_size(estimator.as_ref())).await {
                    Ok(changed) if !changed.is_empty() => {
                        tracing::info!(mode = %changed, "mode status updated from sizes");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("size check panicked: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
