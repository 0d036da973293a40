//! Integration test: real backend subprocesses driven by the dispatch tick.
//!
//! The backend is a `/bin/sh` script that writes status lines to fd 3 and
//! error lines to stderr, so every path goes through the pipe pump, the exit
//! waiter and the job state machine.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::fake_backend::{manager, tick_until};
use pkgupd_core::error::JobError;
use pkgupd_core::job::{JobStatus, JobType};
use pkgupd_core::manager::JobOptions;
use pkgupd_core::mode::{UpdateMode, UpdateModeStatus};
use pkgupd_core::progress::{ExitError, ExitErrorKind};

fn pkgs(name: &str) -> Vec<String> {
    vec![name.to_string()]
}

#[test]
fn install_chain_runs_to_completion_under_one_id() {
    let (mgr, recorder) = manager(UpdateMode::empty());
    let (existed, job) = mgr
        .create_job(JobType::Install, pkgs("vim"), HashMap::new(), JobOptions::default())
        .unwrap();
    assert!(!existed);
    let id = job.id().to_string();

    tick_until(&mgr, "install chain to finish", || mgr.list().is_empty());

    let changes = recorder.changes.lock().unwrap();
    assert!(changes.iter().all(|s| s.id == id));
    assert!(changes
        .iter()
        .any(|s| s.kind == JobType::Download && s.progress == 0.25));
    assert!(changes
        .iter()
        .any(|s| s.kind == JobType::Install && s.status == JobStatus::Succeed));
    assert!(!mgr.control().is_running(&id));
}

#[test]
fn create_returns_existing_job_while_queued() {
    let (mgr, _) = manager(UpdateMode::empty());
    let (_, first) = mgr
        .create_job(JobType::Install, pkgs("git"), HashMap::new(), JobOptions::default())
        .unwrap();
    let (existed, again) = mgr
        .create_job(JobType::Install, pkgs("git"), HashMap::new(), JobOptions::default())
        .unwrap();
    assert!(existed);
    assert_eq!(first.id(), again.id());
    tick_until(&mgr, "install to finish", || mgr.list().is_empty());
}

#[test]
fn backend_failure_is_recorded_as_structured_error() {
    let (mgr, _) = manager(UpdateMode::empty());
    let (_, job) = mgr
        .create_job(JobType::Remove, pkgs("vim"), HashMap::new(), JobOptions::default())
        .unwrap();

    tick_until(&mgr, "remove to fail", || job.status() == JobStatus::Failed);
    assert_eq!(job.progress(), -1.0);
    let err: ExitError = serde_json::from_str(&job.description()).unwrap();
    assert_eq!(err.kind, ExitErrorKind::LockFailed);

    // No retry budget: the job stays failed until cleaned.
    mgr.tick();
    assert_eq!(job.run(), 1);
    mgr.clean_job(job.id()).unwrap();
    mgr.tick();
    assert!(mgr.find(job.id()).is_none());
}

#[test]
fn failed_download_is_retried_exactly_its_budget() {
    let (mgr, _) = manager(UpdateMode::empty());
    let opts = JobOptions {
        retry: Some(2),
        ..JobOptions::default()
    };
    let (_, job) = mgr
        .create_job(JobType::Download, pkgs("broken"), HashMap::new(), opts)
        .unwrap();

    tick_until(&mgr, "retries to run out", || {
        job.run() == 3 && job.status() == JobStatus::Failed
    });
    for _ in 0..5 {
        mgr.tick();
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(job.run(), 3);
    assert_eq!(job.retry(), 0);
    let err: ExitError = serde_json::from_str(&job.description()).unwrap();
    assert_eq!(err.kind, ExitErrorKind::FetchFailed);
}

#[test]
fn pausing_running_download_aborts_backend() {
    let (mgr, _) = manager(UpdateMode::SYSTEM);
    let opts = JobOptions {
        update_mode: UpdateMode::SYSTEM,
        ..JobOptions::default()
    };
    let (_, job) = mgr
        .create_job(JobType::Download, pkgs("slow"), HashMap::new(), opts)
        .unwrap();

    tick_until(&mgr, "download to report progress", || job.progress() > 0.0);
    assert_eq!(job.status(), JobStatus::Running);
    assert_eq!(
        mgr.modes().status(UpdateMode::SYSTEM),
        UpdateModeStatus::IsDownloading
    );

    mgr.pause_job(job.id()).unwrap();
    assert_eq!(job.status(), JobStatus::Paused);
    tick_until(&mgr, "aborted backend to exit", || {
        !mgr.control().is_running(job.id())
    });
    assert_eq!(job.status(), JobStatus::Paused);
    assert_eq!(
        mgr.modes().status(UpdateMode::SYSTEM),
        UpdateModeStatus::DownloadPause
    );
}

#[test]
fn non_cancelable_job_cannot_be_paused() {
    let (mgr, _) = manager(UpdateMode::empty());
    let (_, job) = mgr
        .create_job(JobType::Remove, pkgs("slow"), HashMap::new(), JobOptions::default())
        .unwrap();

    tick_until(&mgr, "remove to report progress", || job.progress() > 0.0);
    assert!(!job.cancelable());
    let err = mgr.pause_job(job.id()).unwrap_err();
    assert!(matches!(err, JobError::NotSupported(_)));
    assert_eq!(job.status(), JobStatus::Running);

    mgr.control().request_abort(job.id()).unwrap();
    tick_until(&mgr, "aborted backend to exit", || {
        job.status() == JobStatus::Paused
    });
}

#[tokio::test]
async fn dispatch_loop_runs_until_shutdown() {
    let (mgr, _) = manager(UpdateMode::empty());
    let (tx, rx) = tokio::sync::watch::channel(false);
    let loop_handle = tokio::spawn(std::sync::Arc::clone(&mgr).run(Duration::from_millis(10), rx));

    mgr.create_job(JobType::Install, pkgs("curl"), HashMap::new(), JobOptions::default())
        .unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !mgr.list().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "install did not finish");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), loop_handle)
        .await
        .expect("loop stops")
        .unwrap();
}
