//! Shell-script backend and polling helpers shared by the integration tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pkgupd_core::backend::ScriptBackend;
use pkgupd_core::config::UpdaterConfig;
use pkgupd_core::job::JobSnapshot;
use pkgupd_core::manager::JobManager;
use pkgupd_core::mode::{UpdateMode, UpdateModeStatusManager};
use pkgupd_core::observer::Observer;

/// Invoked as `sh -c SCRIPT backend <kind> --status-fd 3 <pkg>`, so `$1` is
/// the job kind and `$4` the first package.
const SCRIPT: &str = r#"
case "$1:$4" in
  download:slow)
    echo "dlstatus:$4:10:fetching $4" >&3
    sleep 30 ;;
  download:broken)
    echo "dlstatus:$4:20:fetching $4" >&3
    echo "E: Failed to fetch http://deb.example.org/$4.deb 404 Not Found" >&2
    exit 100 ;;
  download:*)
    echo "dlstatus:$4:50:fetching $4" >&3
    echo "dlstatus:$4:100:fetched $4" >&3 ;;
  install:*|update:*)
    echo "pmstatus:$4:50:unpacking $4" >&3
    echo "pmstatus:$4:100:installed $4" >&3 ;;
  remove:slow)
    echo "pmstatus:$4:10:removing $4" >&3
    sleep 30 ;;
  remove:*)
    echo "E: Could not get lock /var/lib/dpkg/lock-frontend" >&2
    exit 100 ;;
  *)
    exit 0 ;;
esac
"#;

pub fn backend() -> ScriptBackend {
    ScriptBackend::new("/bin/sh").with_args(vec![
        "-c".to_string(),
        SCRIPT.to_string(),
        "backend".to_string(),
    ])
}

/// Records every job snapshot it is told about.
#[derive(Default)]
pub struct Recorder {
    pub changes: Mutex<Vec<JobSnapshot>>,
}

impl Observer for Recorder {
    fn job_changed(&self, job: &JobSnapshot) {
        self.changes.lock().unwrap().push(job.clone());
    }
}

pub fn manager(checked: UpdateMode) -> (Arc<JobManager>, Arc<Recorder>) {
    let cfg = UpdaterConfig {
        download_retry: 0,
        ..UpdaterConfig::default()
    };
    let recorder = Arc::new(Recorder::default());
    let modes = Arc::new(UpdateModeStatusManager::in_memory(checked));
    let mgr = JobManager::new(&cfg, Arc::new(backend()), modes).with_observer(recorder.clone());
    (Arc::new(mgr), recorder)
}

/// Tick `mgr` until `done` holds; panics after ten seconds.
pub fn tick_until(mgr: &JobManager, what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        mgr.tick();
        if done() {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(20));
    }
}
