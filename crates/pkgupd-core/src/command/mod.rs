//! Backend subprocess runner.
//!
//! Spawning and pumping are split: [`CommandRunner::spawn`] starts the process
//! in its own process group with the status pipe on [`STATUS_FD`], and
//! [`Process::attach`] starts the threads that feed its output back:
//!
//! - a pump reading status lines and forwarding parsed progress,
//! - two readers capturing stdout/stderr for exit classification,
//! - a waiter blocking on exit, which emits the single terminal event.

mod exit;

pub use exit::{classify_exit, ExitOutcome, ExitReport};

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::backend::{Backend, STATUS_FD};
use crate::control::{kill_group, JobControl};
use crate::error::JobError;
use crate::job::Job;
use crate::progress::{parse_line, ExitError, ProgressInfo};

/// Captured stdout/stderr is truncated to this many bytes.
const OUTPUT_CAPTURE_LIMIT: u64 = 64 * 1024;

/// Event delivered to the indicator callback.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    /// Parsed status-pipe line; never changes job status.
    Progress(ProgressInfo),
    /// Terminal event synthesized after the process exited.
    Exited(ProgressInfo),
}

pub type Indicator = Arc<dyn Fn(RunnerEvent) + Send + Sync>;

pub struct CommandRunner {
    backend: Arc<dyn Backend>,
    control: Arc<JobControl>,
}

impl CommandRunner {
    pub fn new(backend: Arc<dyn Backend>, control: Arc<JobControl>) -> Self {
        Self { backend, control }
    }

    pub fn control(&self) -> &Arc<JobControl> {
        &self.control
    }

    /// Spawn the backend for `job` without reading any of its output yet.
    pub fn spawn(&self, job: &Job) -> Result<Process, JobError> {
        let mut cmd = self.backend.command(job)?;
        let start_err = |source: io::Error| JobError::BackendStart {
            id: job.id().to_string(),
            source,
        };

        let (read_end, write_end) = status_pipe().map_err(start_err)?;
        let write_raw = write_end.as_raw_fd();

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        // SAFETY: the hook runs between fork and exec and only calls
        // async-signal-safe functions (dup2, fcntl).
        unsafe {
            cmd.pre_exec(move || {
                if write_raw == STATUS_FD {
                    let flags = libc::fcntl(STATUS_FD, libc::F_GETFD);
                    if flags < 0
                        || libc::fcntl(STATUS_FD, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0
                    {
                        return Err(io::Error::last_os_error());
                    }
                } else if libc::dup2(write_raw, STATUS_FD) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(start_err)?;
        // Only the child may hold the write end, or the pump never sees EOF.
        drop(write_end);

        let aborted = self.control.register(job.id(), child.id());
        tracing::debug!(job_id = %job.id(), pid = child.id(), "backend spawned");
        Ok(Process {
            job_id: job.id().to_string(),
            child,
            status_pipe: File::from(read_end),
            aborted,
            control: Arc::clone(&self.control),
        })
    }
}

fn status_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: fds is a valid buffer for two descriptors.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe2 succeeded, so both descriptors are open and owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// A spawned backend whose output is not being read yet.
pub struct Process {
    job_id: String,
    child: Child,
    status_pipe: File,
    aborted: Arc<AtomicBool>,
    control: Arc<JobControl>,
}

impl Process {
    /// Kill and reap a process that will not be attached.
    pub fn discard(mut self) {
        if let Err(e) = kill_group(self.child.id() as i32) {
            tracing::warn!(job_id = %self.job_id, "kill discarded backend: {}", e);
        }
        let _ = self.child.wait();
        self.control.unregister(&self.job_id);
    }

    /// Start the pump, output readers and exit waiter. `indicator` receives
    /// every parsed progress line and finally exactly one `Exited` event.
    pub fn attach(self, indicator: Indicator) -> Result<JoinHandle<()>, JobError> {
        let Process {
            job_id,
            mut child,
            status_pipe,
            aborted,
            control,
        } = self;

        let pump = {
            let job_id = job_id.clone();
            let indicator = Arc::clone(&indicator);
            thread::Builder::new()
                .name(format!("pump-{job_id}"))
                .spawn(move || pump_status(&job_id, status_pipe, indicator.as_ref()))
        };
        let pump = match pump {
            Ok(handle) => handle,
            Err(e) => {
                let _ = kill_group(child.id() as i32);
                let _ = child.wait();
                control.unregister(&job_id);
                return Err(JobError::Io(e));
            }
        };

        let stdout = child.stdout.take().and_then(|r| spawn_capture(&job_id, "stdout", r));
        let stderr = child.stderr.take().and_then(|r| spawn_capture(&job_id, "stderr", r));
        let pgid = child.id() as i32;
        let (spawn_control, spawn_job_id) = (Arc::clone(&control), job_id.clone());

        let waiter = thread::Builder::new()
            .name(format!("wait-{job_id}"))
            .spawn(move || {
                let status = child.wait();
                let pipe_error = pump.join().unwrap_or_else(|_| {
                    tracing::warn!(job_id = %job_id, "status pump panicked");
                    None
                });
                let mut report = match status {
                    Ok(status) => ExitReport::from_status(status),
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, "wait for backend: {}", e);
                        ExitReport::default()
                    }
                };
                report.aborted = aborted.load(Ordering::SeqCst);
                report.pipe_error = pipe_error;
                report.stdout = join_capture(stdout);
                report.stderr = join_capture(stderr);
                control.unregister(&job_id);

                let outcome = classify_exit(report);
                tracing::info!(job_id = %job_id, ?outcome, "backend exited");
                let info = match outcome {
                    ExitOutcome::Success => ProgressInfo::succeeded(&job_id),
                    ExitOutcome::Failure(e) => ProgressInfo::failed(&job_id, e),
                    ExitOutcome::Pause => ProgressInfo::paused(&job_id),
                };
                indicator(RunnerEvent::Exited(info));
            });
        waiter.map_err(|e| {
            // The waiter closure (and the Child in it) is gone; stop the group.
            let _ = kill_group(pgid);
            spawn_control.unregister(&spawn_job_id);
            JobError::Io(e)
        })
    }
}

/// Read status lines until EOF, forwarding each parsed one. Returns the last
/// error reported on the pipe.
fn pump_status(job_id: &str, pipe: File, indicator: &(dyn Fn(RunnerEvent) + Send + Sync)) -> Option<ExitError> {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut last_error = None;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(job_id, "read status pipe: {}", e);
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(job_id, &line) {
            Ok(info) => {
                if let Some(e) = &info.error {
                    last_error = Some(e.clone());
                }
                indicator(RunnerEvent::Progress(info));
            }
            Err(e) => tracing::warn!(job_id, "{}", e),
        }
    }
    last_error
}

fn spawn_capture<R: Read + Send + 'static>(
    job_id: &str,
    what: &'static str,
    reader: R,
) -> Option<JoinHandle<String>> {
    let handle = thread::Builder::new()
        .name(format!("{what}-{job_id}"))
        .spawn(move || capture_output(reader));
    match handle {
        Ok(h) => Some(h),
        Err(e) => {
            tracing::warn!(job_id, "cannot capture backend {}: {}", what, e);
            None
        }
    }
}

/// Keep the first `OUTPUT_CAPTURE_LIMIT` bytes and discard the rest, so the
/// child never blocks on a full pipe.
fn capture_output<R: Read>(mut reader: R) -> String {
    let mut kept = Vec::new();
    let _ = (&mut reader).take(OUTPUT_CAPTURE_LIMIT).read_to_end(&mut kept);
    let _ = io::copy(&mut reader, &mut io::sink());
    String::from_utf8_lossy(&kept).into_owned()
}

fn join_capture(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, JobType};
    use std::process::Command;
    use std::sync::mpsc;
    use std::time::Duration;

    /// Runs the given shell script for every job.
    struct ShellBackend(&'static str);

    impl Backend for ShellBackend {
        fn command(&self, _job: &Job) -> Result<Command, JobError> {
            let mut cmd = Command::new("/bin/sh");
            cmd.arg("-c").arg(self.0);
            Ok(cmd)
        }
    }

    struct MissingBackend;

    impl Backend for MissingBackend {
        fn command(&self, _job: &Job) -> Result<Command, JobError> {
            Ok(Command::new("/nonexistent/pkgupd-backend"))
        }
    }

    fn run(script: &'static str) -> (Vec<RunnerEvent>, Arc<JobControl>) {
        let control = Arc::new(JobControl::new());
        let runner = CommandRunner::new(Arc::new(ShellBackend(script)), Arc::clone(&control));
        let job = Job::builder("1install", JobType::Install).build();
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let indicator: Indicator = Arc::new(move |ev| {
            let _ = tx.lock().unwrap().send(ev);
        });
        let handle = runner.spawn(&job).unwrap().attach(indicator).unwrap();
        handle.join().unwrap();
        (rx.try_iter().collect(), control)
    }

    fn exited(events: &[RunnerEvent]) -> &ProgressInfo {
        match events.last() {
            Some(RunnerEvent::Exited(info)) => info,
            other => panic!("expected exit event last, got {other:?}"),
        }
    }

    #[test]
    fn status_lines_then_success() {
        let (events, control) = run(
            "echo 'dlstatus:vim:50:fetching vim' >&3; echo garbage >&3; echo 'pmstatus:vim:100:done' >&3; exit 0",
        );
        assert_eq!(events.len(), 3);
        match &events[0] {
            RunnerEvent::Progress(info) => {
                assert_eq!(info.progress, 0.25);
                assert!(info.cancelable);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[1] {
            RunnerEvent::Progress(info) => {
                assert_eq!(info.progress, 1.0);
                assert!(!info.cancelable);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(exited(&events).status, JobStatus::Succeed);
        assert!(!control.is_running("1install"));
    }

    #[test]
    fn failing_exit_with_error_output() {
        let (events, _) = run("echo 'E: Could not get lock /var/lib/dpkg/lock' >&2; exit 100");
        let info = exited(&events);
        assert_eq!(info.status, JobStatus::Failed);
        assert_eq!(info.progress, -1.0);
        assert!(info.description.contains("lock_failed"));
    }

    #[test]
    fn pipe_error_fails_even_on_clean_exit() {
        let (events, _) = run("echo 'pmerror:vim:10:E: Unable to locate package vim' >&3; exit 0");
        assert_eq!(events.len(), 2);
        assert_eq!(exited(&events).status, JobStatus::Failed);
    }

    #[test]
    fn unexplained_failure_is_success() {
        let (events, _) = run("exit 3");
        assert_eq!(exited(&events).status, JobStatus::Succeed);
    }

    #[test]
    fn abort_kills_group_and_reports_pause() {
        let control = Arc::new(JobControl::new());
        let runner = CommandRunner::new(
            Arc::new(ShellBackend("echo 'dlstatus:vim:10:start' >&3; sleep 30; sleep 30")),
            Arc::clone(&control),
        );
        let job = Job::builder("2download", JobType::Download).build();
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let indicator: Indicator = Arc::new(move |ev| {
            let _ = tx.lock().unwrap().send(ev);
        });
        let handle = runner.spawn(&job).unwrap().attach(indicator).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(matches!(first, RunnerEvent::Progress(_)));
        control.request_abort("2download").unwrap();
        handle.join().unwrap();

        let last = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        match last {
            RunnerEvent::Exited(info) => assert_eq!(info.status, JobStatus::Paused),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_is_backend_start_error() {
        let runner = CommandRunner::new(Arc::new(MissingBackend), Arc::new(JobControl::new()));
        let job = Job::builder("3remove", JobType::Remove).build();
        assert!(matches!(
            runner.spawn(&job),
            Err(JobError::BackendStart { .. })
        ));
        assert!(!runner.control().is_running("3remove"));
    }

    #[test]
    fn capture_is_bounded() {
        let data = vec![b'x'; (OUTPUT_CAPTURE_LIMIT as usize) * 2];
        let out = capture_output(&data[..]);
        assert_eq!(out.len(), OUTPUT_CAPTURE_LIMIT as usize);
    }
}
