//! Control socket: server (during `pkgupd run`) and client (every other job command).
//!
//! Protocol: one request line, answered by one reply line.
//!
//! ```text
//! create <kind> <modes|-> <start:0|1> <backup:0|1> [packages..]
//! start <id> | pause <id> | clean <id> | list
//! ```
//!
//! Replies are `ok [json]` or `err <message>`.

use anyhow::{Context, Result};
use pkgupd_core::job::{JobSnapshot, JobType};
use pkgupd_core::manager::{JobManager, JobOptions};
use pkgupd_core::mode::UpdateMode;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Create {
        kind: JobType,
        packages: Vec<String>,
        mode: UpdateMode,
        auto_start: bool,
        backup: bool,
    },
    Start(String),
    Pause(String),
    Clean(String),
    List,
}

fn parse_flag(s: Option<&str>) -> Result<bool, String> {
    match s {
        Some("1") => Ok(true),
        Some("0") => Ok(false),
        other => Err(format!("expected 0 or 1, got {other:?}")),
    }
}

fn job_id(verb: &str, s: Option<&str>) -> Result<String, String> {
    s.map(str::to_string)
        .ok_or_else(|| format!("{verb}: missing job id"))
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or("empty request")?;
        match verb {
            "start" => Ok(Request::Start(job_id(verb, parts.next())?)),
            "pause" => Ok(Request::Pause(job_id(verb, parts.next())?)),
            "clean" => Ok(Request::Clean(job_id(verb, parts.next())?)),
            "list" => Ok(Request::List),
            "create" => {
                let kind = parts
                    .next()
                    .ok_or("create: missing kind")?
                    .parse::<JobType>()
                    .map_err(|e| e.to_string())?;
                let mode = match parts.next().ok_or("create: missing modes")? {
                    "-" => UpdateMode::empty(),
                    list => UpdateMode::parse_list(list)
                        .ok_or_else(|| format!("create: unknown update mode in {list:?}"))?,
                };
                let auto_start = parse_flag(parts.next())?;
                let backup = parse_flag(parts.next())?;
                Ok(Request::Create {
                    kind,
                    packages: parts.map(str::to_string).collect(),
                    mode,
                    auto_start,
                    backup,
                })
            }
            other => Err(format!("unknown request {other:?}")),
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            Request::Create {
                kind,
                packages,
                mode,
                auto_start,
                backup,
            } => {
                let mode = if mode.is_empty() {
                    "-".to_string()
                } else {
                    mode.to_string()
                };
                let mut line = format!(
                    "create {} {} {} {}",
                    kind.as_str(),
                    mode,
                    u8::from(*auto_start),
                    u8::from(*backup)
                );
                for p in packages {
                    line.push(' ');
                    line.push_str(p);
                }
                line
            }
            Request::Start(id) => format!("start {id}"),
            Request::Pause(id) => format!("pause {id}"),
            Request::Clean(id) => format!("clean {id}"),
            Request::List => "list".to_string(),
        }
    }
}

/// Execute one request line against the manager and render the reply line.
pub fn handle_request(mgr: &JobManager, line: &str) -> String {
    let req = match Request::parse(line) {
        Ok(req) => req,
        Err(e) => return format!("err {e}"),
    };
    let result: Result<Option<serde_json::Value>, pkgupd_core::error::JobError> = match req {
        Request::Create {
            kind,
            packages,
            mode,
            auto_start,
            backup,
        } => {
            let opts = JobOptions {
                update_mode: mode,
                auto_start,
                backup,
                ..JobOptions::default()
            };
            mgr.create_job(kind, packages, HashMap::new(), opts)
                .map(|(existed, job)| {
                    Some(serde_json::json!({ "existed": existed, "job": job.snapshot() }))
                })
        }
        Request::Start(id) => mgr.mark_start(&id).map(|_| None),
        Request::Pause(id) => mgr.pause_job(&id).map(|_| None),
        Request::Clean(id) => mgr.clean_job(&id).map(|_| None),
        Request::List => Ok(Some(serde_json::json!(mgr.list()))),
    };
    match result {
        Ok(Some(body)) => format!("ok {body}"),
        Ok(None) => "ok".to_string(),
        Err(e) => format!("err {e}"),
    }
}

/// Spawns a task that listens on `path` and answers each request line with
/// [`handle_request`].
pub fn spawn_control_listener(
    manager: Arc<JobManager>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create dir: {}", dir.display()))?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind control socket: {}", path.display()))?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let mgr = Arc::clone(&manager);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(mgr, stream).await {
                            tracing::debug!("control connection: {}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve_connection(mgr: Arc<JobManager>, stream: UnixStream) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let mgr = Arc::clone(&mgr);
        let reply = tokio::task::spawn_blocking(move || handle_request(&mgr, &line))
            .await
            .context("control request task")?;
        write.write_all(reply.as_bytes()).await?;
        write.write_all(b"\n").await?;
    }
    Ok(())
}

/// Send one request to a running daemon and return the JSON body of an `ok`
/// reply (`None` when the reply carries no body).
pub async fn send_request(socket_path: &Path, req: &Request) -> Result<Option<serde_json::Value>> {
    let stream = UnixStream::connect(socket_path).await.with_context(|| {
        format!(
            "connect to {} (is `pkgupd run` active?)",
            socket_path.display()
        )
    })?;
    let (read, mut write) = stream.into_split();
    write.write_all(req.to_line().as_bytes()).await?;
    write.write_all(b"\n").await?;
    let reply = BufReader::new(read)
        .lines()
        .next_line()
        .await?
        .context("daemon closed the connection without replying")?;
    parse_reply(&reply)
}

pub fn parse_reply(reply: &str) -> Result<Option<serde_json::Value>> {
    if let Some(msg) = reply.strip_prefix("err ") {
        anyhow::bail!("{}", msg);
    }
    match reply.strip_prefix("ok") {
        Some(body) if body.trim().is_empty() => Ok(None),
        Some(body) => Ok(Some(
            serde_json::from_str(body.trim()).context("malformed reply body")?,
        )),
        None => anyhow::bail!("malformed reply: {}", reply),
    }
}

/// Snapshots carried in a `list` reply.
pub fn snapshots(body: serde_json::Value) -> Result<Vec<JobSnapshot>> {
    serde_json::from_value(body).context("malformed job list")
}

/// Convenience for the job commands: resolve the default socket and send.
pub async fn request(req: Request) -> Result<Option<serde_json::Value>> {
    let path = pkgupd_core::control::default_control_socket_path()?;
    send_request(&path, &req).await
}
