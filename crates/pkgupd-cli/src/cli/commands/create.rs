//! `pkgupd create <kind> [packages..]` – queue a job on the running daemon.

use anyhow::{Context, Result};
use pkgupd_core::job::{JobSnapshot, JobType};
use pkgupd_core::mode::UpdateMode;

use crate::cli::control_socket::{self, Request};

pub async fn run_create(
    kind: JobType,
    packages: Vec<String>,
    mode: Option<&str>,
    backup: bool,
    auto_start: bool,
) -> Result<()> {
    let mode = match mode {
        Some(list) => UpdateMode::parse_list(list)
            .with_context(|| format!("unknown update mode in {list:?}"))?,
        None => UpdateMode::empty(),
    };
    let body = control_socket::request(Request::Create {
        kind,
        packages,
        mode,
        auto_start,
        backup,
    })
    .await?
    .context("daemon sent no job")?;

    let existed = body["existed"].as_bool().unwrap_or(false);
    let job: JobSnapshot =
        serde_json::from_value(body["job"].clone()).context("malformed job in reply")?;
    if existed {
        println!("Job {} already exists ({})", job.id, job.status);
    } else {
        println!("Created job {} ({} in {} queue)", job.id, job.kind, job.queue);
    }
    Ok(())
}
