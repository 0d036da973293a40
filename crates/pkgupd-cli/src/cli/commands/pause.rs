//! `pkgupd pause <id>` – pause a job, aborting its backend if it is running.

use anyhow::Result;

use crate::cli::control_socket::{self, Request};

pub async fn run_pause(id: &str) -> Result<()> {
    control_socket::request(Request::Pause(id.to_string())).await?;
    println!("Paused job {id}");
    Ok(())
}
