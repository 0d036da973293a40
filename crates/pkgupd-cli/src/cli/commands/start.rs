//! `pkgupd start <id>` – make a job eligible and move it to the front of its queue.

use anyhow::Result;

use crate::cli::control_socket::{self, Request};

pub async fn run_start(id: &str) -> Result<()> {
    control_socket::request(Request::Start(id.to_string())).await?;
    println!("Started job {id}");
    Ok(())
}
