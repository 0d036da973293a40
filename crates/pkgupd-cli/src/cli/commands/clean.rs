//! `pkgupd clean <id>`

use anyhow::Result;

use crate::cli::control_socket::{self, Request};

pub async fn run_clean(id: &str) -> Result<()> {
    control_socket::request(Request::Clean(id.to_string())).await?;
    println!("Cleaned job {id}");
    Ok(())
}
