//! `pkgupd list` – show queued jobs.

use anyhow::Result;

use crate::cli::control_socket::{self, Request};

pub async fn run_list() -> Result<()> {
    let jobs = match control_socket::request(Request::List).await? {
        Some(body) => control_socket::snapshots(body)?,
        None => Vec::new(),
    };
    if jobs.is_empty() {
        println!("No queued jobs.");
    } else {
        println!(
            "{:<18} {:<22} {:<8} {:>6} {:<14} {}",
            "ID", "KIND", "STATUS", "PROG", "QUEUE", "PACKAGES"
        );
        for j in jobs {
            let progress = if j.progress < 0.0 {
                "err".to_string()
            } else {
                format!("{:.0}%", j.progress * 100.0)
            };
            println!(
                "{:<18} {:<22} {:<8} {:>6} {:<14} {}",
                j.id,
                j.kind.as_str(),
                j.status.as_str(),
                progress,
                j.queue,
                j.packages.join(" ")
            );
            if j.status == pkgupd_core::job::JobStatus::Failed && !j.description.is_empty() {
                println!("    {}", j.description);
            }
        }
    }
    Ok(())
}
