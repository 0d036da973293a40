//! CLI for the pkgupd package update daemon.

mod commands;
pub mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pkgupd_core::config;
use pkgupd_core::job::JobType;

use commands::{
    run_clean, run_create, run_daemon, run_list, run_mode_status, run_pause, run_start,
};

/// Top-level CLI for pkgupd.
#[derive(Debug, Parser)]
#[command(name = "pkgupd")]
#[command(about = "pkgupd: package update daemon and client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the daemon: dispatch loop, size checks and control socket.
    Run,

    /// Create a job (or show the existing one doing the same thing).
    Create {
        /// Job kind, e.g. install, remove, update, dist_upgrade, update_source.
        kind: JobType,

        /// Packages the job operates on.
        packages: Vec<String>,

        /// Update modes driven by this job (comma separated, e.g. system,security).
        #[arg(long, value_name = "MODES")]
        mode: Option<String>,

        /// Take a system backup before a dist-upgrade.
        #[arg(long)]
        backup: bool,

        /// Create the job paused instead of starting it when a slot frees up.
        #[arg(long)]
        no_start: bool,
    },

    /// Mark a job ready and move it to the front of its queue.
    Start {
        /// Job identifier, e.g. 3install.
        id: String,
    },

    /// Pause a queued job, aborting its backend if it is running.
    Pause {
        /// Job identifier.
        id: String,
    },

    /// Remove a failed or paused job (and anything chained after it).
    Clean {
        /// Job identifier.
        id: String,
    },

    /// Show all queued jobs.
    List,

    /// Show the persisted update-mode status.
    ModeStatus,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run => run_daemon(&cfg).await?,
            CliCommand::Create {
                kind,
                packages,
                mode,
                backup,
                no_start,
            } => run_create(kind, packages, mode.as_deref(), backup, !no_start).await?,
            CliCommand::Start { id } => run_start(&id).await?,
            CliCommand::Pause { id } => run_pause(&id).await?,
            CliCommand::Clean { id } => run_clean(&id).await?,
            CliCommand::List => run_list().await?,
            CliCommand::ModeStatus => run_mode_status(&cfg)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
