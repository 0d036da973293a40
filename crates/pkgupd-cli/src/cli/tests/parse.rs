//! Tests for subcommand parsing.

use super::{parse, Cli};
use crate::cli::CliCommand;
use clap::Parser;
use pkgupd_core::job::JobType;

#[test]
fn cli_parse_run() {
    assert!(matches!(parse(&["pkgupd", "run"]), CliCommand::Run));
}

#[test]
fn cli_parse_create_install() {
    match parse(&["pkgupd", "create", "install", "vim", "git"]) {
        CliCommand::Create {
            kind,
            packages,
            mode,
            backup,
            no_start,
        } => {
            assert_eq!(kind, JobType::Install);
            assert_eq!(packages, vec!["vim", "git"]);
            assert!(mode.is_none());
            assert!(!backup);
            assert!(!no_start);
        }
        _ => panic!("expected Create"),
    }
}

#[test]
fn cli_parse_create_dist_upgrade_with_options() {
    match parse(&[
        "pkgupd",
        "create",
        "dist_upgrade",
        "--mode",
        "system,security",
        "--backup",
        "--no-start",
    ]) {
        CliCommand::Create {
            kind,
            packages,
            mode,
            backup,
            no_start,
        } => {
            assert_eq!(kind, JobType::DistUpgrade);
            assert!(packages.is_empty());
            assert_eq!(mode.as_deref(), Some("system,security"));
            assert!(backup);
            assert!(no_start);
        }
        _ => panic!("expected Create with options"),
    }
}

#[test]
fn cli_rejects_unknown_kind() {
    assert!(Cli::try_parse_from(["pkgupd", "create", "frobnicate", "vim"]).is_err());
}

#[test]
fn cli_parse_job_commands() {
    match parse(&["pkgupd", "start", "3install"]) {
        CliCommand::Start { id } => assert_eq!(id, "3install"),
        _ => panic!("expected Start"),
    }
    match parse(&["pkgupd", "pause", "3install"]) {
        CliCommand::Pause { id } => assert_eq!(id, "3install"),
        _ => panic!("expected Pause"),
    }
    match parse(&["pkgupd", "clean", "3install"]) {
        CliCommand::Clean { id } => assert_eq!(id, "3install"),
        _ => panic!("expected Clean"),
    }
    assert!(matches!(parse(&["pkgupd", "list"]), CliCommand::List));
    assert!(matches!(
        parse(&["pkgupd", "mode-status"]),
        CliCommand::ModeStatus
    ));
}

#[test]
fn cli_pause_requires_id() {
    assert!(Cli::try_parse_from(["pkgupd", "pause"]).is_err());
}
