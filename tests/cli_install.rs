// tests/cli_install.rs

mod common;

use std::error::Error;

use clap::Parser;
use tempfile::TempDir;
use tracing_subscriber::filter::LevelFilter;

use common::builders::ConfigFileBuilder;
use seqdag::cli::{Action, CliArgs};
use seqdag::engine::ExitStatus;
use seqdag::install::{install, required_dirs, systemd_unit};
use seqdag::logging::{LogControl, parse_level_str, shift_level};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn cli_defaults_to_report() -> TestResult {
    let args = CliArgs::try_parse_from(["seqdag"])?;
    assert_eq!(args.action, Action::Report);
    assert!(args.config.is_none());
    assert!(!args.dry_run);
    assert_eq!((args.verbose, args.quiet), (0, 0));
    Ok(())
}

#[test]
fn cli_parses_action_and_counts_flags() -> TestResult {
    let args = CliArgs::try_parse_from([
        "seqdag", "-a", "process", "-c", "/etc/seqdag.toml", "-n", "-vv", "-q",
    ])?;
    assert_eq!(args.action, Action::Process);
    assert_eq!(args.config.as_deref(), Some(std::path::Path::new("/etc/seqdag.toml")));
    assert!(args.dry_run);
    assert_eq!((args.verbose, args.quiet), (2, 1));

    assert!(CliArgs::try_parse_from(["seqdag", "--action", "explode"]).is_err());
    Ok(())
}

#[test]
fn exit_codes() {
    assert_eq!(ExitStatus::Clean.code(), 0);
    assert_eq!(ExitStatus::Interrupted.code(), 2);
    assert_eq!(ExitStatus::Forced.code(), 130);
}

#[test]
fn level_ladder_clamps() {
    assert_eq!(shift_level(LevelFilter::WARN, 1), LevelFilter::INFO);
    assert_eq!(shift_level(LevelFilter::WARN, 2), LevelFilter::DEBUG);
    assert_eq!(shift_level(LevelFilter::WARN, -2), LevelFilter::OFF);
    assert_eq!(shift_level(LevelFilter::DEBUG, 10), LevelFilter::TRACE);
    assert_eq!(shift_level(LevelFilter::ERROR, -10), LevelFilter::OFF);

    assert_eq!(parse_level_str(" Warning "), Some(LevelFilter::WARN));
    assert_eq!(parse_level_str("TRACE"), Some(LevelFilter::TRACE));
    assert_eq!(parse_level_str("loud"), None);
}

#[test]
fn log_control_shifts_and_remembers() {
    let control = LogControl::detached(LevelFilter::WARN);
    assert_eq!(control.shift(1), LevelFilter::INFO);
    assert_eq!(control.level(), LevelFilter::INFO);

    // Clones share the level.
    let other = control.clone();
    assert_eq!(other.shift(-5), LevelFilter::OFF);
    assert_eq!(control.level(), LevelFilter::OFF);
}

#[test]
fn dry_run_install_only_prints() -> TestResult {
    let tmp = TempDir::new()?;
    let root = tmp.path();
    let cfg = ConfigFileBuilder::new(root)
        .save_report(root.join("status").join("report.csv"), 60)
        .build();

    let mut out = Vec::new();
    let dirs = install(&cfg, None, true, &mut out)?;
    let text = String::from_utf8(out)?;

    assert_eq!(dirs, required_dirs(&cfg));
    assert_eq!(dirs.len(), 5);
    for dir in &dirs {
        assert!(text.contains(&format!("# would create {}", dir.display())));
        assert!(!dir.exists());
    }
    assert!(text.contains("ExecStart="));
    assert!(text.contains("--action process"));
    Ok(())
}

#[test]
fn install_creates_directories() -> TestResult {
    let tmp = TempDir::new()?;
    let root = tmp.path();
    let cfg = ConfigFileBuilder::new(root).build();

    let dirs = install(&cfg, None, false, std::io::sink())?;
    assert_eq!(
        dirs,
        [
            root.join("runs"),
            root.join("experiments"),
            root.join("processed"),
            root.join("packaged"),
        ]
    );
    assert!(dirs.iter().all(|d| d.is_dir()));

    // Running it again is harmless.
    install(&cfg, None, false, std::io::sink())?;
    Ok(())
}

#[test]
fn systemd_unit_points_at_config() {
    let unit = systemd_unit(Some(std::path::Path::new("/etc/seqdag.toml")));
    assert!(unit.contains("--action process --config /etc/seqdag.toml"));
    assert!(unit.contains("ExecReload=/bin/kill -HUP $MAINPID"));
    assert!(unit.contains("[Install]"));

    let bare = systemd_unit(None);
    assert!(!bare.contains("--config"));
}
