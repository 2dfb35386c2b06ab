// tests/config_errors.rs

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::NamedTempFile;
use seqdag::config::load_and_validate;
use seqdag::errors::SeqdagError;

fn config_file(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{text}").unwrap();
    file
}

fn expect_config_error(text: &str, needle: &str) {
    let file = config_file(text);
    match load_and_validate(file.path()) {
        Err(SeqdagError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "message {msg:?} should mention {needle:?}");
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn zero_threads_is_rejected() {
    expect_config_error("nthreads = 0\n", "nthreads");
    expect_config_error("nthreads_per_project = 0\n", "nthreads_per_project");
}

#[test]
fn zero_poll_is_rejected() {
    expect_config_error("poll = 0\n", "poll");
}

#[test]
fn min_age_above_max_age_is_rejected() {
    expect_config_error("min_age = 100\nmax_age = 10\n", "min_age");
}

#[test]
fn zero_gate_delta_is_rejected() {
    expect_config_error(
        r#"
[task_options.tasks.manual]
timeout = 60
delta = 0
"#,
        "manual",
    );
}

#[test]
fn unknown_log_level_is_rejected() {
    expect_config_error("loglevel = \"chatty\"\n", "loglevel");
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = config_file("nthreads = [\n");
    match load_and_validate(file.path()) {
        Err(SeqdagError::TomlError(_)) => {}
        other => panic!("Expected TomlError, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    match load_and_validate("/definitely/not/here/seqdag.toml") {
        Err(SeqdagError::IoError(_)) => {}
        other => panic!("Expected IoError, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn full_config_is_parsed_and_paths_resolved() {
    let file = config_file(
        r#"
readonly = true
nthreads = 4
nthreads_per_project = 8
min_age = 60
max_age = 2592000
poll = 7
wait = true
loglevel = "info"

[paths]
root = "/seq"
processed = "/data/processed"

[task_options]
task_defaults = ["metadata"]
task_null = ["copy"]
implicit_tasks_path = "RunDiagnostics/ImplicitTasks"

[task_options.tasks.manual]
timeout = 3600
delta = 10

[task_options.tasks.upload]
retries = 2

[save_report]
path = "/seq/status/report.csv"
max_width = 40

[mailer]
from = "seqdag@example.org"
to_addrs_on_error = ["admin@example.org"]
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert!(cfg.readonly);
    assert_eq!(cfg.nthreads, 4);
    assert_eq!(cfg.nthreads_per_project, 8);
    assert_eq!(cfg.min_age, Some(Duration::from_secs(60)));
    assert_eq!(cfg.poll, Duration::from_secs(7));
    assert!(cfg.wait);

    assert_eq!(cfg.paths.runs, PathBuf::from("/seq/runs"));
    assert_eq!(cfg.paths.processed, PathBuf::from("/data/processed"));
    assert_eq!(
        cfg.paths.experiment_metadata("EXP1"),
        PathBuf::from("/seq/experiments/EXP1/metadata.csv")
    );

    let manual = cfg.task_options.settings_for("manual");
    assert_eq!(manual.timeout, Some(3600));
    assert_eq!(manual.delta, Some(10));
    assert_eq!(cfg.task_options.settings_for("upload").retries, 2);
    assert_eq!(cfg.task_options.settings_for("copy").retries, 0);

    assert_eq!(cfg.save_report.max_width, 40);
    assert_eq!(cfg.error_recipients(), ["admin@example.org".to_string()]);
}

#[test]
fn empty_file_uses_defaults() {
    let file = config_file("");
    let cfg = load_and_validate(file.path()).unwrap();
    assert!(!cfg.readonly);
    assert_eq!(cfg.nthreads, 1);
    assert_eq!(cfg.poll, Duration::from_secs(5));
    assert_eq!(cfg.max_transient_wait, Duration::from_secs(600));
    assert_eq!(cfg.task_options.task_defaults, ["metadata", "email"]);
    assert_eq!(cfg.task_options.task_null, ["copy"]);
    assert!(cfg.error_recipients().is_empty());
}
