// tests/custom_tasks.rs

mod common;

use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::watch;

use common::builders::{ConfigFileBuilder, project_spec};
use seqdag::config::TaskSettings;
use seqdag::exec::{StepResult, TaskEngine};
use seqdag::registry::ProjectHandle;
use seqdag::services::{LogMailer, Services};
use seqdag::task::TaskCatalog;
use seqdag::types::ProjectStatus;

type TestResult = Result<(), Box<dyn Error>>;

const DEFINITIONS: &str = r#"
[task.blast]
cmd = "echo blast"
dependencies = ["assemble"]
order = 110

[task.report_html]
cmd = "echo report"
dependencies = ["blast"]

[task.copy]
cmd = "echo shadowing a built-in"

[task."bad name"]
cmd = "echo"

[task.empty]
cmd = "   "

[task.selfish]
cmd = "echo"
dependencies = ["selfish"]

[task.orphan]
cmd = "echo"
dependencies = ["ghost"]

[task.stranded]
cmd = "echo"
dependencies = ["orphan"]

[task.loop_a]
cmd = "echo"
dependencies = ["loop_b"]

[task.loop_b]
cmd = "echo"
dependencies = ["loop_a"]

[task.after_loop]
cmd = "echo"
dependencies = ["loop_a"]

[task.typo]
cmd = "echo"
dependecies = ["blast"]
"#;

fn write(dir: &Path, name: &str, text: &str) -> std::io::Result<()> {
    std::fs::write(dir.join(name), text)
}

#[test]
fn load_custom_accepts_valid_and_rejects_the_rest() -> TestResult {
    common::init_tracing();
    let tmp = TempDir::new()?;
    let file = tmp.path().join("tasks.toml");
    std::fs::write(&file, DEFINITIONS)?;

    let mut catalog = TaskCatalog::with_builtins(&Services::default());
    let report = catalog.load_custom(&file);

    assert_eq!(report.loaded, ["blast", "report_html"]);
    let rejected: BTreeMap<&str, &str> = report
        .rejected
        .iter()
        .map(|(name, reason)| (name.as_str(), reason.as_str()))
        .collect();
    let expect = [
        ("bad name", "invalid task name"),
        ("copy", "already registered"),
        ("empty", "has no command"),
        ("selfish", "depends on itself"),
        ("orphan", "unknown task 'ghost'"),
        ("stranded", "unknown task 'orphan'"),
        ("loop_a", "cycle"),
        ("loop_b", "cycle"),
        ("after_loop", "unknown task 'loop_a'"),
        ("typo", "malformed"),
    ];
    assert_eq!(rejected.len(), expect.len(), "rejected: {rejected:?}");
    for (name, needle) in expect {
        let reason = rejected
            .get(name)
            .unwrap_or_else(|| panic!("{name} should be rejected"));
        assert!(reason.contains(needle), "{name}: {reason:?} lacks {needle:?}");
    }

    let blast = catalog.get("blast").unwrap();
    assert_eq!(blast.order(), 110);
    assert_eq!(blast.dependencies(), ["assemble"]);
    assert_eq!(catalog.get("report_html").unwrap().order(), 100);
    assert!(!catalog.contains("loop_a"));
    Ok(())
}

#[test]
fn directory_source_loads_every_toml_file() -> TestResult {
    let tmp = TempDir::new()?;
    write(tmp.path(), "a.toml", "[task.alpha]\ncmd = \"echo a\"\n")?;
    write(tmp.path(), "b.toml", "[task.beta\ncmd = \"broken\"\n")?;
    write(tmp.path(), "c.toml", "[task.gamma]\ncmd = \"echo c\"\ndependencies = [\"alpha\"]\n")?;
    write(tmp.path(), "notes.txt", "[task.ignored]\ncmd = \"echo\"\n")?;

    let mut catalog = TaskCatalog::new();
    let report = catalog.load_custom(tmp.path());

    assert_eq!(report.loaded, ["alpha", "gamma"]);
    assert_eq!(report.rejected.len(), 1);
    assert!(report.rejected[0].0.ends_with("b.toml"));
    assert!(!catalog.contains("ignored"));
    Ok(())
}

#[test]
fn missing_source_loads_nothing() {
    let mut catalog = TaskCatalog::new();
    let report = catalog.load_custom(Path::new("/definitely/not/here"));
    assert!(report.loaded.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert!(catalog.names().is_empty());
}

fn command_engine(root: &Path, definitions: &str, retries: u32) -> std::io::Result<TaskEngine> {
    common::init_tracing();
    let source = root.join("custom.toml");
    std::fs::write(&source, definitions)?;
    let cfg = ConfigFileBuilder::new(root)
        .task_defaults(&[])
        .task_null(&[])
        .task_settings(
            "flaky",
            TaskSettings {
                retries,
                retry_delay: Some(0),
                ..TaskSettings::default()
            },
        )
        .build();
    let mut catalog = TaskCatalog::new();
    let report = catalog.load_custom(&source);
    assert!(report.rejected.is_empty(), "{:?}", report.rejected);
    Ok(TaskEngine::new(
        Arc::new(cfg),
        Arc::new(catalog),
        Arc::new(LogMailer::default()),
    ))
}

fn project(root: &Path, requested: &[&str]) -> Arc<ProjectHandle> {
    Arc::new(ProjectHandle::new(
        project_spec("P1", root.join("processed").join("RUN1-EXP1-P1"), requested),
        ProjectStatus::Pending,
        None,
    ))
}

#[tokio::test]
async fn command_runs_in_work_dir_with_context_env() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = command_engine(
        tmp.path(),
        r#"
[task.hello]
cmd = "printf '%s %s' \"$SEQDAG_PROJECT\" \"$SEQDAG_RUN_ID\" > marker.txt"
"#,
        0,
    )?;
    let p = project(tmp.path(), &["hello"]);
    let (_tx, rx) = watch::channel(false);

    let result = common::with_timeout(engine.run_project(&p, &rx)).await;
    assert_eq!(result, StepResult::Finished(ProjectStatus::Success));

    let marker = std::fs::read_to_string(p.spec().work_dir.join("marker.txt"))?;
    assert_eq!(marker, "P1 RUN1");

    let plan = p.state().plan.unwrap();
    assert_eq!(
        plan.entries()[0].output.get("exit_code").map(String::as_str),
        Some("0")
    );
    Ok(())
}

#[tokio::test]
async fn exit_75_is_retried() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = command_engine(
        tmp.path(),
        r#"
[task.flaky]
cmd = "echo attempt >> attempts.txt; exit 75"
"#,
        1,
    )?;
    let p = project(tmp.path(), &["flaky"]);
    let (_tx, rx) = watch::channel(false);

    let result = common::with_timeout(engine.run_project(&p, &rx)).await;
    assert_eq!(result, StepResult::Finished(ProjectStatus::Failed));

    let attempts = std::fs::read_to_string(p.spec().work_dir.join("attempts.txt"))?;
    assert_eq!(attempts.lines().count(), 2);
    assert!(p.state().reason.unwrap().contains("retry"));
    Ok(())
}

#[tokio::test]
async fn other_exit_codes_fail_without_retry() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = command_engine(
        tmp.path(),
        r#"
[task.flaky]
cmd = "echo attempt >> attempts.txt; exit 3"
"#,
        5,
    )?;
    let p = project(tmp.path(), &["flaky"]);
    let (_tx, rx) = watch::channel(false);

    let result = common::with_timeout(engine.run_project(&p, &rx)).await;
    assert_eq!(result, StepResult::Finished(ProjectStatus::Failed));

    let attempts = std::fs::read_to_string(p.spec().work_dir.join("attempts.txt"))?;
    assert_eq!(attempts.lines().count(), 1);
    assert!(p.state().reason.unwrap().contains("status 3"));
    Ok(())
}
