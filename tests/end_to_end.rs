// tests/end_to_end.rs

mod common;

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tracing::level_filters::LevelFilter;

use common::builders::ConfigFileBuilder;
use common::fake_tasks::{CallLog, RecordingMailer, ScriptedTask};
use common::fixtures::RunFixture;
use seqdag::config::ConfigFile;
use seqdag::engine::{ControlEvent, ExitStatus, Processor};
use seqdag::exec::{StepResult, TaskEngine};
use seqdag::logging::LogControl;
use seqdag::registry::Registry;
use seqdag::report;
use seqdag::services::{LocalUploader, LogMailer, Services};
use seqdag::task::{Task, TaskCatalog};
use seqdag::types::{ProjectStatus, TaskStatus};
use seqdag::{build_catalog, build_discovery};

type TestResult = Result<(), Box<dyn Error>>;

const RUN_DIR: &str = "240101_M00001_0001_000000000-ABCDE";

fn config(root: &Path) -> ConfigFileBuilder {
    ConfigFileBuilder::new(root)
        .task_defaults(&["metadata"])
        .task_null(&["copy"])
        .nthreads(2)
}

fn seed(root: &Path) -> std::io::Result<()> {
    RunFixture::new(RUN_DIR, "RUN1", "EXP1")
        .sample("S1", "P1", "")
        .sample("S2", "P1", "")
        .write(&root.join("runs"), &root.join("experiments"))?;
    Ok(())
}

fn engine(cfg: &Arc<ConfigFile>) -> Arc<TaskEngine> {
    let services = Services::new(Arc::new(LocalUploader), RecordingMailer::new());
    Arc::new(TaskEngine::new(
        Arc::clone(cfg),
        Arc::new(TaskCatalog::with_builtins(&services)),
        Arc::clone(&services.mailer),
    ))
}

#[tokio::test]
async fn discovered_run_is_processed_on_disk() -> TestResult {
    common::init_tracing();
    let tmp = TempDir::new()?;
    let root = tmp.path();
    seed(root)?;
    let cfg = Arc::new(config(root).build());

    let mut discovery = build_discovery(Arc::clone(&cfg))?;
    let summary = discovery.refresh(SystemTime::now());
    assert_eq!(summary.new_projects, 1);

    let projects = discovery.registry().runnable_projects();
    assert_eq!(projects.len(), 1);
    let p = Arc::clone(&projects[0]);
    assert_eq!(p.spec().samples.len(), 2);

    let (_tx, rx) = watch::channel(false);
    let result = common::with_timeout(engine(&cfg).run_project(&p, &rx)).await;
    assert_eq!(result, StepResult::Finished(ProjectStatus::Success));

    let plan = p.state().plan.unwrap();
    assert_eq!(plan.names(), ["copy", "metadata"]);

    let work_dir = root.join("processed").join("RUN1-EXP1-P1");
    assert_eq!(p.spec().work_dir, work_dir);
    assert!(work_dir.join("RUN1").join("RunInfo.xml").is_file());
    assert!(
        work_dir
            .join("implicit")
            .join("Metadata")
            .join("metadata.csv")
            .is_file()
    );
    assert!(work_dir.join("logs").join("log_copy.txt").is_file());

    // A second discovery sees the output and leaves the project alone.
    let mut again = build_discovery(Arc::clone(&cfg))?;
    again.refresh(SystemTime::now());
    let rediscovered = again.registry().projects();
    assert_eq!(rediscovered.len(), 1);
    assert_eq!(rediscovered[0].status(), ProjectStatus::Inactive);
    Ok(())
}

#[test]
fn catalog_includes_custom_tasks_relative_to_root() -> TestResult {
    let tmp = TempDir::new()?;
    std::fs::write(
        tmp.path().join("tasks.toml"),
        "[task.blast]\ncmd = \"echo blast\"\ndependencies = [\"copy\"]\n",
    )?;
    let cfg = config(tmp.path()).custom_tasks_source("tasks.toml").build();

    let catalog = build_catalog(&cfg, &Services::default());
    assert!(catalog.contains("blast"));
    assert!(catalog.contains("copy"));
    assert!(catalog.contains("email"));
    Ok(())
}

async fn wait_for_status(registry: &Registry, status: ProjectStatus) {
    loop {
        let projects = registry.projects();
        if !projects.is_empty() && projects.iter().all(|p| p.status() == status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn processor_runs_until_shutdown_and_saves_report() -> TestResult {
    common::init_tracing();
    let tmp = TempDir::new()?;
    let root = tmp.path();
    seed(root)?;
    let report_path = root.join("status").join("report.csv");
    let cfg = Arc::new(config(root).poll(1).save_report(&report_path, 0).build());

    let discovery = build_discovery(Arc::clone(&cfg))?;
    let (control_tx, control_rx) = mpsc::channel(4);
    let processor = Processor::new(
        Arc::clone(&cfg),
        discovery,
        engine(&cfg),
        control_rx,
        LogControl::detached(LevelFilter::INFO),
    );
    let registry = Arc::clone(processor.registry());
    let handle = tokio::spawn(processor.run());

    common::with_timeout(wait_for_status(&registry, ProjectStatus::Success)).await;
    control_tx.send(ControlEvent::Shutdown).await?;

    let status = common::with_timeout(handle).await?;
    assert_eq!(status, ExitStatus::Clean);
    assert_eq!(status.code(), 0);

    let rows = report::parse(&std::fs::read_to_string(&report_path)?)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].unit_id(), "RUN1-EXP1-P1");
    assert_eq!(rows[0].status, "success");
    assert_eq!(rows[0].tasks, "copy:success metadata:success");
    Ok(())
}

#[tokio::test]
async fn readonly_processor_never_starts_work() -> TestResult {
    common::init_tracing();
    let tmp = TempDir::new()?;
    let root = tmp.path();
    seed(root)?;
    let cfg = Arc::new(config(root).readonly(true).build());

    let discovery = build_discovery(Arc::clone(&cfg))?;
    let (_control_tx, control_rx) = mpsc::channel(4);
    let mut processor = Processor::new(
        Arc::clone(&cfg),
        discovery,
        engine(&cfg),
        control_rx,
        LogControl::detached(LevelFilter::INFO),
    );

    let (summary, started) = processor.cycle();
    assert_eq!(summary.new_projects, 1);
    assert_eq!(started, 0);
    assert_eq!(processor.pool().in_flight(), 0);
    assert!(!root.join("processed").exists());
    Ok(())
}

/// Config whose projects run `slow` and then `tail`.
fn scripted_config(root: &Path) -> ConfigFileBuilder {
    ConfigFileBuilder::new(root)
        .task_defaults(&[])
        .task_null(&["slow", "tail"])
        .nthreads(2)
        .poll(5)
}

fn scripted_engine(cfg: &Arc<ConfigFile>, tasks: Vec<Arc<dyn Task>>) -> Arc<TaskEngine> {
    let mut catalog = TaskCatalog::new();
    for task in tasks {
        catalog.register(task).unwrap();
    }
    Arc::new(TaskEngine::new(
        Arc::clone(cfg),
        Arc::new(catalog),
        Arc::new(LogMailer::default()),
    ))
}

fn scripted_processor(
    cfg: &Arc<ConfigFile>,
    tasks: Vec<Arc<dyn Task>>,
) -> Result<(Processor, mpsc::Sender<ControlEvent>), Box<dyn Error>> {
    common::init_tracing();
    let discovery = build_discovery(Arc::clone(cfg))?;
    let (control_tx, control_rx) = mpsc::channel(4);
    let processor = Processor::new(
        Arc::clone(cfg),
        discovery,
        scripted_engine(cfg, tasks),
        control_rx,
        LogControl::detached(LevelFilter::INFO),
    );
    Ok((processor, control_tx))
}

async fn wait_for_calls(calls: &CallLog, n: usize) {
    while calls.lock().len() < n {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn task_statuses(registry: &Registry) -> Vec<(String, TaskStatus)> {
    registry
        .projects()
        .first()
        .and_then(|p| p.state().plan)
        .map(|plan| {
            plan.entries()
                .iter()
                .map(|e| (e.name.clone(), e.status))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_running_task_finish() -> TestResult {
    let tmp = TempDir::new()?;
    seed(tmp.path())?;
    let cfg = Arc::new(scripted_config(tmp.path()).build());
    let slow = ScriptedTask::new("slow", 0, &[]).delay(Duration::from_secs(5));
    let slow_calls = slow.calls();
    let tail = ScriptedTask::new("tail", 0, &["slow"]);
    let tail_calls = tail.calls();
    let (processor, control_tx) = scripted_processor(&cfg, vec![slow.arc(), tail.arc()])?;
    let registry = Arc::clone(processor.registry());
    let handle = tokio::spawn(processor.run());

    common::with_timeout(wait_for_calls(&slow_calls, 1)).await;
    control_tx.send(ControlEvent::Shutdown).await?;

    let status = common::with_timeout(handle).await?;
    assert_eq!(status, ExitStatus::Interrupted);
    assert_eq!(status.code(), 2);

    // The running task completed; the next one was never started.
    assert_eq!(slow_calls.lock().len(), 1);
    assert!(tail_calls.lock().is_empty());
    assert_eq!(
        task_statuses(&registry),
        [
            ("slow".to_string(), TaskStatus::Success),
            ("tail".to_string(), TaskStatus::Pending),
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_shutdown_stops_without_waiting() -> TestResult {
    let tmp = TempDir::new()?;
    seed(tmp.path())?;
    let cfg = Arc::new(scripted_config(tmp.path()).build());
    let slow = ScriptedTask::new("slow", 0, &[]).delay(Duration::from_secs(3600));
    let slow_calls = slow.calls();
    let tail = ScriptedTask::new("tail", 0, &["slow"]);
    let (processor, control_tx) = scripted_processor(&cfg, vec![slow.arc(), tail.arc()])?;
    let registry = Arc::clone(processor.registry());
    let handle = tokio::spawn(processor.run());

    common::with_timeout(wait_for_calls(&slow_calls, 1)).await;
    let started = tokio::time::Instant::now();
    control_tx.send(ControlEvent::Shutdown).await?;
    control_tx.send(ControlEvent::Shutdown).await?;

    let status = common::with_timeout(handle).await?;
    assert_eq!(status, ExitStatus::Forced);
    assert_eq!(status.code(), 130);
    assert!(started.elapsed() < Duration::from_secs(3600));
    assert_eq!(registry.projects()[0].status(), ProjectStatus::Running);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn wait_mode_holds_the_next_cycle_until_workers_return() -> TestResult {
    let tmp = TempDir::new()?;
    let root = tmp.path();
    seed(root)?;
    let cfg = Arc::new(scripted_config(root).poll(1).wait(true).build());
    let slow = ScriptedTask::new("slow", 0, &[]).delay(Duration::from_secs(30));
    let slow_calls = slow.calls();
    let tail = ScriptedTask::new("tail", 0, &["slow"]);
    let (processor, control_tx) = scripted_processor(&cfg, vec![slow.arc(), tail.arc()])?;
    let registry = Arc::clone(processor.registry());
    let handle = tokio::spawn(processor.run());

    common::with_timeout(wait_for_calls(&slow_calls, 1)).await;
    RunFixture::new("240102_M00001_0002_000000000-FGHIJ", "RUN2", "EXP2")
        .sample("S9", "P9", "")
        .write(&root.join("runs"), &root.join("experiments"))?;

    // Many poll intervals pass, but the busy worker holds the loop.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(registry.runs().len(), 1);
    assert_eq!(registry.projects().len(), 1);

    // The worker returns at the 30s mark and the next cycle finds RUN2.
    tokio::time::sleep(Duration::from_secs(25)).await;
    common::with_timeout(async {
        while registry.projects().len() < 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert_eq!(registry.projects()[0].status(), ProjectStatus::Success);

    // RUN2's worker is now in its own 30s task.
    control_tx.send(ControlEvent::Shutdown).await?;
    assert_eq!(handle.await?, ExitStatus::Interrupted);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reload_forgets_state_and_rediscovers() -> TestResult {
    let tmp = TempDir::new()?;
    seed(tmp.path())?;
    let cfg = Arc::new(scripted_config(tmp.path()).build());
    let slow = ScriptedTask::new("slow", 0, &[]);
    let slow_calls = slow.calls();
    let tail = ScriptedTask::new("tail", 0, &["slow"]);
    let (processor, control_tx) = scripted_processor(&cfg, vec![slow.arc(), tail.arc()])?;
    let registry = Arc::clone(processor.registry());
    let handle = tokio::spawn(processor.run());

    common::with_timeout(wait_for_status(&registry, ProjectStatus::Success)).await;
    let before = Arc::clone(&registry.projects()[0]);
    control_tx.send(ControlEvent::Reload).await?;

    // Rediscovered from scratch; the work directory now holds output.
    common::with_timeout(wait_for_status(&registry, ProjectStatus::Inactive)).await;
    let after = registry.projects();
    assert_eq!(after.len(), 1);
    assert!(!Arc::ptr_eq(&before, &after[0]));
    assert_eq!(after[0].spec().work_dir_name, "RUN1-EXP1-P1");
    assert_eq!(slow_calls.lock().len(), 1);

    control_tx.send(ControlEvent::Shutdown).await?;
    assert_eq!(common::with_timeout(handle).await?, ExitStatus::Clean);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn returned_workers_do_not_count_as_interrupted() -> TestResult {
    let tmp = TempDir::new()?;
    seed(tmp.path())?;
    let cfg = Arc::new(scripted_config(tmp.path()).build());
    let (mut processor, _control_tx) = scripted_processor(
        &cfg,
        vec![
            ScriptedTask::new("slow", 0, &[]).arc(),
            ScriptedTask::new("tail", 0, &["slow"]).arc(),
        ],
    )?;

    let (_, started) = processor.cycle();
    assert_eq!(started, 1);
    common::with_timeout(wait_for_status(processor.registry(), ProjectStatus::Success)).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    // The worker returned but was never reaped by a cycle.
    assert_eq!(processor.pool().in_flight(), 1);
    assert_eq!(processor.finish().await, ExitStatus::Clean);
    assert_eq!(processor.pool().in_flight(), 0);
    Ok(())
}
