// tests/worker_pool.rs

mod common;

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;

use common::builders::{ConfigFileBuilder, project_spec};
use common::fake_tasks::{ConcurrencyGauge, ScriptedTask};
use seqdag::engine::WorkerPool;
use seqdag::exec::{StepResult, TaskEngine};
use seqdag::registry::ProjectHandle;
use seqdag::services::LogMailer;
use seqdag::task::{Task, TaskCatalog, TaskContext, TaskFuture, TaskLog, TaskOutcome, TaskSpec};
use seqdag::types::ProjectStatus;

type TestResult = Result<(), Box<dyn Error>>;

#[derive(Debug)]
struct PanickingTask {
    spec: TaskSpec,
}

impl Task for PanickingTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn execute<'a>(&'a self, _ctx: &'a TaskContext, _log: &'a TaskLog) -> TaskFuture<'a> {
        Box::pin(async move { explode() })
    }
}

fn explode() -> TaskOutcome {
    panic!("kaboom")
}

fn engine(root: &Path, tasks: Vec<Arc<dyn Task>>) -> Arc<TaskEngine> {
    common::init_tracing();
    let cfg = ConfigFileBuilder::new(root)
        .task_defaults(&[])
        .task_null(&[])
        .build();
    let mut catalog = TaskCatalog::new();
    for task in tasks {
        catalog.register(task).unwrap();
    }
    Arc::new(TaskEngine::new(
        Arc::new(cfg),
        Arc::new(catalog),
        Arc::new(LogMailer::default()),
    ))
}

fn projects(root: &Path, n: usize, requested: &[&str]) -> Vec<Arc<ProjectHandle>> {
    (0..n)
        .map(|i| {
            let work_dir = root.join("processed").join(format!("RUN1-EXP1-P{i}"));
            Arc::new(ProjectHandle::new(
                project_spec(&format!("P{i}"), work_dir, requested),
                ProjectStatus::Pending,
                None,
            ))
        })
        .collect()
}

#[tokio::test]
async fn never_exceeds_capacity() -> TestResult {
    let tmp = TempDir::new()?;
    let gauge = ConcurrencyGauge::new();
    let engine = engine(
        tmp.path(),
        vec![
            ScriptedTask::new("work", 0, &[])
                .delay(Duration::from_millis(50))
                .gauge(gauge.clone())
                .arc(),
        ],
    );
    let all = projects(tmp.path(), 5, &["work"]);
    let (_tx, rx) = watch::channel(false);
    let mut pool = WorkerPool::new(2, engine, rx);

    assert_eq!(pool.dispatch(all.iter().cloned()), 2);
    assert_eq!(pool.in_flight(), 2);

    let mut reports = Vec::new();
    common::with_timeout(async {
        loop {
            pool.dispatch(all.iter().cloned());
            match pool.join_next().await {
                Some(report) => reports.push(report),
                None => break,
            }
        }
    })
    .await;

    assert_eq!(reports.len(), 5);
    assert!(
        reports
            .iter()
            .all(|r| r.result == StepResult::Finished(ProjectStatus::Success))
    );
    assert_eq!(gauge.max(), 2);
    assert!(all.iter().all(|p| p.status() == ProjectStatus::Success));
    assert!(all.iter().all(|p| !p.is_claimed()));
    Ok(())
}

#[tokio::test]
async fn claimed_project_is_not_dispatched() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = engine(tmp.path(), vec![ScriptedTask::new("work", 0, &[]).arc()]);
    let p = projects(tmp.path(), 1, &["work"]).remove(0);
    let (_tx, rx) = watch::channel(false);
    let mut pool = WorkerPool::new(4, engine, rx);

    let claim = p.try_claim().unwrap();
    assert_eq!(pool.dispatch([Arc::clone(&p)]), 0);
    drop(claim);

    // Listing the same project twice still starts one worker.
    assert_eq!(pool.dispatch([Arc::clone(&p), Arc::clone(&p)]), 1);
    let report = common::with_timeout(pool.join_next()).await.unwrap();
    assert_eq!(report.project, "RUN1-EXP1-P0");
    assert!(pool.join_next().await.is_none());
    Ok(())
}

#[tokio::test]
async fn freed_slot_is_reused() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = engine(tmp.path(), vec![ScriptedTask::new("work", 0, &[]).arc()]);
    let all = projects(tmp.path(), 2, &["work"]);
    let (_tx, rx) = watch::channel(false);
    let mut pool = WorkerPool::new(1, engine, rx);

    assert_eq!(pool.dispatch(all.iter().cloned()), 1);
    let first = common::with_timeout(pool.join_next()).await.unwrap();
    assert_eq!(first.project, "RUN1-EXP1-P0");

    assert_eq!(pool.dispatch(all.iter().cloned()), 1);
    let reports = common::with_timeout(pool.wait_all()).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].project, "RUN1-EXP1-P1");
    assert_eq!(pool.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn nothing_is_dispatched_during_shutdown() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = engine(tmp.path(), vec![ScriptedTask::new("work", 0, &[]).arc()]);
    let all = projects(tmp.path(), 3, &["work"]);
    let (_tx, rx) = watch::channel(true);
    let mut pool = WorkerPool::new(3, engine, rx);

    assert_eq!(pool.dispatch(all.iter().cloned()), 0);
    assert_eq!(pool.in_flight(), 0);
    assert!(all.iter().all(|p| p.status() == ProjectStatus::Pending));
    Ok(())
}

#[tokio::test]
async fn panicking_worker_fails_its_project() -> TestResult {
    let tmp = TempDir::new()?;
    let task: Arc<dyn Task> = Arc::new(PanickingTask {
        spec: TaskSpec::new("explode", 0, &[]),
    });
    let engine = engine(tmp.path(), vec![task]);
    let p = projects(tmp.path(), 1, &["explode"]).remove(0);
    let (_tx, rx) = watch::channel(false);
    let mut pool = WorkerPool::new(1, engine, rx);

    assert_eq!(pool.dispatch([Arc::clone(&p)]), 1);
    assert!(common::with_timeout(pool.join_next()).await.is_none());

    assert_eq!(p.status(), ProjectStatus::Failed);
    assert_eq!(p.state().reason.as_deref(), Some("worker panicked"));
    assert!(!p.is_claimed());
    Ok(())
}
