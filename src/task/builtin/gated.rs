// src/task/builtin/gated.rs

//! Tasks that wait for a person to finish something by hand.
//!
//! Both succeed only once a marker directory shows up in the work
//! directory; the engine does the waiting.

use anyhow::{Context, Result};

use crate::exec::gate::{CompletionSignal, PathSignal};
use crate::task::{Task, TaskContext, TaskFuture, TaskLog, TaskOutcome, TaskSpec};
use crate::types::TaskOutput;

/// Wait for a `Manual` directory in the work directory.
#[derive(Debug)]
pub struct ManualTask {
    spec: TaskSpec,
}

impl ManualTask {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::new("manual", 100, &[]),
        }
    }
}

impl Task for ManualTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn completion_signal(&self, ctx: &TaskContext) -> Option<Box<dyn CompletionSignal>> {
        Some(Box::new(PathSignal::new(ctx.work_dir.join("Manual"))))
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        Box::pin(async move {
            log.note(&format!(
                "waiting for {} to be created",
                ctx.work_dir.join("Manual").display()
            ));
            TaskOutcome::success()
        })
    }
}

/// Surface assembly output for Geneious, then wait for a `Geneious`
/// directory in the work directory.
#[derive(Debug)]
pub struct GeneiousTask {
    spec: TaskSpec,
}

impl GeneiousTask {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::new("geneious", 101, &["assemble"]),
        }
    }

    async fn surface(&self, ctx: &TaskContext, log: &TaskLog) -> Result<TaskOutput> {
        // These directories are wanted at the top level even when their
        // tasks ran implicitly.
        let moves = [
            ctx.task_dir("merge").join("PairedReads"),
            ctx.task_dir("assemble").join("ContigsGeneious"),
            ctx.task_dir("assemble").join("CombinedGeneious"),
        ];
        let mut moved = 0;
        for path in moves {
            let Some(name) = path.file_name() else {
                continue;
            };
            let target = ctx.work_dir.join(name);
            if path.parent() == Some(ctx.work_dir.as_path()) || !path.exists() || target.exists() {
                continue;
            }
            tokio::fs::rename(&path, &target).await.with_context(|| {
                format!("moving {} to {}", path.display(), target.display())
            })?;
            log.line(&format!("moved {} to {}", path.display(), target.display()));
            moved += 1;
        }
        log.note(&format!(
            "waiting for {} to be created",
            ctx.work_dir.join("Geneious").display()
        ));
        let mut out = TaskOutput::new();
        out.insert("moved".to_string(), moved.to_string());
        Ok(out)
    }
}

impl Task for GeneiousTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn completion_signal(&self, ctx: &TaskContext) -> Option<Box<dyn CompletionSignal>> {
        Some(Box::new(PathSignal::new(ctx.work_dir.join("Geneious"))))
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        Box::pin(async move { TaskOutcome::from_result(self.surface(ctx, log).await) })
    }
}
