// src/exec/engine.rs

//! Runs one task of one project per call.
//!
//! The plan is resolved the first time a project is touched. Each call then
//! starts the task at the plan cursor, runs it (with retries for retryable
//! outcomes and the gate wait for externally gated tasks) and records the
//! result. A failure stops the plan: every later task becomes skipped and
//! the project is failed. Nothing here ever touches a sibling project.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::ConfigFile;
use crate::dag::{GraphError, PlanEntry, PlanLayout, TaskPlan, resolve};
use crate::exec::gate::{DEFAULT_GATE_DELTA, DEFAULT_GATE_TIMEOUT, GateResult, wait_for_signal};
use crate::registry::{ProjectHandle, ProjectSpec};
use crate::services::{Mailer, Message};
use crate::task::{TaskCatalog, TaskContext, TaskLog, TaskOutcome};
use crate::types::{ProjectStatus, TaskOutput, TaskStatus};

/// Seconds between attempts of a retryable task unless `retry_delay` is set.
pub const DEFAULT_RETRY_DELAY: u64 = 5;

/// What one call to [`TaskEngine::execute_next`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// A task finished and more remain.
    Advanced { task: String, status: TaskStatus },
    /// The project reached a settled state.
    Finished(ProjectStatus),
    /// Shutdown was requested; the current task was put back to pending.
    Interrupted,
}

/// How a single task execution ended, before it is written to the plan.
enum Verdict {
    Success(TaskOutput),
    Failed(String),
    Interrupted,
}

#[derive(Debug)]
pub struct TaskEngine {
    cfg: Arc<ConfigFile>,
    catalog: Arc<TaskCatalog>,
    mailer: Arc<dyn Mailer>,
}

impl TaskEngine {
    pub fn new(cfg: Arc<ConfigFile>, catalog: Arc<TaskCatalog>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            cfg,
            catalog,
            mailer,
        }
    }

    pub fn catalog(&self) -> &Arc<TaskCatalog> {
        &self.catalog
    }

    /// Resolve a project's plan against the catalog.
    pub fn plan_for(&self, spec: &ProjectSpec) -> Result<TaskPlan, GraphError> {
        let options = &self.cfg.task_options;
        let tasks = resolve(self.catalog.graph(), options, &spec.requested)?;
        let layout = PlanLayout::new(&spec.work_dir, &options.implicit_tasks_path, &options.log_path);
        Ok(TaskPlan::new(tasks, &layout))
    }

    /// Drive a project until it settles or shutdown is requested.
    pub async fn run_project(
        &self,
        project: &ProjectHandle,
        shutdown: &watch::Receiver<bool>,
    ) -> StepResult {
        loop {
            match self.execute_next(project, shutdown).await {
                StepResult::Advanced { .. } => continue,
                other => return other,
            }
        }
    }

    /// Run the next pending task of `project`.
    ///
    /// The caller must hold the project's claim.
    pub async fn execute_next(
        &self,
        project: &ProjectHandle,
        shutdown: &watch::Receiver<bool>,
    ) -> StepResult {
        let spec = project.spec();
        let name = spec.work_dir_name.as_str();

        if let Some(status) = self.ensure_plan(project) {
            return StepResult::Finished(status);
        }
        if *shutdown.borrow() {
            return StepResult::Interrupted;
        }

        let Some((entry, ctx)) = project.with_state(|state| {
            let plan = state.plan.as_mut()?;
            let entry = plan.start()?.clone();
            let ctx = TaskContext::new(spec, &entry, plan, &self.cfg);
            state.status = ProjectStatus::Running;
            Some((entry, ctx))
        }) else {
            let status = project.with_state(|state| {
                let status = state
                    .plan
                    .as_ref()
                    .map(TaskPlan::overall_status)
                    .unwrap_or(ProjectStatus::Errored);
                state.status = status;
                status
            });
            return StepResult::Finished(status);
        };

        info!(project = %name, task = %entry.name, implicit = entry.implicit, "starting task");
        let verdict = self.run_task(project, &entry, &ctx, shutdown).await;

        let (status, task_status, skipped) = project.with_state(|state| {
            let Some(plan) = state.plan.as_mut() else {
                return (ProjectStatus::Errored, TaskStatus::Failed, Vec::new());
            };
            let (task_status, skipped) = match &verdict {
                Verdict::Success(output) => {
                    plan.complete(output.clone());
                    (TaskStatus::Success, Vec::new())
                }
                Verdict::Failed(reason) => {
                    let skipped = plan.fail(reason.clone());
                    state.reason = Some(format!("{}: {reason}", entry.name));
                    (TaskStatus::Failed, skipped)
                }
                Verdict::Interrupted => {
                    plan.interrupt();
                    (TaskStatus::Pending, Vec::new())
                }
            };
            state.status = plan.overall_status();
            (state.status, task_status, skipped)
        });

        match verdict {
            Verdict::Success(_) => {
                info!(project = %name, task = %entry.name, "task succeeded");
            }
            Verdict::Failed(reason) => {
                error!(project = %name, task = %entry.name, reason = %reason, ?skipped, "task failed; project failed");
                self.notify_failure(spec, &entry.name, &reason).await;
            }
            Verdict::Interrupted => {
                info!(project = %name, task = %entry.name, "task interrupted; will run again");
                return StepResult::Interrupted;
            }
        }

        if status.is_settled() {
            info!(project = %name, status = %status, "project finished");
            StepResult::Finished(status)
        } else {
            StepResult::Advanced {
                task: entry.name,
                status: task_status,
            }
        }
    }

    /// Resolve the plan once. Returns the settled status if the project
    /// cannot or should not run.
    fn ensure_plan(&self, project: &ProjectHandle) -> Option<ProjectStatus> {
        let spec = project.spec();
        project.with_state(|state| {
            if state.plan.is_some() {
                return None;
            }
            if state.status.is_settled() {
                return Some(state.status);
            }
            match self.plan_for(spec) {
                Ok(plan) => {
                    debug!(project = %spec.work_dir_name, tasks = ?plan.names(), "resolved plan");
                    state.plan = Some(plan);
                    None
                }
                Err(err) => {
                    error!(project = %spec.work_dir_name, error = %err, "cannot plan project");
                    state.status = ProjectStatus::Errored;
                    state.reason = Some(err.to_string());
                    Some(ProjectStatus::Errored)
                }
            }
        })
    }

    async fn run_task(
        &self,
        project: &ProjectHandle,
        entry: &PlanEntry,
        ctx: &TaskContext,
        shutdown: &watch::Receiver<bool>,
    ) -> Verdict {
        let Some(task) = self.catalog.get(&entry.name) else {
            return Verdict::Failed(format!("task '{}' is not registered", entry.name));
        };
        if let Err(err) = tokio::fs::create_dir_all(&entry.output_dir).await {
            return Verdict::Failed(format!(
                "creating output directory {}: {err}",
                entry.output_dir.display()
            ));
        }
        let log = match TaskLog::open(&entry.log_path) {
            Ok(log) => log,
            Err(err) => return Verdict::Failed(format!("{err:#}")),
        };
        log.note(&format!("task {} started", entry.name));

        let retries = ctx.settings.retries;
        let retry_delay = Duration::from_secs(ctx.settings.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY));
        let mut attempt = 0u32;
        let output = loop {
            attempt += 1;
            match task.execute(ctx, &log).await {
                TaskOutcome::Success(output) => break output,
                TaskOutcome::Fatal(reason) => {
                    log.note(&format!("failed: {reason}"));
                    return Verdict::Failed(reason);
                }
                TaskOutcome::Retryable(reason) => {
                    log.note(&format!("attempt {attempt} failed: {reason}"));
                    if *shutdown.borrow() {
                        return Verdict::Interrupted;
                    }
                    if attempt > retries {
                        return Verdict::Failed(reason);
                    }
                    warn!(
                        task = %entry.name,
                        attempt,
                        retries,
                        delay_s = retry_delay.as_secs(),
                        reason = %reason,
                        "retrying task"
                    );
                    if !pause(retry_delay, shutdown).await {
                        return Verdict::Interrupted;
                    }
                    project.with_state(|state| {
                        if let Some(plan) = state.plan.as_mut() {
                            plan.retry();
                        }
                    });
                }
            }
        };

        if let Some(signal) = task.completion_signal(ctx) {
            let timeout = Duration::from_secs(ctx.settings.timeout.unwrap_or(DEFAULT_GATE_TIMEOUT));
            let delta = Duration::from_secs(ctx.settings.delta.unwrap_or(DEFAULT_GATE_DELTA));
            info!(task = %entry.name, waiting_for = %signal.describe(), timeout_s = timeout.as_secs(), "waiting on gate");
            let mut cancel = shutdown.clone();
            match wait_for_signal(signal.as_ref(), timeout, delta, &mut cancel).await {
                GateResult::Observed { polls } => {
                    log.note(&format!("gate opened after {polls} checks"));
                }
                GateResult::TimedOut { polls } => {
                    let reason = format!(
                        "timed out after {}s waiting for {} ({polls} checks)",
                        timeout.as_secs(),
                        signal.describe()
                    );
                    log.note(&reason);
                    return Verdict::Failed(reason);
                }
                GateResult::Cancelled { .. } => return Verdict::Interrupted,
            }
        }

        log.note(&format!("task {} finished", entry.name));
        Verdict::Success(output)
    }

    async fn notify_failure(&self, spec: &ProjectSpec, task: &str, reason: &str) {
        let to = self.cfg.error_recipients();
        if to.is_empty() {
            return;
        }
        let message = Message {
            from: self.mailer.sender().map(str::to_string),
            to: to.to_vec(),
            subject: format!("seqdag: project {} failed", spec.work_dir_name),
            body: format!(
                "Project {} (run {}, experiment {}) failed in task '{task}':\n\n{reason}\n\nWork directory: {}\n",
                spec.name,
                spec.run_id,
                spec.experiment,
                spec.work_dir.display()
            ),
        };
        if let Err(err) = self.mailer.send(&message).await {
            warn!(project = %spec.work_dir_name, error = %format!("{err:#}"), "failure notice not sent");
        }
    }
}

/// Sleep for `delay`. Returns `false` if shutdown was requested meanwhile.
async fn pause(delay: Duration, shutdown: &watch::Receiver<bool>) -> bool {
    let mut cancel = shutdown.clone();
    if delay.is_zero() {
        return !*cancel.borrow();
    }
    let nap = sleep(delay);
    tokio::pin!(nap);
    loop {
        tokio::select! {
            _ = &mut nap => return !*cancel.borrow(),
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow() => return false,
                Ok(()) => {}
                Err(_) => {
                    nap.as_mut().await;
                    return true;
                }
            },
        }
    }
}
