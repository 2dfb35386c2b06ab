// src/dag/plan.rs

//! Per-project execution state over a resolved plan.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::dag::resolver::PlannedTask;
use crate::types::{ProjectStatus, TaskOutput, TaskStatus};

/// Where a plan's tasks write their output and logs.
#[derive(Debug, Clone)]
pub struct PlanLayout {
    pub work_dir: PathBuf,
    pub implicit_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl PlanLayout {
    pub fn new(work_dir: &Path, implicit_tasks_path: &Path, log_path: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            implicit_dir: work_dir.join(implicit_tasks_path),
            log_dir: work_dir.join(log_path),
        }
    }

    pub fn log_file(&self, task: &str) -> PathBuf {
        self.log_dir.join(format!("log_{task}.txt"))
    }
}

/// One task's slot in a plan.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub name: String,
    pub implicit: bool,
    pub status: TaskStatus,
    /// Parent directory the task writes into.
    pub output_dir: PathBuf,
    pub log_path: PathBuf,
    pub attempts: u32,
    pub started: Option<DateTime<Local>>,
    pub finished: Option<DateTime<Local>>,
    pub output: TaskOutput,
    pub reason: Option<String>,
}

/// Ordered task list plus a pointer to the next task to run.
///
/// Tasks before the cursor are settled; the cursor only moves forward, so
/// tasks never run out of order and never twice.
#[derive(Debug, Clone)]
pub struct TaskPlan {
    entries: Vec<PlanEntry>,
    cursor: usize,
}

impl TaskPlan {
    pub fn new(tasks: Vec<PlannedTask>, layout: &PlanLayout) -> Self {
        let entries = tasks
            .into_iter()
            .map(|t| {
                let output_dir = if t.implicit {
                    layout.implicit_dir.clone()
                } else {
                    layout.work_dir.clone()
                };
                PlanEntry {
                    log_path: layout.log_file(&t.name),
                    name: t.name,
                    implicit: t.implicit,
                    status: TaskStatus::Pending,
                    output_dir,
                    attempts: 0,
                    started: None,
                    finished: None,
                    output: TaskOutput::new(),
                    reason: None,
                }
            })
            .collect();
        Self { entries, cursor: 0 }
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn running(&self) -> Option<&PlanEntry> {
        self.entries
            .get(self.cursor)
            .filter(|e| e.status == TaskStatus::Running)
    }

    /// Mark the cursor task running and return it.
    pub fn start(&mut self) -> Option<&PlanEntry> {
        let entry = self.entries.get_mut(self.cursor)?;
        if entry.status != TaskStatus::Pending {
            return None;
        }
        entry.status = TaskStatus::Running;
        entry.attempts += 1;
        entry.started = Some(Local::now());
        Some(&*entry)
    }

    /// Count another attempt of the running task.
    pub fn retry(&mut self) {
        if let Some(entry) = self.entries.get_mut(self.cursor) {
            if entry.status == TaskStatus::Running {
                entry.attempts += 1;
            }
        }
    }

    /// Record success of the running task and advance.
    pub fn complete(&mut self, output: TaskOutput) {
        if let Some(entry) = self.entries.get_mut(self.cursor) {
            if entry.status == TaskStatus::Running {
                entry.status = TaskStatus::Success;
                entry.finished = Some(Local::now());
                entry.output = output;
                self.cursor += 1;
            }
        }
    }

    /// Record failure of the running task; every later pending task becomes
    /// skipped. Returns the names of the skipped tasks.
    pub fn fail(&mut self, reason: impl Into<String>) -> Vec<String> {
        let Some(entry) = self.entries.get_mut(self.cursor) else {
            return Vec::new();
        };
        entry.status = TaskStatus::Failed;
        entry.finished = Some(Local::now());
        entry.reason = Some(reason.into());

        let mut skipped = Vec::new();
        for later in self.entries.iter_mut().skip(self.cursor + 1) {
            if later.status == TaskStatus::Pending {
                later.status = TaskStatus::Skipped;
                skipped.push(later.name.clone());
            }
        }
        self.cursor = self.entries.len();
        skipped
    }

    /// Put an interrupted task back to pending so a later worker reruns it.
    pub fn interrupt(&mut self) {
        if let Some(entry) = self.entries.get_mut(self.cursor) {
            if entry.status == TaskStatus::Running {
                entry.status = TaskStatus::Pending;
                entry.started = None;
            }
        }
    }

    pub fn overall_status(&self) -> ProjectStatus {
        let mut pending = false;
        for entry in &self.entries {
            match entry.status {
                TaskStatus::Running => return ProjectStatus::Running,
                TaskStatus::Failed => return ProjectStatus::Failed,
                TaskStatus::Pending => pending = true,
                TaskStatus::Success | TaskStatus::Skipped => {}
            }
        }
        if pending {
            ProjectStatus::Pending
        } else {
            ProjectStatus::Success
        }
    }

    /// Output of every task that has succeeded so far, by task name.
    pub fn outputs(&self) -> BTreeMap<String, TaskOutput> {
        self.entries
            .iter()
            .filter(|e| e.status == TaskStatus::Success)
            .map(|e| (e.name.clone(), e.output.clone()))
            .collect()
    }

    /// Output parent directory of every task in the plan.
    pub fn task_dirs(&self) -> BTreeMap<String, PathBuf> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.output_dir.clone()))
            .collect()
    }

    /// Compact `name:status` listing for the report.
    pub fn summary(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}:{}", e.name, e.status))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
