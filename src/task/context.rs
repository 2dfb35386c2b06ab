// src/task/context.rs

//! Read-only view of a project handed to a task, plus its log file.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use parking_lot::Mutex;

use crate::config::{ConfigFile, TaskSettings};
use crate::dag::{PlanEntry, TaskPlan};
use crate::registry::{Contact, ProjectSpec, SampleRecord};
use crate::types::TaskOutput;

/// Everything a task may know about the project it runs for.
///
/// Built fresh for every execution; it holds copies, never a reference back
/// into the registry.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: String,
    pub project: String,
    pub work_dir_name: String,
    pub work_dir: PathBuf,
    /// Parent directory for this task's output (the work dir, or its
    /// implicit subdirectory).
    pub output_dir: PathBuf,
    pub implicit: bool,
    pub run_id: String,
    pub run_path: PathBuf,
    pub alignment_path: PathBuf,
    pub experiment: String,
    pub metadata_path: PathBuf,
    pub sample_sheet: Option<PathBuf>,
    pub samples: Vec<SampleRecord>,
    pub contacts: Vec<Contact>,
    /// Parallelism the task may use internally.
    pub threads: usize,
    pub settings: TaskSettings,
    /// Output parent directory of every task in the plan.
    pub task_dirs: BTreeMap<String, PathBuf>,
    /// Output of every task that has already succeeded.
    pub outputs: BTreeMap<String, TaskOutput>,
    /// Where the `package` task writes its archive.
    pub package_path: PathBuf,
}

impl TaskContext {
    pub fn new(spec: &ProjectSpec, entry: &PlanEntry, plan: &TaskPlan, cfg: &ConfigFile) -> Self {
        Self {
            task: entry.name.clone(),
            project: spec.name.clone(),
            work_dir_name: spec.work_dir_name.clone(),
            work_dir: spec.work_dir.clone(),
            output_dir: entry.output_dir.clone(),
            implicit: entry.implicit,
            run_id: spec.run_id.clone(),
            run_path: spec.run_path.clone(),
            alignment_path: spec.alignment_path.clone(),
            experiment: spec.experiment.clone(),
            metadata_path: spec.metadata_path.clone(),
            sample_sheet: spec.sample_sheet.clone(),
            samples: spec.samples.clone(),
            contacts: spec.contacts.clone(),
            threads: cfg.nthreads_per_project,
            settings: cfg.task_options.settings_for(&entry.name),
            task_dirs: plan.task_dirs(),
            outputs: plan.outputs(),
            package_path: cfg
                .paths
                .packaged
                .join(format!("{}.zip", spec.work_dir_name)),
        }
    }

    /// Output parent directory of another task in the same plan.
    ///
    /// Tasks not in the plan resolve to the work directory.
    pub fn task_dir(&self, task: &str) -> PathBuf {
        self.task_dirs
            .get(task)
            .cloned()
            .unwrap_or_else(|| self.work_dir.clone())
    }

    /// One value from an upstream task's output.
    pub fn upstream(&self, task: &str, key: &str) -> Option<&str> {
        self.outputs
            .get(task)
            .and_then(|out| out.get(key))
            .map(|s| s.as_str())
    }

    /// URL reported by the `upload` task, if it ran.
    pub fn download_url(&self) -> Option<&str> {
        self.upstream("upload", "url")
    }

    /// `SEQDAG_*` variables describing this context, for external commands.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let path = |p: &Path| p.display().to_string();
        let samples = self
            .samples
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let mut vars = vec![
            ("SEQDAG_TASK", self.task.clone()),
            ("SEQDAG_PROJECT", self.project.clone()),
            ("SEQDAG_WORK_DIR_NAME", self.work_dir_name.clone()),
            ("SEQDAG_WORK_DIR", path(&self.work_dir)),
            ("SEQDAG_OUTPUT_DIR", path(&self.output_dir)),
            ("SEQDAG_RUN_ID", self.run_id.clone()),
            ("SEQDAG_RUN_PATH", path(&self.run_path)),
            ("SEQDAG_ALIGNMENT_PATH", path(&self.alignment_path)),
            ("SEQDAG_EXPERIMENT", self.experiment.clone()),
            ("SEQDAG_METADATA", path(&self.metadata_path)),
            ("SEQDAG_SAMPLES", samples),
            ("SEQDAG_THREADS", self.threads.to_string()),
        ];
        if let Some(sheet) = &self.sample_sheet {
            vars.push(("SEQDAG_SAMPLE_SHEET", path(sheet)));
        }
        if let Some(url) = self.download_url() {
            vars.push(("SEQDAG_URL", url.to_string()));
        }
        vars.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

/// Append-only per-task log file.
///
/// Cheap to clone; clones share the file handle.
#[derive(Debug, Clone)]
pub struct TaskLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl TaskLog {
    /// Open (creating parents) for appending. Earlier attempts' lines are
    /// kept.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening task log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Write failures are ignored; the log is best effort.
    pub fn line(&self, text: &str) {
        let mut file = self.file.lock();
        let _ = writeln!(file, "{text}");
    }

    /// Append a timestamped marker line.
    pub fn note(&self, text: &str) {
        self.line(&format!("[{}] {text}", Local::now().format("%Y-%m-%d %H:%M:%S")));
    }
}
