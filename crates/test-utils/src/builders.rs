#![allow(dead_code)]

use std::path::{Path, PathBuf};

use seqdag::config::{ConfigFile, RawConfigFile, TaskSettings};
use seqdag::registry::{Contact, ProjectSpec, SampleRecord};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the built-in defaults with every path rooted at `root`.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let mut config = RawConfigFile::default();
        config.paths.root = root.as_ref().to_path_buf();
        Self { config }
    }

    pub fn nthreads(mut self, n: usize) -> Self {
        self.config.nthreads = n;
        self
    }

    pub fn nthreads_per_project(mut self, n: usize) -> Self {
        self.config.nthreads_per_project = n;
        self
    }

    pub fn poll(mut self, secs: u64) -> Self {
        self.config.poll = secs;
        self
    }

    pub fn wait(mut self, wait: bool) -> Self {
        self.config.wait = wait;
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.config.readonly = readonly;
        self
    }

    pub fn min_age(mut self, secs: u64) -> Self {
        self.config.min_age = Some(secs);
        self
    }

    pub fn max_age(mut self, secs: u64) -> Self {
        self.config.max_age = Some(secs);
        self
    }

    pub fn max_transient_wait(mut self, secs: u64) -> Self {
        self.config.max_transient_wait = secs;
        self
    }

    pub fn task_defaults(mut self, tasks: &[&str]) -> Self {
        self.config.task_options.task_defaults = strings(tasks);
        self
    }

    pub fn task_null(mut self, tasks: &[&str]) -> Self {
        self.config.task_options.task_null = strings(tasks);
        self
    }

    pub fn always_explicit(mut self, tasks: &[&str]) -> Self {
        self.config.task_options.always_explicit_tasks = strings(tasks);
        self
    }

    pub fn custom_tasks_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.task_options.custom_tasks_source = Some(path.into());
        self
    }

    pub fn task_settings(mut self, task: &str, settings: TaskSettings) -> Self {
        self.config
            .task_options
            .tasks
            .insert(task.to_string(), settings);
        self
    }

    pub fn save_report(mut self, path: impl Into<PathBuf>, max_width: usize) -> Self {
        self.config.save_report.path = Some(path.into());
        self.config.save_report.max_width = max_width;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A project spec rooted at `work_dir`, with one sample and one contact.
pub fn project_spec(name: &str, work_dir: impl AsRef<Path>, requested: &[&str]) -> ProjectSpec {
    let work_dir = work_dir.as_ref().to_path_buf();
    let work_dir_name = work_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    ProjectSpec {
        name: name.to_string(),
        work_dir_name,
        work_dir,
        run_id: "RUN1".to_string(),
        run_path: PathBuf::from("/runs/RUN1"),
        alignment_path: PathBuf::from("/runs/RUN1/Alignment_1"),
        experiment: "EXP1".to_string(),
        metadata_path: PathBuf::from("/experiments/EXP1/metadata.csv"),
        sample_sheet: None,
        samples: vec![SampleRecord {
            name: "S1".to_string(),
            fastq: Vec::new(),
        }],
        contacts: vec![Contact {
            name: "Jane Doe".to_string(),
            email: "jane@example.org".to_string(),
        }],
        requested: strings(requested),
    }
}
