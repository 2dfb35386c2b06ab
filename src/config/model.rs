// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// nthreads = 2
/// poll = 5
/// min_age = 60
///
/// [paths]
/// root = "/seq"
///
/// [task_options]
/// task_defaults = ["metadata", "email"]
/// task_null = ["copy"]
///
/// [task_options.tasks.manual]
/// timeout = 604800
/// delta = 5
/// ```
///
/// Every key is optional. Semantic checks happen when converting into
/// [`ConfigFile`] (see `config::validate`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Track everything but never start a worker.
    #[serde(default)]
    pub readonly: bool,

    /// Process-wide number of worker slots.
    #[serde(default = "default_threads")]
    pub nthreads: usize,

    /// Parallelism handed to a single task (e.g. an external assembler).
    #[serde(default = "default_threads")]
    pub nthreads_per_project: usize,

    /// Seconds a run directory must have existed before it is considered.
    #[serde(default)]
    pub min_age: Option<u64>,

    /// Run directories older than this many seconds are ignored for good.
    #[serde(default)]
    pub max_age: Option<u64>,

    /// Seconds between discovery cycles.
    #[serde(default = "default_poll")]
    pub poll: u64,

    /// Block each cycle until all dispatched workers have returned.
    #[serde(default)]
    pub wait: bool,

    /// Seconds a transient read failure may be deferred before it counts as
    /// a parse error.
    #[serde(default = "default_max_transient_wait")]
    pub max_transient_wait: u64,

    /// Base log level (`error`, `warn`, `info`, `debug`, `trace`).
    #[serde(default)]
    pub loglevel: Option<String>,

    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub task_options: TaskOptions,

    #[serde(default)]
    pub save_report: SaveReportSection,

    #[serde(default)]
    pub report: ReportSection,

    #[serde(default)]
    pub uploader: Option<UploaderSection>,

    #[serde(default)]
    pub mailer: Option<MailerSection>,
}

fn default_threads() -> usize {
    1
}

fn default_poll() -> u64 {
    5
}

fn default_max_transient_wait() -> u64 {
    600
}

impl Default for RawConfigFile {
    fn default() -> Self {
        Self {
            readonly: false,
            nthreads: default_threads(),
            nthreads_per_project: default_threads(),
            min_age: None,
            max_age: None,
            poll: default_poll(),
            wait: false,
            max_transient_wait: default_max_transient_wait(),
            loglevel: None,
            paths: PathsSection::default(),
            task_options: TaskOptions::default(),
            save_report: SaveReportSection::default(),
            report: ReportSection::default(),
            uploader: None,
            mailer: None,
        }
    }
}

/// `[paths]` section. Relative entries resolve against `root`.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_runs")]
    pub runs: PathBuf,
    #[serde(default = "default_experiments")]
    pub experiments: PathBuf,
    #[serde(default = "default_processed")]
    pub processed: PathBuf,
    #[serde(default = "default_packaged")]
    pub packaged: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_runs() -> PathBuf {
    PathBuf::from("runs")
}

fn default_experiments() -> PathBuf {
    PathBuf::from("experiments")
}

fn default_processed() -> PathBuf {
    PathBuf::from("processed")
}

fn default_packaged() -> PathBuf {
    PathBuf::from("packaged")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            runs: default_runs(),
            experiments: default_experiments(),
            processed: default_processed(),
            packaged: default_packaged(),
        }
    }
}

/// `[task_options]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskOptions {
    /// Tasks included in every project's plan.
    #[serde(default = "default_task_defaults")]
    pub task_defaults: Vec<String>,

    /// Tasks used when a project requests nothing.
    #[serde(default = "default_task_null")]
    pub task_null: Vec<String>,

    /// File or directory of custom task definitions (`*.toml`).
    #[serde(default)]
    pub custom_tasks_source: Option<PathBuf>,

    /// Subdirectory of the work dir receiving implicit task output.
    #[serde(default = "default_implicit_tasks_path")]
    pub implicit_tasks_path: PathBuf,

    /// Tasks never treated as implicit even when only pulled in as a dependency.
    #[serde(default)]
    pub always_explicit_tasks: Vec<String>,

    /// Subdirectory of the work dir holding per-task logs.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Per-task option blocks, keyed by task name.
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskSettings>,
}

fn default_task_defaults() -> Vec<String> {
    vec!["metadata".to_string(), "email".to_string()]
}

fn default_task_null() -> Vec<String> {
    vec!["copy".to_string()]
}

fn default_implicit_tasks_path() -> PathBuf {
    PathBuf::from("implicit")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            task_defaults: default_task_defaults(),
            task_null: default_task_null(),
            custom_tasks_source: None,
            implicit_tasks_path: default_implicit_tasks_path(),
            always_explicit_tasks: Vec::new(),
            log_path: default_log_path(),
            tasks: BTreeMap::new(),
        }
    }
}

impl TaskOptions {
    /// Options for one task; an empty block when none is configured.
    pub fn settings_for(&self, task: &str) -> TaskSettings {
        self.tasks.get(task).cloned().unwrap_or_default()
    }
}

/// `[task_options.tasks.<name>]` block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskSettings {
    /// Gated tasks: seconds before giving up on the completion signal.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Gated tasks: seconds between completion-signal polls.
    #[serde(default)]
    pub delta: Option<u64>,

    /// How many times a retryable failure is retried before the task fails.
    #[serde(default)]
    pub retries: u32,

    /// Seconds to wait between attempts of a retryable task.
    #[serde(default)]
    pub retry_delay: Option<u64>,

    #[serde(default)]
    pub phred_offset: Option<u8>,

    #[serde(default)]
    pub contig_length_min: Option<usize>,

    #[serde(default)]
    pub template_subject: Option<String>,

    #[serde(default)]
    pub template_text: Option<String>,
}

/// `[save_report]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveReportSection {
    /// Report file rewritten every cycle; disabled when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_width")]
    pub max_width: usize,
}

fn default_max_width() -> usize {
    60
}

impl Default for SaveReportSection {
    fn default() -> Self {
        Self {
            path: None,
            max_width: default_max_width(),
        }
    }
}

/// `[report]` section, used by the on-screen `report` action.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportSection {
    #[serde(default = "default_max_width")]
    pub max_width: usize,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
        }
    }
}

/// `[uploader]` section.
///
/// `command` runs through `sh -c` with `{path}` and `{name}` substituted;
/// the last non-empty stdout line is taken as the download URL.
#[derive(Debug, Clone, Deserialize)]
pub struct UploaderSection {
    pub command: String,
}

/// `[mailer]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailerSection {
    /// Command receiving the rendered message on stdin (e.g. `sendmail -t`).
    /// Messages are only logged when unset.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub from: Option<String>,

    /// Recipients of project failure notices.
    #[serde(default)]
    pub to_addrs_on_error: Vec<String>,
}

/// Resolved directory layout.
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub runs: PathBuf,
    pub experiments: PathBuf,
    pub processed: PathBuf,
    pub packaged: PathBuf,
}

impl Paths {
    fn resolve(section: &PathsSection) -> Self {
        let root = section.root.clone();
        let join = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            }
        };
        Self {
            runs: join(&section.runs),
            experiments: join(&section.experiments),
            processed: join(&section.processed),
            packaged: join(&section.packaged),
            root: root.clone(),
        }
    }

    /// Metadata spreadsheet for one experiment.
    pub fn experiment_metadata(&self, experiment: &str) -> PathBuf {
        self.experiments.join(experiment).join("metadata.csv")
    }
}

/// Validated configuration shared by every component as `Arc<ConfigFile>`.
///
/// Constructed via `TryFrom<RawConfigFile>`; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub readonly: bool,
    pub nthreads: usize,
    pub nthreads_per_project: usize,
    pub min_age: Option<Duration>,
    pub max_age: Option<Duration>,
    pub poll: Duration,
    pub wait: bool,
    pub max_transient_wait: Duration,
    pub loglevel: Option<String>,
    pub paths: Paths,
    pub task_options: TaskOptions,
    pub save_report: SaveReportSection,
    pub report: ReportSection,
    pub uploader: Option<UploaderSection>,
    pub mailer: Option<MailerSection>,
}

impl ConfigFile {
    /// Build without validation. Use `ConfigFile::try_from` instead.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            readonly: raw.readonly,
            nthreads: raw.nthreads,
            nthreads_per_project: raw.nthreads_per_project,
            min_age: raw.min_age.map(Duration::from_secs),
            max_age: raw.max_age.map(Duration::from_secs),
            poll: Duration::from_secs(raw.poll),
            wait: raw.wait,
            max_transient_wait: Duration::from_secs(raw.max_transient_wait),
            loglevel: raw.loglevel,
            paths: Paths::resolve(&raw.paths),
            task_options: raw.task_options,
            save_report: raw.save_report,
            report: raw.report,
            uploader: raw.uploader,
            mailer: raw.mailer,
        }
    }

    /// Same configuration with `readonly` forced on (used by `--dry-run`).
    pub fn into_readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Recipients of project failure notices.
    pub fn error_recipients(&self) -> &[String] {
        self.mailer
            .as_ref()
            .map(|m| m.to_addrs_on_error.as_slice())
            .unwrap_or(&[])
    }
}
