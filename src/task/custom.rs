// src/task/custom.rs

//! Shell-command tasks defined in TOML.
//!
//! ```toml
//! [task.blast]
//! cmd = "blast-contigs.sh \"$SEQDAG_OUTPUT_DIR\""
//! dependencies = ["assemble"]
//! order = 110
//! ```
//!
//! The command runs through `sh -c` in the work directory with the
//! `SEQDAG_*` context variables set. Exit 0 is success, exit 75 asks for a
//! retry and anything else is a failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::exec::command::{RunOptions, run_command, shell};
use crate::task::{EXIT_RETRYABLE, Task, TaskContext, TaskFuture, TaskLog, TaskOutcome, TaskSpec};
use crate::types::TaskOutput;

const DEFAULT_ORDER: i32 = 100;

/// One `[task.<name>]` table as written.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCustomTask {
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_order")]
    pub order: i32,
}

fn default_order() -> i32 {
    DEFAULT_ORDER
}

#[derive(Debug, Deserialize)]
struct CustomTaskFile {
    #[serde(default)]
    task: BTreeMap<String, toml::Value>,
}

/// A candidate read from a definition file, before validation.
#[derive(Debug, Clone)]
pub struct CustomDefinition {
    pub name: String,
    pub source: PathBuf,
    pub task: std::result::Result<RawCustomTask, String>,
}

/// Definition files under `source`: the file itself, or every `*.toml`
/// directly inside the directory, sorted by name.
pub fn definition_files(source: &Path) -> Result<Vec<PathBuf>> {
    if source.is_file() {
        return Ok(vec![source.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(source)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("listing {}", source.display()))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|e| e == "toml") {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

/// Parse one definition file. Each table is decoded on its own so one
/// malformed entry does not hide the others.
pub fn read_definitions(path: &Path) -> Result<Vec<CustomDefinition>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: CustomTaskFile =
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(file
        .task
        .into_iter()
        .map(|(name, value)| CustomDefinition {
            name,
            source: path.to_path_buf(),
            task: value.try_into::<RawCustomTask>().map_err(|e| e.to_string()),
        })
        .collect())
}

/// A task backed by a shell command.
#[derive(Debug, Clone)]
pub struct CommandTask {
    spec: TaskSpec,
    cmd: String,
    source: PathBuf,
}

impl CommandTask {
    pub fn new(name: &str, raw: RawCustomTask, source: &Path) -> Self {
        Self {
            spec: TaskSpec {
                name: name.to_string(),
                dependencies: raw.dependencies,
                order: raw.order,
            },
            cmd: raw.cmd,
            source: source.to_path_buf(),
        }
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    async fn run(&self, ctx: &TaskContext, log: &TaskLog) -> Result<TaskOutcome> {
        tokio::fs::create_dir_all(&ctx.work_dir)
            .await
            .with_context(|| format!("creating {}", ctx.work_dir.display()))?;
        let mut cmd = shell(&self.cmd);
        cmd.envs(ctx.env_vars());
        let output = run_command(
            cmd,
            RunOptions {
                label: &self.spec.name,
                log: Some(log),
                cwd: Some(&ctx.work_dir),
                ..RunOptions::default()
            },
        )
        .await?;

        let code = output.code();
        Ok(match code {
            0 => {
                let mut out = TaskOutput::new();
                out.insert("exit_code".to_string(), "0".to_string());
                TaskOutcome::Success(out)
            }
            EXIT_RETRYABLE => TaskOutcome::Retryable(format!("command asked for a retry (exit {code})")),
            _ => TaskOutcome::Fatal(format!("command exited with status {code}")),
        })
    }
}

impl Task for CommandTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        Box::pin(async move {
            match self.run(ctx, log).await {
                Ok(outcome) => outcome,
                Err(err) => TaskOutcome::Fatal(format!("{err:#}")),
            }
        })
    }
}
