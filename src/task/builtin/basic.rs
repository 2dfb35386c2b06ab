// src/task/builtin/basic.rs

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use walkdir::WalkDir;

use crate::task::builtin::blocking;
use crate::task::{Task, TaskContext, TaskFuture, TaskLog, TaskOutcome, TaskSpec};
use crate::types::TaskOutput;

/// Does nothing; handy for testing plans.
#[derive(Debug)]
pub struct NoopTask {
    spec: TaskSpec,
}

impl NoopTask {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::new("noop", 0, &[]),
        }
    }
}

impl Task for NoopTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn execute<'a>(&'a self, _ctx: &'a TaskContext, _log: &'a TaskLog) -> TaskFuture<'a> {
        Box::pin(async { TaskOutcome::success() })
    }
}

/// Always fails.
#[derive(Debug)]
pub struct FailTask {
    spec: TaskSpec,
}

impl FailTask {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::new("fail", 1, &[]),
        }
    }
}

impl Task for FailTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn execute<'a>(&'a self, _ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        Box::pin(async move {
            log.note("fail task invoked");
            TaskOutcome::Fatal("fail task invoked".to_string())
        })
    }
}

/// Copy the whole run directory into the output directory.
#[derive(Debug)]
pub struct CopyTask {
    spec: TaskSpec,
}

impl CopyTask {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::new("copy", 2, &[]),
        }
    }
}

impl Task for CopyTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        let src = ctx.run_path.clone();
        let dest = ctx.output_dir.join(&ctx.run_id);
        Box::pin(async move {
            log.note(&format!("copying {} -> {}", src.display(), dest.display()));
            let result = blocking(move || {
                let files = copy_tree(&src, &dest)?;
                let mut out = TaskOutput::new();
                out.insert("path".to_string(), dest.display().to_string());
                out.insert("files".to_string(), files.to_string());
                Ok(out)
            })
            .await;
            TaskOutcome::from_result(result)
        })
    }
}

/// Recursively copy `src` into `dest`, overwriting files that exist.
/// Nothing under `dest` is removed. Returns the number of files copied.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("walking {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("relativizing {}", entry.path().display()))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!("copying {} to {}", entry.path().display(), target.display())
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Copy the sample sheet and this project's metadata rows into `Metadata/`.
#[derive(Debug)]
pub struct MetadataTask {
    spec: TaskSpec,
}

impl MetadataTask {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::new("metadata", 1000, &[]),
        }
    }
}

impl Task for MetadataTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        let dest = ctx.output_dir.join("Metadata");
        let sample_sheet = ctx.sample_sheet.clone();
        let metadata = ctx.metadata_path.clone();
        let project = ctx.project.clone();
        Box::pin(async move {
            log.note(&format!("writing metadata to {}", dest.display()));
            let result = blocking(move || {
                std::fs::create_dir_all(&dest)
                    .with_context(|| format!("creating {}", dest.display()))?;
                if let Some(sheet) = &sample_sheet {
                    copy_into(sheet, &dest)?;
                }
                let name = metadata
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("metadata.csv"));
                let out_path = dest.join(name);
                let rows = filter_metadata(&metadata, &out_path, &project)?;
                let mut out = TaskOutput::new();
                out.insert("path".to_string(), dest.display().to_string());
                out.insert("rows".to_string(), rows.to_string());
                Ok(out)
            })
            .await;
            TaskOutcome::from_result(result)
        })
    }
}

fn copy_into(file: &Path, dir: &Path) -> Result<()> {
    let Some(name) = file.file_name() else {
        bail!("{} has no file name", file.display());
    };
    std::fs::copy(file, dir.join(name))
        .with_context(|| format!("copying {} into {}", file.display(), dir.display()))?;
    Ok(())
}

/// Write only the rows of `input` whose `Project` column is `project`.
fn filter_metadata(input: &Path, output: &Path, project: &str) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(input)
        .with_context(|| format!("opening {}", input.display()))?;
    let headers = reader.headers()?.clone();
    let Some(col) = headers.iter().position(|h| h.trim() == "Project") else {
        bail!("{} has no Project column", input.display());
    };

    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("creating {}", output.display()))?;
    writer.write_record(&headers)?;
    let mut kept = 0;
    for record in reader.records() {
        let record = record.with_context(|| format!("reading {}", input.display()))?;
        if record.get(col).map(str::trim) == Some(project) {
            writer.write_record(&record)?;
            kept += 1;
        }
    }
    writer.flush()?;
    Ok(kept)
}
