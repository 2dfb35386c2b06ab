// src/task/builtin/reads.rs

//! Per-sample read processing: adapter trimming and pair merging.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::exec::command::{RunOptions, program, run_checked};
use crate::task::builtin::blocking;
use crate::task::fastq::{interleave, read_file_product};
use crate::task::{Task, TaskContext, TaskFuture, TaskLog, TaskOutcome, TaskSpec};
use crate::types::TaskOutput;

/// Nextera adapter sequences for R1 and R2.
pub const NEXTERA_ADAPTERS: [&str; 2] = [
    "CTGTCTCTTATACACATCTCCGAGCCCACGAGAC",
    "CTGTCTCTTATACACATCTGACGCTGCCGACGA",
];

/// Where `trim` leaves the trimmed copy of a read file.
pub(crate) fn trimmed_path(ctx: &TaskContext, readfile: &Path) -> PathBuf {
    ctx.task_dir("trim")
        .join("trimmed")
        .join(read_file_product(readfile, ".trimmed.fastq", false))
}

/// Where `merge` leaves a sample's interleaved reads.
pub(crate) fn merged_path(ctx: &TaskContext, r1: &Path) -> PathBuf {
    ctx.task_dir("merge")
        .join("PairedReads")
        .join(read_file_product(r1, ".merged.fastq", true))
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("missing output file {}", path.display());
    }
    Ok(())
}

fn pair(ctx: &TaskContext, sample: &str, files: &[PathBuf]) -> Result<(PathBuf, PathBuf)> {
    match files {
        [r1, r2] => Ok((trimmed_path(ctx, r1), trimmed_path(ctx, r2))),
        _ => bail!("merging needs 2 files per sample ({sample} has {})", files.len()),
    }
}

/// Trim Nextera adapters with `cutadapt`.
#[derive(Debug)]
pub struct TrimTask {
    spec: TaskSpec,
}

impl TrimTask {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::new("trim", 10, &[]),
        }
    }

    async fn run(&self, ctx: &TaskContext, log: &TaskLog) -> Result<TaskOutput> {
        let mut trimmed = 0;
        for sample in &ctx.samples {
            if sample.fastq.len() > 2 {
                bail!("trimming can't handle more than 2 files per sample ({})", sample.name);
            }
            for (path, adapter) in sample.fastq.iter().zip(NEXTERA_ADAPTERS) {
                let out = ctx
                    .output_dir
                    .join("trimmed")
                    .join(read_file_product(path, ".trimmed.fastq", false));
                if let Some(parent) = out.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                let mut cmd = program("cutadapt", ["-a", adapter, "-o"]);
                cmd.arg(&out).arg(path);
                run_checked(
                    cmd,
                    RunOptions {
                        label: "cutadapt",
                        log: Some(log),
                        ..RunOptions::default()
                    },
                )
                .await?;
                ensure_exists(&out)?;
                trimmed += 1;
            }
        }
        let mut out = TaskOutput::new();
        out.insert("files".to_string(), trimmed.to_string());
        Ok(out)
    }
}

impl Task for TrimTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        Box::pin(async move { TaskOutcome::from_result(self.run(ctx, log).await) })
    }
}

/// Interleave trimmed R1/R2 reads into one file per sample.
#[derive(Debug)]
pub struct MergeTask {
    spec: TaskSpec,
}

impl MergeTask {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::new("merge", 11, &["trim"]),
        }
    }

    async fn run(&self, ctx: &TaskContext, log: &TaskLog) -> Result<TaskOutput> {
        let mut jobs = Vec::new();
        for sample in &ctx.samples {
            let (r1, r2) = pair(ctx, &sample.name, &sample.fastq)?;
            let out = ctx
                .output_dir
                .join("PairedReads")
                .join(read_file_product(&sample.fastq[0], ".merged.fastq", true));
            jobs.push((r1, r2, out));
        }

        let log = log.clone();
        blocking(move || {
            let mut total = 0;
            for (r1, r2, out) in &jobs {
                if let Some(parent) = out.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                let a = BufReader::new(
                    File::open(r1).with_context(|| format!("opening {}", r1.display()))?,
                );
                let b = BufReader::new(
                    File::open(r2).with_context(|| format!("opening {}", r2.display()))?,
                );
                let mut w = BufWriter::new(
                    File::create(out).with_context(|| format!("creating {}", out.display()))?,
                );
                let pairs = interleave(a, b, &mut w)
                    .with_context(|| format!("merging {} and {}", r1.display(), r2.display()))?;
                w.flush()?;
                ensure_exists(out)?;
                log.line(&format!("{}: {pairs} read pairs", out.display()));
                total += pairs;
            }
            let mut output = TaskOutput::new();
            output.insert("pairs".to_string(), total.to_string());
            Ok(output)
        })
        .await
    }
}

impl Task for MergeTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        Box::pin(async move { TaskOutcome::from_result(self.run(ctx, log).await) })
    }
}

/// Merge overlapping read pairs with `pear`.
#[derive(Debug)]
pub struct MergeReadsTask {
    spec: TaskSpec,
}

impl MergeReadsTask {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::new("mergereads", 11, &["trim"]),
        }
    }

    async fn run(&self, ctx: &TaskContext, log: &TaskLog) -> Result<TaskOutput> {
        let mut merged = 0;
        for sample in &ctx.samples {
            let (r1, r2) = pair(ctx, &sample.name, &sample.fastq)?;
            // pear takes a prefix for its four output files.
            let prefix = ctx
                .output_dir
                .join("MergedReads")
                .join(read_file_product(&sample.fastq[0], "", true));
            if let Some(parent) = prefix.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let mut cmd = program("pear", ["-f"]);
            cmd.arg(&r1).arg("-r").arg(&r2).arg("-o").arg(&prefix);
            run_checked(
                cmd,
                RunOptions {
                    label: "pear",
                    log: Some(log),
                    ..RunOptions::default()
                },
            )
            .await?;
            let mut assembled = prefix.into_os_string();
            assembled.push(".assembled.fastq");
            ensure_exists(Path::new(&assembled))?;
            merged += 1;
        }
        let mut out = TaskOutput::new();
        out.insert("samples".to_string(), merged.to_string());
        Ok(out)
    }
}

impl Task for MergeReadsTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        Box::pin(async move { TaskOutcome::from_result(self.run(ctx, log).await) })
    }
}
