// src/task/builtin/delivery.rs

//! Packaging, upload and notification of a finished project.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::services::{Mailer, Message, Uploader};
use crate::task::builtin::blocking;
use crate::task::{Task, TaskContext, TaskFuture, TaskLog, TaskOutcome, TaskSpec};
use crate::types::TaskOutput;

pub const DEFAULT_SUBJECT: &str = "Sequencing data ready: {experiment} / {project}";
pub const DEFAULT_TEXT: &str = "Processed data for project {project} \
(run {run_id}, experiment {experiment}) is ready.\n\n\
Work directory: {work_dir}\nDownload: {url}\n";

/// Zip the work directory into `packaged/<work_dir_name>.zip`.
#[derive(Debug)]
pub struct PackageTask {
    spec: TaskSpec,
}

impl PackageTask {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::new("package", 1001, &["metadata"]),
        }
    }
}

impl Task for PackageTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        let work_dir = ctx.work_dir.clone();
        let archive = ctx.package_path.clone();
        Box::pin(async move {
            log.note(&format!("packaging {} into {}", work_dir.display(), archive.display()));
            let result = blocking(move || {
                let files = zip_dir(&work_dir, &archive)?;
                let mut out = TaskOutput::new();
                out.insert("path".to_string(), archive.display().to_string());
                out.insert("files".to_string(), files.to_string());
                Ok(out)
            })
            .await;
            TaskOutcome::from_result(result)
        })
    }
}

/// Archive every file under `dir`, named relative to `dir`'s parent so the
/// archive unpacks into a single directory. An existing archive is never
/// replaced.
pub fn zip_dir(dir: &Path, archive: &Path) -> Result<usize> {
    if archive.exists() {
        bail!("archive {} already exists", archive.display());
    }
    let parent = archive
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&parent).with_context(|| format!("creating {}", parent.display()))?;
    let base = dir.parent().unwrap_or(dir);

    // Build next to the destination and move into place when complete.
    let tmp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("creating temporary archive in {}", parent.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(tmp.reopen()?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut files = 0;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .strip_prefix(base)
            .with_context(|| format!("relativizing {}", entry.path().display()))?
            .to_string_lossy()
            .replace('\\', "/");
        zip.start_file(name, options)?;
        let mut input = File::open(entry.path())
            .with_context(|| format!("opening {}", entry.path().display()))?;
        std::io::copy(&mut input, &mut zip)?;
        files += 1;
    }
    let mut writer = zip.finish()?;
    writer.flush()?;
    drop(writer);

    tmp.persist_noclobber(archive)
        .with_context(|| format!("moving archive into place at {}", archive.display()))?;
    Ok(files)
}

/// Hand the package to the uploader and record the URL it reports.
#[derive(Debug)]
pub struct UploadTask {
    spec: TaskSpec,
    uploader: Arc<dyn Uploader>,
}

impl UploadTask {
    pub fn new(uploader: Arc<dyn Uploader>) -> Self {
        Self {
            spec: TaskSpec::new("upload", 1002, &["package"]),
            uploader,
        }
    }
}

impl Task for UploadTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        Box::pin(async move {
            let path = ctx
                .upstream("package", "path")
                .map(PathBuf::from)
                .unwrap_or_else(|| ctx.package_path.clone());
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.zip", ctx.work_dir_name));
            match self.uploader.upload(&path, &name).await {
                Ok(url) => {
                    log.note(&format!("uploaded {} -> {url}", path.display()));
                    info!(project = %ctx.work_dir_name, %url, "upload complete");
                    let mut out = TaskOutput::new();
                    out.insert("url".to_string(), url);
                    TaskOutcome::Success(out)
                }
                Err(err) => {
                    let reason = format!("upload of {} failed: {err:#}", path.display());
                    log.note(&reason);
                    TaskOutcome::Retryable(reason)
                }
            }
        })
    }
}

/// Notify the project's contacts.
#[derive(Debug)]
pub struct EmailTask {
    spec: TaskSpec,
    mailer: Arc<dyn Mailer>,
}

impl EmailTask {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self {
            spec: TaskSpec::new("email", 1003, &["upload"]),
            mailer,
        }
    }

    pub fn compose(&self, ctx: &TaskContext) -> Message {
        let subject = ctx
            .settings
            .template_subject
            .as_deref()
            .unwrap_or(DEFAULT_SUBJECT);
        let text = ctx.settings.template_text.as_deref().unwrap_or(DEFAULT_TEXT);
        Message {
            from: self.mailer.sender().map(str::to_string),
            to: ctx
                .contacts
                .iter()
                .map(|c| format!("{} <{}>", c.name, c.email))
                .collect(),
            subject: render_template(subject, ctx),
            body: render_template(text, ctx),
        }
    }
}

impl Task for EmailTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        Box::pin(async move {
            let message = self.compose(ctx);
            if message.to.is_empty() {
                warn!(project = %ctx.work_dir_name, "no contacts; nothing to send");
                log.note("no contacts; nothing sent");
                return TaskOutcome::success();
            }
            log.line(&message.render());
            match self.mailer.send(&message).await {
                Ok(()) => {
                    let mut out = TaskOutput::new();
                    out.insert("to".to_string(), message.to.join(", "));
                    out.insert("subject".to_string(), message.subject);
                    TaskOutcome::Success(out)
                }
                Err(err) => TaskOutcome::Retryable(format!("sending mail failed: {err:#}")),
            }
        })
    }
}

/// Fill `{work_dir}`, `{url}`, `{run_id}`, `{experiment}` and `{project}`.
pub fn render_template(template: &str, ctx: &TaskContext) -> String {
    template
        .replace("{work_dir}", &ctx.work_dir_name)
        .replace("{url}", ctx.download_url().unwrap_or(""))
        .replace("{run_id}", &ctx.run_id)
        .replace("{experiment}", &ctx.experiment)
        .replace("{project}", &ctx.project)
}
