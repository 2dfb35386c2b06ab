// src/report/mod.rs

//! Status report: one CSV row per tracked unit.
//!
//! Runs without alignments and alignments without projects get a row of
//! their own so nothing seen is silently left out. Truncation to
//! `max_width` only touches the rendered text.

pub mod writer;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::registry::{AlignmentSnapshot, ProjectSnapshot, RegistrySnapshot, RunSnapshot};

pub use writer::{print_report, save_atomic};

pub const COLUMNS: [&str; 13] = [
    "RunId",
    "RunPath",
    "Alignment",
    "Experiment",
    "AlignComplete",
    "Project",
    "WorkDir",
    "Status",
    "Tasks",
    "NSamples",
    "NFiles",
    "Discovered",
    "Updated",
];

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportRow {
    pub run_id: String,
    pub run_path: String,
    pub alignment: String,
    pub experiment: String,
    pub align_complete: String,
    pub project: String,
    pub work_dir: String,
    pub status: String,
    pub tasks: String,
    pub n_samples: String,
    pub n_files: String,
    pub discovered: String,
    pub updated: String,
}

impl ReportRow {
    /// Most specific identifier of the unit this row describes.
    pub fn unit_id(&self) -> &str {
        if !self.work_dir.is_empty() {
            &self.work_dir
        } else if !self.alignment.is_empty() {
            &self.alignment
        } else {
            &self.run_path
        }
    }

    /// Copy with every field cut to `max_width` characters (0 = unlimited).
    pub fn truncated(&self, max_width: usize) -> Self {
        let t = |s: &String| truncate(s, max_width);
        Self {
            run_id: t(&self.run_id),
            run_path: t(&self.run_path),
            alignment: t(&self.alignment),
            experiment: t(&self.experiment),
            align_complete: t(&self.align_complete),
            project: t(&self.project),
            work_dir: t(&self.work_dir),
            status: t(&self.status),
            tasks: t(&self.tasks),
            n_samples: t(&self.n_samples),
            n_files: t(&self.n_files),
            discovered: t(&self.discovered),
            updated: t(&self.updated),
        }
    }

    fn for_run(run: &RunSnapshot) -> Self {
        Self {
            run_id: run.record.run_id.clone(),
            run_path: run.record.path.display().to_string(),
            status: run.record.status.to_string(),
            discovered: timestamp(&run.record.discovered),
            updated: timestamp(&run.record.updated),
            ..Self::default()
        }
    }

    fn for_alignment(run: &RunSnapshot, aln: &AlignmentSnapshot) -> Self {
        Self {
            alignment: aln.record.path.display().to_string(),
            experiment: aln.record.experiment.clone().unwrap_or_default(),
            align_complete: yes_no(aln.record.complete),
            status: aln.record.status.to_string(),
            n_samples: aln.record.sample_count.to_string(),
            discovered: timestamp(&aln.record.discovered),
            updated: timestamp(&aln.record.updated),
            ..Self::for_run(run)
        }
    }

    fn for_project(run: &RunSnapshot, aln: &AlignmentSnapshot, project: &ProjectSnapshot) -> Self {
        let tasks = if project.tasks.is_empty() {
            project.spec.requested.join(" ")
        } else {
            project.task_summary()
        };
        Self {
            experiment: project.spec.experiment.clone(),
            project: project.spec.name.clone(),
            work_dir: project.spec.work_dir_name.clone(),
            status: project.status.to_string(),
            tasks,
            n_samples: project.spec.samples.len().to_string(),
            n_files: project
                .spec
                .samples
                .iter()
                .map(|s| s.fastq.len())
                .sum::<usize>()
                .to_string(),
            discovered: timestamp(&project.discovered),
            updated: timestamp(&project.updated),
            ..Self::for_alignment(run, aln)
        }
    }
}

/// Rows in (run, alignment, project) order.
pub fn rows_from_snapshot(snapshot: &RegistrySnapshot) -> Vec<ReportRow> {
    let mut rows = Vec::new();
    for run in &snapshot.runs {
        if run.alignments.is_empty() {
            rows.push(ReportRow::for_run(run));
            continue;
        }
        for aln in &run.alignments {
            if aln.projects.is_empty() {
                rows.push(ReportRow::for_alignment(run, aln));
                continue;
            }
            for project in &aln.projects {
                rows.push(ReportRow::for_project(run, aln, project));
            }
        }
    }
    rows
}

/// Cut `value` to at most `max_width` characters, marking the cut with
/// `...`. `0` disables truncation.
pub fn truncate(value: &str, max_width: usize) -> String {
    let len = value.chars().count();
    if max_width == 0 || len <= max_width {
        return value.to_string();
    }
    if max_width <= 3 {
        return value.chars().take(max_width).collect();
    }
    let mut out: String = value.chars().take(max_width - 3).collect();
    out.push_str("...");
    out
}

/// Render rows as CSV with a header line.
pub fn render(rows: &[ReportRow], max_width: usize) -> anyhow::Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(COLUMNS)?;
    for row in rows {
        writer.serialize(row.truncated(max_width))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("flushing report: {}", err.error()))?;
    Ok(String::from_utf8(bytes)?)
}

/// Read a rendered report back.
pub fn parse(text: &str) -> anyhow::Result<Vec<ReportRow>> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn timestamp(t: &DateTime<Local>) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}
