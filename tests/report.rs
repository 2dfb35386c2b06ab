// tests/report.rs

mod common;

use std::error::Error;
use std::path::Path;

use tempfile::TempDir;

use common::builders::project_spec;
use seqdag::dag::{PlanLayout, PlannedTask, TaskPlan};
use seqdag::registry::{AlignmentRecord, Registry, RunRecord};
use seqdag::report::{self, COLUMNS, ReportRow, rows_from_snapshot, truncate};
use seqdag::types::ProjectStatus;

type TestResult = Result<(), Box<dyn Error>>;

/// RUN1 with two projects, RUN2 without alignments, RUN3 with an alignment
/// but no projects yet.
fn registry() -> Registry {
    let registry = Registry::new();

    let run1 = registry.upsert_run(RunRecord::new("RUN1", "/seq/runs/RUN1"));
    let mut aln = AlignmentRecord::new("/seq/runs/RUN1/Alignment_1", 0);
    aln.experiment = Some("EXP1".to_string());
    aln.complete = true;
    aln.sample_count = 2;
    let aln = registry.upsert_alignment(&run1, aln);
    let p1 = registry.upsert_project(
        &aln,
        project_spec("P1", "/seq/processed/RUN1-EXP1-P1", &["copy"]),
        ProjectStatus::Pending,
        None,
    );
    p1.with_state(|state| {
        let layout = PlanLayout::new(
            Path::new("/seq/processed/RUN1-EXP1-P1"),
            Path::new("implicit"),
            Path::new("logs"),
        );
        state.plan = Some(TaskPlan::new(
            vec![PlannedTask {
                name: "copy".to_string(),
                implicit: false,
            }],
            &layout,
        ));
    });
    registry.upsert_project(
        &aln,
        project_spec("P2", "/seq/processed/RUN1-EXP1-P2", &["trim", "merge"]),
        ProjectStatus::Failed,
        Some("trim: boom".to_string()),
    );

    registry.upsert_run(RunRecord::new("RUN2", "/seq/runs/RUN2"));

    let run3 = registry.upsert_run(RunRecord::new("RUN3", "/seq/runs/RUN3"));
    registry.upsert_alignment(&run3, AlignmentRecord::new("/seq/runs/RUN3/Alignment_1", 0));

    registry
}

#[test]
fn every_unit_gets_a_row() {
    let snapshot = registry().snapshot();
    assert_eq!(snapshot.count_projects(ProjectStatus::Pending), 1);
    assert_eq!(snapshot.count_projects(ProjectStatus::Failed), 1);

    let rows = rows_from_snapshot(&snapshot);
    let units: Vec<(&str, &str)> = rows
        .iter()
        .map(|r| (r.unit_id(), r.status.as_str()))
        .collect();
    assert_eq!(
        units,
        [
            ("RUN1-EXP1-P1", "pending"),
            ("RUN1-EXP1-P2", "failed"),
            ("/seq/runs/RUN2", "waiting"),
            ("/seq/runs/RUN3/Alignment_1", "waiting"),
        ]
    );

    let p1 = &rows[0];
    assert_eq!(p1.run_id, "RUN1");
    assert_eq!(p1.alignment, "/seq/runs/RUN1/Alignment_1");
    assert_eq!(p1.align_complete, "yes");
    assert_eq!(p1.project, "P1");
    assert_eq!(p1.tasks, "copy:pending");
    assert_eq!(p1.n_samples, "1");

    // No plan yet: the requested tasks are shown instead.
    assert_eq!(rows[1].tasks, "trim merge");

    let run2 = &rows[2];
    assert_eq!(run2.run_id, "RUN2");
    assert!(run2.alignment.is_empty());
    assert!(run2.project.is_empty());

    assert_eq!(rows[3].align_complete, "no");
}

#[test]
fn rendered_report_reads_back() -> TestResult {
    let rows = rows_from_snapshot(&registry().snapshot());
    let text = report::render(&rows, 0)?;

    let header = text.lines().next().unwrap_or_default();
    assert_eq!(header, COLUMNS.join(","));

    let parsed = report::parse(&text)?;
    assert_eq!(parsed, rows);
    let pairs: Vec<(String, String)> = parsed
        .iter()
        .map(|r| (r.unit_id().to_string(), r.status.clone()))
        .collect();
    assert_eq!(pairs.len(), 4);
    assert_eq!(pairs[1], ("RUN1-EXP1-P2".to_string(), "failed".to_string()));
    Ok(())
}

#[test]
fn empty_report_is_just_the_header() -> TestResult {
    let text = report::render(&[], 60)?;
    assert_eq!(text, format!("{}\n", COLUMNS.join(",")));
    assert!(report::parse(&text)?.is_empty());
    Ok(())
}

#[test]
fn truncate_marks_cut_values() {
    assert_eq!(truncate("abcdefghij", 5), "ab...");
    assert_eq!(truncate("abcdefghij", 10), "abcdefghij");
    assert_eq!(truncate("abcdefghij", 0), "abcdefghij");
    assert_eq!(truncate("abcdef", 3), "abc");
    assert_eq!(truncate("abcdef", 1), "a");
    assert_eq!(truncate("äöüäöüäöü", 6), "äöü...");
}

#[test]
fn render_truncates_fields_but_not_header() -> TestResult {
    let row = ReportRow {
        work_dir: "A_VERY_LONG_WORK_DIRECTORY_NAME".to_string(),
        status: "pending".to_string(),
        ..ReportRow::default()
    };
    let text = report::render(&[row], 10)?;
    assert!(text.starts_with("RunId,RunPath,Alignment,Experiment,AlignComplete,"));

    let parsed = report::parse(&text)?;
    assert_eq!(parsed[0].work_dir, "A_VERY_...");
    assert_eq!(parsed[0].status, "pending");
    Ok(())
}

#[test]
fn save_atomic_creates_and_replaces() -> TestResult {
    let tmp = TempDir::new()?;
    let dir = tmp.path().join("status").join("nested");
    let path = dir.join("report.csv");

    report::save_atomic(&Registry::new().snapshot(), &path, 60)?;
    assert!(path.is_file());
    assert!(report::parse(&std::fs::read_to_string(&path)?)?.is_empty());

    report::save_atomic(&registry().snapshot(), &path, 60)?;
    let rows = report::parse(&std::fs::read_to_string(&path)?)?;
    assert_eq!(rows.len(), 4);

    // Only the report itself is left behind.
    let entries: Vec<_> = std::fs::read_dir(&dir)?
        .map(|e| e.map(|e| e.file_name()))
        .collect::<Result<_, _>>()?;
    assert_eq!(entries, ["report.csv"]);
    Ok(())
}

#[test]
fn print_report_writes_csv() -> TestResult {
    let mut out = Vec::new();
    report::print_report(&registry().snapshot(), 60, &mut out)?;
    let text = String::from_utf8(out)?;
    assert_eq!(text.lines().count(), 5);
    assert!(text.contains("RUN1-EXP1-P2"));
    Ok(())
}
