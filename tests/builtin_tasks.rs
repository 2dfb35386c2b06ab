// tests/builtin_tasks.rs

mod common;

use std::error::Error;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::watch;

use common::builders::{ConfigFileBuilder, project_spec};
use common::fake_tasks::RecordingMailer;
use seqdag::dag::{PlanLayout, PlannedTask, TaskPlan};
use seqdag::exec::{StepResult, TaskEngine};
use seqdag::registry::{ProjectHandle, ProjectSpec};
use seqdag::services::{LocalUploader, Services};
use seqdag::task::builtin::{render_template, zip_dir};
use seqdag::task::fastq::{
    FastaRecord, contigs_to_fastq, interleave, read_fasta, read_file_product, spades_contig_number,
};
use seqdag::task::{TaskCatalog, TaskContext};
use seqdag::types::{ProjectStatus, TaskOutput, TaskStatus};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn read_file_products() {
    let r1 = Path::new("/runs/x/Sample-1_S1_L001_R1_001.fastq.gz");
    assert_eq!(
        read_file_product(r1, ".trimmed.fastq", false),
        "Sample-1_S1_L001_R1_001.trimmed.fastq"
    );
    assert_eq!(
        read_file_product(r1, ".merged.fastq", true),
        "Sample-1_S1_L001_001.merged.fastq"
    );
}

#[test]
fn interleave_alternates_mates() -> TestResult {
    let r1 = "@a/1\nACGT\n+\nIIII\n@b/1\nGGGG\n+\nIIII\n";
    let r2 = "@a/2\nTTTT\n+\nJJJJ\n@b/2\nCCCC\n+\nJJJJ\n";
    let mut out = Vec::new();

    let pairs = interleave(r1.as_bytes(), r2.as_bytes(), &mut out)?;
    assert_eq!(pairs, 2);
    let headers: Vec<String> = String::from_utf8(out)?
        .lines()
        .filter(|l| l.starts_with('@'))
        .map(str::to_string)
        .collect();
    assert_eq!(headers, ["@a/1", "@a/2", "@b/1", "@b/2"]);
    Ok(())
}

#[test]
fn truncated_fastq_is_an_error() {
    let r1 = "@a/1\nACGT\n+\n";
    let r2 = "@a/2\nTTTT\n+\nJJJJ\n";
    let mut out = Vec::new();
    assert!(interleave(r1.as_bytes(), r2.as_bytes(), &mut out).is_err());
}

#[test]
fn contigs_become_fastq_above_min_length() -> TestResult {
    let fasta = ">NODE_1_length_8_cov_2.0\nACGT\nACGT\n>NODE_2_length_2_cov_1.0\nAC\n>scaffold\nGGGGGG\n";
    let contigs = read_fasta(fasta.as_bytes())?;
    assert_eq!(
        contigs[0],
        FastaRecord {
            id: "NODE_1_length_8_cov_2.0".to_string(),
            seq: "ACGTACGT".to_string(),
        }
    );
    assert_eq!(spades_contig_number("NODE_12_length_5"), Some("12"));
    assert_eq!(spades_contig_number("scaffold"), None);

    let mut out = Vec::new();
    let written = contigs_to_fastq(&contigs, "P1", 3, 40, &mut out)?;
    assert_eq!(written, 2);
    let text = String::from_utf8(out)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "@P1-contig_1");
    assert_eq!(lines[3], "IIIIIIII");
    assert_eq!(lines[4], "@P1-contig_3");
    Ok(())
}

#[test]
fn zip_dir_archives_under_the_dir_name() -> TestResult {
    let tmp = TempDir::new()?;
    let work = tmp.path().join("RUN1-EXP1-P1");
    std::fs::create_dir_all(work.join("sub"))?;
    std::fs::write(work.join("a.txt"), "a")?;
    std::fs::write(work.join("sub").join("b.txt"), "b")?;
    let archive = tmp.path().join("packaged").join("RUN1-EXP1-P1.zip");

    assert_eq!(zip_dir(&work, &archive)?, 2);

    let mut zip = zip::ZipArchive::new(File::open(&archive)?)?;
    let mut names: Vec<String> = (0..zip.len())
        .map(|i| zip.by_index(i).map(|f| f.name().to_string()))
        .collect::<Result<_, _>>()?;
    names.sort();
    assert_eq!(names, ["RUN1-EXP1-P1/a.txt", "RUN1-EXP1-P1/sub/b.txt"]);

    // Never replaces an existing archive.
    assert!(zip_dir(&work, &archive).is_err());
    Ok(())
}

fn context_for(spec: &ProjectSpec, root: &Path) -> TaskContext {
    let cfg = ConfigFileBuilder::new(root).build();
    let layout = PlanLayout::new(&spec.work_dir, Path::new("implicit"), Path::new("logs"));
    let plan = TaskPlan::new(
        vec![PlannedTask {
            name: "email".to_string(),
            implicit: false,
        }],
        &layout,
    );
    TaskContext::new(spec, &plan.entries()[0], &plan, &cfg)
}

#[test]
fn templates_fill_project_fields() {
    let spec = project_spec("P1", "/seq/processed/RUN1-EXP1-P1", &["email"]);
    let mut ctx = context_for(&spec, Path::new("/seq"));
    let template = "{project}: {url} in {work_dir} ({run_id}/{experiment})";

    assert_eq!(
        render_template(template, &ctx),
        "P1:  in RUN1-EXP1-P1 (RUN1/EXP1)"
    );

    let mut upload = TaskOutput::new();
    upload.insert("url".to_string(), "https://example.org/x.zip".to_string());
    ctx.outputs.insert("upload".to_string(), upload);
    assert_eq!(
        render_template(template, &ctx),
        "P1: https://example.org/x.zip in RUN1-EXP1-P1 (RUN1/EXP1)"
    );
    assert_eq!(
        ctx.package_path,
        PathBuf::from("/seq/packaged/RUN1-EXP1-P1.zip")
    );
}

#[tokio::test]
async fn delivery_chain_packages_uploads_and_mails() -> TestResult {
    common::init_tracing();
    let tmp = TempDir::new()?;
    let root = tmp.path();

    let experiment_dir = root.join("experiments").join("EXP1");
    std::fs::create_dir_all(&experiment_dir)?;
    let metadata = experiment_dir.join("metadata.csv");
    std::fs::write(
        &metadata,
        "Sample_Name,Project,Contacts,Tasks\nS1,P1,Jane Doe <jane@example.org>,email\nS2,P2,,\n",
    )?;
    let sheet = root.join("SampleSheetUsed.csv");
    std::fs::write(&sheet, "[Header]\nExperiment Name,EXP1\n[Data]\nSample_ID,Sample_Name\nS1,S1\n")?;

    let mut spec = project_spec("P1", root.join("processed").join("RUN1-EXP1-P1"), &["email"]);
    spec.metadata_path = metadata;
    spec.sample_sheet = Some(sheet);
    let work_dir = spec.work_dir.clone();
    let p = Arc::new(ProjectHandle::new(spec, ProjectStatus::Pending, None));

    let mailer = RecordingMailer::new();
    let services = Services::new(Arc::new(LocalUploader), mailer.clone());
    let cfg = ConfigFileBuilder::new(root)
        .task_defaults(&[])
        .task_null(&[])
        .build();
    let engine = TaskEngine::new(
        Arc::new(cfg),
        Arc::new(TaskCatalog::with_builtins(&services)),
        Arc::clone(&services.mailer),
    );
    let (_tx, rx) = watch::channel(false);

    let result = common::with_timeout(engine.run_project(&p, &rx)).await;
    assert_eq!(result, StepResult::Finished(ProjectStatus::Success));

    let plan = p.state().plan.unwrap();
    assert_eq!(plan.names(), ["metadata", "package", "upload", "email"]);
    assert!(plan.entries().iter().all(|e| e.status == TaskStatus::Success));

    let md_dir = work_dir.join("implicit").join("Metadata");
    assert!(md_dir.join("SampleSheetUsed.csv").is_file());
    let filtered = std::fs::read_to_string(md_dir.join("metadata.csv"))?;
    assert_eq!(filtered.lines().count(), 2);
    assert!(filtered.contains("S1,P1"));
    assert!(!filtered.contains("S2,P2"));

    let archive = root.join("packaged").join("RUN1-EXP1-P1.zip");
    assert!(archive.is_file());

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, ["Jane Doe <jane@example.org>".to_string()]);
    assert_eq!(sent[0].subject, "Sequencing data ready: EXP1 / P1");
    assert!(sent[0].body.contains("file://"));
    assert!(sent[0].body.contains("RUN1-EXP1-P1.zip"));
    Ok(())
}
