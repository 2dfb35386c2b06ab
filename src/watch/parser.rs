// src/watch/parser.rs

//! Turning raw run directories into typed records.
//!
//! Discovery talks to a [`RunParser`]; [`IlluminaParser`] understands the
//! MiSeq / MiniSeq output layout:
//!
//! ```text
//! <run>/RunInfo.xml                          run id, flow cell
//! <run>/RTAComplete.txt                      instrument finished
//! <run>/Data/Intensities/BaseCalls/Alignment*/         (MiSeq)
//! <run>/Alignment*/<YYYYMMDD_HHMMSS>/                  (MiniSeq)
//!     Checkpoint.txt                         "3" once demultiplexing is done
//!     CompletedJobInfo.xml                   <Error> on failure
//!     SampleSheetUsed.csv                    [Header] Experiment Name, [Data]
//!     Fastq/<sample>_S<n>_L<lane>_R<1|2>_001.fastq.gz
//! ```

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use anyhow::Result;
use regex::Regex;
use thiserror::Error;

use crate::fs::{FileSystem, is_transient};
use crate::registry::{Contact, SampleRecord};

/// How reading a unit of the run tree failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not something this parser handles; skipped quietly.
    #[error("not a recognized run directory")]
    NotRecognized,

    /// May clear up by itself (permissions, files not flushed yet).
    #[error("transient: {0}")]
    Transient(String),

    /// Malformed or missing required content.
    #[error("invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRun {
    pub run_id: String,
    pub flowcell: Option<String>,
    pub complete: bool,
    pub alignments: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAlignment {
    pub checkpoint: Option<u32>,
    pub complete: bool,
    pub error: bool,
    pub experiment: Option<String>,
    pub sample_sheet: Option<PathBuf>,
    /// Filled in only once the alignment is complete.
    pub samples: Vec<SampleRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRow {
    pub sample_name: String,
    pub project: String,
    pub contacts: Vec<Contact>,
    pub tasks: Vec<String>,
}

/// Rows of `experiments/<experiment>/metadata.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentMetadata {
    pub path: PathBuf,
    pub rows: Vec<MetadataRow>,
}

/// Sample sheet fields discovery cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleSheet {
    pub experiment: Option<String>,
    pub samples: Vec<String>,
}

/// Format-parsing collaborator used by discovery.
pub trait RunParser: Send + Sync + Debug {
    fn parse_run(&self, fs: &dyn FileSystem, path: &Path) -> Result<ParsedRun, ParseError>;

    fn parse_alignment(&self, fs: &dyn FileSystem, path: &Path)
    -> Result<ParsedAlignment, ParseError>;

    /// `Ok(None)` when the metadata file does not exist.
    fn parse_metadata(
        &self,
        fs: &dyn FileSystem,
        path: &Path,
    ) -> Result<Option<ExperimentMetadata>, ParseError>;
}

const CHECKPOINT_DONE: u32 = 3;

#[derive(Debug, Clone)]
pub struct IlluminaParser {
    run_id: Regex,
    flowcell: Regex,
    fastq: Regex,
    contact: Regex,
    timestamp_dir: Regex,
}

impl IlluminaParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            run_id: Regex::new(r#"<Run\s[^>]*Id="([^"]+)""#)?,
            flowcell: Regex::new(r"<Flowcell>([^<]+)</Flowcell>")?,
            fastq: Regex::new(
                r"^(?P<sample>.+)_S(?P<num>[0-9]+)_L(?P<lane>[0-9]+)_R(?P<read>[12])_001\.fastq\.gz$",
            )?,
            contact: Regex::new(r"^\s*(.*?)\s*<([^>]+)>\s*$")?,
            timestamp_dir: Regex::new(r"^[0-9]{8}_[0-9]{6}$")?,
        })
    }

    /// Sample number (`S<n>`) of a FASTQ file name, if it is one.
    pub fn fastq_sample_number(&self, path: &Path) -> Option<usize> {
        let name = path.file_name()?.to_str()?;
        let caps = self.fastq.captures(name)?;
        caps["num"].parse().ok()
    }

    /// MiniSeq nests the alignment files in a timestamped subdirectory.
    fn alignment_content_dir(&self, fs: &dyn FileSystem, path: &Path) -> Result<PathBuf, ParseError> {
        if fs.is_file(&path.join("Checkpoint.txt")) {
            return Ok(path.to_path_buf());
        }
        let nested = read_dir(fs, path)?
            .into_iter()
            .filter(|p| fs.is_dir(p))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| self.timestamp_dir.is_match(n))
            })
            .last();
        Ok(nested.unwrap_or_else(|| path.to_path_buf()))
    }

    fn find_fastq(
        &self,
        fs: &dyn FileSystem,
        alignment: &Path,
        content: &Path,
    ) -> Result<BTreeMap<usize, Vec<PathBuf>>, ParseError> {
        let mut dirs = vec![content.join("Fastq"), content.to_path_buf()];
        if let Some(parent) = alignment.parent() {
            if parent.file_name().and_then(|n| n.to_str()) == Some("BaseCalls") {
                dirs.push(parent.to_path_buf());
            }
        }

        let mut found: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
        for dir in dirs.iter().filter(|d| fs.is_dir(d)) {
            for file in read_dir(fs, dir)? {
                if let Some(num) = self.fastq_sample_number(&file) {
                    found.entry(num).or_default().push(file);
                }
            }
        }
        for files in found.values_mut() {
            files.sort();
            files.dedup();
        }
        Ok(found)
    }

    fn parse_contacts(&self, text: &str) -> Vec<Contact> {
        text.split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(|part| {
                if let Some(caps) = self.contact.captures(part) {
                    let email = caps[2].trim().to_string();
                    let name = match caps[1].trim() {
                        "" => email.clone(),
                        n => n.to_string(),
                    };
                    Some(Contact { name, email })
                } else if part.contains('@') {
                    let email = part.trim().to_string();
                    Some(Contact {
                        name: email.clone(),
                        email,
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

impl RunParser for IlluminaParser {
    fn parse_run(&self, fs: &dyn FileSystem, path: &Path) -> Result<ParsedRun, ParseError> {
        let run_info = path.join("RunInfo.xml");
        if !fs.is_file(&run_info) {
            return Err(ParseError::NotRecognized);
        }
        let text = read(fs, &run_info)?;
        let run_id = self
            .run_id
            .captures(&text)
            .map(|c| c[1].to_string())
            .ok_or_else(|| ParseError::Invalid(format!("{:?} has no run Id", run_info)))?;
        let flowcell = self.flowcell.captures(&text).map(|c| c[1].trim().to_string());
        let complete = fs.is_file(&path.join("RTAComplete.txt"));

        let mut alignments = Vec::new();
        let basecalls = path.join("Data").join("Intensities").join("BaseCalls");
        for dir in [path.to_path_buf(), basecalls] {
            if !fs.is_dir(&dir) {
                continue;
            }
            for child in read_dir(fs, &dir)? {
                let is_alignment = child
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("Alignment"));
                if is_alignment && fs.is_dir(&child) {
                    alignments.push(child);
                }
            }
        }
        alignments.sort();

        Ok(ParsedRun {
            run_id,
            flowcell,
            complete,
            alignments,
        })
    }

    fn parse_alignment(
        &self,
        fs: &dyn FileSystem,
        path: &Path,
    ) -> Result<ParsedAlignment, ParseError> {
        let content = self.alignment_content_dir(fs, path)?;

        let checkpoint_path = content.join("Checkpoint.txt");
        let checkpoint = if fs.is_file(&checkpoint_path) {
            let text = read(fs, &checkpoint_path)?;
            let first = text.lines().next().unwrap_or("").trim();
            Some(first.parse::<u32>().map_err(|_| {
                ParseError::Invalid(format!("{:?}: bad checkpoint value {first:?}", checkpoint_path))
            })?)
        } else {
            None
        };
        let complete = checkpoint == Some(CHECKPOINT_DONE);

        let job_info = content.join("CompletedJobInfo.xml");
        let error = fs.is_file(&job_info) && read(fs, &job_info)?.contains("<Error");

        let sheet_path = content.join("SampleSheetUsed.csv");
        let sheet = if fs.is_file(&sheet_path) {
            Some(parse_sample_sheet(&read(fs, &sheet_path)?)?)
        } else if complete {
            return Err(ParseError::Invalid(format!(
                "complete alignment without SampleSheetUsed.csv in {:?}",
                content
            )));
        } else {
            None
        };

        let mut samples = Vec::new();
        if complete && !error {
            let fastq = self.find_fastq(fs, path, &content)?;
            for (i, name) in sheet.iter().flat_map(|s| s.samples.iter()).enumerate() {
                match fastq.get(&(i + 1)) {
                    Some(files) => samples.push(SampleRecord {
                        name: name.clone(),
                        fastq: files.clone(),
                    }),
                    None => {
                        return Err(ParseError::Transient(format!(
                            "no FASTQ files visible yet for sample {name}"
                        )));
                    }
                }
            }
        }

        Ok(ParsedAlignment {
            checkpoint,
            complete,
            error,
            experiment: sheet.as_ref().and_then(|s| s.experiment.clone()),
            sample_sheet: sheet.as_ref().map(|_| sheet_path.clone()),
            samples,
        })
    }

    fn parse_metadata(
        &self,
        fs: &dyn FileSystem,
        path: &Path,
    ) -> Result<Option<ExperimentMetadata>, ParseError> {
        if !fs.is_file(path) {
            return Ok(None);
        }
        let text = read(fs, path)?;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| ParseError::Invalid(format!("{:?}: {e}", path)))?
            .clone();
        let column = |name: &str| headers.iter().position(|h| h == name);
        let (Some(sample_col), Some(project_col)) = (column("Sample_Name"), column("Project"))
        else {
            return Err(ParseError::Invalid(format!(
                "{:?}: Sample_Name and Project columns are required",
                path
            )));
        };
        let contacts_col = column("Contacts");
        let tasks_col = column("Tasks");

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ParseError::Invalid(format!("{:?}: {e}", path)))?;
            let field = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("");
            let sample_name = field(Some(sample_col)).to_string();
            let project = field(Some(project_col)).to_string();
            if sample_name.is_empty() && project.is_empty() {
                continue;
            }
            if project.is_empty() {
                return Err(ParseError::Invalid(format!(
                    "{:?}: sample {sample_name} has no Project",
                    path
                )));
            }
            rows.push(MetadataRow {
                sample_name,
                project,
                contacts: self.parse_contacts(field(contacts_col)),
                tasks: field(tasks_col)
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
            });
        }

        Ok(Some(ExperimentMetadata {
            path: path.to_path_buf(),
            rows,
        }))
    }
}

/// Parse the `[Header]` experiment name and `[Data]` sample names.
pub fn parse_sample_sheet(text: &str) -> Result<SampleSheet, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut sheet = SampleSheet::default();
    let mut section = String::new();
    let mut data_header: Option<Vec<String>> = None;
    let mut saw_data = false;

    for record in reader.records() {
        let record = record.map_err(|e| ParseError::Invalid(format!("sample sheet: {e}")))?;
        let first = record.get(0).unwrap_or("");
        if first.starts_with('[') {
            section = first.trim_matches(|c: char| c == '[' || c == ']').to_string();
            saw_data |= section == "Data";
            continue;
        }
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        match section.as_str() {
            "Header" if first == "Experiment Name" => {
                sheet.experiment = record.get(1).filter(|v| !v.is_empty()).map(str::to_string);
            }
            "Data" => match &data_header {
                None => data_header = Some(record.iter().map(str::to_string).collect()),
                Some(header) => {
                    let col = header
                        .iter()
                        .position(|h| h == "Sample_Name")
                        .or_else(|| header.iter().position(|h| h == "Sample_ID"))
                        .unwrap_or(0);
                    let name = record.get(col).filter(|v| !v.is_empty()).or(record.get(0));
                    if let Some(name) = name {
                        sheet.samples.push(name.to_string());
                    }
                }
            },
            _ => {}
        }
    }

    if !saw_data {
        return Err(ParseError::Invalid(
            "sample sheet has no [Data] section".to_string(),
        ));
    }
    Ok(sheet)
}

fn classify(err: anyhow::Error) -> ParseError {
    if is_transient(&err) {
        ParseError::Transient(format!("{err:#}"))
    } else {
        ParseError::Invalid(format!("{err:#}"))
    }
}

fn read(fs: &dyn FileSystem, path: &Path) -> Result<String, ParseError> {
    fs.read_to_string(path).map_err(classify)
}

fn read_dir(fs: &dyn FileSystem, path: &Path) -> Result<Vec<PathBuf>, ParseError> {
    fs.read_dir(path).map_err(classify)
}
