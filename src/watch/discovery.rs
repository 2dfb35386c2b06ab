// src/watch/discovery.rs

//! One pass over the run root per poll cycle.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, error, info, warn};

use crate::config::ConfigFile;
use crate::fs::FileSystem;
use crate::registry::{
    AlignmentHandle, AlignmentRecord, Contact, ProjectSpec, Registry, RunHandle, RunRecord,
    SampleRecord,
};
use crate::types::{EntityStatus, ProjectStatus};
use crate::watch::log_once::LogOnce;
use crate::watch::parser::{ExperimentMetadata, ParseError, ParsedAlignment, RunParser};
use crate::watch::path_utils::{dir_name, work_dir_name};

/// Counters for one refresh, mostly for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub runs_seen: usize,
    pub too_young: usize,
    pub too_old: usize,
    pub deferred: usize,
    pub errored: usize,
    pub new_projects: usize,
}

enum AgeGate {
    Pass,
    TooYoung,
    TooOld,
}

/// Converts the run tree into registry entities.
///
/// Age filters only apply to directories not yet in the registry. A run
/// once accepted keeps being refreshed so late alignments are picked up.
#[derive(Debug)]
pub struct Discovery {
    cfg: Arc<ConfigFile>,
    fs: Arc<dyn FileSystem>,
    parser: Arc<dyn RunParser>,
    registry: Arc<Registry>,
    /// Older than `max_age` on first sight; never looked at again.
    too_old: HashSet<PathBuf>,
    /// First time each unit hit a transient failure in its current streak.
    deferred_since: HashMap<PathBuf, SystemTime>,
    log_once: LogOnce,
}

impl Discovery {
    pub fn new(
        cfg: Arc<ConfigFile>,
        fs: Arc<dyn FileSystem>,
        parser: Arc<dyn RunParser>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            cfg,
            fs,
            parser,
            registry,
            too_old: HashSet::new(),
            deferred_since: HashMap::new(),
            log_once: LogOnce::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Forget everything learned so far (used on reload).
    pub fn reset(&mut self) {
        self.too_old.clear();
        self.deferred_since.clear();
        self.log_once.reset();
    }

    /// Scan the run root once. `now` drives the age filters and the
    /// transient-failure deadline.
    pub fn refresh(&mut self, now: SystemTime) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        let root = self.cfg.paths.runs.clone();

        let entries = match self.fs.read_dir(&root) {
            Ok(entries) => {
                self.log_once.clear(&root);
                entries
            }
            Err(err) => {
                let msg = format!("{err:#}");
                if self.log_once.first(&root, &msg) {
                    warn!(root = %root.display(), error = %msg, "cannot list run root");
                }
                return summary;
            }
        };

        for path in entries {
            if !self.fs.is_dir(&path) {
                continue;
            }
            self.refresh_run(&path, now, &mut summary);
        }

        debug!(?summary, "refresh complete");
        summary
    }

    fn age_gate(&mut self, path: &Path, now: SystemTime) -> AgeGate {
        let Ok(mtime) = self.fs.modified(path) else {
            return AgeGate::TooYoung;
        };
        // A timestamp in the future counts as brand new.
        let age = now.duration_since(mtime).unwrap_or(Duration::ZERO);
        if let Some(max) = self.cfg.max_age {
            if age > max {
                return AgeGate::TooOld;
            }
        }
        if let Some(min) = self.cfg.min_age {
            if age < min {
                return AgeGate::TooYoung;
            }
        }
        AgeGate::Pass
    }

    fn refresh_run(&mut self, path: &Path, now: SystemTime, summary: &mut RefreshSummary) {
        if self.too_old.contains(path) {
            summary.too_old += 1;
            return;
        }

        let known = self.registry.run(path);
        match &known {
            Some(run) if run.record().status == EntityStatus::Errored => {
                summary.errored += 1;
                return;
            }
            Some(_) => {}
            None => match self.age_gate(path, now) {
                AgeGate::Pass => {}
                AgeGate::TooYoung => {
                    if self.log_once.first(path, "too young") {
                        debug!(run = %path.display(), "skipping run younger than min_age");
                    }
                    summary.too_young += 1;
                    return;
                }
                AgeGate::TooOld => {
                    info!(run = %path.display(), "ignoring run older than max_age");
                    self.too_old.insert(path.to_path_buf());
                    summary.too_old += 1;
                    return;
                }
            },
        }

        let parsed = match self.parser.parse_run(self.fs.as_ref(), path) {
            Ok(parsed) => parsed,
            Err(ParseError::NotRecognized) => {
                if self.log_once.first(path, "not a run") {
                    debug!(dir = %path.display(), "not a run directory");
                }
                return;
            }
            Err(ParseError::Transient(reason)) => {
                if let Some(reason) = self.defer(path, &reason, now, summary) {
                    self.mark_run_errored(path, reason, summary);
                }
                return;
            }
            Err(ParseError::Invalid(reason)) => {
                self.mark_run_errored(path, reason, summary);
                return;
            }
        };
        self.settle(path);
        summary.runs_seen += 1;

        let mut record = RunRecord::new(parsed.run_id.clone(), path);
        record.flowcell = parsed.flowcell.clone();
        record.complete = parsed.complete;
        record.status = if parsed.complete {
            EntityStatus::Ready
        } else {
            EntityStatus::Waiting
        };
        if known.is_none() {
            info!(run = %parsed.run_id, path = %path.display(), complete = parsed.complete, "discovered run");
        }
        let run = self.registry.upsert_run(record);

        for (index, aln_path) in parsed.alignments.iter().enumerate() {
            self.refresh_alignment(&run, aln_path, index, now, summary);
        }
    }

    fn refresh_alignment(
        &mut self,
        run: &Arc<RunHandle>,
        path: &Path,
        index: usize,
        now: SystemTime,
        summary: &mut RefreshSummary,
    ) {
        if let Some(existing) = run.alignment(path) {
            let record = existing.record();
            if record.status == EntityStatus::Errored || record.projects_built {
                return;
            }
        }

        let parsed = match self.parser.parse_alignment(self.fs.as_ref(), path) {
            Ok(parsed) => parsed,
            Err(ParseError::NotRecognized) => return,
            Err(ParseError::Transient(reason)) => {
                if let Some(reason) = self.defer(path, &reason, now, summary) {
                    self.mark_alignment_errored(run, path, index, reason, summary);
                }
                return;
            }
            Err(ParseError::Invalid(reason)) => {
                self.mark_alignment_errored(run, path, index, reason, summary);
                return;
            }
        };
        self.settle(path);

        let mut record = AlignmentRecord::new(path, index);
        record.experiment = parsed.experiment.clone();
        record.checkpoint = parsed.checkpoint;
        record.complete = parsed.complete;
        record.error = parsed.error;
        record.sample_count = parsed.samples.len();
        let run_record = run.record();
        // Ready only once the instrument has finished the whole run too.
        record.status = if parsed.error {
            record.reason = Some("demultiplexing reported an error".to_string());
            EntityStatus::Errored
        } else if parsed.complete && run_record.complete {
            EntityStatus::Ready
        } else {
            EntityStatus::Waiting
        };
        let errored = parsed.error;
        let alignment = self.registry.upsert_alignment(run, record);

        if errored {
            if self.log_once.first(path, "alignment error") {
                error!(alignment = %path.display(), "alignment reported an error; excluded");
            }
            summary.errored += 1;
            return;
        }

        if run_record.complete && parsed.complete {
            self.build_projects(&run_record, &alignment, parsed, now, summary);
        }
    }

    fn build_projects(
        &mut self,
        run: &RunRecord,
        alignment: &Arc<AlignmentHandle>,
        parsed: ParsedAlignment,
        now: SystemTime,
        summary: &mut RefreshSummary,
    ) {
        let aln = alignment.record();
        let Some(experiment) = parsed.experiment.clone() else {
            self.mark_alignment_errored_handle(
                alignment,
                "sample sheet has no Experiment Name".to_string(),
                summary,
            );
            return;
        };

        let metadata_path = self.cfg.paths.experiment_metadata(&experiment);
        let metadata = match self.parser.parse_metadata(self.fs.as_ref(), &metadata_path) {
            Ok(Some(md)) => {
                self.settle(&metadata_path);
                md
            }
            Ok(None) => {
                // Metadata often lands after the run; keep checking quietly.
                if self.log_once.first(&aln.path, "no metadata") {
                    info!(
                        alignment = %aln.path.display(),
                        metadata = %metadata_path.display(),
                        "no experiment metadata; no projects yet"
                    );
                }
                return;
            }
            Err(ParseError::Transient(reason)) => {
                if let Some(reason) = self.defer(&metadata_path, &reason, now, summary) {
                    self.mark_alignment_errored_handle(alignment, reason, summary);
                }
                return;
            }
            Err(ParseError::Invalid(reason)) => {
                self.mark_alignment_errored_handle(alignment, reason, summary);
                return;
            }
            Err(ParseError::NotRecognized) => return,
        };

        let mut taken: HashSet<String> = self
            .registry
            .projects()
            .iter()
            .map(|p| p.spec().work_dir_name.clone())
            .collect();
        for group in group_by_project(&metadata) {
            let mut spec = self.project_spec(run, &aln.path, aln.index, &experiment, &parsed, &metadata, group);
            if taken.contains(&spec.work_dir_name) {
                let base = spec.work_dir_name.clone();
                let unique = (2..)
                    .map(|n| format!("{base}-{n}"))
                    .find(|candidate| !taken.contains(candidate))
                    .unwrap_or_else(|| base.clone());
                warn!(
                    project = %spec.name,
                    collides_with = %base,
                    work_dir = %unique,
                    "project work directory name already taken; using a suffixed name"
                );
                spec.work_dir = self.cfg.paths.processed.join(&unique);
                spec.work_dir_name = unique;
            }
            taken.insert(spec.work_dir_name.clone());
            let (status, reason) = self.initial_status(&spec);
            info!(
                project = %spec.work_dir_name,
                status = %status,
                tasks = ?spec.requested,
                "registering project"
            );
            self.registry.upsert_project(alignment, spec, status, reason);
            summary.new_projects += 1;
        }

        alignment.update(|r| r.projects_built = true);
        self.log_once.clear(&aln.path);
    }

    #[allow(clippy::too_many_arguments)]
    fn project_spec(
        &self,
        run: &RunRecord,
        alignment_path: &Path,
        alignment_index: usize,
        experiment: &str,
        parsed: &ParsedAlignment,
        metadata: &ExperimentMetadata,
        group: ProjectGroup,
    ) -> ProjectSpec {
        let work_dir_name = work_dir_name(&run.run_id, experiment, &group.name, alignment_index);

        let samples: Vec<SampleRecord> = group
            .samples
            .iter()
            .filter_map(|name| parsed.samples.iter().find(|s| &s.name == name).cloned())
            .collect();
        if !samples.is_empty() && samples.len() < group.samples.len() {
            let missing: Vec<&String> = group
                .samples
                .iter()
                .filter(|name| !samples.iter().any(|s| &&s.name == name))
                .collect();
            warn!(project = %work_dir_name, ?missing, "samples listed in metadata but absent from run");
        }

        ProjectSpec {
            work_dir: self.cfg.paths.processed.join(&work_dir_name),
            work_dir_name,
            name: group.name,
            run_id: run.run_id.clone(),
            run_path: run.path.clone(),
            alignment_path: alignment_path.to_path_buf(),
            experiment: experiment.to_string(),
            metadata_path: metadata.path.clone(),
            sample_sheet: parsed.sample_sheet.clone(),
            samples,
            contacts: group.contacts,
            requested: group.tasks,
        }
    }

    fn initial_status(&self, spec: &ProjectSpec) -> (ProjectStatus, Option<String>) {
        if spec.samples.is_empty() {
            return (
                ProjectStatus::Errored,
                Some("none of the project's samples were found in the run".to_string()),
            );
        }
        if self.cfg.readonly {
            return (ProjectStatus::Inactive, Some("readonly".to_string()));
        }
        let has_output = self.fs.is_dir(&spec.work_dir)
            && self
                .fs
                .read_dir(&spec.work_dir)
                .map(|entries| !entries.is_empty())
                .unwrap_or(true);
        if has_output {
            return (
                ProjectStatus::Inactive,
                Some("work directory already has output".to_string()),
            );
        }
        (ProjectStatus::Pending, None)
    }

    /// Record a transient failure. Returns the escalated reason once the
    /// unit has been failing for longer than `max_transient_wait`.
    fn defer(
        &mut self,
        path: &Path,
        reason: &str,
        now: SystemTime,
        summary: &mut RefreshSummary,
    ) -> Option<String> {
        let since = *self
            .deferred_since
            .entry(path.to_path_buf())
            .or_insert(now);
        let waited = now.duration_since(since).unwrap_or(Duration::ZERO);
        if waited >= self.cfg.max_transient_wait {
            self.deferred_since.remove(path);
            return Some(format!(
                "{reason} (still failing after {}s)",
                waited.as_secs()
            ));
        }
        if self.log_once.first(path, reason) {
            warn!(unit = %path.display(), reason, "transient read failure; retrying next cycle");
        }
        summary.deferred += 1;
        None
    }

    fn settle(&mut self, path: &Path) {
        if self.deferred_since.remove(path).is_some() {
            self.log_once.clear(path);
        }
    }

    fn mark_run_errored(&mut self, path: &Path, reason: String, summary: &mut RefreshSummary) {
        if self.log_once.first(path, &reason) {
            error!(run = %path.display(), reason = %reason, "run excluded");
        }
        let mut record = RunRecord::new(dir_name(path), path);
        record.status = EntityStatus::Errored;
        record.reason = Some(reason);
        self.registry.upsert_run(record);
        summary.errored += 1;
    }

    fn mark_alignment_errored(
        &mut self,
        run: &Arc<RunHandle>,
        path: &Path,
        index: usize,
        reason: String,
        summary: &mut RefreshSummary,
    ) {
        if self.log_once.first(path, &reason) {
            error!(alignment = %path.display(), reason = %reason, "alignment excluded");
        }
        let mut record = AlignmentRecord::new(path, index);
        record.status = EntityStatus::Errored;
        record.reason = Some(reason);
        self.registry.upsert_alignment(run, record);
        summary.errored += 1;
    }

    fn mark_alignment_errored_handle(
        &mut self,
        alignment: &AlignmentHandle,
        reason: String,
        summary: &mut RefreshSummary,
    ) {
        let path = alignment.path();
        if self.log_once.first(&path, &reason) {
            error!(alignment = %path.display(), reason = %reason, "alignment excluded");
        }
        alignment.update(|r| {
            r.status = EntityStatus::Errored;
            r.reason = Some(reason);
        });
        summary.errored += 1;
    }
}

/// Metadata rows belonging to one project, merged.
#[derive(Debug)]
struct ProjectGroup {
    name: String,
    samples: Vec<String>,
    contacts: Vec<Contact>,
    tasks: Vec<String>,
}

/// Group metadata rows by project in first-seen order. Contacts and tasks
/// are merged across rows without duplicates.
fn group_by_project(metadata: &ExperimentMetadata) -> Vec<ProjectGroup> {
    let mut groups: Vec<ProjectGroup> = Vec::new();
    for row in &metadata.rows {
        let idx = match groups.iter().position(|g| g.name == row.project) {
            Some(idx) => idx,
            None => {
                groups.push(ProjectGroup {
                    name: row.project.clone(),
                    samples: Vec::new(),
                    contacts: Vec::new(),
                    tasks: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[idx];
        if !group.samples.contains(&row.sample_name) {
            group.samples.push(row.sample_name.clone());
        }
        for contact in &row.contacts {
            if !group.contacts.contains(contact) {
                group.contacts.push(contact.clone());
            }
        }
        for task in &row.tasks {
            if !group.tasks.contains(task) {
                group.tasks.push(task.clone());
            }
        }
    }
    groups
}
