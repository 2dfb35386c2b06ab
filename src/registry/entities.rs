// src/registry/entities.rs

//! Run, alignment and project records and the handles that guard them.
//!
//! Every handle carries its own lock. Writers only ever hold one entity's
//! lock at a time, so a status change on one project never waits on discovery
//! touching another run.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};

use crate::dag::TaskPlan;
use crate::types::{EntityStatus, ProjectStatus};

/// One sequencer output directory.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    pub path: PathBuf,
    pub flowcell: Option<String>,
    /// The instrument has finished writing.
    pub complete: bool,
    pub status: EntityStatus,
    pub reason: Option<String>,
    pub discovered: DateTime<Local>,
    pub updated: DateTime<Local>,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let now = Local::now();
        Self {
            run_id: run_id.into(),
            path: path.into(),
            flowcell: None,
            complete: false,
            status: EntityStatus::Waiting,
            reason: None,
            discovered: now,
            updated: now,
        }
    }
}

/// One demultiplexing pass within a run.
#[derive(Debug, Clone)]
pub struct AlignmentRecord {
    pub path: PathBuf,
    /// Position among the run's alignments, in path order.
    pub index: usize,
    pub experiment: Option<String>,
    pub checkpoint: Option<u32>,
    pub complete: bool,
    pub error: bool,
    pub status: EntityStatus,
    pub reason: Option<String>,
    pub sample_count: usize,
    /// Projects have been derived from the experiment metadata.
    pub projects_built: bool,
    pub discovered: DateTime<Local>,
    pub updated: DateTime<Local>,
}

impl AlignmentRecord {
    pub fn new(path: impl Into<PathBuf>, index: usize) -> Self {
        let now = Local::now();
        Self {
            path: path.into(),
            index,
            experiment: None,
            checkpoint: None,
            complete: false,
            error: false,
            status: EntityStatus::Waiting,
            reason: None,
            sample_count: 0,
            projects_built: false,
            discovered: now,
            updated: now,
        }
    }
}

/// A person to notify about a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

/// One sample with the read files found for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub name: String,
    /// Sorted R1, R2 (per lane).
    pub fastq: Vec<PathBuf>,
}

/// Immutable inputs of a project, fixed when it is created.
#[derive(Debug, Clone)]
pub struct ProjectSpec {
    pub name: String,
    pub work_dir_name: String,
    pub work_dir: PathBuf,
    pub run_id: String,
    pub run_path: PathBuf,
    pub alignment_path: PathBuf,
    pub experiment: String,
    pub metadata_path: PathBuf,
    pub sample_sheet: Option<PathBuf>,
    pub samples: Vec<SampleRecord>,
    pub contacts: Vec<Contact>,
    /// Task names from the metadata, in first-seen order.
    pub requested: Vec<String>,
}

/// Mutable part of a project. Only the worker holding the claim writes it.
#[derive(Debug, Clone)]
pub struct ProjectState {
    pub status: ProjectStatus,
    pub plan: Option<TaskPlan>,
    pub reason: Option<String>,
    pub discovered: DateTime<Local>,
    pub updated: DateTime<Local>,
}

#[derive(Debug)]
pub struct RunHandle {
    record: RwLock<RunRecord>,
    alignments: RwLock<BTreeMap<PathBuf, Arc<AlignmentHandle>>>,
}

impl RunHandle {
    pub(crate) fn new(record: RunRecord) -> Self {
        Self {
            record: RwLock::new(record),
            alignments: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn record(&self) -> RunRecord {
        self.record.read().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut RunRecord)) {
        let mut record = self.record.write();
        f(&mut record);
        record.updated = Local::now();
    }

    pub(crate) fn replace(&self, mut next: RunRecord) {
        let mut record = self.record.write();
        next.discovered = record.discovered;
        next.updated = Local::now();
        *record = next;
    }

    pub fn alignment(&self, path: &std::path::Path) -> Option<Arc<AlignmentHandle>> {
        self.alignments.read().get(path).cloned()
    }

    pub fn alignments(&self) -> Vec<Arc<AlignmentHandle>> {
        self.alignments.read().values().cloned().collect()
    }

    pub(crate) fn insert_alignment(&self, record: AlignmentRecord) -> Arc<AlignmentHandle> {
        let mut map = self.alignments.write();
        if let Some(existing) = map.get(&record.path) {
            existing.replace(record);
            return Arc::clone(existing);
        }
        let handle = Arc::new(AlignmentHandle::new(record));
        map.insert(handle.path(), Arc::clone(&handle));
        handle
    }
}

#[derive(Debug)]
pub struct AlignmentHandle {
    record: RwLock<AlignmentRecord>,
    projects: RwLock<BTreeMap<String, Arc<ProjectHandle>>>,
}

impl AlignmentHandle {
    fn new(record: AlignmentRecord) -> Self {
        Self {
            record: RwLock::new(record),
            projects: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.record.read().path.clone()
    }

    pub fn record(&self) -> AlignmentRecord {
        self.record.read().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut AlignmentRecord)) {
        let mut record = self.record.write();
        f(&mut record);
        record.updated = Local::now();
    }

    fn replace(&self, mut next: AlignmentRecord) {
        let mut record = self.record.write();
        next.discovered = record.discovered;
        next.projects_built = next.projects_built || record.projects_built;
        next.updated = Local::now();
        *record = next;
    }

    pub fn projects(&self) -> Vec<Arc<ProjectHandle>> {
        self.projects.read().values().cloned().collect()
    }

    pub(crate) fn insert_project(&self, project: ProjectHandle) -> Arc<ProjectHandle> {
        let mut map = self.projects.write();
        let key = project.spec().work_dir_name.clone();
        Arc::clone(map.entry(key).or_insert_with(|| Arc::new(project)))
    }
}

/// A project plus its claim flag and mutable state.
#[derive(Debug)]
pub struct ProjectHandle {
    spec: ProjectSpec,
    claimed: AtomicBool,
    state: Mutex<ProjectState>,
}

impl ProjectHandle {
    pub fn new(spec: ProjectSpec, status: ProjectStatus, reason: Option<String>) -> Self {
        let now = Local::now();
        Self {
            spec,
            claimed: AtomicBool::new(false),
            state: Mutex::new(ProjectState {
                status,
                plan: None,
                reason,
                discovered: now,
                updated: now,
            }),
        }
    }

    pub fn spec(&self) -> &ProjectSpec {
        &self.spec
    }

    pub fn status(&self) -> ProjectStatus {
        self.state.lock().status
    }

    pub fn state(&self) -> ProjectState {
        self.state.lock().clone()
    }

    /// Run `f` under this project's lock and bump its update time.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ProjectState) -> R) -> R {
        let mut state = self.state.lock();
        let out = f(&mut state);
        state.updated = Local::now();
        out
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Unclaimed and with work left to do.
    pub fn is_runnable(&self) -> bool {
        !self.is_claimed() && self.status() == ProjectStatus::Pending
    }

    /// Atomically claim the project for one worker.
    ///
    /// Returns `None` if another worker already holds it. The claim is
    /// released when the guard drops.
    pub fn try_claim(self: &Arc<Self>) -> Option<ClaimGuard> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ClaimGuard {
                project: Arc::clone(self),
            })
    }
}

/// Exclusive right to advance one project's plan.
#[derive(Debug)]
pub struct ClaimGuard {
    project: Arc<ProjectHandle>,
}

impl ClaimGuard {
    pub fn project(&self) -> &Arc<ProjectHandle> {
        &self.project
    }
}

impl Deref for ClaimGuard {
    type Target = ProjectHandle;

    fn deref(&self) -> &Self::Target {
        &self.project
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.project.claimed.store(false, Ordering::Release);
    }
}
