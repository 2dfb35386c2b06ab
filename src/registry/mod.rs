// src/registry/mod.rs

//! In-memory registry of everything discovery has seen.
//!
//! Run path -> run -> alignment path -> alignment -> work dir name -> project.
//! No I/O happens here. The registry-wide map lock is only taken to add or
//! look up runs; entity fields are guarded by each entity's own lock.

pub mod entities;
pub mod snapshot;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

pub use entities::{
    AlignmentHandle, AlignmentRecord, ClaimGuard, Contact, ProjectHandle, ProjectSpec,
    ProjectState, RunHandle, RunRecord, SampleRecord,
};
pub use snapshot::{
    AlignmentSnapshot, ProjectSnapshot, RegistrySnapshot, RunSnapshot, TaskSnapshot,
};

use crate::types::ProjectStatus;

#[derive(Debug, Default)]
pub struct Registry {
    runs: RwLock<BTreeMap<PathBuf, Arc<RunHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a run, or refresh an existing run's record in place.
    ///
    /// The first discovery timestamp is kept across updates.
    pub fn upsert_run(&self, record: RunRecord) -> Arc<RunHandle> {
        if let Some(existing) = self.run(&record.path) {
            existing.replace(record);
            return existing;
        }
        let mut runs = self.runs.write();
        let handle = runs
            .entry(record.path.clone())
            .or_insert_with(|| Arc::new(RunHandle::new(record)));
        Arc::clone(handle)
    }

    /// Insert an alignment under `run`, or refresh its record in place.
    pub fn upsert_alignment(&self, run: &RunHandle, record: AlignmentRecord) -> Arc<AlignmentHandle> {
        run.insert_alignment(record)
    }

    /// Add a project under `alignment`.
    ///
    /// Projects are immutable once created: if one with the same work dir
    /// name exists, it is returned unchanged.
    pub fn upsert_project(
        &self,
        alignment: &AlignmentHandle,
        spec: ProjectSpec,
        status: ProjectStatus,
        reason: Option<String>,
    ) -> Arc<ProjectHandle> {
        alignment.insert_project(ProjectHandle::new(spec, status, reason))
    }

    pub fn run(&self, path: &Path) -> Option<Arc<RunHandle>> {
        self.runs.read().get(path).cloned()
    }

    pub fn runs(&self) -> Vec<Arc<RunHandle>> {
        self.runs.read().values().cloned().collect()
    }

    pub fn projects(&self) -> Vec<Arc<ProjectHandle>> {
        self.runs()
            .iter()
            .flat_map(|r| r.alignments())
            .flat_map(|a| a.projects())
            .collect()
    }

    /// Projects a worker could pick up right now, in path order.
    pub fn runnable_projects(&self) -> Vec<Arc<ProjectHandle>> {
        self.projects()
            .into_iter()
            .filter(|p| p.is_runnable())
            .collect()
    }

    /// Drop everything; used when reloading.
    pub fn clear(&self) {
        self.runs.write().clear();
    }

    /// Consistent read-only copy of every entity.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let runs = self
            .runs()
            .iter()
            .map(|run| RunSnapshot {
                record: run.record(),
                alignments: run
                    .alignments()
                    .iter()
                    .map(|aln| AlignmentSnapshot {
                        record: aln.record(),
                        projects: aln.projects().iter().map(|p| project_snapshot(p)).collect(),
                    })
                    .collect(),
            })
            .collect();
        RegistrySnapshot { runs }
    }
}

fn project_snapshot(project: &ProjectHandle) -> ProjectSnapshot {
    let state = project.state();
    let tasks = state
        .plan
        .as_ref()
        .map(|plan| {
            plan.entries()
                .iter()
                .map(|e| TaskSnapshot {
                    name: e.name.clone(),
                    status: e.status,
                    implicit: e.implicit,
                })
                .collect()
        })
        .unwrap_or_default();
    ProjectSnapshot {
        spec: project.spec().clone(),
        status: state.status,
        reason: state.reason,
        tasks,
        discovered: state.discovered,
        updated: state.updated,
    }
}
