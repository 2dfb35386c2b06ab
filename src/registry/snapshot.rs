// src/registry/snapshot.rs

//! Read-only copies of the registry for the report generator.

use chrono::{DateTime, Local};

use crate::registry::entities::{AlignmentRecord, ProjectSpec, RunRecord};
use crate::types::{ProjectStatus, TaskStatus};

#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub runs: Vec<RunSnapshot>,
}

#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub record: RunRecord,
    pub alignments: Vec<AlignmentSnapshot>,
}

#[derive(Debug, Clone)]
pub struct AlignmentSnapshot {
    pub record: AlignmentRecord,
    pub projects: Vec<ProjectSnapshot>,
}

#[derive(Debug, Clone)]
pub struct ProjectSnapshot {
    pub spec: ProjectSpec,
    pub status: ProjectStatus,
    pub reason: Option<String>,
    pub tasks: Vec<TaskSnapshot>,
    pub discovered: DateTime<Local>,
    pub updated: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub name: String,
    pub status: TaskStatus,
    pub implicit: bool,
}

impl ProjectSnapshot {
    /// `name:status` pairs in plan order.
    pub fn task_summary(&self) -> String {
        self.tasks
            .iter()
            .map(|t| format!("{}:{}", t.name, t.status))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl RegistrySnapshot {
    pub fn projects(&self) -> impl Iterator<Item = &ProjectSnapshot> {
        self.runs
            .iter()
            .flat_map(|r| r.alignments.iter())
            .flat_map(|a| a.projects.iter())
    }

    pub fn count_projects(&self, status: ProjectStatus) -> usize {
        self.projects().filter(|p| p.status == status).count()
    }
}
