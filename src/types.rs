// src/types.rs

//! Status enums shared by the registry, the engine and the report.

use std::fmt;
use std::str::FromStr;

/// State of a single task within a project's plan.
///
/// `Pending -> Running -> {Success, Failed, Skipped}`. A task interrupted by
/// shutdown goes back from `Running` to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            "skipped" => Ok(TaskStatus::Skipped),
            other => Err(format!("invalid task status: {other}")),
        }
    }
}

/// Overall status of a project.
///
/// `Errored` means the project could not be planned or built (bad metadata,
/// unknown task, dependency cycle) and is never scheduled. `Inactive` marks a
/// project that is tracked but deliberately left alone (readonly mode, or
/// output already present from an earlier process).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectStatus {
    Pending,
    Running,
    Success,
    Failed,
    Errored,
    Inactive,
}

impl ProjectStatus {
    /// True once nothing more will ever run for this project.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            ProjectStatus::Success
                | ProjectStatus::Failed
                | ProjectStatus::Errored
                | ProjectStatus::Inactive
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Pending => "pending",
            ProjectStatus::Running => "running",
            ProjectStatus::Success => "success",
            ProjectStatus::Failed => "failed",
            ProjectStatus::Errored => "errored",
            ProjectStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ProjectStatus::Pending),
            "running" => Ok(ProjectStatus::Running),
            "success" => Ok(ProjectStatus::Success),
            "failed" => Ok(ProjectStatus::Failed),
            "errored" => Ok(ProjectStatus::Errored),
            "inactive" => Ok(ProjectStatus::Inactive),
            other => Err(format!("invalid project status: {other}")),
        }
    }
}

/// Discovery state of a run or an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityStatus {
    /// Seen, but the instrument (or demultiplexer) has not finished yet.
    Waiting,
    /// Complete and eligible for downstream work.
    Ready,
    /// Parsing failed for good; excluded from scheduling.
    Errored,
}

impl EntityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityStatus::Waiting => "waiting",
            EntityStatus::Ready => "ready",
            EntityStatus::Errored => "errored",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "waiting" => Ok(EntityStatus::Waiting),
            "ready" => Ok(EntityStatus::Ready),
            "errored" => Ok(EntityStatus::Errored),
            other => Err(format!("invalid entity status: {other}")),
        }
    }
}

/// Named values a task hands to the tasks after it (e.g. `url` from upload).
pub type TaskOutput = std::collections::BTreeMap<String, String>;
