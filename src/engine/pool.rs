// src/engine/pool.rs

//! Bounded worker pool.
//!
//! At most `capacity` projects are worked on at once. A worker holds one
//! semaphore permit and the project's claim for its whole lifetime, so the
//! same project can never be picked up twice, whatever the cycle timing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info};

use crate::exec::{StepResult, TaskEngine};
use crate::registry::ProjectHandle;
use crate::types::ProjectStatus;

/// What a worker reports when it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub project: String,
    pub result: StepResult,
}

#[derive(Debug)]
pub struct WorkerPool {
    capacity: usize,
    slots: Arc<Semaphore>,
    workers: JoinSet<WorkerReport>,
    projects: HashMap<Id, Arc<ProjectHandle>>,
    engine: Arc<TaskEngine>,
    shutdown: watch::Receiver<bool>,
}

impl WorkerPool {
    pub fn new(capacity: usize, engine: Arc<TaskEngine>, shutdown: watch::Receiver<bool>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            workers: JoinSet::new(),
            projects: HashMap::new(),
            engine,
            shutdown,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Workers spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.workers.len()
    }

    /// Hand runnable projects to idle slots, in the given order.
    ///
    /// Projects that are claimed or no longer runnable are skipped. Returns
    /// the number of workers started.
    pub fn dispatch(&mut self, candidates: impl IntoIterator<Item = Arc<ProjectHandle>>) -> usize {
        if *self.shutdown.borrow() {
            return 0;
        }
        let mut started = 0;
        for project in candidates {
            if !project.is_runnable() {
                continue;
            }
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                debug!(capacity = self.capacity, "all worker slots busy");
                break;
            };
            let Some(claim) = project.try_claim() else {
                continue;
            };

            let engine = Arc::clone(&self.engine);
            let shutdown = self.shutdown.clone();
            let name = project.spec().work_dir_name.clone();
            info!(project = %name, "dispatching project to worker");

            let handle = self.workers.spawn(async move {
                let _permit = permit;
                let result = engine.run_project(&claim, &shutdown).await;
                WorkerReport {
                    project: name,
                    result,
                }
            });
            self.projects.insert(handle.id(), project);
            started += 1;
        }
        started
    }

    /// Collect every worker that has already returned.
    pub fn reap(&mut self) -> Vec<WorkerReport> {
        let mut reports = Vec::new();
        while let Some(joined) = self.workers.try_join_next_with_id() {
            if let Some(report) = self.settle(joined) {
                reports.push(report);
            }
        }
        reports
    }

    /// Wait for the next worker to return. `None` when no worker is running.
    pub async fn join_next(&mut self) -> Option<WorkerReport> {
        while let Some(joined) = self.workers.join_next_with_id().await {
            if let Some(report) = self.settle(joined) {
                return Some(report);
            }
        }
        None
    }

    /// Wait for every worker to return.
    pub async fn wait_all(&mut self) -> Vec<WorkerReport> {
        let mut reports = Vec::new();
        while let Some(report) = self.join_next().await {
            reports.push(report);
        }
        reports
    }

    /// Stop every worker at its next await point.
    pub async fn abort_all(&mut self) {
        self.workers.abort_all();
        while let Some(joined) = self.workers.join_next_with_id().await {
            self.settle(joined);
        }
    }

    fn settle(
        &mut self,
        joined: Result<(Id, WorkerReport), tokio::task::JoinError>,
    ) -> Option<WorkerReport> {
        match joined {
            Ok((id, report)) => {
                self.projects.remove(&id);
                debug!(project = %report.project, result = ?report.result, "worker returned");
                Some(report)
            }
            Err(err) => {
                let project = self.projects.remove(&err.id());
                if err.is_panic() {
                    if let Some(project) = project {
                        error!(project = %project.spec().work_dir_name, "worker panicked; project failed");
                        project.with_state(|state| {
                            state.status = ProjectStatus::Failed;
                            state.reason = Some("worker panicked".to_string());
                        });
                    }
                } else if let Some(project) = project {
                    debug!(project = %project.spec().work_dir_name, "worker aborted");
                }
                None
            }
        }
    }
}
