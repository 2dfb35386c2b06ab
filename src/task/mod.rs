// src/task/mod.rs

//! The task capability contract and its implementations.
//!
//! A task is a stateless template: a name, a static dependency list, an
//! order key for tie-breaking, and an `execute` that turns a read-only
//! [`TaskContext`] into a [`TaskOutcome`]. Execution state lives in the
//! project's plan, never on the task.
//!
//! - [`builtin`] holds the tasks shipped with the daemon.
//! - [`custom`] loads shell-command tasks from TOML definitions.
//! - [`catalog`] is the name -> task table the resolver consults.

pub mod builtin;
pub mod catalog;
pub mod context;
pub mod custom;
pub mod fastq;

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

use crate::exec::gate::CompletionSignal;
use crate::types::TaskOutput;

pub use catalog::{CatalogError, CustomLoadReport, TaskCatalog};
pub use context::{TaskContext, TaskLog};

/// Exit code a custom command uses to ask for a retry (`EX_TEMPFAIL`).
pub const EXIT_RETRYABLE: i32 = 75;

/// Tagged result of one task execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success(TaskOutput),
    /// May succeed if run again (network hiccup, busy resource).
    Retryable(String),
    /// Will not succeed by retrying.
    Fatal(String),
}

impl TaskOutcome {
    pub fn success() -> Self {
        TaskOutcome::Success(TaskOutput::new())
    }

    /// Fold an `anyhow` result into an outcome, treating errors as fatal.
    pub fn from_result(result: anyhow::Result<TaskOutput>) -> Self {
        match result {
            Ok(output) => TaskOutcome::Success(output),
            Err(err) => TaskOutcome::Fatal(format!("{err:#}")),
        }
    }
}

pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = TaskOutcome> + Send + 'a>>;

/// Static declaration shared by every task implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub dependencies: Vec<String>,
    /// Lower runs first among tasks whose dependencies are satisfied.
    pub order: i32,
}

impl TaskSpec {
    pub fn new(name: &str, order: i32, dependencies: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            order,
        }
    }
}

pub trait Task: Send + Sync + Debug {
    fn spec(&self) -> &TaskSpec;

    fn name(&self) -> &str {
        &self.spec().name
    }

    fn dependencies(&self) -> &[String] {
        &self.spec().dependencies
    }

    fn order(&self) -> i32 {
        self.spec().order
    }

    /// External signal the task waits on after `execute` succeeds.
    ///
    /// `None` for ordinary tasks.
    fn completion_signal(&self, _ctx: &TaskContext) -> Option<Box<dyn CompletionSignal>> {
        None
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a>;
}
