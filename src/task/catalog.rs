// src/task/catalog.rs

//! Name -> task table consulted by the resolver and the engine.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::dag::DagGraph;
use crate::services::Services;
use crate::task::builtin::{self, BUILTIN_NAMES};
use crate::task::custom::{CommandTask, CustomDefinition, definition_files, read_definitions};
use crate::task::Task;

/// Why a task could not be registered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("invalid task name '{0}' (use letters, digits, '_' and '-')")]
    InvalidName(String),

    #[error("task '{0}' is already registered")]
    Duplicate(String),

    #[error("task '{0}' depends on itself")]
    SelfDependency(String),

    #[error("task '{0}' has no command")]
    EmptyCommand(String),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("task '{0}' is part of a dependency cycle")]
    Cycle(String),

    #[error("task '{task}' is malformed: {reason}")]
    Malformed { task: String, reason: String },
}

/// Outcome of loading custom task definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomLoadReport {
    pub loaded: Vec<String>,
    pub rejected: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    tasks: BTreeMap<String, Arc<dyn Task>>,
    graph: DagGraph,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding every built-in task.
    pub fn with_builtins(services: &Services) -> Self {
        let mut catalog = Self::new();
        for task in builtin::all(services) {
            if let Err(err) = catalog.register(task) {
                error!(error = %err, "failed to register built-in task");
            }
        }
        catalog
    }

    /// Add one task after checking its declaration.
    ///
    /// Dependencies are not checked here: they may name tasks registered
    /// later. [`TaskCatalog::load_custom`] checks them for whole batches.
    pub fn register(&mut self, task: Arc<dyn Task>) -> Result<(), CatalogError> {
        let name = task.name().to_string();
        if !valid_name(&name) {
            return Err(CatalogError::InvalidName(name));
        }
        if self.tasks.contains_key(&name) {
            return Err(CatalogError::Duplicate(name));
        }
        if task.dependencies().iter().any(|d| d == &name) {
            return Err(CatalogError::SelfDependency(name));
        }
        debug!(task = %name, deps = ?task.dependencies(), order = task.order(), "registered task");
        self.tasks.insert(name, task);
        self.rebuild_graph();
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(|s| s.as_str()).collect()
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    /// Load, validate and register custom tasks from a file or directory.
    ///
    /// Non-conforming definitions are logged and left out; loading never
    /// fails as a whole.
    pub fn load_custom(&mut self, source: &Path) -> CustomLoadReport {
        let mut report = CustomLoadReport::default();
        let files = match definition_files(source) {
            Ok(files) => files,
            Err(err) => {
                error!(source = %source.display(), error = %format!("{err:#}"), "cannot read custom task source");
                report
                    .rejected
                    .push((source.display().to_string(), format!("{err:#}")));
                return report;
            }
        };

        let mut definitions: Vec<CustomDefinition> = Vec::new();
        for file in files {
            match read_definitions(&file) {
                Ok(defs) => definitions.extend(defs),
                Err(err) => {
                    error!(file = %file.display(), error = %format!("{err:#}"), "skipping custom task file");
                    report
                        .rejected
                        .push((file.display().to_string(), format!("{err:#}")));
                }
            }
        }

        let mut candidates: Vec<CommandTask> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for def in definitions {
            match self.check_definition(&def, &seen) {
                Ok(task) => {
                    seen.insert(def.name.clone());
                    candidates.push(task);
                }
                Err(err) => reject(&mut report, &def.name, err),
            }
        }

        for (name, err) in self.prune_unresolvable(&mut candidates) {
            reject(&mut report, &name, err);
        }

        for task in candidates {
            let name = task.name().to_string();
            let source = task.source().display().to_string();
            match self.register(Arc::new(task)) {
                Ok(()) => {
                    info!(task = %name, source = %source, "loaded custom task");
                    report.loaded.push(name);
                }
                Err(err) => reject(&mut report, &name, err),
            }
        }
        report
    }

    fn check_definition(
        &self,
        def: &CustomDefinition,
        seen: &HashSet<String>,
    ) -> Result<CommandTask, CatalogError> {
        let name = def.name.clone();
        if !valid_name(&name) {
            return Err(CatalogError::InvalidName(name));
        }
        if BUILTIN_NAMES.contains(&name.as_str()) || self.contains(&name) || seen.contains(&name) {
            return Err(CatalogError::Duplicate(name));
        }
        let raw = def
            .task
            .clone()
            .map_err(|reason| CatalogError::Malformed {
                task: name.clone(),
                reason,
            })?;
        if raw.cmd.trim().is_empty() {
            return Err(CatalogError::EmptyCommand(name));
        }
        if raw.dependencies.iter().any(|d| d == &name) {
            return Err(CatalogError::SelfDependency(name));
        }
        Ok(CommandTask::new(&name, raw, &def.source))
    }

    /// Drop candidates whose dependencies cannot be satisfied or that sit on
    /// a dependency cycle. Repeats until stable, since dropping one task can
    /// strand another that depended on it.
    fn prune_unresolvable(&self, candidates: &mut Vec<CommandTask>) -> Vec<(String, CatalogError)> {
        let mut dropped = Vec::new();

        loop {
            let known: HashSet<String> = self
                .tasks
                .keys()
                .cloned()
                .chain(candidates.iter().map(|c| c.name().to_string()))
                .collect();
            let before = candidates.len();
            candidates.retain(|c| {
                match c.dependencies().iter().find(|d| !known.contains(*d)) {
                    Some(dep) => {
                        dropped.push((
                            c.name().to_string(),
                            CatalogError::UnknownDependency {
                                task: c.name().to_string(),
                                dependency: dep.clone(),
                            },
                        ));
                        false
                    }
                    None => true,
                }
            });
            if candidates.len() == before {
                break;
            }
        }

        let cyclic = cyclic_tasks(candidates);
        candidates.retain(|c| {
            if cyclic.contains(c.name()) {
                dropped.push((c.name().to_string(), CatalogError::Cycle(c.name().to_string())));
                false
            } else {
                true
            }
        });

        // Anything that depended on a cyclic task is now stranded too.
        if !cyclic.is_empty() {
            dropped.extend(self.prune_unresolvable(candidates));
        }
        dropped
    }

    fn rebuild_graph(&mut self) {
        self.graph = DagGraph::from_nodes(self.tasks.values().map(|t| {
            (
                t.name().to_string(),
                t.dependencies().to_vec(),
                t.order(),
            )
        }));
    }
}

fn reject(report: &mut CustomLoadReport, name: &str, err: CatalogError) {
    error!(task = %name, error = %err, "rejected custom task");
    report.rejected.push((name.to_string(), err.to_string()));
}

/// Names of candidates inside a strongly connected component of size > 1.
/// Built-ins never depend on custom tasks, so only candidates can cycle.
fn cyclic_tasks(candidates: &[CommandTask]) -> BTreeSet<String> {
    let mut g: DiGraphMap<&str, ()> = DiGraphMap::new();
    for c in candidates {
        g.add_node(c.name());
        for dep in c.dependencies() {
            g.add_edge(dep.as_str(), c.name(), ());
        }
    }
    tarjan_scc(&g)
        .into_iter()
        .filter(|scc| scc.len() > 1)
        .flatten()
        .filter(|n| candidates.iter().any(|c| c.name() == *n))
        .map(str::to_string)
        .collect()
}

/// `[A-Za-z0-9_-]+`
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
