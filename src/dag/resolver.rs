// src/dag/resolver.rs

//! Expands a project's requested task names into an ordered plan.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use thiserror::Error;

use crate::config::TaskOptions;
use crate::dag::DagGraph;

/// Why a plan could not be built. Reported once per project, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("dependency cycle involving task '{0}'")]
    Cycle(String),
}

/// One task in a resolved plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    pub name: String,
    /// Present only to satisfy another task's dependency.
    pub implicit: bool,
}

/// Resolve a project's plan.
///
/// 1. Working set: `requested` (or `task_null` when nothing was requested),
///    followed by `task_defaults`, first occurrence wins.
/// 2. Every task's declared dependencies are added, transitively.
/// 3. Stable topological sort: among tasks whose dependencies are all placed,
///    the one with the lowest declared order key goes first, then the one
///    appearing earliest in the working sequence.
///
/// A task is implicit unless it was requested, is listed in
/// `always_explicit_tasks`, or is part of `task_null`.
pub fn resolve(
    graph: &DagGraph,
    options: &TaskOptions,
    requested: &[String],
) -> Result<Vec<PlannedTask>, GraphError> {
    let working = working_set(options, requested);
    let names = dependency_closure(graph, &working)?;
    check_acyclic(graph, &names)?;
    let ordered = stable_order(graph, &names)?;

    let explicit: HashSet<&str> = requested
        .iter()
        .chain(options.always_explicit_tasks.iter())
        .chain(options.task_null.iter())
        .map(|s| s.as_str())
        .collect();

    Ok(ordered
        .into_iter()
        .map(|name| {
            let implicit = !explicit.contains(name.as_str());
            PlannedTask { name, implicit }
        })
        .collect())
}

fn working_set(options: &TaskOptions, requested: &[String]) -> Vec<String> {
    let base: &[String] = if requested.is_empty() {
        &options.task_null
    } else {
        requested
    };

    let mut seen = HashSet::new();
    base.iter()
        .chain(options.task_defaults.iter())
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

/// Working names in order, then their dependencies in discovery order.
fn dependency_closure(graph: &DagGraph, working: &[String]) -> Result<Vec<String>, GraphError> {
    let mut seq: Vec<String> = Vec::with_capacity(working.len());
    let mut seen: HashSet<String> = HashSet::new();

    for name in working {
        if !graph.contains(name) {
            return Err(GraphError::UnknownTask(name.clone()));
        }
        if seen.insert(name.clone()) {
            seq.push(name.clone());
        }
    }

    let mut idx = 0;
    while idx < seq.len() {
        let deps = graph.dependencies_of(&seq[idx]).to_vec();
        for dep in deps {
            if !graph.contains(&dep) {
                return Err(GraphError::UnknownTask(dep));
            }
            if seen.insert(dep.clone()) {
                seq.push(dep);
            }
        }
        idx += 1;
    }

    Ok(seq)
}

fn check_acyclic(graph: &DagGraph, names: &[String]) -> Result<(), GraphError> {
    // Edge direction: dep -> task.
    let mut g: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in names {
        g.add_node(name.as_str());
    }
    for name in names {
        for dep in graph.dependencies_of(name) {
            g.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&g, None) {
        Ok(_) => Ok(()),
        Err(cycle) => Err(GraphError::Cycle(cycle.node_id().to_string())),
    }
}

fn stable_order(graph: &DagGraph, names: &[String]) -> Result<Vec<String>, GraphError> {
    let index: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();

    let mut indegree: Vec<usize> = names
        .iter()
        .map(|n| graph.dependencies_of(n).len())
        .collect();

    let mut ready: BTreeSet<(i32, usize)> = names
        .iter()
        .enumerate()
        .filter(|(i, _)| indegree[*i] == 0)
        .map(|(i, n)| (graph.order_of(n), i))
        .collect();

    let mut ordered = Vec::with_capacity(names.len());
    while let Some((_, i)) = ready.pop_first() {
        let name = &names[i];
        ordered.push(name.clone());
        for dependent in graph.dependents_of(name) {
            if let Some(&j) = index.get(dependent.as_str()) {
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    ready.insert((graph.order_of(dependent), j));
                }
            }
        }
    }

    if ordered.len() != names.len() {
        let stuck = names
            .iter()
            .find(|n| !ordered.contains(*n))
            .cloned()
            .unwrap_or_default();
        return Err(GraphError::Cycle(stuck));
    }
    Ok(ordered)
}
