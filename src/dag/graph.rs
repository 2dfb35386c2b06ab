// src/dag/graph.rs

use std::collections::HashMap;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Direct dependencies: tasks that must succeed before this one can run.
    deps: Vec<String>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<String>,
    /// Declared order key, used to break ties between independent tasks.
    order: i32,
}

/// Simple in-memory graph of every registered task, keyed by task name.
///
/// Dependencies naming unregistered tasks are kept as-is; the resolver
/// reports them as unknown when a plan actually needs them.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    nodes: HashMap<String, DagNode>,
}

impl DagGraph {
    /// Build a graph from `(name, dependencies, order)` triples.
    pub fn from_nodes<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>, i32)>,
    {
        let mut map: HashMap<String, DagNode> = HashMap::new();

        // First pass: create nodes with their dependency lists.
        for (name, deps, order) in nodes {
            map.insert(
                name,
                DagNode {
                    deps,
                    dependents: Vec::new(),
                    order,
                },
            );
        }

        // Second pass: populate dependents based on deps.
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        for task_name in names {
            let deps = map
                .get(&task_name)
                .map(|n| n.deps.clone())
                .unwrap_or_default();

            for dep in deps {
                if let Some(dep_node) = map.get_mut(&dep) {
                    dep_node.dependents.push(task_name.clone());
                }
            }
        }

        Self { nodes: map }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task (tasks that list this one as a dependency).
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Declared order key; unknown tasks sort last.
    pub fn order_of(&self, name: &str) -> i32 {
        self.nodes.get(name).map(|n| n.order).unwrap_or(i32::MAX)
    }
}
