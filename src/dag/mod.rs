// src/dag/mod.rs

//! Task graph and plan resolution.
//!
//! - [`graph`] holds the dependency graph of every registered task.
//! - [`resolver`] turns a project's requested tasks into an ordered plan.
//! - [`plan`] tracks per-task status over that plan for one project.

pub mod graph;
pub mod plan;
pub mod resolver;

pub use graph::DagGraph;
pub use plan::{PlanEntry, PlanLayout, TaskPlan};
pub use resolver::{GraphError, PlannedTask, resolve};
