// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`engine`] advances one project's plan one task at a time.
//! - [`gate`] is the interruptible deadline-and-interval wait used by
//!   externally gated tasks.
//! - [`command`] runs external processes with their output captured to the
//!   task log.

pub mod command;
pub mod engine;
pub mod gate;

pub use engine::{DEFAULT_RETRY_DELAY, StepResult, TaskEngine};
pub use gate::{CompletionSignal, GateResult, PathSignal, wait_for_signal};
