// src/engine/mod.rs

//! Scheduling layer for seqdag.
//!
//! This module ties together:
//! - the bounded worker pool that hands claimed projects to the
//!   [`TaskEngine`](crate::exec::TaskEngine)
//! - the processing loop: refresh, dispatch, report, sleep
//! - the signal listener feeding control events into that loop

pub mod pool;
pub mod processor;
pub mod signals;

pub use pool::{WorkerPool, WorkerReport};
pub use processor::{ControlEvent, ExitStatus, Processor};
pub use signals::spawn_signal_listener;
