// src/logging.rs

//! Logging setup for `seqdag` using `tracing` + `tracing-subscriber`.
//!
//! The base level is resolved in this order:
//! 1. `SEQDAG_LOG` environment variable (e.g. "info", "debug")
//! 2. `loglevel` from the config file
//! 3. default to `warn`
//!
//! Each `-v` then moves one step towards `trace` and each `-q` one step
//! towards `off`. The filter is installed behind a reload handle so the level
//! can be shifted again at runtime (`SIGUSR1` / `SIGUSR2`).
//!
//! Logs are sent to STDERR so the `report` action can print to STDOUT.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Registry, fmt, reload};

/// Levels from quietest to loudest.
const LADDER: [LevelFilter; 6] = [
    LevelFilter::OFF,
    LevelFilter::ERROR,
    LevelFilter::WARN,
    LevelFilter::INFO,
    LevelFilter::DEBUG,
    LevelFilter::TRACE,
];

const DEFAULT_INDEX: usize = 2;

/// Handle for shifting the active log level after startup.
#[derive(Clone)]
pub struct LogControl {
    handle: Option<reload::Handle<LevelFilter, Registry>>,
    index: Arc<Mutex<usize>>,
}

impl std::fmt::Debug for LogControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogControl")
            .field("level", &self.level())
            .finish_non_exhaustive()
    }
}

impl LogControl {
    /// A control that tracks the level but has no subscriber attached.
    pub fn detached(level: LevelFilter) -> Self {
        Self {
            handle: None,
            index: Arc::new(Mutex::new(ladder_index(level))),
        }
    }

    /// Currently active level.
    pub fn level(&self) -> LevelFilter {
        LADDER[*self.index.lock()]
    }

    /// Move the level by `steps` (positive = more verbose), clamped.
    pub fn shift(&self, steps: i32) -> LevelFilter {
        let mut idx = self.index.lock();
        *idx = shifted_index(*idx, steps);
        let level = LADDER[*idx];
        if let Some(handle) = &self.handle {
            if let Err(err) = handle.modify(|filter| *filter = level) {
                eprintln!("seqdag: failed to change log level: {err}");
            }
        }
        level
    }
}

/// Initialise the global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(config_level: Option<&str>, verbose: u8, quiet: u8) -> Result<LogControl> {
    let base = std::env::var("SEQDAG_LOG")
        .ok()
        .and_then(|s| parse_level_str(&s))
        .or_else(|| config_level.and_then(parse_level_str))
        .unwrap_or(LevelFilter::WARN);
    let level = shift_level(base, i32::from(verbose) - i32::from(quiet));

    let (filter, handle) = reload::Layer::new(level);

    // Send logs to stderr; keep stdout free for report output.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(LogControl {
        handle: Some(handle),
        index: Arc::new(Mutex::new(ladder_index(level))),
    })
}

/// Shift a level by a number of verbosity steps, clamped to `off..=trace`.
pub fn shift_level(level: LevelFilter, steps: i32) -> LevelFilter {
    LADDER[shifted_index(ladder_index(level), steps)]
}

pub fn parse_level_str(s: &str) -> Option<LevelFilter> {
    match s.trim().to_lowercase().as_str() {
        "off" => Some(LevelFilter::OFF),
        "error" => Some(LevelFilter::ERROR),
        "warn" | "warning" => Some(LevelFilter::WARN),
        "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        "trace" => Some(LevelFilter::TRACE),
        _ => None,
    }
}

fn ladder_index(level: LevelFilter) -> usize {
    LADDER
        .iter()
        .position(|l| *l == level)
        .unwrap_or(DEFAULT_INDEX)
}

fn shifted_index(idx: usize, steps: i32) -> usize {
    let max = (LADDER.len() - 1) as i32;
    (idx as i32 + steps).clamp(0, max) as usize
}
