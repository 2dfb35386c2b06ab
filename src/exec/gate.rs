// src/exec/gate.rs

//! Deadline-and-interval wait for externally gated tasks.

use std::fmt::Debug;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

/// Default seconds a gated task waits for its signal (one week).
pub const DEFAULT_GATE_TIMEOUT: u64 = 604_800;

/// Default seconds between signal polls.
pub const DEFAULT_GATE_DELTA: u64 = 5;

/// Something outside the process that eventually says "done".
pub trait CompletionSignal: Send + Sync + Debug {
    /// Check once. Must not block.
    fn poll(&self) -> bool;

    fn describe(&self) -> String;
}

/// Observed once a path exists.
#[derive(Debug, Clone)]
pub struct PathSignal {
    path: PathBuf,
}

impl PathSignal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CompletionSignal for PathSignal {
    fn poll(&self) -> bool {
        self.path.exists()
    }

    fn describe(&self) -> String {
        format!("{} to appear", self.path.display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateResult {
    Observed { polls: u32 },
    TimedOut { polls: u32 },
    Cancelled { polls: u32 },
}

/// Poll `signal` every `delta` until it is observed or `timeout` elapses.
///
/// The signal is checked at t=0 and then after each interval; the last
/// interval is shortened so a final check lands exactly on the deadline.
/// A `true` on `cancel` ends the wait at once, not only at the next check.
pub async fn wait_for_signal(
    signal: &dyn CompletionSignal,
    timeout: Duration,
    delta: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> GateResult {
    let deadline = Instant::now() + timeout;
    let mut polls = 0u32;
    let mut cancel_open = true;

    loop {
        if *cancel.borrow() {
            return GateResult::Cancelled { polls };
        }

        polls += 1;
        if signal.poll() {
            return GateResult::Observed { polls };
        }

        let now = Instant::now();
        if now >= deadline {
            return GateResult::TimedOut { polls };
        }
        let wake = now + delta.min(deadline - now);
        trace!(polls, signal = %signal.describe(), "gate not yet open");

        // Sleep until `wake`, waking early only for an actual cancellation.
        loop {
            if !cancel_open {
                sleep_until(wake).await;
                break;
            }
            tokio::select! {
                _ = sleep_until(wake) => break,
                changed = cancel.changed() => match changed {
                    Ok(()) if *cancel.borrow() => return GateResult::Cancelled { polls },
                    Ok(()) => {}
                    Err(_) => cancel_open = false,
                },
            }
        }
    }
}
