// src/engine/signals.rs

//! Translate process signals into [`ControlEvent`]s.
//!
//! | signal           | event                |
//! |------------------|----------------------|
//! | SIGINT, SIGTERM  | `Shutdown`           |
//! | SIGHUP           | `Reload`             |
//! | SIGUSR1          | `Verbosity(+1)`      |
//! | SIGUSR2          | `Verbosity(-1)`      |

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::processor::ControlEvent;

/// Install the listeners and forward events to `tx` until it closes.
#[cfg(unix)]
pub fn spawn_signal_listener(tx: mpsc::Sender<ControlEvent>) -> Result<JoinHandle<()>> {
    use anyhow::Context;
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let mut sigusr1 = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;
    let mut sigusr2 = signal(SignalKind::user_defined2()).context("installing SIGUSR2 handler")?;

    Ok(tokio::spawn(async move {
        loop {
            let (name, event) = tokio::select! {
                _ = sigint.recv() => ("SIGINT", ControlEvent::Shutdown),
                _ = sigterm.recv() => ("SIGTERM", ControlEvent::Shutdown),
                _ = sighup.recv() => ("SIGHUP", ControlEvent::Reload),
                _ = sigusr1.recv() => ("SIGUSR1", ControlEvent::Verbosity(1)),
                _ = sigusr2.recv() => ("SIGUSR2", ControlEvent::Verbosity(-1)),
            };
            debug!(signal = name, ?event, "received signal");
            if tx.send(event).await.is_err() {
                break;
            }
        }
    }))
}

/// Only Ctrl-C is available off unix.
#[cfg(not(unix))]
pub fn spawn_signal_listener(tx: mpsc::Sender<ControlEvent>) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {err}");
                return;
            }
            debug!("received Ctrl+C");
            if tx.send(ControlEvent::Shutdown).await.is_err() {
                break;
            }
        }
    }))
}
