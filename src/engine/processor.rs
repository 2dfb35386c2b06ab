// src/engine/processor.rs

//! The `process` loop.
//!
//! Each cycle refreshes the registry from disk, reaps finished workers,
//! hands runnable projects to idle slots and rewrites the status report.
//! Between cycles the loop sleeps for `poll`, or, in `wait` mode, until
//! every dispatched worker has returned. Control events (shutdown, reload,
//! verbosity) are handled at any point of the wait.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ConfigFile;
use crate::engine::pool::{WorkerPool, WorkerReport};
use crate::exec::TaskEngine;
use crate::logging::LogControl;
use crate::registry::Registry;
use crate::report;
use crate::watch::{Discovery, RefreshSummary};

/// Requests delivered to the processing loop from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Stop scheduling, let workers reach a task boundary, then exit.
    /// A second one while waiting stops immediately.
    Shutdown,
    /// Wait for workers, forget everything and rediscover from disk.
    Reload,
    /// Shift the log level; positive is more verbose.
    Verbosity(i32),
}

/// How the processing loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// No worker was running when shutdown was requested.
    Clean,
    /// Workers were running and were allowed to reach a task boundary.
    Interrupted,
    /// A second shutdown request aborted the wait.
    Forced,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::Interrupted => 2,
            ExitStatus::Forced => 130,
        }
    }
}

#[derive(Debug)]
pub struct Processor {
    cfg: Arc<ConfigFile>,
    discovery: Discovery,
    pool: WorkerPool,
    control_rx: mpsc::Receiver<ControlEvent>,
    shutdown_tx: watch::Sender<bool>,
    log: LogControl,
}

impl Processor {
    pub fn new(
        cfg: Arc<ConfigFile>,
        discovery: Discovery,
        engine: Arc<TaskEngine>,
        control_rx: mpsc::Receiver<ControlEvent>,
        log: LogControl,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = WorkerPool::new(cfg.nthreads, engine, shutdown_rx);
        Self {
            cfg,
            discovery,
            pool,
            control_rx,
            shutdown_tx,
            log,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.discovery.registry()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// One scheduling cycle. Returns what discovery saw and how many
    /// workers were started.
    pub fn cycle(&mut self) -> (RefreshSummary, usize) {
        for report in self.pool.reap() {
            log_report(&report);
        }
        let summary = self.discovery.refresh(SystemTime::now());
        let started = if self.cfg.readonly {
            0
        } else {
            let candidates = self.registry().runnable_projects();
            self.pool.dispatch(candidates)
        };
        if started > 0 || summary.new_projects > 0 {
            info!(
                new_projects = summary.new_projects,
                started,
                in_flight = self.pool.in_flight(),
                "cycle complete"
            );
        }
        self.save_report();
        (summary, started)
    }

    /// Run until shutdown.
    pub async fn run(mut self) -> ExitStatus {
        info!(
            nthreads = self.cfg.nthreads,
            poll_s = self.cfg.poll.as_secs(),
            wait = self.cfg.wait,
            readonly = self.cfg.readonly,
            "seqdag processing started"
        );

        loop {
            self.cycle();
            let deadline = Instant::now() + self.cfg.poll;

            loop {
                let busy = self.pool.in_flight() > 0;
                let blocked = self.cfg.wait && busy;
                tokio::select! {
                    event = self.control_rx.recv() => match event {
                        Some(ControlEvent::Shutdown) | None => return self.finish().await,
                        Some(ControlEvent::Reload) => {
                            self.reload().await;
                            break;
                        }
                        Some(ControlEvent::Verbosity(steps)) => {
                            let level = self.log.shift(steps);
                            info!(%level, "log level changed");
                        }
                    },
                    Some(report) = self.pool.join_next(), if busy => log_report(&report),
                    _ = tokio::time::sleep_until(deadline), if !blocked => break,
                }
            }
        }
    }

    /// Stop scheduling and wait for workers to reach a task boundary.
    ///
    /// Workers that already returned are reaped first and do not count as
    /// interrupted.
    pub async fn finish(&mut self) -> ExitStatus {
        for report in self.pool.reap() {
            log_report(&report);
        }
        let busy = self.pool.in_flight();
        self.shutdown_tx.send_replace(true);
        if busy > 0 {
            warn!(workers = busy, "shutdown requested; waiting for running tasks to finish");
        } else {
            info!("shutdown requested");
        }

        let mut control_open = true;
        let forced = loop {
            tokio::select! {
                report = self.pool.join_next() => match report {
                    Some(report) => log_report(&report),
                    None => break false,
                },
                event = self.control_rx.recv(), if control_open => match event {
                    Some(ControlEvent::Shutdown) => {
                        warn!("second shutdown request; stopping without waiting");
                        self.pool.abort_all().await;
                        break true;
                    }
                    Some(ControlEvent::Verbosity(steps)) => {
                        self.log.shift(steps);
                    }
                    Some(ControlEvent::Reload) => debug!("reload ignored during shutdown"),
                    None => control_open = false,
                },
            }
        };

        self.save_report();
        let status = if forced {
            ExitStatus::Forced
        } else if busy > 0 {
            ExitStatus::Interrupted
        } else {
            ExitStatus::Clean
        };
        info!(?status, "seqdag processing stopped");
        status
    }

    /// Wait for workers, then drop all state and rediscover.
    async fn reload(&mut self) {
        info!(workers = self.pool.in_flight(), "reload requested");
        self.shutdown_tx.send_replace(true);
        for report in self.pool.wait_all().await {
            log_report(&report);
        }
        self.shutdown_tx.send_replace(false);
        self.registry().clear();
        self.discovery.reset();
        info!("registry cleared; rediscovering");
    }

    fn save_report(&self) {
        let Some(path) = &self.cfg.save_report.path else {
            return;
        };
        let snapshot = self.registry().snapshot();
        if let Err(err) = report::save_atomic(&snapshot, path, self.cfg.save_report.max_width) {
            error!(path = %path.display(), error = %format!("{err:#}"), "failed to save status report");
        }
    }
}

fn log_report(report: &WorkerReport) {
    debug!(project = %report.project, result = ?report.result, "worker finished");
}
