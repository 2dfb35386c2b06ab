// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod install;
pub mod logging;
pub mod registry;
pub mod report;
pub mod services;
pub mod task;
pub mod types;
pub mod watch;

use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::{Action, CliArgs};
use crate::config::ConfigFile;
use crate::engine::{ControlEvent, ExitStatus, Processor, spawn_signal_listener};
use crate::exec::TaskEngine;
use crate::fs::RealFileSystem;
use crate::logging::LogControl;
use crate::registry::Registry;
use crate::services::Services;
use crate::task::TaskCatalog;
use crate::watch::{Discovery, IlluminaParser};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - the task catalog (built-ins plus custom definitions)
/// - discovery over the real filesystem
/// - the worker pool and processing loop
/// - signal handling
pub async fn run(args: CliArgs, cfg: ConfigFile, log: LogControl) -> Result<ExitStatus> {
    let cfg = if args.dry_run && args.action != Action::Install {
        cfg.into_readonly()
    } else {
        cfg
    };
    let cfg = Arc::new(cfg);

    match args.action {
        Action::Install => {
            install::install(&cfg, args.config.as_deref(), args.dry_run, std::io::stdout())?;
            Ok(ExitStatus::Clean)
        }
        Action::Report => {
            let mut discovery = build_discovery(Arc::clone(&cfg))?;
            discovery.refresh(SystemTime::now());
            let snapshot = discovery.registry().snapshot();
            report::print_report(&snapshot, cfg.report.max_width, std::io::stdout())?;
            Ok(ExitStatus::Clean)
        }
        Action::Process => process(cfg, log).await,
    }
}

async fn process(cfg: Arc<ConfigFile>, log: LogControl) -> Result<ExitStatus> {
    let services = Services::from_config(&cfg);
    let catalog = build_catalog(&cfg, &services);
    let engine = Arc::new(TaskEngine::new(
        Arc::clone(&cfg),
        Arc::new(catalog),
        Arc::clone(&services.mailer),
    ));
    let discovery = build_discovery(Arc::clone(&cfg))?;

    let (control_tx, control_rx) = mpsc::channel::<ControlEvent>(16);
    let _signals = spawn_signal_listener(control_tx)?;

    let processor = Processor::new(cfg, discovery, engine, control_rx, log);
    Ok(processor.run().await)
}

/// Built-in tasks plus whatever the custom source provides.
pub fn build_catalog(cfg: &ConfigFile, services: &Services) -> TaskCatalog {
    let mut catalog = TaskCatalog::with_builtins(services);
    let options = &cfg.task_options;
    if let Some(source) = &options.custom_tasks_source {
        let source = cfg.paths.root.join(source);
        let report = catalog.load_custom(&source);
        info!(
            source = %source.display(),
            loaded = report.loaded.len(),
            rejected = report.rejected.len(),
            "custom tasks loaded"
        );
    }
    for name in options.task_defaults.iter().chain(&options.task_null) {
        if !catalog.contains(name) {
            warn!(task = %name, "configured default task is not registered; projects using it will error");
        }
    }
    catalog
}

/// Discovery over the real filesystem with a fresh registry.
pub fn build_discovery(cfg: Arc<ConfigFile>) -> Result<Discovery> {
    let parser = IlluminaParser::new()?;
    Ok(Discovery::new(
        cfg,
        Arc::new(RealFileSystem),
        Arc::new(parser),
        Arc::new(Registry::new()),
    ))
}
