// src/install.rs

//! The `install` action: lay out the directory tree and print a service unit.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::config::ConfigFile;

/// Directories `process` expects to exist.
pub fn required_dirs(cfg: &ConfigFile) -> Vec<PathBuf> {
    let mut dirs = vec![
        cfg.paths.runs.clone(),
        cfg.paths.experiments.clone(),
        cfg.paths.processed.clone(),
        cfg.paths.packaged.clone(),
    ];
    if let Some(parent) = cfg
        .save_report
        .path
        .as_deref()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
    {
        dirs.push(parent.to_path_buf());
    }
    dirs.dedup();
    dirs
}

/// Create the directories (or only list them when `dry_run`), then write a
/// systemd unit for `seqdag --action process` to `out`.
pub fn install(
    cfg: &ConfigFile,
    config_path: Option<&Path>,
    dry_run: bool,
    mut out: impl Write,
) -> Result<Vec<PathBuf>> {
    let dirs = required_dirs(cfg);
    for dir in &dirs {
        if dry_run {
            writeln!(out, "# would create {}", dir.display())?;
        } else {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            info!(dir = %dir.display(), "directory ready");
        }
    }
    writeln!(out)?;
    out.write_all(systemd_unit(config_path).as_bytes())?;
    out.flush()?;
    Ok(dirs)
}

pub fn systemd_unit(config_path: Option<&Path>) -> String {
    let exe = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "seqdag".to_string());
    let config = config_path
        .map(|p| {
            let abs = std::path::absolute(p).unwrap_or_else(|_| p.to_path_buf());
            format!(" --config {}", abs.display())
        })
        .unwrap_or_default();
    format!(
        "[Unit]\n\
         Description=seqdag sequencing run processor\n\
         After=network.target\n\
         \n\
         [Service]\n\
         ExecStart={exe} --action process{config}\n\
         ExecReload=/bin/kill -HUP $MAINPID\n\
         Restart=on-failure\n\
         KillSignal=SIGTERM\n\
         TimeoutStopSec=infinity\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n"
    )
}
