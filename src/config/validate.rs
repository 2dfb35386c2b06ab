// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, SeqdagError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SeqdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Run every startup check against a raw config.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_raw_config(cfg)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_threads(cfg)?;
    validate_timing(cfg)?;
    validate_task_options(cfg)?;
    validate_log_level(cfg)?;
    Ok(())
}

fn validate_threads(cfg: &RawConfigFile) -> Result<()> {
    if cfg.nthreads == 0 {
        return Err(SeqdagError::ConfigError(
            "nthreads must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.nthreads_per_project == 0 {
        return Err(SeqdagError::ConfigError(
            "nthreads_per_project must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_timing(cfg: &RawConfigFile) -> Result<()> {
    if cfg.poll == 0 {
        return Err(SeqdagError::ConfigError(
            "poll must be >= 1 second (got 0)".to_string(),
        ));
    }
    if let (Some(min), Some(max)) = (cfg.min_age, cfg.max_age) {
        if min > max {
            return Err(SeqdagError::ConfigError(format!(
                "min_age ({min}) must not exceed max_age ({max})"
            )));
        }
    }
    Ok(())
}

fn validate_task_options(cfg: &RawConfigFile) -> Result<()> {
    let opts = &cfg.task_options;

    let named = opts
        .task_defaults
        .iter()
        .chain(opts.task_null.iter())
        .chain(opts.always_explicit_tasks.iter());
    for name in named {
        if name.trim().is_empty() {
            return Err(SeqdagError::ConfigError(
                "[task_options] task lists must not contain empty names".to_string(),
            ));
        }
    }

    for (name, settings) in opts.tasks.iter() {
        if settings.delta == Some(0) {
            return Err(SeqdagError::ConfigError(format!(
                "[task_options.tasks.{name}].delta must be >= 1 (got 0)"
            )));
        }
    }
    Ok(())
}

fn validate_log_level(cfg: &RawConfigFile) -> Result<()> {
    if let Some(level) = &cfg.loglevel {
        if crate::logging::parse_level_str(level).is_none() {
            return Err(SeqdagError::ConfigError(format!(
                "invalid loglevel '{level}' (expected error, warn, info, debug or trace)"
            )));
        }
    }
    Ok(())
}
