// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::dag::GraphError;

#[derive(Error, Debug)]
pub enum SeqdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Cycle detected in task graph: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<GraphError> for SeqdagError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::UnknownTask(name) => SeqdagError::UnknownTask(name),
            GraphError::Cycle(name) => SeqdagError::DagCycle(name),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SeqdagError>;
