// src/config/mod.rs

//! Configuration loading and validation for seqdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate startup invariants (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default};
pub use model::{
    ConfigFile, MailerSection, Paths, PathsSection, RawConfigFile, ReportSection,
    SaveReportSection, TaskOptions, TaskSettings, UploaderSection,
};
pub use validate::validate_config;
