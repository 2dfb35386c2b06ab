// src/watch/mod.rs

//! Run discovery.
//!
//! This module is responsible for:
//! - Parsing instrument output directories into typed records.
//! - Applying the age filters and transient-failure deferral.
//! - Turning completed alignments plus experiment metadata into projects.
//!
//! It does **not** run tasks; it only fills the registry.

pub mod discovery;
pub mod log_once;
pub mod parser;
pub mod path_utils;

pub use discovery::{Discovery, RefreshSummary};
pub use log_once::LogOnce;
pub use parser::{
    ExperimentMetadata, IlluminaParser, MetadataRow, ParseError, ParsedAlignment, ParsedRun,
    RunParser, SampleSheet, parse_sample_sheet,
};
pub use path_utils::{slugify, work_dir_name};
