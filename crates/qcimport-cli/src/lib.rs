//! qcimport CLI - loads QC error-check definitions into REDCap.
//!
//! This crate wires the core orchestrator to a local mirror of the rules
//! bucket and a rate-limited REDCap project.

pub mod commands;
pub mod config;
pub mod report;
pub mod storage;

pub use config::{Command, Config, ErrorChecksArgs, ImportCommand, OutputFormat};
pub use storage::LocalCheckSource;
