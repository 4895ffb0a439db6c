//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod config;
pub mod credits;

use crate::output::OutputFormat;
use tally_core::Database;

/// Shared context for all commands
pub struct Context {
    pub db: Database,
    pub format: OutputFormat,
    pub quiet: bool,
    pub scope: String,
}
