//! Command-line interface for agent-studio.
//!
//! Provides commands for local evaluation, control-plane runs, task listing
//! and result inspection.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
