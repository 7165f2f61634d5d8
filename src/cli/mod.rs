//! Command-line interface for bench-infer.
//!
//! Provides the `run`, `status` and `clean` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
