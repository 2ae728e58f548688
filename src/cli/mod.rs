//! CLI module for tasky - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the
//! due-task scheduler, one-shot checks and channel smoke tests.

pub mod commands;

pub use commands::Cli;
