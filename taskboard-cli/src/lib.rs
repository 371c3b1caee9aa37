//! Taskboard CLI library: argument parsing, configuration and commands.

pub mod cli;
pub mod commands;
pub mod config;

pub use cli::{Cli, Commands};
pub use commands::{execute, EXIT_FAILED, EXIT_OK};
pub use config::CliConfig;
