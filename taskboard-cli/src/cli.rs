//! Command-line definition for `taskboard`

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Taskboard - drive a kanban board's ordering engine from the terminal.
///
/// Configuration is read from `taskboard.toml` in the current directory (or
/// the file given with `--config`), then overridden by `TASKBOARD_`
/// environment variables. Nested keys use a double underscore, for example
/// `TASKBOARD_API__BASE_URL` or `TASKBOARD_MOVES__CONFIRM_TIMEOUT_MS`.
#[derive(Parser, Debug)]
#[command(name = "taskboard")]
#[command(version)]
#[command(about = "Move and list tasks on a kanban board")]
pub struct Cli {
    /// Enable debug output to stderr
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Configuration file to use instead of ./taskboard.toml
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Print the tasks of a list in display order
    List {
        /// List id
        list: String,
    },

    /// Move a task and print how the server settled it
    Move {
        /// Task id
        task: String,
        /// List the task is in now
        #[arg(long, value_name = "LIST")]
        from: String,
        /// List to move the task into
        #[arg(long, value_name = "LIST")]
        to: String,
        /// Index in the target list; the end of the list when omitted
        #[arg(long)]
        index: Option<usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_move_with_index() {
        let cli = Cli::try_parse_from([
            "taskboard", "move", "T1", "--from", "todo", "--to", "done", "--index", "2",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Commands::Move {
                task: "T1".into(),
                from: "todo".into(),
                to: "done".into(),
                index: Some(2),
            }
        );
        assert!(!cli.debug);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["taskboard", "list", "todo", "--debug", "-c", "board.toml"])
                .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("board.toml")));
        assert_eq!(cli.command, Commands::List { list: "todo".into() });
    }

    #[test]
    fn test_move_requires_both_lists() {
        assert!(Cli::try_parse_from(["taskboard", "move", "T1", "--to", "done"]).is_err());
    }
}
