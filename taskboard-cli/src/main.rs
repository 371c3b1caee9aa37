//! Taskboard CLI - list and move tasks through the optimistic move engine.
//!
//! Commands:
//! - `taskboard list <LIST>`: Print the tasks of a list as JSON
//! - `taskboard move <TASK> --from <LIST> --to <LIST> [--index N]`: Move a
//!   task and print the outcome as JSON
//!
//! Exit codes:
//! - 0: Success (move confirmed or corrected by the server)
//! - 1: Error, conflict or rolled-back move

use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskboard_cli::{execute, Cli, CliConfig, EXIT_FAILED};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing with appropriate level
    let filter = if cli.debug {
        EnvFilter::new("taskboard_kanban=debug,taskboard_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_FAILED
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = CliConfig::load(cli.config.as_deref())?;
    let mut stdout = std::io::stdout().lock();
    execute(cli.command, &config, &mut stdout).await
}
