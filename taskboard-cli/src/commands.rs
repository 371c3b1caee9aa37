//! Command execution against the HTTP Task/List API

use crate::cli::Commands;
use crate::config::CliConfig;
use std::io::Write;
use std::sync::Arc;
use taskboard_kanban::{HttpTaskApi, ListId, MoveCoordinator, MoveIntent};
use tracing::debug;

/// Exit code for a completed command whose move landed
pub const EXIT_OK: i32 = 0;
/// Exit code for a conflict, rollback or rejected move
pub const EXIT_FAILED: i32 = 1;

/// Run one command, writing JSON to `out`, and return the exit code
pub async fn execute(
    command: Commands,
    config: &CliConfig,
    out: &mut impl Write,
) -> anyhow::Result<i32> {
    let api = Arc::new(HttpTaskApi::new(&config.api)?);
    let mut coordinator =
        MoveCoordinator::new(config.board_id.as_str(), api, config.moves.clone())?;

    match command {
        Commands::List { list } => {
            let list_id = ListId::from(list);
            let count = coordinator.fetch_list(&list_id).await?;
            debug!(list = %list_id, count, "list loaded");
            let items = coordinator.store().get_snapshot(&list_id)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&items)?)?;
            Ok(EXIT_OK)
        }
        Commands::Move {
            task,
            from,
            to,
            index,
        } => {
            let from = ListId::from(from);
            let to = ListId::from(to);
            coordinator.fetch_list(&from).await?;
            if to != from {
                coordinator.fetch_list(&to).await?;
            }

            let intent = MoveIntent::new(task, from, to, index.unwrap_or(usize::MAX));
            match coordinator.move_item(intent).await {
                Ok(outcome) => {
                    writeln!(out, "{}", serde_json::to_string_pretty(&outcome)?)?;
                    Ok(if outcome.is_success() {
                        EXIT_OK
                    } else {
                        EXIT_FAILED
                    })
                }
                Err(e) if e.is_validation() => {
                    eprintln!("Error: {e}");
                    Ok(EXIT_FAILED)
                }
                Err(e) => Err(anyhow::Error::new(e).context("move failed")),
            }
        }
    }
}
