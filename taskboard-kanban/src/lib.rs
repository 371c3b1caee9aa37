//! Task ordering and optimistic move reconciliation for kanban boards
//!
//! This crate keeps the client-side view of a board's lists: which tasks are
//! in each list and in what order. Moves are applied locally the moment a
//! drag ends, sent to the Task/List API, and reconciled with the server's
//! answer when it arrives.
//!
//! ## Overview
//!
//! - **Dense positions** - Each task has a numeric position; a new one is
//!   always found between two neighbours without touching them, and a list
//!   renumbers itself when a gap gets too narrow
//! - **Optimistic moves** - The UI never waits for the network
//! - **Server authority** - The server's placement always wins; failures roll
//!   back, conflicts are surfaced, late answers of superseded moves are ignored
//! - **Single writer** - A [`BoardSession`] serializes all mutations on one task
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskboard_kanban::{HttpApiConfig, HttpTaskApi, MoveConfig, MoveCoordinator, MoveIntent};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let api = Arc::new(HttpTaskApi::new(&HttpApiConfig::default())?);
//! let mut coordinator = MoveCoordinator::new("board", api, MoveConfig::default())?;
//! coordinator.fetch_list(&"todo".into()).await?;
//! coordinator.fetch_list(&"done".into()).await?;
//!
//! let outcome = coordinator
//!     .move_item(MoveIntent::to_end("task-1", "todo", "done"))
//!     .await?;
//! println!("{}", serde_json::to_string(&outcome)?);
//! # Ok(())
//! # }
//! ```

mod allocator;
pub mod api;
mod collection;
mod config;
mod coordinator;
mod error;
mod reconcile;
mod session;
mod store;
pub mod types;

pub use allocator::PositionAllocator;
pub use api::{
    HttpApiConfig, HttpTaskApi, InMemoryTaskApi, MoveRequest, NewTask, TaskApi, TaskRecord,
};
pub use collection::{Claim, Insertion, OrderedCollection};
pub use config::{MoveConfig, DEFAULT_MIN_GAP, DEFAULT_STRIDE};
pub use coordinator::{Confirmation, DispatchedMove, MoveCoordinator};
pub use error::{ApiError, FailureKind, KanbanError, Result};
pub use reconcile::{ReconciliationPolicy, Resolution, ServerView};
pub use session::{BoardSession, SessionHandle};
pub use store::{BoardChange, BoardEvent, BoardStore, SubscriptionId};

// Re-export commonly used types
pub use types::{
    BoardId, ConflictNotice, IgnoreReason, IntentId, Item, ItemId, ListId, MoveIntent,
    MoveOutcome, MoveState, PendingMove, Placement, Position, TaskList,
};
