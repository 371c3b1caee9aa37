//! Core types for the ordering engine

mod ids;
mod item;
mod moves;
mod position;

// Re-export all types
pub use ids::{BoardId, IntentId, ItemId, ListId};
pub use item::{Item, TaskList};
pub use moves::{
    ConflictNotice, IgnoreReason, MoveIntent, MoveOutcome, MoveState, PendingMove, Placement,
};
pub use position::Position;
