//! Move types: intents, pending moves and their outcomes

use super::ids::{IntentId, ItemId, ListId};
use super::position::Position;
use crate::error::{ApiError, FailureKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's request to relocate an item, as emitted by a drop.
///
/// `target_index` is the index the item should occupy in the target list once
/// it has been taken out of its source list. Indexes past the end mean "last".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveIntent {
    pub item_id: ItemId,
    pub source_list_id: ListId,
    pub target_list_id: ListId,
    pub target_index: usize,
}

impl MoveIntent {
    /// Move an item from one list to an index in another
    pub fn new(
        item_id: impl Into<ItemId>,
        source_list_id: impl Into<ListId>,
        target_list_id: impl Into<ListId>,
        target_index: usize,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            source_list_id: source_list_id.into(),
            target_list_id: target_list_id.into(),
            target_index,
        }
    }

    /// Reorder an item inside its own list
    pub fn within(
        item_id: impl Into<ItemId>,
        list_id: impl Into<ListId>,
        target_index: usize,
    ) -> Self {
        let list_id = list_id.into();
        Self::new(item_id, list_id.clone(), list_id, target_index)
    }

    /// Move an item to the end of another list
    pub fn to_end(
        item_id: impl Into<ItemId>,
        source_list_id: impl Into<ListId>,
        target_list_id: impl Into<ListId>,
    ) -> Self {
        Self::new(item_id, source_list_id, target_list_id, usize::MAX)
    }
}

/// Where an item sits: its list and its position in that list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub list_id: ListId,
    pub position: Position,
}

impl Placement {
    pub fn new(list_id: ListId, position: Position) -> Self {
        Self { list_id, position }
    }
}

/// Where an item's current move stands.
///
/// These are the live states only. A move ends as soon as it settles: how it
/// ended (confirmed, corrected, conflicted, rolled back or superseded) is
/// reported by its [`MoveOutcome`], and the item is `Idle` again unless a
/// newer move is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveState {
    /// No move in flight
    Idle,
    /// Applied locally, not yet sent
    OptimisticallyMoved,
    /// Sent, awaiting the server
    Confirming,
}

/// Bookkeeping for the one in-flight move of an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMove {
    pub intent_id: IntentId,
    pub item_id: ItemId,
    pub optimistic_parent_id: ListId,
    pub optimistic_position: Position,
    /// Placement to restore if this move fails: where the item was before
    /// this move, or where the server turned out to hold it once an older
    /// move of the item was answered
    pub prior: Placement,
    /// Where the server is expected to hold the item when this move is sent;
    /// `None` when an older call left that uncertain
    pub server_placement: Option<Placement>,
    pub target_index: usize,
    pub issued_at: DateTime<Utc>,
    pub state: MoveState,
}

impl PendingMove {
    /// The optimistic placement this move applied
    pub fn optimistic(&self) -> Placement {
        Placement::new(self.optimistic_parent_id.clone(), self.optimistic_position)
    }
}

/// User-visible notice that another actor moved an item elsewhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictNotice {
    pub item_id: ItemId,
    /// Where the user put the item
    pub attempted_list_id: ListId,
    /// Where the server says the item is; `None` when the server did not say
    pub actual: Option<Placement>,
    pub message: String,
}

/// Why a server response was dropped without touching local state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// A newer move of the same item replaced this one
    Superseded,
    /// This intent was already reconciled or rolled back
    AlreadySettled,
    /// The item was deleted while the move was in flight
    Cancelled,
    /// Nothing known about this intent
    Unknown,
}

/// Result of one move cycle, as reported to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MoveOutcome {
    /// Server agreed with the optimistic placement
    Confirmed {
        intent_id: IntentId,
        item_id: ItemId,
        placement: Placement,
    },
    /// Server kept the list but assigned a different position
    Corrected {
        intent_id: IntentId,
        item_id: ItemId,
        optimistic: Position,
        placement: Placement,
        /// Whether the item changed its index in the list
        order_changed: bool,
    },
    /// Another actor moved the item; server placement kept
    Conflict {
        intent_id: IntentId,
        notice: ConflictNotice,
    },
    /// Move failed; item reverted to where it was before this move
    RolledBack {
        intent_id: IntentId,
        item_id: ItemId,
        /// `None` when the prior list is no longer on the board
        restored: Option<Placement>,
        kind: FailureKind,
        error: ApiError,
    },
    /// Response could not be attributed to the current move of the item
    Ignored {
        intent_id: IntentId,
        item_id: ItemId,
        reason: IgnoreReason,
    },
}

impl MoveOutcome {
    pub fn intent_id(&self) -> IntentId {
        match self {
            Self::Confirmed { intent_id, .. }
            | Self::Corrected { intent_id, .. }
            | Self::Conflict { intent_id, .. }
            | Self::RolledBack { intent_id, .. }
            | Self::Ignored { intent_id, .. } => *intent_id,
        }
    }

    pub fn item_id(&self) -> &ItemId {
        match self {
            Self::Confirmed { item_id, .. }
            | Self::Corrected { item_id, .. }
            | Self::RolledBack { item_id, .. }
            | Self::Ignored { item_id, .. } => item_id,
            Self::Conflict { notice, .. } => &notice.item_id,
        }
    }

    /// The move landed where the user put it (possibly at a corrected position)
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Corrected { .. })
    }
}
