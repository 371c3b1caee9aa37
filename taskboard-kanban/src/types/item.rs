//! Item types: Item, TaskList

use super::ids::{BoardId, ItemId, ListId};
use super::position::Position;
use crate::collection::OrderedCollection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A task as the ordering engine sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub parent_id: ListId,
    pub position: Position,
    /// Task fields, opaque to the engine
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Item {
    /// Create an item with an empty payload
    pub fn new(id: impl Into<ItemId>, parent_id: impl Into<ListId>, position: Position) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            position,
            payload: Map::new(),
        }
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// The task title, if the payload carries one
    pub fn title(&self) -> Option<&str> {
        self.payload.get("title").and_then(Value::as_str)
    }
}

/// A list on the board; owns the ordering of its items
#[derive(Debug, Clone)]
pub struct TaskList {
    pub id: ListId,
    pub board_id: BoardId,
    pub items: OrderedCollection,
}

impl TaskList {
    /// Create an empty list
    pub fn new(id: ListId, board_id: BoardId) -> Self {
        Self {
            id,
            board_id,
            items: OrderedCollection::new(),
        }
    }
}
