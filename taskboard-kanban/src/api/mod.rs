//! Task/List API boundary
//!
//! The server is the source of truth for placements. Every mutating call
//! answers with the task's resulting list and position so the engine can
//! reconcile its optimistic state against it.

mod http;
mod memory;

pub use http::{HttpApiConfig, HttpTaskApi};
pub use memory::InMemoryTaskApi;

use crate::error::ApiError;
use crate::types::{IntentId, Item, ItemId, ListId, Placement, Position};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A task as the server reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: ItemId,
    pub list_id: ListId,
    pub position: Position,
    /// Remaining task fields (title, description, ...)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TaskRecord {
    /// Where the server says the task is
    pub fn placement(&self) -> Placement {
        Placement::new(self.list_id.clone(), self.position)
    }

    /// Convert into the engine's item representation
    pub fn into_item(self) -> Item {
        Item {
            id: self.id,
            parent_id: self.list_id,
            position: self.position,
            payload: self.fields,
        }
    }
}

impl From<&Item> for TaskRecord {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            list_id: item.parent_id.clone(),
            position: item.position,
            fields: item.payload.clone(),
        }
    }
}

/// Body of a move call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    /// Same value on every retry of one gesture; lets the server replay
    pub intent_id: IntentId,
    pub target_list_id: ListId,
    pub target_index: usize,
    /// The list the client believed the task was in; a mismatch on the
    /// server means someone else moved it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_list_id: Option<ListId>,
}

/// Body of a create call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    /// Suggested position; the server may choose another
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            position: None,
            fields: Map::new(),
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

/// The Task/List API collaborator
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Tasks of a list in display order
    async fn list_tasks(&self, list_id: &ListId) -> Result<Vec<TaskRecord>, ApiError>;

    /// Create a task in a list
    async fn create_task(&self, list_id: &ListId, task: &NewTask) -> Result<TaskRecord, ApiError>;

    /// Move a task; the server serializes this against other writes to the
    /// same lists
    async fn move_task(
        &self,
        task_id: &ItemId,
        request: &MoveRequest,
    ) -> Result<TaskRecord, ApiError>;

    /// Update task fields; placement is unaffected
    async fn update_task(
        &self,
        task_id: &ItemId,
        fields: &Map<String, Value>,
    ) -> Result<TaskRecord, ApiError>;

    /// Delete a task
    async fn delete_task(&self, task_id: &ItemId) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_record_wire_format() {
        let record: TaskRecord = serde_json::from_value(json!({
            "id": "t1",
            "list_id": "l2",
            "position": 10,
            "title": "Write docs",
        }))
        .unwrap();
        assert_eq!(record.position, Position::new(10.0).unwrap());
        assert_eq!(record.fields["title"], "Write docs");

        let item = record.into_item();
        assert_eq!(item.parent_id, ListId::from("l2"));
        assert_eq!(item.title(), Some("Write docs"));
    }

    #[test]
    fn test_move_request_uses_camel_case() {
        let intent_id = IntentId::new();
        let request = MoveRequest {
            intent_id,
            target_list_id: "l2".into(),
            target_index: 3,
            source_list_id: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["targetListId"], "l2");
        assert_eq!(value["targetIndex"], 3);
        assert_eq!(value["intentId"], intent_id.to_string());
        assert!(value.get("sourceListId").is_none());
    }
}
