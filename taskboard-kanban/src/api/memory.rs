//! In-process authoritative server.
//!
//! Serializes every write behind one async mutex, so two moves into the same
//! list can never interleave their position allocations. Used by tests and the
//! CLI's offline mode, and to simulate other actors and failures.

use super::{MoveRequest, NewTask, TaskApi, TaskRecord};
use crate::allocator::PositionAllocator;
use crate::collection::OrderedCollection;
use crate::error::ApiError;
use crate::types::{IntentId, Item, ItemId, ListId, Placement};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

#[derive(Debug, Default)]
struct ServerState {
    lists: IndexMap<ListId, OrderedCollection>,
    /// Answers already given, by intent, for idempotent replay
    applied: HashMap<IntentId, TaskRecord>,
    next_task: u64,
}

impl ServerState {
    fn locate(&self, task_id: &ItemId) -> Option<(&ListId, &Item)> {
        self.lists
            .iter()
            .find_map(|(list_id, items)| items.get(task_id).map(|item| (list_id, item)))
    }

    fn record(&self, task_id: &ItemId) -> Option<TaskRecord> {
        self.locate(task_id).map(|(_, item)| TaskRecord::from(item))
    }

    fn list_mut(&mut self, list_id: &ListId) -> Result<&mut OrderedCollection, ApiError> {
        self.lists
            .get_mut(list_id)
            .ok_or_else(|| ApiError::not_found("list", list_id))
    }
}

/// A [`TaskApi`] backed by process memory
#[derive(Debug)]
pub struct InMemoryTaskApi {
    state: Mutex<ServerState>,
    alloc: PositionAllocator,
    move_failures: StdMutex<VecDeque<ApiError>>,
    latency: StdMutex<Duration>,
    move_calls: AtomicUsize,
}

impl Default for InMemoryTaskApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskApi {
    /// Create an empty server with the default allocator
    pub fn new() -> Self {
        Self::with_allocator(PositionAllocator::default())
    }

    /// Create an empty server that allocates with `alloc`
    pub fn with_allocator(alloc: PositionAllocator) -> Self {
        Self {
            state: Mutex::new(ServerState::default()),
            alloc,
            move_failures: StdMutex::new(VecDeque::new()),
            latency: StdMutex::new(Duration::ZERO),
            move_calls: AtomicUsize::new(0),
        }
    }

    // =========================================================================
    // Setup and out-of-band changes
    // =========================================================================

    /// Create a list, or do nothing if it exists
    pub async fn add_list(&self, list_id: impl Into<ListId>) {
        let mut state = self.state.lock().await;
        state.lists.entry(list_id.into()).or_default();
    }

    /// Create a list holding tasks with the given ids, in order, at
    /// canonical positions
    pub async fn seed(
        &self,
        list_id: impl Into<ListId>,
        task_ids: &[&str],
    ) -> Vec<TaskRecord> {
        let list_id = list_id.into();
        let items = task_ids.iter().enumerate().map(|(index, id)| {
            let mut payload = Map::new();
            payload.insert("title".to_string(), Value::String(format!("Task {id}")));
            Item::new(*id, list_id.clone(), self.alloc.canonical(index)).with_payload(payload)
        });
        let collection = OrderedCollection::from_items(items, &self.alloc);
        let records = collection.iter().map(TaskRecord::from).collect();

        let mut state = self.state.lock().await;
        state.lists.insert(list_id, collection);
        records
    }

    /// Delete a list and everything in it
    pub async fn remove_list(&self, list_id: &ListId) -> bool {
        self.state.lock().await.lists.shift_remove(list_id).is_some()
    }

    /// Another actor puts a task at an exact placement
    pub async fn place(
        &self,
        task_id: &ItemId,
        placement: Placement,
    ) -> Result<TaskRecord, ApiError> {
        let mut state = self.state.lock().await;
        let (from, item) = state
            .locate(task_id)
            .map(|(list_id, item)| (list_id.clone(), item.clone()))
            .ok_or_else(|| ApiError::not_found("task", task_id))?;
        state.list_mut(&placement.list_id)?;
        state.list_mut(&from)?.remove(task_id).ok();

        let item = Item {
            parent_id: placement.list_id.clone(),
            position: placement.position,
            ..item
        };
        let target = state.list_mut(&placement.list_id)?;
        target
            .claim(item, &self.alloc)
            .map_err(|e| ApiError::Rejected {
                status: 422,
                message: e.to_string(),
            })?;
        debug!(task = %task_id, list = %placement.list_id, "task placed out of band");
        state
            .record(task_id)
            .ok_or_else(|| ApiError::not_found("task", task_id))
    }

    /// Another actor moves a task to an index, without an intent id
    pub async fn move_out_of_band(
        &self,
        task_id: &ItemId,
        list_id: &ListId,
        index: usize,
    ) -> Result<TaskRecord, ApiError> {
        let mut state = self.state.lock().await;
        self.apply_move(&mut state, task_id, list_id, index)
    }

    /// Current tasks of a list, in order
    pub async fn snapshot(&self, list_id: &ListId) -> Vec<TaskRecord> {
        let state = self.state.lock().await;
        state
            .lists
            .get(list_id)
            .map(|items| items.iter().map(TaskRecord::from).collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Fail the next move call with `error`; queued failures are consumed in
    /// order, one per call
    pub fn fail_next_move(&self, error: ApiError) {
        if let Ok(mut failures) = self.move_failures.lock() {
            failures.push_back(error);
        }
    }

    /// Delay every call by `latency` before it takes effect
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut current) = self.latency.lock() {
            *current = latency;
        }
    }

    /// Number of move calls received, including failed and replayed ones
    pub fn move_calls(&self) -> usize {
        self.move_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let latency = self.latency.lock().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn next_move_failure(&self) -> Option<ApiError> {
        self.move_failures.lock().ok()?.pop_front()
    }

    fn apply_move(
        &self,
        state: &mut ServerState,
        task_id: &ItemId,
        target: &ListId,
        index: usize,
    ) -> Result<TaskRecord, ApiError> {
        let from = state
            .locate(task_id)
            .map(|(list_id, _)| list_id.clone())
            .ok_or_else(|| ApiError::not_found("task", task_id))?;
        state.list_mut(target)?;

        let mut item = state
            .list_mut(&from)?
            .remove(task_id)
            .map_err(|_| ApiError::not_found("task", task_id))?;
        item.parent_id = target.clone();
        state
            .list_mut(target)?
            .insert_at(item, index, &self.alloc)
            .map_err(|e| ApiError::Server {
                status: 500,
                message: e.to_string(),
            })?;
        state
            .record(task_id)
            .ok_or_else(|| ApiError::not_found("task", task_id))
    }
}

#[async_trait]
impl TaskApi for InMemoryTaskApi {
    async fn list_tasks(&self, list_id: &ListId) -> Result<Vec<TaskRecord>, ApiError> {
        self.delay().await;
        let state = self.state.lock().await;
        let items = state
            .lists
            .get(list_id)
            .ok_or_else(|| ApiError::not_found("list", list_id))?;
        Ok(items.iter().map(TaskRecord::from).collect())
    }

    async fn create_task(&self, list_id: &ListId, task: &NewTask) -> Result<TaskRecord, ApiError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.next_task += 1;
        let id = ItemId::from_string(format!("task-{}", state.next_task));

        let mut payload = task.fields.clone();
        payload.insert("title".to_string(), Value::String(task.title.clone()));
        let list = state.list_mut(list_id)?;
        let item = Item::new(id.clone(), list_id.clone(), self.alloc.canonical(0))
            .with_payload(payload);
        let placed = match task.position {
            Some(position) => list.claim(Item { position, ..item }, &self.alloc).map(|_| ()),
            None => list.insert_at(item, usize::MAX, &self.alloc).map(|_| ()),
        };
        placed.map_err(|e| ApiError::Rejected {
            status: 422,
            message: e.to_string(),
        })?;
        state.record(&id).ok_or_else(|| ApiError::not_found("task", &id))
    }

    #[instrument(skip(self, request), fields(intent = %request.intent_id))]
    async fn move_task(
        &self,
        task_id: &ItemId,
        request: &MoveRequest,
    ) -> Result<TaskRecord, ApiError> {
        self.move_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if let Some(error) = self.next_move_failure() {
            debug!(%error, "injected move failure");
            return Err(error);
        }

        let mut state = self.state.lock().await;
        if let Some(answer) = state.applied.get(&request.intent_id) {
            debug!("replaying answer for known intent");
            return Ok(answer.clone());
        }

        let current = state
            .locate(task_id)
            .map(|(list_id, _)| list_id.clone())
            .ok_or_else(|| ApiError::not_found("task", task_id))?;
        if let Some(expected) = &request.source_list_id {
            if expected != &current {
                return Err(ApiError::conflict(
                    format!("task {task_id} is in list {current}, not {expected}"),
                    state.record(task_id),
                ));
            }
        }

        let record = self.apply_move(
            &mut state,
            task_id,
            &request.target_list_id,
            request.target_index,
        )?;
        state.applied.insert(request.intent_id, record.clone());
        Ok(record)
    }

    async fn update_task(
        &self,
        task_id: &ItemId,
        fields: &Map<String, Value>,
    ) -> Result<TaskRecord, ApiError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        let (list_id, item) = state
            .locate(task_id)
            .map(|(list_id, item)| (list_id.clone(), item.clone()))
            .ok_or_else(|| ApiError::not_found("task", task_id))?;
        let mut payload = item.payload;
        payload.extend(fields.clone());
        state
            .list_mut(&list_id)?
            .set_payload(task_id, payload)
            .map_err(|_| ApiError::not_found("task", task_id))?;
        state
            .record(task_id)
            .ok_or_else(|| ApiError::not_found("task", task_id))
    }

    async fn delete_task(&self, task_id: &ItemId) -> Result<(), ApiError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        let list_id = state
            .locate(task_id)
            .map(|(list_id, _)| list_id.clone())
            .ok_or_else(|| ApiError::not_found("task", task_id))?;
        state
            .list_mut(&list_id)?
            .remove(task_id)
            .map_err(|_| ApiError::not_found("task", task_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    fn request(target: &str, index: usize, source: Option<&str>) -> MoveRequest {
        MoveRequest {
            intent_id: IntentId::new(),
            target_list_id: target.into(),
            target_index: index,
            source_list_id: source.map(ListId::from),
        }
    }

    fn ids(records: &[TaskRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_move_between_lists() {
        let api = InMemoryTaskApi::new();
        api.seed("L1", &["A", "B"]).await;
        api.seed("L2", &["C"]).await;

        let record = api
            .move_task(&"A".into(), &request("L2", 0, Some("L1")))
            .await
            .unwrap();
        assert_eq!(record.list_id, ListId::from("L2"));
        assert_eq!(record.position, Position::new(0.0).unwrap());
        assert_eq!(ids(&api.snapshot(&"L2".into()).await), ["A", "C"]);
        assert_eq!(ids(&api.snapshot(&"L1".into()).await), ["B"]);
    }

    #[tokio::test]
    async fn test_move_replays_known_intent() {
        let api = InMemoryTaskApi::new();
        api.seed("L1", &["A", "B", "C"]).await;
        let req = request("L1", 2, Some("L1"));

        let first = api.move_task(&"A".into(), &req).await.unwrap();
        let second = api.move_task(&"A".into(), &req).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ids(&api.snapshot(&"L1".into()).await), ["B", "C", "A"]);
        assert_eq!(api.move_calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_source_is_a_conflict_with_current_record() {
        let api = InMemoryTaskApi::new();
        api.seed("L1", &["A"]).await;
        api.seed("L3", &[]).await;
        api.move_out_of_band(&"A".into(), &"L3".into(), 0)
            .await
            .unwrap();

        let err = api
            .move_task(&"A".into(), &request("L1", 0, Some("L1")))
            .await
            .unwrap_err();
        match err {
            ApiError::Conflict {
                current: Some(current),
                ..
            } => assert_eq!(current.list_id, ListId::from("L3")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let api = InMemoryTaskApi::new();
        api.seed("L1", &["A", "B"]).await;
        api.fail_next_move(ApiError::network("reset"));

        let err = api
            .move_task(&"A".into(), &request("L1", 1, None))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(api
            .move_task(&"A".into(), &request("L1", 1, None))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_missing_targets() {
        let api = InMemoryTaskApi::new();
        api.seed("L1", &["A"]).await;
        assert!(matches!(
            api.move_task(&"A".into(), &request("nope", 0, None)).await,
            Err(ApiError::NotFound { .. })
        ));
        assert!(matches!(
            api.move_task(&"Z".into(), &request("L1", 0, None)).await,
            Err(ApiError::NotFound { .. })
        ));
        assert!(matches!(
            api.list_tasks(&"nope".into()).await,
            Err(ApiError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let api = InMemoryTaskApi::new();
        api.seed("L1", &["A"]).await;

        let created = api
            .create_task(&"L1".into(), &NewTask::new("Write docs"))
            .await
            .unwrap();
        assert_eq!(created.fields["title"], "Write docs");
        assert_eq!(created.position, Position::new(2.0).unwrap());

        let mut fields = Map::new();
        fields.insert("title".into(), Value::String("Renamed".into()));
        let updated = api.update_task(&created.id, &fields).await.unwrap();
        assert_eq!(updated.fields["title"], "Renamed");
        assert_eq!(updated.position, created.position);

        api.delete_task(&created.id).await.unwrap();
        assert_eq!(ids(&api.snapshot(&"L1".into()).await), ["A"]);
        assert!(api.delete_task(&created.id).await.is_err());
    }
}
