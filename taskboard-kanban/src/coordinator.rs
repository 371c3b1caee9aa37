//! MoveCoordinator - owns the lifecycle of every move on a board
//!
//! A move is split in three steps so callers can keep confirmations in flight
//! while more gestures arrive:
//!
//! 1. [`MoveCoordinator::begin_move`] validates the intent, applies it to the
//!    store and returns a [`DispatchedMove`]. The UI sees the new placement
//!    immediately.
//! 2. [`MoveCoordinator::confirm`] returns a `'static` future that calls the
//!    server with a timeout and one automatic retry for transient failures.
//! 3. [`MoveCoordinator::complete`] hands the answer to the reconciliation
//!    policy, which confirms, corrects, surfaces a conflict or rolls back.
//!
//! At most one move per item is pending. A newer move of the same item
//! supersedes the older one, whose answer is then ignored whenever it arrives.
//! The ignored answer still tells where the server holds the item, so the
//! newer move's rollback target and request source are corrected from it.
//! [`MoveCoordinator::move_item`] runs all three steps in sequence.

use crate::allocator::PositionAllocator;
use crate::api::{MoveRequest, NewTask, TaskApi, TaskRecord};
use crate::config::MoveConfig;
use crate::error::{ApiError, KanbanError, Result};
use crate::reconcile::{ReconciliationPolicy, ServerView};
use crate::store::{BoardChange, BoardEvent, BoardStore, SubscriptionId};
use crate::types::{
    BoardId, IgnoreReason, IntentId, Item, ItemId, ListId, MoveIntent, MoveOutcome, MoveState,
    PendingMove, Placement,
};
use chrono::Utc;
use lru::LruCache;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// A move that has been applied locally and is ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedMove {
    pub intent_id: IntentId,
    pub item_id: ItemId,
    pub request: MoveRequest,
}

/// The server's final answer for one dispatched move
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub intent_id: IntentId,
    pub item_id: ItemId,
    pub result: std::result::Result<TaskRecord, ApiError>,
}

/// Coordinates optimistic moves against the Task/List API
pub struct MoveCoordinator<A: TaskApi + ?Sized> {
    store: BoardStore,
    api: Arc<A>,
    config: MoveConfig,
    alloc: PositionAllocator,
    pending: HashMap<ItemId, PendingMove>,
    /// Intents that are no longer current, for classifying late answers
    retired: LruCache<IntentId, IgnoreReason>,
    /// Where each superseded move started, in case the server refuses it
    superseded_from: LruCache<IntentId, Placement>,
}

impl<A: TaskApi + ?Sized> std::fmt::Debug for MoveCoordinator<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoveCoordinator")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .field("retired", &self.retired.len())
            .finish()
    }
}

impl<A: TaskApi + ?Sized + 'static> MoveCoordinator<A> {
    /// Create a coordinator with an empty store
    pub fn new(board_id: impl Into<BoardId>, api: Arc<A>, config: MoveConfig) -> Result<Self> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.retired_intent_capacity).ok_or_else(|| {
            KanbanError::invalid_value("retired_intent_capacity", "must be greater than zero")
        })?;
        Ok(Self {
            store: BoardStore::new(board_id),
            api,
            alloc: PositionAllocator::from_config(&config),
            config,
            pending: HashMap::new(),
            retired: LruCache::new(capacity),
            superseded_from: LruCache::new(capacity),
        })
    }

    pub fn store(&self) -> &BoardStore {
        &self.store
    }

    pub fn config(&self) -> &MoveConfig {
        &self.config
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// Register a listener for committed board changes
    pub fn subscribe(
        &mut self,
        listener: impl Fn(&BoardEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.store.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    /// The in-flight move of an item, if any
    pub fn pending(&self, item_id: &ItemId) -> Option<&PendingMove> {
        self.pending.get(item_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Where an item is in the move lifecycle
    pub fn state_of(&self, item_id: &ItemId) -> MoveState {
        self.pending
            .get(item_id)
            .map_or(MoveState::Idle, |p| p.state)
    }

    // =========================================================================
    // Moves
    // =========================================================================

    /// Validate an intent and apply it locally.
    ///
    /// Validation failures leave the store untouched. Any earlier pending move
    /// of the same item is superseded.
    pub fn begin_move(&mut self, intent: MoveIntent) -> Result<DispatchedMove> {
        let MoveIntent {
            item_id,
            source_list_id,
            target_list_id,
            target_index,
        } = intent;

        let current = self
            .store
            .placement_of(&item_id)
            .ok_or_else(|| KanbanError::item_not_found(&item_id))?;
        for list_id in [&source_list_id, &target_list_id] {
            if !self.store.has_list(list_id) {
                return Err(KanbanError::list_not_found(list_id));
            }
        }
        if current.list_id != source_list_id {
            return Err(KanbanError::SourceMismatch {
                item: item_id.to_string(),
                expected: source_list_id.to_string(),
                actual: current.list_id.to_string(),
            });
        }

        let item = self.store.detach(&item_id)?;
        let backup = item.clone();
        let applied = self
            .store
            .attach_at(item, &target_list_id, target_index, &self.alloc);
        let insertion = match applied {
            Ok(insertion) => insertion,
            Err(e) => {
                if let Err(restore) = self.store.attach_exact(backup, &self.alloc) {
                    warn!(item = %item_id, error = %restore, "could not restore item");
                }
                return Err(e);
            }
        };

        // A move that was never sent cannot have reached the server, so the
        // new one takes over its starting point
        let (prior, server_placement) = match self.pending.get(&item_id) {
            Some(previous) if previous.state == MoveState::OptimisticallyMoved => {
                (previous.prior.clone(), previous.server_placement.clone())
            }
            _ => (current.clone(), Some(current.clone())),
        };
        let request_source = server_placement.as_ref().map(|p| p.list_id.clone());

        let intent_id = IntentId::new();
        let pending = PendingMove {
            intent_id,
            item_id: item_id.clone(),
            optimistic_parent_id: target_list_id.clone(),
            optimistic_position: insertion.position,
            prior,
            server_placement,
            target_index: insertion.index,
            issued_at: Utc::now(),
            state: MoveState::OptimisticallyMoved,
        };
        if let Some(previous) = self.pending.insert(item_id.clone(), pending) {
            debug!(
                item = %item_id,
                superseded = %previous.intent_id,
                by = %intent_id,
                "move superseded"
            );
            self.retired.put(previous.intent_id, IgnoreReason::Superseded);
            self.superseded_from.put(previous.intent_id, previous.prior.clone());
        }

        debug!(
            item = %item_id,
            %intent_id,
            from = %current.list_id,
            to = %target_list_id,
            index = insertion.index,
            position = %insertion.position,
            renumbered = insertion.renumbered,
            "applied move optimistically"
        );
        self.store.commit(BoardChange::OptimisticMove {
            item_id: item_id.clone(),
            from: current.list_id.clone(),
            to: target_list_id.clone(),
        });

        Ok(DispatchedMove {
            intent_id,
            item_id,
            request: MoveRequest {
                intent_id,
                target_list_id,
                target_index: insertion.index,
                source_list_id: request_source,
            },
        })
    }

    /// Send a dispatched move to the server.
    ///
    /// The returned future borrows nothing from the coordinator, so any
    /// number of confirmations can be in flight while further moves are
    /// applied. Feed its output to [`Self::complete`].
    ///
    /// The request's source list is taken from what is known about the
    /// server at the time of sending, which may differ from when the move
    /// was applied if an older move of the item was answered since.
    pub fn confirm(
        &mut self,
        dispatched: &DispatchedMove,
    ) -> impl Future<Output = Confirmation> + Send + 'static {
        let mut dispatched = dispatched.clone();
        if let Some(pending) = self.pending.get_mut(&dispatched.item_id) {
            if pending.intent_id == dispatched.intent_id {
                pending.state = MoveState::Confirming;
                dispatched.request.source_list_id =
                    pending.server_placement.as_ref().map(|p| p.list_id.clone());
            }
        }
        let api = Arc::clone(&self.api);
        let config = self.config.clone();
        async move {
            let result = send_move(api.as_ref(), &dispatched, &config).await;
            Confirmation {
                intent_id: dispatched.intent_id,
                item_id: dispatched.item_id,
                result,
            }
        }
    }

    /// Reconcile the server's answer for a move.
    ///
    /// Answers for superseded, settled or unknown intents are ignored and
    /// leave the store untouched, so delivering the same answer twice is
    /// harmless.
    pub fn complete(&mut self, confirmation: Confirmation) -> MoveOutcome {
        let Confirmation {
            intent_id,
            item_id,
            result,
        } = confirmation;

        let retired = self.retired.peek(&intent_id).copied();
        let local = self.store.placement_of(&item_id);
        let resolution = ReconciliationPolicy::decide(
            self.pending.get(&item_id),
            intent_id,
            local.as_ref(),
            &result,
            retired,
        );

        let pending = match self.pending.get(&item_id) {
            Some(p) if p.intent_id == intent_id => self.pending.remove(&item_id),
            _ => None,
        };
        let Some(pending) = pending else {
            if retired == Some(IgnoreReason::Superseded) {
                self.rebase_after_superseded(intent_id, &item_id, &result);
            }
            return MoveOutcome::Ignored {
                intent_id,
                item_id,
                reason: retired.unwrap_or(IgnoreReason::Unknown),
            };
        };

        let outcome =
            ReconciliationPolicy::apply(&mut self.store, &self.alloc, &pending, resolution);
        self.retired.put(intent_id, IgnoreReason::AlreadySettled);
        outcome
    }

    /// Apply, confirm and reconcile one move
    pub async fn move_item(&mut self, intent: MoveIntent) -> Result<MoveOutcome> {
        let dispatched = self.begin_move(intent)?;
        let confirmation = self.confirm(&dispatched).await;
        Ok(self.complete(confirmation))
    }

    // =========================================================================
    // Loading and CRUD
    // =========================================================================

    /// Load (or reload) a list from the server
    pub async fn fetch_list(&mut self, list_id: &ListId) -> Result<usize> {
        let records = self.api.list_tasks(list_id).await?;
        Ok(self.apply_fetch(list_id, records))
    }

    /// Replace a list with fetched records.
    ///
    /// Items with a move in flight keep their optimistic placement; their
    /// answer will reconcile them.
    pub fn apply_fetch(&mut self, list_id: &ListId, records: Vec<TaskRecord>) -> usize {
        let items: Vec<Item> = records.into_iter().map(TaskRecord::into_item).collect();
        let pending = &self.pending;
        self.store
            .replace_list(list_id, items, |id| pending.contains_key(id), &self.alloc);
        self.store.commit(BoardChange::ListLoaded {
            list_id: list_id.clone(),
        });
        let count = self
            .store
            .list(list_id)
            .map_or(0, |list| list.items.len());
        debug!(list = %list_id, count, "list loaded");
        count
    }

    /// Create a task at `index` in a list (at the end when `None`)
    pub async fn create_task(
        &mut self,
        list_id: &ListId,
        title: impl Into<String>,
        index: Option<usize>,
    ) -> Result<Item> {
        let list = self
            .store
            .list(list_id)
            .ok_or_else(|| KanbanError::list_not_found(list_id))?;
        let (prev, next) = list.items.neighbours(index.unwrap_or(usize::MAX));
        let mut task = NewTask::new(title);
        if let Ok(position) = self.alloc.allocate(prev, next) {
            task = task.with_position(position);
        }

        let record = self.api.create_task(list_id, &task).await?;
        let item = record.into_item();
        if self.store.has_list(&item.parent_id) {
            self.store.attach_exact(item.clone(), &self.alloc)?;
            self.store.commit(BoardChange::ItemUpserted {
                item_id: item.id.clone(),
                list_id: item.parent_id.clone(),
            });
        }
        info!(task = %item.id, list = %item.parent_id, "created task");
        Ok(item)
    }

    /// Change task fields; placement is left to the move path
    pub async fn update_task(
        &mut self,
        item_id: &ItemId,
        fields: Map<String, Value>,
    ) -> Result<Item> {
        if self.store.item(item_id).is_none() {
            return Err(KanbanError::item_not_found(item_id));
        }
        let record = self.api.update_task(item_id, &fields).await?;
        self.store.set_payload(item_id, record.fields)?;
        let list_id = self
            .store
            .location_of(item_id)
            .cloned()
            .ok_or_else(|| KanbanError::item_not_found(item_id))?;
        self.store.commit(BoardChange::ItemUpserted {
            item_id: item_id.clone(),
            list_id,
        });
        self.store
            .item(item_id)
            .cloned()
            .ok_or_else(|| KanbanError::item_not_found(item_id))
    }

    /// Delete a task, cancelling any move in flight for it
    pub async fn delete_task(&mut self, item_id: &ItemId) -> Result<()> {
        if self.store.item(item_id).is_none() {
            return Err(KanbanError::item_not_found(item_id));
        }
        self.api.delete_task(item_id).await?;
        self.cancel_pending(item_id);
        let item = self.store.detach(item_id)?;
        self.store.commit(BoardChange::ItemRemoved {
            item_id: item.id,
            list_id: item.parent_id,
        });
        info!(task = %item_id, "deleted task");
        Ok(())
    }

    /// Drop a list that was deleted elsewhere.
    ///
    /// Moves into the list are cancelled. Moves out of it stay pending and
    /// will remove their item if they have to roll back.
    pub fn remove_list(&mut self, list_id: &ListId) -> Result<()> {
        let list = self
            .store
            .take_list(list_id)
            .ok_or_else(|| KanbanError::list_not_found(list_id))?;
        for item in list.items.iter() {
            self.cancel_pending(&item.id);
        }
        self.store.commit(BoardChange::ListRemoved {
            list_id: list_id.clone(),
        });
        info!(list = %list_id, items = list.items.len(), "list removed");
        Ok(())
    }

    /// Correct the item's current move using a superseded move's answer
    fn rebase_after_superseded(
        &mut self,
        intent_id: IntentId,
        item_id: &ItemId,
        answer: &std::result::Result<TaskRecord, ApiError>,
    ) {
        let origin = self.superseded_from.pop(&intent_id);
        let Some(pending) = self.pending.get_mut(item_id) else {
            return;
        };
        let known = match ReconciliationPolicy::on_superseded(answer) {
            ServerView::At(placement) => Some(placement),
            ServerView::Unchanged => origin,
            ServerView::Uncertain => None,
        };
        debug!(
            item = %item_id,
            superseded = %intent_id,
            current = %pending.intent_id,
            server = ?known,
            "rebased pending move on superseded answer"
        );
        if let Some(placement) = &known {
            pending.prior = placement.clone();
        }
        pending.server_placement = known;
    }

    fn cancel_pending(&mut self, item_id: &ItemId) {
        if let Some(pending) = self.pending.remove(item_id) {
            debug!(item = %item_id, intent = %pending.intent_id, "pending move cancelled");
            self.retired.put(pending.intent_id, IgnoreReason::Cancelled);
        }
    }
}

/// Call the server with a timeout per attempt, retrying transient failures
async fn send_move<A: TaskApi + ?Sized>(
    api: &A,
    dispatched: &DispatchedMove,
    config: &MoveConfig,
) -> std::result::Result<TaskRecord, ApiError> {
    let mut attempt = 0;
    loop {
        let result = match timeout(
            config.confirm_timeout(),
            api.move_task(&dispatched.item_id, &dispatched.request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout {
                elapsed_ms: config.confirm_timeout_ms,
            }),
        };

        match result {
            Ok(record) => {
                if attempt > 0 {
                    info!(intent = %dispatched.intent_id, attempt, "move confirmed after retry");
                }
                return Ok(record);
            }
            Err(error) if error.is_transient() && attempt < config.network_retries => {
                attempt += 1;
                warn!(
                    intent = %dispatched.intent_id,
                    %error,
                    attempt,
                    "move failed, retrying in {:?}",
                    config.retry_delay()
                );
                sleep(config.retry_delay()).await;
            }
            Err(error) => return Err(error),
        }
    }
}
