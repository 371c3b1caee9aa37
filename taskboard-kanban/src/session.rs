//! BoardSession - a single task that owns a [`MoveCoordinator`]
//!
//! All commands reach the coordinator through one channel, so every mutation
//! of the board is serialized without locks. Confirmations run concurrently
//! in the session's `FuturesUnordered` and are reconciled on the same task as
//! they finish. Outcomes are broadcast to every [`SessionHandle`].
//!
//! Moves of different items are confirmed concurrently. For one item at most
//! one call is in flight: a newer move supersedes the older one locally at
//! once and waits for that call to return before it is sent, so the server
//! never sees the item's moves out of order. While waiting, a newer move
//! replaces the waiting one, which is never sent.

use crate::api::{TaskApi, TaskRecord};
use crate::coordinator::{Confirmation, DispatchedMove, MoveCoordinator};
use crate::error::{ApiError, KanbanError, Result};
use crate::store::{BoardEvent, SubscriptionId};
use crate::types::{
    IgnoreReason, IntentId, Item, ItemId, ListId, MoveIntent, MoveOutcome, MoveState,
};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 64;
const OUTCOME_BUFFER: usize = 256;

type Listener = Box<dyn Fn(&BoardEvent) + Send + Sync>;
type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Move {
        intent: MoveIntent,
        reply: Reply<IntentId>,
    },
    Fetch {
        list_id: ListId,
        reply: Reply<usize>,
    },
    Snapshot {
        list_id: ListId,
        reply: Reply<Vec<Item>>,
    },
    State {
        item_id: ItemId,
        reply: oneshot::Sender<MoveState>,
    },
    Subscribe {
        listener: Listener,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

enum Completion {
    Move(Confirmation),
    Fetch {
        list_id: ListId,
        result: std::result::Result<Vec<TaskRecord>, ApiError>,
        reply: Option<Reply<usize>>,
    },
}

/// Cloneable handle for talking to a running [`BoardSession`]
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    outcomes: broadcast::Sender<MoveOutcome>,
}

impl SessionHandle {
    async fn request<T>(&self, command: Command, reply: oneshot::Receiver<T>) -> Result<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| KanbanError::SessionClosed)?;
        reply.await.map_err(|_| KanbanError::SessionClosed)
    }

    /// Apply a move optimistically and start confirming it.
    ///
    /// Returns once the local state reflects the move; the outcome arrives on
    /// [`Self::outcomes`].
    pub async fn submit(&self, intent: MoveIntent) -> Result<IntentId> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Move { intent, reply }, rx).await?
    }

    /// Load a list from the server, returning its item count
    pub async fn fetch(&self, list_id: impl Into<ListId>) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        let list_id = list_id.into();
        self.request(Command::Fetch { list_id, reply }, rx).await?
    }

    /// Ordered items of a list
    pub async fn snapshot(&self, list_id: impl Into<ListId>) -> Result<Vec<Item>> {
        let (reply, rx) = oneshot::channel();
        let list_id = list_id.into();
        self.request(Command::Snapshot { list_id, reply }, rx).await?
    }

    pub async fn state_of(&self, item_id: impl Into<ItemId>) -> Result<MoveState> {
        let (reply, rx) = oneshot::channel();
        let item_id = item_id.into();
        self.request(Command::State { item_id, reply }, rx).await
    }

    /// Register a listener for committed board changes
    pub async fn subscribe(
        &self,
        listener: impl Fn(&BoardEvent) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        let (reply, rx) = oneshot::channel();
        let listener = Box::new(listener);
        self.request(Command::Subscribe { listener, reply }, rx).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Unsubscribe { id, reply }, rx).await
    }

    /// A receiver for every move outcome from now on
    pub fn outcomes(&self) -> broadcast::Receiver<MoveOutcome> {
        self.outcomes.subscribe()
    }

    /// Ask the session to stop once in-flight confirmations have settled
    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| KanbanError::SessionClosed)
    }
}

/// Event loop owning a coordinator
pub struct BoardSession<A: TaskApi + ?Sized> {
    coordinator: MoveCoordinator<A>,
    commands: mpsc::Receiver<Command>,
    outcomes: broadcast::Sender<MoveOutcome>,
    inflight: FuturesUnordered<BoxFuture<'static, Completion>>,
    /// Per item: the move waiting for the item's in-flight call. The presence
    /// of a key means a call is in flight.
    waiting: HashMap<ItemId, Option<DispatchedMove>>,
}

impl<A: TaskApi + ?Sized + 'static> BoardSession<A> {
    /// Create a session and a handle to it; call [`Self::run`] to start it
    pub fn new(coordinator: MoveCoordinator<A>) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (outcomes, _) = broadcast::channel(OUTCOME_BUFFER);
        let handle = SessionHandle {
            commands: command_tx,
            outcomes: outcomes.clone(),
        };
        let session = Self {
            coordinator,
            commands,
            outcomes,
            inflight: FuturesUnordered::new(),
            waiting: HashMap::new(),
        };
        (session, handle)
    }

    /// Run the session on a new tokio task
    pub fn spawn(
        coordinator: MoveCoordinator<A>,
    ) -> (SessionHandle, JoinHandle<MoveCoordinator<A>>) {
        let (session, handle) = Self::new(coordinator);
        (handle, tokio::spawn(session.run()))
    }

    /// Process commands until shutdown or until every handle is dropped,
    /// then settle outstanding confirmations and return the coordinator
    pub async fn run(mut self) -> MoveCoordinator<A> {
        info!(board = %self.coordinator.store().board_id(), "board session started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(done) = self.inflight.next(), if !self.inflight.is_empty() => {
                    self.finish(done);
                }
            }
        }

        debug!(inflight = self.inflight.len(), "draining board session");
        while let Some(done) = self.inflight.next().await {
            self.finish(done);
        }
        info!(board = %self.coordinator.store().board_id(), "board session stopped");
        self.coordinator
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Move { intent, reply } => {
                let result = self.coordinator.begin_move(intent).map(|dispatched| {
                    let intent_id = dispatched.intent_id;
                    self.submit(dispatched);
                    intent_id
                });
                let _ = reply.send(result);
            }
            Command::Fetch { list_id, reply } => self.start_fetch(list_id, Some(reply)),
            Command::Snapshot { list_id, reply } => {
                let _ = reply.send(self.coordinator.store().get_snapshot(&list_id));
            }
            Command::State { item_id, reply } => {
                let _ = reply.send(self.coordinator.state_of(&item_id));
            }
            Command::Subscribe { listener, reply } => {
                let _ = reply.send(self.coordinator.subscribe(listener));
            }
            Command::Unsubscribe { id, reply } => {
                let _ = reply.send(self.coordinator.unsubscribe(id));
            }
            Command::Shutdown => {}
        }
    }

    /// Send a move now, or park it behind the item's in-flight call
    fn submit(&mut self, dispatched: DispatchedMove) {
        let Some(slot) = self.waiting.get_mut(&dispatched.item_id) else {
            self.dispatch(dispatched);
            return;
        };
        debug!(
            item = %dispatched.item_id,
            intent = %dispatched.intent_id,
            "waiting for in-flight move"
        );
        if let Some(replaced) = slot.replace(dispatched) {
            // Never sent, so it gets no answer of its own
            let _ = self.outcomes.send(MoveOutcome::Ignored {
                intent_id: replaced.intent_id,
                item_id: replaced.item_id,
                reason: IgnoreReason::Superseded,
            });
        }
    }

    fn dispatch(&mut self, dispatched: DispatchedMove) {
        self.waiting.insert(dispatched.item_id.clone(), None);
        let confirmation = self.coordinator.confirm(&dispatched);
        self.inflight.push(confirmation.map(Completion::Move).boxed());
    }

    fn start_fetch(&mut self, list_id: ListId, reply: Option<Reply<usize>>) {
        let api = Arc::clone(self.coordinator.api());
        self.inflight.push(
            async move {
                let result = api.list_tasks(&list_id).await;
                Completion::Fetch {
                    list_id,
                    result,
                    reply,
                }
            }
            .boxed(),
        );
    }

    fn finish(&mut self, completion: Completion) {
        match completion {
            Completion::Move(confirmation) => {
                let item_id = confirmation.item_id.clone();
                let outcome = self.coordinator.complete(confirmation);
                if let MoveOutcome::Conflict { notice, .. } = &outcome {
                    // Without the server's placement the board may be stale
                    if notice.actual.is_none() {
                        self.start_fetch(notice.attempted_list_id.clone(), None);
                    }
                }
                // No receivers is fine
                let _ = self.outcomes.send(outcome);

                let next = self.waiting.remove(&item_id).flatten();
                if let Some(dispatched) = next {
                    let current = self
                        .coordinator
                        .pending(&item_id)
                        .is_some_and(|p| p.intent_id == dispatched.intent_id);
                    if current {
                        self.dispatch(dispatched);
                    } else {
                        debug!(
                            item = %item_id,
                            intent = %dispatched.intent_id,
                            "waiting move was cancelled"
                        );
                    }
                }
            }
            Completion::Fetch {
                list_id,
                result,
                reply,
            } => {
                let loaded = result
                    .map(|records| self.coordinator.apply_fetch(&list_id, records))
                    .map_err(KanbanError::from);
                if let Err(e) = &loaded {
                    warn!(list = %list_id, error = %e, "list fetch failed");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(loaded);
                }
            }
        }
    }
}
