//! BoardStore - the aggregate of all lists on one board
//!
//! The store is the only place item placements live. Reads are public; every
//! mutation is crate-private so that positions are written only by the move
//! coordinator and the reconciliation step. Each committed mutation bumps the
//! revision and notifies subscribers synchronously, so a read issued after a
//! mutation returns always sees it.

use crate::allocator::PositionAllocator;
use crate::collection::{Claim, Insertion, OrderedCollection};
use crate::error::{KanbanError, Result};
use crate::types::{BoardId, Item, ItemId, ListId, Placement, TaskList};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::trace;

/// What changed on the board
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum BoardChange {
    /// A list was (re)loaded from the server
    ListLoaded { list_id: ListId },
    /// A list disappeared, taking its items with it
    ListRemoved { list_id: ListId },
    /// A move was applied locally, before the server answered
    OptimisticMove {
        item_id: ItemId,
        from: ListId,
        to: ListId,
    },
    /// The server's answer changed an item's placement
    Reconciled { item_id: ItemId, placement: Placement },
    /// A failed move was reverted
    RolledBack { item_id: ItemId, to: Option<Placement> },
    /// A task was created or its fields changed
    ItemUpserted { item_id: ItemId, list_id: ListId },
    /// A task was deleted
    ItemRemoved { item_id: ItemId, list_id: ListId },
}

/// A committed change as seen by subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardEvent {
    pub board_id: BoardId,
    pub revision: u64,
    #[serde(flatten)]
    pub change: BoardChange,
}

/// Handle returned by [`BoardStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&BoardEvent) + Send + Sync>;

/// All lists of one board and the placement of every item on it
pub struct BoardStore {
    board_id: BoardId,
    lists: IndexMap<ListId, TaskList>,
    /// Which list each item is in
    locations: HashMap<ItemId, ListId>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
    revision: u64,
}

impl fmt::Debug for BoardStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoardStore")
            .field("board_id", &self.board_id)
            .field("lists", &self.lists.keys().collect::<Vec<_>>())
            .field("items", &self.locations.len())
            .field("listeners", &self.listeners.len())
            .field("revision", &self.revision)
            .finish()
    }
}

impl BoardStore {
    /// Create an empty store for a board
    pub fn new(board_id: impl Into<BoardId>) -> Self {
        Self {
            board_id: board_id.into(),
            lists: IndexMap::new(),
            locations: HashMap::new(),
            listeners: Vec::new(),
            next_subscription: 0,
            revision: 0,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn board_id(&self) -> &BoardId {
        &self.board_id
    }

    /// Incremented on every committed change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// List ids in the order they were loaded
    pub fn list_ids(&self) -> Vec<ListId> {
        self.lists.keys().cloned().collect()
    }

    pub fn list(&self, list_id: &ListId) -> Option<&TaskList> {
        self.lists.get(list_id)
    }

    pub fn has_list(&self, list_id: &ListId) -> bool {
        self.lists.contains_key(list_id)
    }

    /// Ordered items of a list
    pub fn get_snapshot(&self, list_id: &ListId) -> Result<Vec<Item>> {
        self.lists
            .get(list_id)
            .map(|list| list.items.to_ordered_sequence())
            .ok_or_else(|| KanbanError::list_not_found(list_id))
    }

    /// The list an item is in
    pub fn location_of(&self, item_id: &ItemId) -> Option<&ListId> {
        self.locations.get(item_id)
    }

    /// Look up an item anywhere on the board
    pub fn item(&self, item_id: &ItemId) -> Option<&Item> {
        let list_id = self.locations.get(item_id)?;
        self.lists.get(list_id)?.items.get(item_id)
    }

    /// Where an item currently sits
    pub fn placement_of(&self, item_id: &ItemId) -> Option<Placement> {
        self.item(item_id)
            .map(|item| Placement::new(item.parent_id.clone(), item.position))
    }

    /// Total number of items on the board
    pub fn item_count(&self) -> usize {
        self.locations.len()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Register a listener called after every committed change
    pub fn subscribe(
        &mut self,
        listener: impl Fn(&BoardEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener; returns whether it was registered
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    pub(crate) fn commit(&mut self, change: BoardChange) {
        self.revision += 1;
        let event = BoardEvent {
            board_id: self.board_id.clone(),
            revision: self.revision,
            change,
        };
        trace!(revision = self.revision, change = ?event.change, "board change committed");
        for (_, listener) in &self.listeners {
            listener(&event);
        }
    }

    // =========================================================================
    // Mutations (crate-private)
    // =========================================================================

    /// Add an empty list if it is not already present
    pub(crate) fn ensure_list(&mut self, list_id: &ListId) {
        if !self.lists.contains_key(list_id) {
            self.lists.insert(
                list_id.clone(),
                TaskList::new(list_id.clone(), self.board_id.clone()),
            );
        }
    }

    /// Drop a list and the location of everything in it
    pub(crate) fn take_list(&mut self, list_id: &ListId) -> Option<TaskList> {
        let list = self.lists.shift_remove(list_id)?;
        for item in list.items.iter() {
            self.locations.remove(&item.id);
        }
        Some(list)
    }

    /// Take an item out of whatever list it is in
    pub(crate) fn detach(&mut self, item_id: &ItemId) -> Result<Item> {
        let list_id = self
            .locations
            .get(item_id)
            .cloned()
            .ok_or_else(|| KanbanError::item_not_found(item_id))?;
        let list = self
            .lists
            .get_mut(&list_id)
            .ok_or_else(|| KanbanError::list_not_found(&list_id))?;
        let item = list.items.remove(item_id)?;
        self.locations.remove(item_id);
        Ok(item)
    }

    /// Insert an item into a list at an index, allocating its position
    pub(crate) fn attach_at(
        &mut self,
        mut item: Item,
        list_id: &ListId,
        index: usize,
        alloc: &PositionAllocator,
    ) -> Result<Insertion> {
        if let Some(existing) = self.locations.get(&item.id) {
            return Err(KanbanError::DuplicateItem {
                id: format!("{} (in list {})", item.id, existing),
            });
        }
        let list = self
            .lists
            .get_mut(list_id)
            .ok_or_else(|| KanbanError::list_not_found(list_id))?;
        item.parent_id = list_id.clone();
        let item_id = item.id.clone();
        let insertion = list.items.insert_at(item, index, alloc)?;
        self.locations.insert(item_id, list_id.clone());
        Ok(insertion)
    }

    /// Insert an item at its own position in its own parent list
    pub(crate) fn attach_exact(
        &mut self,
        item: Item,
        alloc: &PositionAllocator,
    ) -> Result<Claim> {
        if let Some(existing) = self.locations.get(&item.id) {
            return Err(KanbanError::DuplicateItem {
                id: format!("{} (in list {})", item.id, existing),
            });
        }
        let list_id = item.parent_id.clone();
        let list = self
            .lists
            .get_mut(&list_id)
            .ok_or_else(|| KanbanError::list_not_found(&list_id))?;
        let item_id = item.id.clone();
        let claim = list.items.claim(item, alloc)?;
        self.locations.insert(item_id, list_id);
        Ok(claim)
    }

    /// Move an item to an exact placement, wherever it currently is
    pub(crate) fn relocate(
        &mut self,
        item_id: &ItemId,
        placement: &Placement,
        alloc: &PositionAllocator,
    ) -> Result<Claim> {
        if !self.lists.contains_key(&placement.list_id) {
            return Err(KanbanError::list_not_found(&placement.list_id));
        }
        let mut item = self.detach(item_id)?;
        item.parent_id = placement.list_id.clone();
        item.position = placement.position;
        self.attach_exact(item, alloc)
    }

    /// Replace a list's contents with `items`, keeping `keep` where they are
    pub(crate) fn replace_list(
        &mut self,
        list_id: &ListId,
        items: Vec<Item>,
        keep: impl Fn(&ItemId) -> bool,
        alloc: &PositionAllocator,
    ) {
        self.ensure_list(list_id);
        let kept: Vec<Item> = self
            .lists
            .get(list_id)
            .map(|l| l.items.iter().filter(|i| keep(&i.id)).cloned().collect())
            .unwrap_or_default();

        let mut merged = kept;
        for item in items {
            if keep(&item.id) {
                continue;
            }
            // Fresh server data wins over a stale local copy elsewhere
            if let Some(other) = self.locations.get(&item.id).cloned() {
                if &other != list_id {
                    if let Some(list) = self.lists.get_mut(&other) {
                        let _ = list.items.remove(&item.id);
                    }
                }
            }
            merged.push(Item {
                parent_id: list_id.clone(),
                ..item
            });
        }

        if let Some(list) = self.lists.get(list_id) {
            for item in list.items.iter() {
                self.locations.remove(&item.id);
            }
        }
        let collection = OrderedCollection::from_items(merged, alloc);
        for item in collection.iter() {
            self.locations.insert(item.id.clone(), list_id.clone());
        }
        if let Some(list) = self.lists.get_mut(list_id) {
            list.items = collection;
        }
    }

    /// Replace an item's payload
    pub(crate) fn set_payload(
        &mut self,
        item_id: &ItemId,
        payload: Map<String, Value>,
    ) -> Result<()> {
        let list_id = self
            .locations
            .get(item_id)
            .ok_or_else(|| KanbanError::item_not_found(item_id))?;
        let list = self
            .lists
            .get_mut(list_id)
            .ok_or_else(|| KanbanError::list_not_found(list_id))?;
        list.items.set_payload(item_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;
    use std::sync::{Arc, Mutex};

    fn pos(v: f64) -> Position {
        Position::new(v).unwrap()
    }

    fn store_with_list() -> BoardStore {
        let mut store = BoardStore::new("board");
        let alloc = PositionAllocator::default();
        store.replace_list(
            &"L1".into(),
            vec![
                Item::new("A", "L1", pos(1.0)),
                Item::new("B", "L1", pos(2.0)),
            ],
            |_| false,
            &alloc,
        );
        store.ensure_list(&"L2".into());
        store
    }

    #[test]
    fn test_snapshot_of_unknown_list() {
        let store = BoardStore::new("board");
        assert!(matches!(
            store.get_snapshot(&"nope".into()),
            Err(KanbanError::ListNotFound { .. })
        ));
    }

    #[test]
    fn test_detach_and_attach_update_locations() {
        let mut store = store_with_list();
        let alloc = PositionAllocator::default();
        let item = store.detach(&"A".into()).unwrap();
        assert!(store.location_of(&"A".into()).is_none());

        store.attach_at(item, &"L2".into(), 0, &alloc).unwrap();
        assert_eq!(store.location_of(&"A".into()), Some(&ListId::from("L2")));
        assert_eq!(store.item(&"A".into()).unwrap().parent_id, ListId::from("L2"));
        assert_eq!(store.get_snapshot(&"L1".into()).unwrap().len(), 1);
    }

    #[test]
    fn test_attach_rejects_item_already_on_board() {
        let mut store = store_with_list();
        let err = store
            .attach_at(
                Item::new("A", "L2", pos(0.0)),
                &"L2".into(),
                0,
                &PositionAllocator::default(),
            )
            .unwrap_err();
        assert!(matches!(err, KanbanError::DuplicateItem { .. }));
    }

    #[test]
    fn test_subscribers_see_committed_changes_in_order() {
        let mut store = store_with_list();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = store.subscribe(move |event| sink.lock().unwrap().push(event.revision));

        store.commit(BoardChange::ListLoaded {
            list_id: "L1".into(),
        });
        store.commit(BoardChange::ListLoaded {
            list_id: "L2".into(),
        });
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        assert!(store.unsubscribe(id));
        store.commit(BoardChange::ListLoaded {
            list_id: "L2".into(),
        });
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(!store.unsubscribe(id));
    }

    #[test]
    fn test_replace_list_keeps_pinned_items() {
        let mut store = store_with_list();
        let alloc = PositionAllocator::default();
        store.replace_list(
            &"L1".into(),
            vec![Item::new("A", "L1", pos(5.0)), Item::new("C", "L1", pos(1.0))],
            |id| id.as_str() == "B",
            &alloc,
        );
        let ids: Vec<_> = store
            .get_snapshot(&"L1".into())
            .unwrap()
            .into_iter()
            .map(|i| i.id.to_string())
            .collect();
        assert_eq!(ids, ["C", "B", "A"]);
        assert_eq!(store.item_count(), 3);
    }

    #[test]
    fn test_replace_list_pulls_item_from_stale_list() {
        let mut store = store_with_list();
        let alloc = PositionAllocator::default();
        store.replace_list(
            &"L2".into(),
            vec![Item::new("A", "L2", pos(1.0))],
            |_| false,
            &alloc,
        );
        assert_eq!(store.location_of(&"A".into()), Some(&ListId::from("L2")));
        assert_eq!(store.get_snapshot(&"L1".into()).unwrap().len(), 1);
    }

    #[test]
    fn test_take_list_forgets_items() {
        let mut store = store_with_list();
        let list = store.take_list(&"L1".into()).unwrap();
        assert_eq!(list.items.len(), 2);
        assert!(store.item(&"A".into()).is_none());
        assert!(!store.has_list(&"L1".into()));
    }

    #[test]
    fn test_relocate_claims_exact_position() {
        let mut store = store_with_list();
        let alloc = PositionAllocator::default();
        store
            .relocate(&"A".into(), &Placement::new("L2".into(), pos(10.0)), &alloc)
            .unwrap();
        assert_eq!(
            store.placement_of(&"A".into()),
            Some(Placement::new("L2".into(), pos(10.0)))
        );
    }
}
