//! Per-list ordered index of items.
//!
//! The backing vector is kept sorted by `(position, id)` at every step, so a
//! reader never observes a partially applied insert or removal. Positions are
//! unique within a collection; the id tie-break only matters while loading
//! data that arrived with colliding positions.

use crate::allocator::PositionAllocator;
use crate::error::{KanbanError, Result};
use crate::types::{Item, ItemId, Position};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::debug;

/// Result of inserting an item at an index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Insertion {
    pub index: usize,
    pub position: Position,
    /// Whether the whole collection was renumbered to make room
    pub renumbered: bool,
}

/// Result of placing an item at an exact position
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub index: usize,
    /// Item that held the position and was moved directly after the claimant
    pub displaced: Option<ItemId>,
    pub renumbered: bool,
}

/// Items of one list, sorted by position
#[derive(Debug, Clone, Default)]
pub struct OrderedCollection {
    items: Vec<Item>,
}

fn sort_key_cmp(a: &Item, b: &Item) -> Ordering {
    a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id))
}

impl OrderedCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection from unordered items.
    ///
    /// Items sharing a position are ordered by id and the later ones are given
    /// fresh positions directly after the first. Duplicate ids keep the first
    /// occurrence.
    pub fn from_items(items: impl IntoIterator<Item = Item>, alloc: &PositionAllocator) -> Self {
        let mut sorted: Vec<Item> = items.into_iter().collect();
        sorted.sort_by(sort_key_cmp);

        let mut collection = Self::new();
        for item in sorted {
            if collection.contains(&item.id) {
                debug!(item = %item.id, "dropping duplicate item while loading list");
                continue;
            }
            match collection.insert_exact(item) {
                Ok(_) => {}
                Err((occupied, item)) => {
                    debug!(item = %item.id, position = %item.position, "position collision while loading list");
                    // Reallocation after the occupant cannot fail after a renumber
                    if let Err(e) = collection.insert_at(item, occupied + 1, alloc) {
                        debug!(error = %e, "could not place colliding item");
                    }
                }
            }
        }
        collection
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.iter().any(|i| &i.id == id)
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.iter().find(|i| &i.id == id)
    }

    /// Index of an item in display order
    pub fn index_of(&self, id: &ItemId) -> Result<usize> {
        self.items
            .iter()
            .position(|i| &i.id == id)
            .ok_or_else(|| KanbanError::item_not_found(id))
    }

    /// The items in display order
    pub fn to_ordered_sequence(&self) -> Vec<Item> {
        self.items.clone()
    }

    /// The item ids in display order
    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|i| i.id.clone()).collect()
    }

    /// Strictly increasing positions, no duplicates
    pub fn is_strictly_ordered(&self) -> bool {
        self.items.windows(2).all(|w| w[0].position < w[1].position)
    }

    /// Insert `item` so that it ends up at `index`, allocating its position
    /// from the neighbours at that index.
    ///
    /// Indexes past the end append. When the neighbours are too close the
    /// collection is renumbered and the allocation retried once.
    pub fn insert_at(
        &mut self,
        mut item: Item,
        index: usize,
        alloc: &PositionAllocator,
    ) -> Result<Insertion> {
        if self.contains(&item.id) {
            return Err(KanbanError::DuplicateItem {
                id: item.id.to_string(),
            });
        }
        let index = index.min(self.items.len());

        let (position, renumbered) = match alloc.allocate(self.prev_of(index), self.next_of(index)) {
            Ok(position) => (position, false),
            Err(KanbanError::ExhaustedPrecision { prev, next }) => {
                debug!(%prev, %next, len = self.items.len(), "gap exhausted, renumbering list");
                self.renumber(alloc);
                (alloc.allocate(self.prev_of(index), self.next_of(index))?, true)
            }
            Err(e) => return Err(e),
        };

        item.position = position;
        self.items.insert(index, item);
        debug_assert!(self.is_strictly_ordered());
        Ok(Insertion {
            index,
            position,
            renumbered,
        })
    }

    /// Place `item` at exactly `item.position`.
    ///
    /// If another item holds that position it is moved directly after the
    /// claimant, keeping the claimant's value authoritative.
    pub fn claim(&mut self, item: Item, alloc: &PositionAllocator) -> Result<Claim> {
        if self.contains(&item.id) {
            return Err(KanbanError::DuplicateItem {
                id: item.id.to_string(),
            });
        }
        match self.insert_exact(item) {
            Ok(index) => Ok(Claim {
                index,
                displaced: None,
                renumbered: false,
            }),
            Err((index, item)) => {
                let occupant = self.items.remove(index);
                let displaced = occupant.id.clone();
                self.items.insert(index, item);
                let renumbered = self.place_after(index, occupant, alloc)?;
                Ok(Claim {
                    index,
                    displaced: Some(displaced),
                    renumbered,
                })
            }
        }
    }

    /// Remove an item, returning it
    pub fn remove(&mut self, id: &ItemId) -> Result<Item> {
        let index = self.index_of(id)?;
        Ok(self.items.remove(index))
    }

    /// Reassign evenly spaced positions without changing the order
    pub fn renumber(&mut self, alloc: &PositionAllocator) {
        let positions = alloc.renumber(&self.items);
        for (item, (_, position)) in self.items.iter_mut().zip(positions) {
            item.position = position;
        }
    }

    /// Replace an item's payload in place
    pub fn set_payload(&mut self, id: &ItemId, payload: Map<String, Value>) -> Result<()> {
        let item = self
            .items
            .iter_mut()
            .find(|i| &i.id == id)
            .ok_or_else(|| KanbanError::item_not_found(id))?;
        item.payload = payload;
        Ok(())
    }

    /// Positions of the items on either side of `index` (clamped to the end)
    pub fn neighbours(&self, index: usize) -> (Option<Position>, Option<Position>) {
        let index = index.min(self.items.len());
        (self.prev_of(index), self.next_of(index))
    }

    /// Insert `item` directly after the item at `anchor`.
    ///
    /// The anchor and everything before it keep their positions. When there is
    /// no room, only the items after the anchor are respaced, one stride apart.
    fn place_after(
        &mut self,
        anchor: usize,
        mut item: Item,
        alloc: &PositionAllocator,
    ) -> Result<bool> {
        let at = anchor + 1;
        let base = self.items[anchor].position;
        match alloc.allocate(Some(base), self.next_of(at)) {
            Ok(position) => {
                item.position = position;
                self.items.insert(at, item);
                Ok(false)
            }
            Err(KanbanError::ExhaustedPrecision { .. }) => {
                debug!(
                    %base,
                    followers = self.items.len() - anchor,
                    "respacing after claimed position"
                );
                self.items.insert(at, item);
                for (step, follower) in self.items[at..].iter_mut().enumerate() {
                    let value = base.value() + alloc.stride() * (step + 1) as f64;
                    follower.position = Position::new(value)
                        .ok_or_else(|| KanbanError::invalid_value("position", value.to_string()))?;
                }
                if !self.is_strictly_ordered() {
                    // Too far out for the stride to register; fall back to a full renumber
                    self.renumber(alloc);
                }
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    fn prev_of(&self, index: usize) -> Option<Position> {
        index.checked_sub(1).map(|i| self.items[i].position)
    }

    fn next_of(&self, index: usize) -> Option<Position> {
        self.items.get(index).map(|i| i.position)
    }

    /// Insert at the item's own position; on collision hands the item back
    /// with the occupant's index
    fn insert_exact(&mut self, item: Item) -> std::result::Result<usize, (usize, Item)> {
        let index = self.items.partition_point(|i| i.position < item.position);
        if self
            .items
            .get(index)
            .is_some_and(|i| i.position == item.position)
        {
            return Err((index, item));
        }
        self.items.insert(index, item);
        Ok(index)
    }
}

impl<'a> IntoIterator for &'a OrderedCollection {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(v: f64) -> Position {
        Position::new(v).unwrap()
    }

    fn abc() -> OrderedCollection {
        OrderedCollection::from_items(
            vec![
                Item::new("C", "L", pos(3.0)),
                Item::new("A", "L", pos(1.0)),
                Item::new("B", "L", pos(2.0)),
            ],
            &PositionAllocator::default(),
        )
    }

    fn ids(c: &OrderedCollection) -> Vec<String> {
        c.iter().map(|i| i.id.to_string()).collect()
    }

    #[test]
    fn test_from_items_sorts_by_position() {
        let c = abc();
        assert_eq!(ids(&c), ["A", "B", "C"]);
        assert!(c.is_strictly_ordered());
    }

    #[test]
    fn test_insert_between_first_and_second() {
        let mut c = abc();
        let insertion = c
            .insert_at(
                Item::new("X", "L", pos(0.0)),
                1,
                &PositionAllocator::default(),
            )
            .unwrap();
        assert_eq!(insertion.position, pos(1.5));
        assert!(!insertion.renumbered);
        assert_eq!(ids(&c), ["A", "X", "B", "C"]);
    }

    #[test]
    fn test_insert_past_end_appends() {
        let mut c = abc();
        let insertion = c
            .insert_at(
                Item::new("X", "L", pos(0.0)),
                99,
                &PositionAllocator::default(),
            )
            .unwrap();
        assert_eq!(insertion.index, 3);
        assert_eq!(insertion.position, pos(4.0));
    }

    #[test]
    fn test_insert_renumbers_when_gap_exhausted() {
        let alloc = PositionAllocator::new(1.0, 0.4);
        let mut c = OrderedCollection::from_items(
            vec![Item::new("A", "L", pos(1.0)), Item::new("B", "L", pos(1.3))],
            &alloc,
        );
        let insertion = c.insert_at(Item::new("X", "L", pos(0.0)), 1, &alloc).unwrap();
        assert!(insertion.renumbered);
        assert_eq!(ids(&c), ["A", "X", "B"]);
        assert_eq!(c.get(&"A".into()).unwrap().position, pos(1.0));
        assert_eq!(insertion.position, pos(1.5));
        assert_eq!(c.get(&"B".into()).unwrap().position, pos(2.0));
    }

    #[test]
    fn test_insert_duplicate_is_rejected() {
        let mut c = abc();
        let err = c
            .insert_at(Item::new("A", "L", pos(0.0)), 0, &PositionAllocator::default())
            .unwrap_err();
        assert!(matches!(err, KanbanError::DuplicateItem { .. }));
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_remove_and_index_of() {
        let mut c = abc();
        assert_eq!(c.index_of(&"B".into()).unwrap(), 1);
        let removed = c.remove(&"B".into()).unwrap();
        assert_eq!(removed.position, pos(2.0));
        assert!(matches!(
            c.index_of(&"B".into()),
            Err(KanbanError::ItemNotFound { .. })
        ));
        assert!(c.remove(&"B".into()).is_err());
    }

    #[test]
    fn test_claim_free_position() {
        let mut c = abc();
        let claim = c
            .claim(Item::new("X", "L", pos(2.5)), &PositionAllocator::default())
            .unwrap();
        assert_eq!(claim.index, 2);
        assert_eq!(claim.displaced, None);
        assert_eq!(ids(&c), ["A", "B", "X", "C"]);
    }

    #[test]
    fn test_claim_displaces_occupant_after_claimant() {
        let mut c = abc();
        let claim = c
            .claim(Item::new("X", "L", pos(2.0)), &PositionAllocator::default())
            .unwrap();
        assert_eq!(claim.displaced, Some(ItemId::from("B")));
        assert_eq!(ids(&c), ["A", "X", "B", "C"]);
        assert_eq!(c.get(&"X".into()).unwrap().position, pos(2.0));
        assert_eq!(c.get(&"B".into()).unwrap().position, pos(2.5));
        assert!(c.is_strictly_ordered());
    }

    #[test]
    fn test_claim_keeps_claimant_position_when_gap_is_exhausted() {
        let alloc = PositionAllocator::new(1.0, 0.1);
        let mut c = OrderedCollection::from_items(
            vec![
                Item::new("A", "L", pos(1.0)),
                Item::new("B", "L", pos(2.0)),
                Item::new("C", "L", pos(2.05)),
            ],
            &alloc,
        );

        let claim = c.claim(Item::new("X", "L", pos(2.0)), &alloc).unwrap();

        assert!(claim.renumbered);
        assert_eq!(claim.index, 1);
        assert_eq!(ids(&c), ["A", "X", "B", "C"]);
        // Claimant and everything before it are untouched
        assert_eq!(c.get(&"A".into()).unwrap().position, pos(1.0));
        assert_eq!(c.get(&"X".into()).unwrap().position, pos(2.0));
        assert_eq!(c.get(&"B".into()).unwrap().position, pos(3.0));
        assert_eq!(c.get(&"C".into()).unwrap().position, pos(4.0));
        assert!(c.is_strictly_ordered());
    }

    #[test]
    fn test_from_items_breaks_ties_by_id() {
        let c = OrderedCollection::from_items(
            vec![Item::new("b", "L", pos(1.0)), Item::new("a", "L", pos(1.0))],
            &PositionAllocator::default(),
        );
        assert_eq!(ids(&c), ["a", "b"]);
        assert!(c.is_strictly_ordered());
    }

    #[test]
    fn test_renumber_keeps_order() {
        let mut c = abc();
        c.insert_at(Item::new("X", "L", pos(0.0)), 1, &PositionAllocator::default())
            .unwrap();
        let before = ids(&c);
        c.renumber(&PositionAllocator::default());
        assert_eq!(ids(&c), before);
        let positions: Vec<f64> = c.iter().map(|i| i.position.value()).collect();
        assert_eq!(positions, [1.0, 2.0, 3.0, 4.0]);
    }
}
