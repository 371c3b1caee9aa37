//! Position allocation between neighbours, and renumbering.
//!
//! Positions are dense numbers. Inserting between two neighbours takes the
//! midpoint, appending adds one stride after the last item, prepending
//! subtracts one stride from the first. Repeated midpoint splits eventually
//! shrink a gap below `min_gap`; the allocator then reports
//! [`KanbanError::ExhaustedPrecision`] and the owning collection renumbers
//! itself to evenly spaced multiples of the stride and retries.

use crate::config::MoveConfig;
use crate::error::{KanbanError, Result};
use crate::types::{Item, ItemId, Position};

/// Computes positions for inserted items
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionAllocator {
    stride: f64,
    min_gap: f64,
}

impl Default for PositionAllocator {
    fn default() -> Self {
        Self::from_config(&MoveConfig::default())
    }
}

impl PositionAllocator {
    /// Create an allocator with explicit spacing
    pub fn new(stride: f64, min_gap: f64) -> Self {
        Self { stride, min_gap }
    }

    /// Create an allocator from the engine configuration
    pub fn from_config(config: &MoveConfig) -> Self {
        Self::new(config.stride, config.min_gap)
    }

    pub fn stride(&self) -> f64 {
        self.stride
    }

    /// Position strictly between `prev` and `next`.
    ///
    /// Either bound may be absent: with only `prev` the result lands one
    /// stride after it, with only `next` one stride before it, and with
    /// neither it is the first canonical position.
    pub fn allocate(&self, prev: Option<Position>, next: Option<Position>) -> Result<Position> {
        let candidate = match (prev, next) {
            (None, None) => return Ok(self.canonical(0)),
            (Some(p), None) => p.value() + self.stride,
            (None, Some(n)) => n.value() - self.stride,
            (Some(p), Some(n)) => {
                let (p, n) = (p.value(), n.value());
                let gap = n - p;
                if gap < self.min_gap {
                    return Err(KanbanError::exhausted(prev, next));
                }
                if gap.is_finite() {
                    p + gap / 2.0
                } else {
                    p / 2.0 + n / 2.0
                }
            }
        };

        let position =
            Position::new(candidate).ok_or_else(|| KanbanError::exhausted(prev, next))?;
        let above_prev = prev.is_none_or(|p| position > p);
        let below_next = next.is_none_or(|n| position < n);
        if above_prev && below_next {
            Ok(position)
        } else {
            Err(KanbanError::exhausted(prev, next))
        }
    }

    /// Canonical position for the item at `index` after a renumber
    pub fn canonical(&self, index: usize) -> Position {
        Position::saturating(self.stride * (index as f64 + 1.0))
    }

    /// Evenly spaced positions for `items`, in the order given.
    ///
    /// Pure: the same order always yields the same positions, and the
    /// relative order of the items is preserved.
    pub fn renumber<'a>(
        &self,
        items: impl IntoIterator<Item = &'a Item>,
    ) -> Vec<(ItemId, Position)> {
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| (item.id.clone(), self.canonical(index)))
            .collect()
    }
}
