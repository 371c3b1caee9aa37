//! Position type for task ordering within a list.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Ordering key of an item within its list.
///
/// Positions are finite numbers compared numerically; a lower position renders
/// earlier. They are dense, so a value strictly between two neighbours can be
/// found without touching the neighbours (see [`crate::PositionAllocator`]).
/// On the wire a position is a single JSON number.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Position(f64);

impl Position {
    /// Create a position, rejecting NaN and infinities
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() {
            // -0.0 and 0.0 must compare (and hash) equal
            Some(Self(if value == 0.0 { 0.0 } else { value }))
        } else {
            None
        }
    }

    /// Create a position from a computed value, clamping overflow to the
    /// largest finite magnitude
    pub(crate) fn saturating(value: f64) -> Self {
        let value = if value.is_nan() {
            0.0
        } else {
            value.clamp(f64::MIN, f64::MAX)
        };
        Self(if value == 0.0 { 0.0 } else { value })
    }

    /// Get the numeric value
    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Position {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("position must be a finite number, got {value}"))
    }
}

impl From<Position> for f64 {
    fn from(position: Position) -> Self {
        position.0
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Position {}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Position {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Position({})", self.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
