//! Tunables for position allocation and move confirmation

use crate::error::{KanbanError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default spacing between renumbered positions
pub const DEFAULT_STRIDE: f64 = 1.0;
/// Default smallest gap the allocator will split
pub const DEFAULT_MIN_GAP: f64 = 1e-9;
const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RETRY_DELAY_MS: u64 = 250;
const DEFAULT_NETWORK_RETRIES: u32 = 1;
const DEFAULT_RETIRED_INTENT_CAPACITY: usize = 256;

/// Configuration for the move engine.
///
/// Every field has a default, so a partial table (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveConfig {
    /// Spacing between positions after a renumber, and the step used when
    /// appending or prepending
    pub stride: f64,
    /// Gaps narrower than this are considered exhausted
    pub min_gap: f64,
    /// How long to wait for the server before counting an attempt as failed
    pub confirm_timeout_ms: u64,
    /// Pause before the automatic retry of a transient failure
    pub retry_delay_ms: u64,
    /// Automatic retries for transient failures
    pub network_retries: u32,
    /// How many settled intents to remember for classifying late responses
    pub retired_intent_capacity: usize,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            stride: DEFAULT_STRIDE,
            min_gap: DEFAULT_MIN_GAP,
            confirm_timeout_ms: DEFAULT_CONFIRM_TIMEOUT_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            network_retries: DEFAULT_NETWORK_RETRIES,
            retired_intent_capacity: DEFAULT_RETIRED_INTENT_CAPACITY,
        }
    }
}

impl MoveConfig {
    /// Set the confirmation timeout
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the delay before the automatic retry
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the allocator spacing
    pub fn with_spacing(mut self, stride: f64, min_gap: f64) -> Self {
        self.stride = stride;
        self.min_gap = min_gap;
        self
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Check the values are usable.
    ///
    /// A renumbered gap (one stride) must be splittable at least once, so the
    /// stride has to exceed twice the minimum gap.
    pub fn validate(&self) -> Result<()> {
        if !self.stride.is_finite() || self.stride <= 0.0 {
            return Err(KanbanError::invalid_value(
                "stride",
                format!("must be a positive number, got {}", self.stride),
            ));
        }
        if !self.min_gap.is_finite() || self.min_gap <= 0.0 {
            return Err(KanbanError::invalid_value(
                "min_gap",
                format!("must be a positive number, got {}", self.min_gap),
            ));
        }
        if self.stride <= self.min_gap * 2.0 {
            return Err(KanbanError::invalid_value(
                "stride",
                format!(
                    "must exceed twice min_gap ({}), got {}",
                    self.min_gap, self.stride
                ),
            ));
        }
        if self.confirm_timeout_ms == 0 {
            return Err(KanbanError::invalid_value(
                "confirm_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.retired_intent_capacity == 0 {
            return Err(KanbanError::invalid_value(
                "retired_intent_capacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}
