//! Delivery counters and buffer health.
//!
//! The engine never reports a stuck message as an error: a message whose
//! predecessors never arrive stays buffered for the rest of the session.
//! [`BufferReport`] is what an operator looks at to notice that.

use mesh_core::VectorClock;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Monotonic counters kept by a delivery engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Messages created locally.
    pub submitted: u64,
    /// Records handed to `receive`, duplicates included.
    pub received: u64,
    /// Copies dropped by the dedup set.
    pub duplicates: u64,
    /// Messages handed to the application, local ones included.
    pub delivered: u64,
    /// Arrivals dropped because an earlier context merge already covered them.
    pub subsumed: u64,
    pub context_merges: u64,
}

/// Point-in-time view of an engine.
#[derive(Clone, Debug)]
pub struct BufferReport {
    pub pending: usize,
    pub oldest_age: Option<Duration>,
    pub dedup_len: usize,
    pub clock: VectorClock,
    pub stats: EngineStats,
}

impl BufferReport {
    /// Whether the oldest buffered message has waited at least `threshold`.
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        self.oldest_age.map_or(false, |age| age >= threshold)
    }
}
