//! Causal broadcast delivery engine (CBCAST over flooding)
//!
//! # Algorithm
//!
//! Each node maintains:
//! - `C`: vector clock, `C[k]` = messages from `k` delivered here
//! - `S`: dedup set of message ids already seen
//! - `B`: reorder buffer of messages waiting for their predecessors
//!
//! ```text
//! On submit(body):
//!   seq := C[self] + 1
//!   m := ⟨seq, self, body, C with C[self] := seq⟩
//!   S := S ∪ {m.id};  B := B ∪ {m};  scan()
//!   broadcast m to every open link
//!
//! On receive m from link l:
//!   if m.id ∈ S then drop
//!   S := S ∪ {m.id}
//!   forward m to every open link except l
//!   if m.seq ≤ C[m.author] then drop      (covered by adopted context)
//!   B := B ∪ {m};  scan()
//!
//! On context K from a new link:
//!   for k with C[k] = 0, K[k] > 0, k ≠ self, no b ∈ B authored by k:
//!     C[k] := K[k]
//!   scan()
//!
//! scan():
//!   repeat
//!     R := { b ∈ B | b.author = self
//!                   ∨ (b.deps[b.author] - 1 ≤ C[b.author]
//!                      ∧ ∀k ≠ b.author: b.deps[k] ≤ C[k]) }
//!     for b ∈ R: C[b.author] += 1; deliver b; B := B \ {b}
//!   until R = ∅
//! ```
//!
//! The author's own entry in `deps` is the message's sequence number, so the
//! check on it asks for every earlier message by the same author. Every other
//! entry asks for what the author had delivered when it sent `m`.
//!
//! The engine performs no I/O. [`DeliveryEngine::receive`] reports whether
//! the caller must forward the message, and both entry points return the
//! messages delivered by the scan, in delivery order.

use crate::stats::{BufferReport, EngineStats};
use mesh_core::{ChatMessage, DedupSet, NodeId, ReorderBuffer, VectorClock};
use std::time::Instant;
use tracing::{debug, trace};

/// Outcome of handing an inbound message to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    /// Already seen: nothing to forward, nothing delivered.
    Duplicate,
    /// First sighting. `forward` goes to every link except the arrival link.
    Accepted {
        forward: ChatMessage,
        delivered: Vec<ChatMessage>,
    },
}

impl Receipt {
    /// Messages delivered as a consequence of this arrival.
    pub fn delivered(&self) -> &[ChatMessage] {
        match self {
            Receipt::Duplicate => &[],
            Receipt::Accepted { delivered, .. } => delivered,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Receipt::Duplicate)
    }
}

/// Result of a local submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    /// The new message, to be broadcast on every open link.
    pub message: ChatMessage,
    /// Always starts with `message` itself.
    pub delivered: Vec<ChatMessage>,
}

/// Owns the clock store, dedup set and reorder buffer of one node.
///
/// All mutation goes through `&mut self`; callers that receive from several
/// links concurrently must serialize access (the SDK runs one engine per
/// actor task).
#[derive(Debug, Clone)]
pub struct DeliveryEngine {
    local: NodeId,
    clock: VectorClock,
    dedup: DedupSet,
    buffer: ReorderBuffer,
    stats: EngineStats,
}

impl DeliveryEngine {
    pub fn new(local: impl Into<NodeId>) -> Self {
        let local = local.into();
        Self {
            clock: VectorClock::with_node(local.clone()),
            local,
            dedup: DedupSet::new(),
            buffer: ReorderBuffer::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    pub fn dedup(&self) -> &DedupSet {
        &self.dedup
    }

    pub fn buffer(&self) -> &ReorderBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// The clock to send on a freshly opened link.
    pub fn causal_context(&self) -> VectorClock {
        self.clock.clone()
    }

    /// Buffer size and age, for stall detection.
    pub fn report(&self, now: Instant) -> BufferReport {
        BufferReport {
            pending: self.buffer.len(),
            oldest_age: self.buffer.oldest_age(now),
            dedup_len: self.dedup.len(),
            clock: self.clock.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Create and locally deliver a new message.
    pub fn submit(&mut self, body: impl Into<String>) -> Submitted {
        let seq = self.clock.get(&self.local) + 1;
        let message = ChatMessage::new(self.local.clone(), seq, body, &self.clock);

        self.dedup.mark_seen(message.message_id());
        self.buffer.insert(message.clone());
        self.stats.submitted += 1;
        debug!(node = %self.local, seq, "submitted message");

        let delivered = self.scan();
        Submitted { message, delivered }
    }

    /// Handle a message arriving from any link.
    pub fn receive(&mut self, message: ChatMessage) -> Receipt {
        self.stats.received += 1;

        let id = message.message_id();
        if !self.dedup.mark_seen(id.clone()) {
            self.stats.duplicates += 1;
            trace!(node = %self.local, message = %id, "dropped duplicate");
            return Receipt::Duplicate;
        }

        let forward = message.clone();
        if is_covered(&self.clock, &self.local, &message) {
            self.stats.subsumed += 1;
            debug!(
                node = %self.local,
                message = %id,
                "discarded message covered by adopted context"
            );
            return Receipt::Accepted {
                forward,
                delivered: Vec::new(),
            };
        }

        self.clock.observe(message.author_id.clone());
        for (node, _) in message.dependencies.iter() {
            self.clock.observe(node.clone());
        }

        self.buffer.insert(message);
        let delivered = self.scan();

        if delivered.is_empty() {
            debug!(
                node = %self.local,
                message = %id,
                pending = self.buffer.len(),
                "buffered until predecessors arrive"
            );
        }

        Receipt::Accepted { forward, delivered }
    }

    /// Adopt a peer's clock entries for nodes not heard from yet, then rescan.
    ///
    /// Authors with messages in the reorder buffer are never adopted, so a
    /// message that arrived before the merge is always delivered.
    pub fn merge_context(&mut self, remote: &VectorClock) -> Vec<ChatMessage> {
        let local = &self.local;
        let buffer = &self.buffer;
        let adopted = self
            .clock
            .merge(remote, |node| node == local || buffer.holds_author(node));
        self.stats.context_merges += 1;
        if !adopted.is_empty() {
            debug!(node = %self.local, adopted = adopted.len(), "adopted causal context");
        }
        self.scan()
    }

    /// Fold delivered ids into per-author watermarks. Returns ids dropped.
    pub fn compact(&mut self) -> usize {
        let dropped = self.dedup.compact(&self.clock);
        if dropped > 0 {
            debug!(node = %self.local, dropped, "compacted dedup set");
        }
        dropped
    }

    /// Whether `message` could be delivered against the current clock.
    pub fn is_deliverable(&self, message: &ChatMessage) -> bool {
        causally_ready(&self.clock, &self.local, message)
    }

    /// Deliver buffered messages until a pass makes no progress.
    fn scan(&mut self) -> Vec<ChatMessage> {
        let mut delivered = Vec::new();

        loop {
            let ready = {
                let clock = &self.clock;
                let local = &self.local;
                self.buffer
                    .drain_deliverable(|m| causally_ready(clock, local, m))
            };

            if ready.is_empty() {
                break;
            }

            for message in ready {
                let count = self.clock.advance(&message.author_id);
                trace!(
                    node = %self.local,
                    author = %message.author_id,
                    count,
                    "delivered"
                );
                delivered.push(message);
            }
        }

        self.stats.delivered += delivered.len() as u64;
        delivered
    }
}

/// A remote message whose sequence the local clock has already passed.
///
/// Only reachable after a context merge adopted the author's history.
fn is_covered(clock: &VectorClock, local: &NodeId, message: &ChatMessage) -> bool {
    &message.author_id != local && message.seq() <= clock.get(&message.author_id)
}

fn causally_ready(clock: &VectorClock, local: &NodeId, message: &ChatMessage) -> bool {
    if &message.author_id == local {
        return true;
    }
    message.dependencies.iter().all(|(node, &count)| {
        let required = if node == &message.author_id {
            count.saturating_sub(1)
        } else {
            count
        };
        required <= clock.get(node)
    })
}
