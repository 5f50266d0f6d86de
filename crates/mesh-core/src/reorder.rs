//! Reorder buffer: messages received but not yet causally deliverable.
//!
//! Arrival order carries no meaning here. The buffer is an unordered set keyed
//! by message id; what leaves it, and when, is decided by the predicate the
//! delivery engine passes to [`ReorderBuffer::drain_deliverable`].

use crate::message::ChatMessage;
use crate::node::{MessageId, NodeId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Pending {
    message: ChatMessage,
    buffered_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct ReorderBuffer {
    pending: HashMap<MessageId, Pending>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a message. Returns `false` if its id is already buffered.
    pub fn insert(&mut self, message: ChatMessage) -> bool {
        self.insert_at(message, Instant::now())
    }

    /// Buffer a message with an explicit arrival instant.
    pub fn insert_at(&mut self, message: ChatMessage, buffered_at: Instant) -> bool {
        let id = message.message_id();
        if self.pending.contains_key(&id) {
            return false;
        }
        self.pending.insert(
            id,
            Pending {
                message,
                buffered_at,
            },
        );
        true
    }

    /// One scan pass: remove and return every message `ready` accepts.
    ///
    /// The result is sorted by `(author, seq)` so that a pass is deterministic.
    pub fn drain_deliverable<F>(&mut self, mut ready: F) -> Vec<ChatMessage>
    where
        F: FnMut(&ChatMessage) -> bool,
    {
        let mut ids: Vec<MessageId> = self
            .pending
            .iter()
            .filter(|(_, p)| ready(&p.message))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();

        ids.into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|p| p.message))
            .collect()
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<ChatMessage> {
        self.pending.remove(id).map(|p| p.message)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.pending.contains_key(id)
    }

    /// Whether any buffered message was written by `author`.
    pub fn holds_author(&self, author: &NodeId) -> bool {
        self.pending.keys().any(|id| &id.author == author)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Age of the longest-waiting entry.
    pub fn oldest_age(&self, now: Instant) -> Option<Duration> {
        self.pending
            .values()
            .map(|p| now.saturating_duration_since(p.buffered_at))
            .max()
    }

    /// Ids buffered for at least `threshold`, oldest first.
    pub fn stalled(&self, now: Instant, threshold: Duration) -> Vec<MessageId> {
        let mut stalled: Vec<(Instant, MessageId)> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.buffered_at) >= threshold)
            .map(|(id, p)| (p.buffered_at, id.clone()))
            .collect();
        stalled.sort();
        stalled.into_iter().map(|(_, id)| id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.pending.values().map(|p| &p.message)
    }
}
