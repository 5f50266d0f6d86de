//! Dedup set for flooded messages.
//!
//! Every node forwards each new message to all of its other links, so the
//! same record reaches a node once per path. The dedup set is the only thing
//! that stops the flood: a message id is marked the first time it is seen and
//! every later copy is dropped without being forwarded or buffered again.
//!
//! By default the set grows for the whole session. [`DedupSet::compact`]
//! replaces per-id entries with a per-author watermark once the author's
//! delivered count has passed them.

use crate::clock::VectorClock;
use crate::node::{MessageId, NodeId, SeqNo};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct DedupSet {
    ids: HashSet<MessageId>,
    /// Every seq at or below the watermark counts as seen.
    watermarks: HashMap<NodeId, SeqNo>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, id: &MessageId) -> bool {
        self.ids.contains(id) || self.watermark(&id.author) >= id.seq
    }

    /// Mark an id as seen. Returns `false` if it already was.
    pub fn mark_seen(&mut self, id: MessageId) -> bool {
        if self.watermark(&id.author) >= id.seq {
            return false;
        }
        self.ids.insert(id)
    }

    /// Fold ids already covered by `clock` into per-author watermarks.
    ///
    /// Returns the number of explicit ids dropped.
    pub fn compact(&mut self, clock: &VectorClock) -> usize {
        for (node, &count) in clock.iter() {
            if count > 0 {
                let mark = self.watermarks.entry(node.clone()).or_insert(0);
                *mark = (*mark).max(count);
            }
        }

        let before = self.ids.len();
        let watermarks = &self.watermarks;
        self.ids
            .retain(|id| watermarks.get(&id.author).copied().unwrap_or(0) < id.seq);
        before - self.ids.len()
    }

    pub fn watermark(&self, author: &NodeId) -> SeqNo {
        self.watermarks.get(author).copied().unwrap_or(0)
    }

    /// Number of explicitly stored ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
