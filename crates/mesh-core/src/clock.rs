//! Vector clock for causal delivery bookkeeping.
//!
//! Each entry counts how many messages from a node have been delivered. The
//! same type doubles as a message's dependency list: a snapshot of the
//! author's clock at send time, with its own entry set to the message's
//! sequence number.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single `(node, count)` pair, the wire form of a clock entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockEntry {
    pub node: NodeId,
    pub count: u64,
}

/// Delivered-count per node. Absent entries read as 0.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ClockEntry>", into = "Vec<ClockEntry>")]
pub struct VectorClock {
    entries: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    /// Create an empty clock.
    pub fn new() -> Self {
        VectorClock {
            entries: BTreeMap::new(),
        }
    }

    /// Create a clock that already knows `node` with a count of 0.
    pub fn with_node(node: impl Into<NodeId>) -> Self {
        let mut clock = Self::new();
        clock.observe(node);
        clock
    }

    /// Create a clock from `(node, count)` pairs.
    pub fn from_entries<N: Into<NodeId>>(entries: impl IntoIterator<Item = (N, u64)>) -> Self {
        VectorClock {
            entries: entries
                .into_iter()
                .map(|(node, count)| (node.into(), count))
                .collect(),
        }
    }

    /// Delivered count for a node, 0 if unknown.
    pub fn get(&self, node: &NodeId) -> u64 {
        self.entries.get(node).copied().unwrap_or(0)
    }

    /// Whether the node has an entry at all (zero entries included).
    pub fn knows(&self, node: &NodeId) -> bool {
        self.entries.contains_key(node)
    }

    /// Lazily add a zero entry for a node seen for the first time.
    pub fn observe(&mut self, node: impl Into<NodeId>) {
        self.entries.entry(node.into()).or_insert(0);
    }

    /// Record one more delivered message from `node`, returning the new count.
    pub fn advance(&mut self, node: &NodeId) -> u64 {
        let entry = self.entries.entry(node.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Overwrite the count for a node. Only used to build dependency snapshots.
    pub fn set(&mut self, node: impl Into<NodeId>, count: u64) {
        self.entries.insert(node.into(), count);
    }

    /// Adopt entries for nodes this clock has not heard from yet.
    ///
    /// Only entries whose local count is still 0 are candidates, and `skip`
    /// vetoes nodes the caller already holds history for (this node itself,
    /// authors with buffered messages). Zero remote counts add nothing, so
    /// merge never decreases a count and never inserts empty entries.
    /// Returns the nodes whose entries were adopted.
    pub fn merge(
        &mut self,
        remote: &VectorClock,
        mut skip: impl FnMut(&NodeId) -> bool,
    ) -> Vec<NodeId> {
        let mut adopted = Vec::new();
        for (node, &count) in &remote.entries {
            if count == 0 || self.get(node) > 0 || skip(node) {
                continue;
            }
            self.entries.insert(node.clone(), count);
            adopted.push(node.clone());
        }
        adopted
    }

    /// Check if this clock is at or past `other` on every entry.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        other
            .entries
            .iter()
            .all(|(node, &count)| self.get(node) >= count)
    }

    /// Check if neither clock dominates the other.
    pub fn is_concurrent_with(&self, other: &VectorClock) -> bool {
        !self.dominates(other) && !other.dominates(self)
    }

    /// Iterate over all entries in node order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &u64)> {
        self.entries.iter()
    }

    /// Number of nodes tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counts (messages delivered in total).
    pub fn total(&self) -> u64 {
        self.entries.values().sum()
    }

    /// Convert to the wire list form.
    pub fn to_entries(&self) -> Vec<ClockEntry> {
        self.entries
            .iter()
            .map(|(node, &count)| ClockEntry {
                node: node.clone(),
                count,
            })
            .collect()
    }
}

impl From<Vec<ClockEntry>> for VectorClock {
    /// Repeated nodes keep the highest count.
    fn from(list: Vec<ClockEntry>) -> Self {
        let mut entries = BTreeMap::new();
        for entry in list {
            let count = entries.entry(entry.node).or_insert(0);
            *count = (*count).max(entry.count);
        }
        VectorClock { entries }
    }
}

impl From<VectorClock> for Vec<ClockEntry> {
    fn from(clock: VectorClock) -> Self {
        clock.to_entries()
    }
}

impl fmt::Display for VectorClock {
    /// Renders as `(node:count)(node:count)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (node, count) in &self.entries {
            write!(f, "({}:{})", node, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::new(id)
    }

    #[test]
    fn test_clock_basic() {
        let mut clock = VectorClock::new();
        assert_eq!(clock.get(&node("x")), 0);
        assert!(!clock.knows(&node("x")));

        clock.observe("x");
        assert!(clock.knows(&node("x")));
        assert_eq!(clock.get(&node("x")), 0);

        assert_eq!(clock.advance(&node("x")), 1);
        assert_eq!(clock.advance(&node("x")), 2);
        assert_eq!(clock.get(&node("x")), 2);

        // Observing again keeps the count.
        clock.observe("x");
        assert_eq!(clock.get(&node("x")), 2);
    }

    #[test]
    fn test_merge_adopts_unknown_only() {
        let mut local = VectorClock::from_entries([("me", 2), ("y", 3), ("z", 0)]);
        let remote = VectorClock::from_entries([("me", 9), ("y", 7), ("z", 4), ("w", 5)]);

        let mut adopted = local.merge(&remote, |n| n == &node("me"));
        adopted.sort();

        assert_eq!(adopted, vec![node("w"), node("z")]);
        assert_eq!(local.get(&node("me")), 2);
        assert_eq!(local.get(&node("y")), 3);
        assert_eq!(local.get(&node("z")), 4);
        assert_eq!(local.get(&node("w")), 5);
    }

    #[test]
    fn test_merge_never_decreases() {
        let mut local = VectorClock::from_entries([("y", 5)]);
        let remote = VectorClock::from_entries([("y", 1)]);
        local.merge(&remote, |n| n == &node("me"));
        assert_eq!(local.get(&node("y")), 5);
    }

    #[test]
    fn test_merge_respects_skip_and_zero_counts() {
        let mut local = VectorClock::from_entries([("me", 0), ("held", 0)]);
        let remote = VectorClock::from_entries([("held", 4), ("idle", 0), ("w", 2)]);

        let adopted = local.merge(&remote, |n| n == &node("me") || n == &node("held"));

        assert_eq!(adopted, vec![node("w")]);
        assert_eq!(local.get(&node("held")), 0);
        assert!(!local.knows(&node("idle")));
        assert_eq!(local.get(&node("w")), 2);
    }

    #[test]
    fn test_dominates_and_concurrency() {
        let a = VectorClock::from_entries([("r1", 5), ("r2", 3)]);
        let b = VectorClock::from_entries([("r1", 3), ("r2", 3)]);
        let c = VectorClock::from_entries([("r1", 3), ("r2", 5)]);

        assert!(a.dominates(&b));
        assert!(!b.dominates(&a));
        assert!(a.is_concurrent_with(&c));
        assert!(VectorClock::new().dominates(&VectorClock::new()));
    }

    #[test]
    fn test_display_is_ordered() {
        let clock = VectorClock::from_entries([("y", 0), ("x", 1)]);
        assert_eq!(clock.to_string(), "(x:1)(y:0)");
    }

    #[test]
    fn test_wire_list_form() {
        let clock = VectorClock::from_entries([("x", 1), ("y", 4)]);
        let json = serde_json::to_string(&clock).unwrap();
        assert_eq!(json, r#"[{"node":"x","count":1},{"node":"y","count":4}]"#);

        let back: VectorClock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, clock);
    }

    #[test]
    fn test_repeated_wire_entries_keep_max() {
        let json = r#"[{"node":"x","count":1},{"node":"x","count":3}]"#;
        let clock: VectorClock = serde_json::from_str(json).unwrap();
        assert_eq!(clock.len(), 1);
        assert_eq!(clock.get(&node("x")), 3);
    }
}
