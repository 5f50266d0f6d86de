//! Property-based tests for the clock store and dedup set
//!
//!  - merge never decreases an entry and never touches skipped nodes
//!  - merge is idempotent
//!  - dominance is reflexive and survives advancing
//!  - compaction never forgets an id

use mesh_core::{DedupSet, MessageId, NodeId, VectorClock};
use proptest::prelude::*;

fn clock_strategy() -> impl Strategy<Value = VectorClock> {
    prop::collection::btree_map("[a-e]", 0u64..20, 0..5)
        .prop_map(|entries| VectorClock::from_entries(entries))
}

fn ids_strategy() -> impl Strategy<Value = Vec<(String, u64)>> {
    prop::collection::vec(("[a-c]", 1u64..15), 0..30)
}

// ============================================================================
// Clock Store
// ============================================================================

proptest! {
    #[test]
    fn merge_never_decreases(
        local in clock_strategy(),
        remote in clock_strategy()
    ) {
        let me = NodeId::new("a");
        let mut merged = local.clone();
        merged.merge(&remote, |n| n == &me);

        for (node, &count) in local.iter() {
            prop_assert!(merged.get(node) >= count);
        }
        prop_assert_eq!(merged.get(&me), local.get(&me));
    }

    #[test]
    fn merge_only_fills_unknown_entries(
        local in clock_strategy(),
        remote in clock_strategy()
    ) {
        let me = NodeId::new("a");
        let mut merged = local.clone();
        merged.merge(&remote, |n| n == &me);

        for (node, &count) in merged.iter() {
            if local.get(node) > 0 {
                prop_assert_eq!(count, local.get(node));
            } else if node != &me {
                prop_assert_eq!(count, remote.get(node));
            }
        }
    }

    #[test]
    fn merge_leaves_skipped_nodes_alone(
        local in clock_strategy(),
        remote in clock_strategy(),
        held in "[a-e]"
    ) {
        let held = NodeId::new(held);
        let mut merged = local.clone();
        merged.merge(&remote, |n| n == &held);

        prop_assert_eq!(merged.get(&held), local.get(&held));
        prop_assert_eq!(merged.knows(&held), local.knows(&held));
    }

    #[test]
    fn merge_is_idempotent(
        local in clock_strategy(),
        remote in clock_strategy()
    ) {
        let me = NodeId::new("a");
        let mut once = local.clone();
        once.merge(&remote, |n| n == &me);
        let mut twice = once.clone();
        let adopted = twice.merge(&remote, |n| n == &me);

        prop_assert!(adopted.is_empty());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn dominance_is_reflexive_and_monotone(
        clock in clock_strategy(),
        node in "[a-e]"
    ) {
        prop_assert!(clock.dominates(&clock));

        let mut advanced = clock.clone();
        advanced.advance(&NodeId::new(node));
        prop_assert!(advanced.dominates(&clock));
        prop_assert!(!clock.dominates(&advanced));
        prop_assert_eq!(advanced.total(), clock.total() + 1);
    }
}

// ============================================================================
// Dedup Set
// ============================================================================

proptest! {
    #[test]
    fn compaction_never_forgets(
        ids in ids_strategy(),
        clock in clock_strategy()
    ) {
        let mut dedup = DedupSet::new();
        for (author, seq) in &ids {
            dedup.mark_seen(MessageId::new(author.as_str(), *seq));
        }
        let before = dedup.len();
        let dropped = dedup.compact(&clock);

        prop_assert_eq!(dedup.len() + dropped, before);
        for (author, seq) in &ids {
            prop_assert!(dedup.seen(&MessageId::new(author.as_str(), *seq)));
        }
    }

    #[test]
    fn dedup_len_counts_distinct_ids(ids in ids_strategy()) {
        let mut dedup = DedupSet::new();
        let mut fresh = 0;
        for (author, seq) in &ids {
            if dedup.mark_seen(MessageId::new(author.as_str(), *seq)) {
                fresh += 1;
            }
        }
        let distinct: std::collections::HashSet<_> = ids.iter().collect();
        prop_assert_eq!(dedup.len(), distinct.len());
        prop_assert_eq!(fresh, distinct.len());
    }
}
