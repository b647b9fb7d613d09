use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet, VecDeque};
use trustgraph_core::{AccountId, TrustLine};
use trustgraph_engine::{QueryControl, QueryOutcome, TrustGraph};

const NODES: [&str; 6] = ["A", "B", "C", "D", "E", "F"];

type Pair = (usize, usize);

fn id(s: &str) -> AccountId {
    AccountId::new(s).unwrap_or_else(|e| panic!("invalid id {s}: {e}"))
}

/// Updates with at most one entry per `(pair, block)`, so the final state is
/// independent of arrival order.
fn updates_strategy() -> impl Strategy<Value = Vec<(Pair, u64, u64)>> {
    proptest::collection::vec((0..NODES.len(), 0..NODES.len(), 0u64..20, 0u64..12), 0..40)
        .prop_map(|raw| {
            let mut unique: BTreeMap<(Pair, u64), u64> = BTreeMap::new();
            for (t, e, amount, block) in raw {
                unique.insert(((t, e), block), amount);
            }
            unique
                .into_iter()
                .map(|((pair, block), amount)| (pair, block, amount))
                .collect()
        })
}

fn line(pair: Pair, block: u64, amount: u64) -> TrustLine {
    TrustLine::new(
        id(NODES[pair.0]),
        id(NODES[pair.1]),
        i128::from(amount),
        i128::from(block),
    )
    .unwrap_or_else(|e| panic!("invalid line: {e}"))
}

fn expected_state(updates: &[(Pair, u64, u64)]) -> BTreeMap<Pair, (u64, u64)> {
    let mut state: BTreeMap<Pair, (u64, u64)> = BTreeMap::new();
    for &(pair, block, amount) in updates {
        let entry = state.entry(pair).or_insert((block, amount));
        if block > entry.0 {
            *entry = (block, amount);
        }
    }
    state
}

fn graph_from(updates: &[(Pair, u64, u64)]) -> TrustGraph {
    let graph = TrustGraph::new();
    for &(pair, block, amount) in updates {
        graph.apply(&line(pair, block, amount));
    }
    graph
}

/// Nodes reachable from `from` using at least one edge of capacity `>= amount`.
fn brute_force_reachable(state: &BTreeMap<Pair, (u64, u64)>, from: usize, amount: u64) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([from]);
    while let Some(node) = queue.pop_front() {
        for (&(t, e), &(_, capacity)) in state {
            if t == node && capacity > 0 && capacity >= amount && seen.insert(e) {
                queue.push_back(e);
            }
        }
    }
    seen
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

    #[test]
    fn final_state_is_order_independent(
        updates in updates_strategy().prop_flat_map(|u| {
            let shuffled = Just(u.clone()).prop_shuffle();
            (Just(u), shuffled)
        })
    ) {
        let (ordered, shuffled) = updates;
        let a = graph_from(&ordered);
        let b = graph_from(&shuffled);

        let left: Vec<_> = a.snapshot_all().iter().cloned().collect();
        let right: Vec<_> = b.snapshot_all().iter().cloned().collect();
        prop_assert_eq!(&left, &right);

        let expected = expected_state(&ordered);
        prop_assert_eq!(left.len(), expected.len());
        for edge in &left {
            let t = NODES.iter().position(|n| *n == edge.truster.as_str()).unwrap();
            let e = NODES.iter().position(|n| *n == edge.trustee.as_str()).unwrap();
            prop_assert_eq!(expected.get(&(t, e)), Some(&(edge.last_block, edge.capacity)));
        }
    }

    #[test]
    fn replaying_history_changes_nothing(updates in updates_strategy()) {
        let graph = graph_from(&updates);
        let before: Vec<_> = graph.snapshot_all().iter().cloned().collect();
        let applied = graph.ingest_stats().applied;

        for &(pair, block, amount) in &updates {
            prop_assert!(!graph.apply(&line(pair, block, amount)).is_applied());
        }

        let after: Vec<_> = graph.snapshot_all().iter().cloned().collect();
        prop_assert_eq!(before, after);
        prop_assert_eq!(graph.ingest_stats().applied, applied);
    }

    #[test]
    fn query_agrees_with_brute_force(
        updates in updates_strategy(),
        from in 0..NODES.len(),
        to in 0..NODES.len(),
        amount in 1u64..20,
    ) {
        let graph = graph_from(&updates);
        let state = expected_state(&updates);
        let reachable = brute_force_reachable(&state, from, amount);

        let outcome = graph
            .query(&id(NODES[from]), &id(NODES[to]), i128::from(amount), &QueryControl::new())
            .unwrap();

        match outcome {
            QueryOutcome::Reachable(path) => {
                prop_assert!(reachable.contains(&to));
                prop_assert_eq!(path.nodes.first(), Some(&id(NODES[from])));
                prop_assert_eq!(path.nodes.last(), Some(&id(NODES[to])));
                let mut bottleneck = u64::MAX;
                for hop in path.nodes.windows(2) {
                    let edge = graph.edge(&hop[0], &hop[1]);
                    prop_assert!(edge.is_some());
                    let capacity = edge.map(|e| e.capacity).unwrap_or_default();
                    prop_assert!(capacity >= amount);
                    bottleneck = bottleneck.min(capacity);
                }
                prop_assert_eq!(path.bottleneck, Some(bottleneck));
            }
            QueryOutcome::Unreachable => prop_assert!(!reachable.contains(&to)),
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }
    }
}
