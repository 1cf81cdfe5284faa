//! Property-based tests for the operator graph using proptest.

use std::collections::BTreeSet;

use proptest::prelude::*;
use rill_core::{Direction, Row, Value};
use rill_ivm::{Capture, CapturedChange, FetchRequest, Operator, Source, SourceChange, Take};
use rill_storage::memory_handle;

fn row(id: i64, v: i64) -> Row {
    Row::new(vec![Value::Int64(id), Value::Int64(v)])
}

/// (id, v) pairs with ids drawn from a small space so collisions happen.
fn ops() -> impl Strategy<Value = Vec<(bool, i64, i64)>> {
    prop::collection::vec((any::<bool>(), 0i64..24, -50i64..50), 1..80)
}

proptest! {
    /// Fetch streams are monotonically non-decreasing (non-increasing when
    /// reversed) under the connection schema's comparator.
    #[test]
    fn fetch_order_invariant(rows in prop::collection::vec((0i64..100, -50i64..50), 0..60)) {
        let source = Source::new("t", vec!["id".into(), "v".into()], vec![0]).unwrap();
        let mut present = BTreeSet::new();
        for (id, v) in rows {
            if present.insert(id) {
                source.apply(SourceChange::Add { row: row(id, v) }).unwrap();
            }
        }
        let conn = source.connect(vec![(1, Direction::Asc)]).unwrap();
        let schema = conn.schema();

        let fetched: Vec<Row> = conn.fetch(FetchRequest::all()).map(|n| n.row).collect();
        for pair in fetched.windows(2) {
            prop_assert!(schema.compare_rows(&pair[0], &pair[1]).is_lt());
        }

        let reversed: Vec<Row> = conn
            .fetch(FetchRequest { reverse: true, ..FetchRequest::all() })
            .map(|n| n.row)
            .collect();
        for pair in reversed.windows(2) {
            prop_assert!(schema.compare_rows(&pair[0], &pair[1]).is_gt());
        }
    }

    /// After an arbitrary interleaving of adds and removes, the multiset a
    /// fetch reports equals the multiset implied by replaying the pushes.
    #[test]
    fn fetch_push_consistency(ops in ops()) {
        let source = Source::new("t", vec!["id".into(), "v".into()], vec![0]).unwrap();
        let conn = source.connect(vec![]).unwrap();
        let view = Capture::new(conn);
        prop_assert!(view.hydrate().is_empty());

        let mut live: std::collections::BTreeMap<i64, i64> = Default::default();
        for (is_add, id, v) in ops {
            if is_add {
                if live.contains_key(&id) {
                    continue;
                }
                live.insert(id, v);
                source.apply(SourceChange::Add { row: row(id, v) }).unwrap();
            } else {
                let Some(old_v) = live.remove(&id) else { continue };
                source.apply(SourceChange::Remove { row: row(id, old_v) }).unwrap();
            }
        }

        // Replay the pushes over an empty model.
        let mut model: BTreeSet<(i64, i64)> = BTreeSet::new();
        for push in view.take_pushes() {
            match push {
                CapturedChange::Add(n) => {
                    let k = (n.row.get(0).unwrap().as_i64().unwrap(), n.row.get(1).unwrap().as_i64().unwrap());
                    prop_assert!(model.insert(k));
                }
                CapturedChange::Remove(n) => {
                    let k = (n.row.get(0).unwrap().as_i64().unwrap(), n.row.get(1).unwrap().as_i64().unwrap());
                    prop_assert!(model.remove(&k));
                }
                other => prop_assert!(false, "unexpected push {:?}", other),
            }
        }

        let fetched: Vec<(i64, i64)> = view
            .hydrate()
            .into_iter()
            .map(|n| (n.row.get(0).unwrap().as_i64().unwrap(), n.row.get(1).unwrap().as_i64().unwrap()))
            .collect();
        prop_assert_eq!(fetched, model.into_iter().collect::<Vec<_>>());
    }

    /// Take's window always holds min(limit, total) rows, and every
    /// reported row is <= every unreported row under the comparator.
    #[test]
    fn take_window_invariant(ops in ops(), limit in 1usize..6) {
        let source = Source::new("t", vec!["id".into(), "v".into()], vec![0]).unwrap();
        let take = Take::new(source.connect(vec![(1, Direction::Asc)]).unwrap(), memory_handle(), limit, None);
        let view = Capture::new(take);
        prop_assert!(view.hydrate().is_empty());

        let mut live: std::collections::BTreeMap<i64, i64> = Default::default();
        for (is_add, id, v) in ops {
            if is_add {
                if live.contains_key(&id) {
                    continue;
                }
                live.insert(id, v);
                source.apply(SourceChange::Add { row: row(id, v) }).unwrap();
            } else {
                let Some(old_v) = live.remove(&id) else { continue };
                source.apply(SourceChange::Remove { row: row(id, old_v) }).unwrap();
            }

            let window: Vec<(i64, i64)> = view
                .hydrate()
                .into_iter()
                .map(|n| (n.row.get(1).unwrap().as_i64().unwrap(), n.row.get(0).unwrap().as_i64().unwrap()))
                .collect();
            prop_assert_eq!(window.len(), live.len().min(limit));

            // The window is exactly the first `limit` rows in (v, id) order.
            let mut expected: Vec<(i64, i64)> = live.iter().map(|(&id, &v)| (v, id)).collect();
            expected.sort();
            expected.truncate(limit);
            prop_assert_eq!(window, expected);
        }
    }
}
