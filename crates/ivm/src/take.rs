//! Take operator: a bounded window of the first `limit` rows.
//!
//! Take keeps the `limit` smallest rows of its input under the input's
//! comparator, incrementally. The state it persists is tiny: the current
//! window occupancy and the *bound* - the largest row presently inside the
//! window. Every boundary-crossing change is handled with O(1) bounded pulls
//! against the input (never a rescan): an add inside a full window evicts
//! the bound row and pulls the new boundary; a remove inside the window
//! pulls the first row past the bound as a replacement.
//!
//! The window can be kept globally or per unique value of a partition
//! column, which is what makes take-under-join (limit per parent) work. A
//! partitioned Take keeps one `TakeState` per partition value plus a global
//! `maxBound` - the largest bound ever set - used to answer fetches that are
//! not constrained on the partition key.
//!
//! Ordering is established once, at `Source::connect`; Take's boundary logic
//! is only correct for that single fixed order, so hydration requests must
//! not carry a start bound or a reverse flag.

use crate::change::Change;
use crate::node::{Node, NodeStream, empty_stream};
use crate::operator::{Basis, Constraint, FetchRequest, Operator, Output, OutputSlot, Start};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::Cell;
use core::cmp::Ordering;
use rill_core::{ColumnId, Row, Schema, Value};
use rill_storage::{StorageHandle, StorageKey};

/// Window bookkeeping for one partition.
#[derive(Clone, Debug, PartialEq)]
pub struct TakeState {
    /// Current window occupancy, <= limit.
    pub size: usize,
    /// The largest row presently inside the window, None if empty.
    pub bound: Option<Row>,
}

/// What a Take instance stores: per-partition window state plus the global
/// max bound.
#[derive(Clone, Debug, PartialEq)]
pub enum TakeEntry {
    State(TakeState),
    MaxBound(Row),
}

/// Storage handle injected into a Take instance.
pub type TakeStorage = StorageHandle<TakeEntry>;

fn state_key(partition_value: Option<Value>) -> StorageKey {
    match partition_value {
        None => alloc::vec![Value::String("take".into())],
        Some(v) => alloc::vec![Value::String("take".into()), v],
    }
}

fn max_bound_key() -> StorageKey {
    alloc::vec![Value::String("maxBound".into())]
}

pub struct Take {
    input: Rc<dyn Operator>,
    storage: TakeStorage,
    limit: usize,
    partition_key: Option<ColumnId>,
    schema: Rc<Schema>,
    output: OutputSlot,
    destroyed: Cell<bool>,
}

impl Take {
    pub fn new(
        input: Rc<dyn Operator>,
        storage: TakeStorage,
        limit: usize,
        partition_key: Option<ColumnId>,
    ) -> Rc<Self> {
        assert!(limit > 0, "take limit must be positive");
        let schema = input.schema();
        let take = Rc::new(Self {
            input,
            storage,
            limit,
            partition_key,
            schema,
            output: OutputSlot::new(),
            destroyed: Cell::new(false),
        });
        take.input
            .set_output(Rc::downgrade(&take) as Weak<dyn Output>);
        take
    }

    fn cmp(&self, a: &Row, b: &Row) -> Ordering {
        self.schema.compare_rows(a, b)
    }

    fn partition_value(&self, row: &Row) -> Option<Value> {
        self.partition_key
            .map(|k| row.get(k).cloned().unwrap_or(Value::Null))
    }

    fn partition_constraint(&self, row: &Row) -> Option<Constraint> {
        self.partition_key.map(|k| Constraint {
            key: k,
            value: row.get(k).cloned().unwrap_or(Value::Null),
        })
    }

    /// Whether a request's constraint addresses this Take's window state.
    fn constraint_matches(&self, constraint: Option<&Constraint>) -> bool {
        match self.partition_key {
            None => true,
            Some(k) => constraint.is_some_and(|c| c.key == k),
        }
    }

    fn request_partition_value(&self, req: &FetchRequest) -> Option<Value> {
        match (self.partition_key, &req.constraint) {
            (Some(_), Some(c)) => Some(c.value.clone()),
            _ => None,
        }
    }

    fn get_state(&self, key: &[Value]) -> Option<TakeState> {
        match self.storage.borrow().get(key) {
            Some(TakeEntry::State(state)) => Some(state),
            Some(TakeEntry::MaxBound(_)) => unreachable!("state key holds a bound"),
            None => None,
        }
    }

    fn get_max_bound(&self) -> Option<Row> {
        match self.storage.borrow().get(&max_bound_key()) {
            Some(TakeEntry::MaxBound(row)) => Some(row),
            Some(TakeEntry::State(_)) => unreachable!("bound key holds a state"),
            None => None,
        }
    }

    fn set_state(
        &self,
        key: StorageKey,
        size: usize,
        bound: Option<Row>,
        max_bound: Option<Row>,
    ) {
        let mut storage = self.storage.borrow_mut();
        if let Some(bound) = &bound {
            let grew = match &max_bound {
                None => true,
                Some(max) => self.cmp(bound, max) == Ordering::Greater,
            };
            if grew {
                storage.set(max_bound_key(), TakeEntry::MaxBound(bound.clone()));
            }
        }
        storage.set(key, TakeEntry::State(TakeState { size, bound }));
    }

    fn pull_one(&self, constraint: Option<Constraint>, start: Start, reverse: bool) -> Option<Node> {
        self.input
            .fetch(FetchRequest {
                constraint,
                start: Some(start),
                reverse,
            })
            .next()
    }

    /// First hydration of one partition's window: pull at most `limit`
    /// nodes, record the state, and emit them.
    fn initial_fetch(&self, req: FetchRequest) -> NodeStream {
        assert!(
            req.start.is_none(),
            "take hydration must not carry a start bound"
        );
        assert!(!req.reverse, "take hydration must not be reversed");
        assert!(
            self.partition_key.is_some() || req.constraint.is_none(),
            "unpartitioned take must hydrate unconstrained"
        );
        let key = state_key(self.request_partition_value(&req));
        assert!(self.get_state(&key).is_none());

        let nodes: Vec<Node> = self.input.fetch(req).take(self.limit).collect();
        let bound = nodes.last().map(|n| n.row.clone());
        self.set_state(key, nodes.len(), bound, self.get_max_bound());
        Box::new(nodes.into_iter())
    }

    fn push_non_edit(&self, change: Change) {
        let row = change.row().clone();
        let key = state_key(self.partition_value(&row));
        // The partition was never fetched: the change is irrelevant here.
        let Some(state) = self.get_state(&key) else {
            return;
        };
        let max_bound = self.get_max_bound();
        let constraint = self.partition_constraint(&row);
        match change {
            Change::Add { node } => self.push_add(key, state, max_bound, constraint, node),
            Change::Remove { node } => self.push_remove(key, state, max_bound, constraint, node),
            Change::Child { .. } => {
                // Nested changes pass through while the parent row is inside
                // the window.
                if let Some(bound) = &state.bound {
                    if self.cmp(change.row(), bound) != Ordering::Greater {
                        self.output.push(change);
                    }
                }
            }
            Change::Edit { .. } => unreachable!("edits are routed to push_edit"),
        }
    }

    fn push_add(
        &self,
        key: StorageKey,
        state: TakeState,
        max_bound: Option<Row>,
        constraint: Option<Constraint>,
        node: Node,
    ) {
        if state.size < self.limit {
            let bound = match &state.bound {
                Some(b) if self.cmp(b, &node.row) != Ordering::Less => b.clone(),
                _ => node.row.clone(),
            };
            self.set_state(key, state.size + 1, Some(bound), max_bound);
            self.output.push(Change::Add { node });
            return;
        }
        let bound = state.bound.expect("full window must have a bound");
        if self.cmp(&node.row, &bound) != Ordering::Less {
            // Beyond the window: irrelevant to this view.
            return;
        }
        // The added row lands inside a full window: evict the bound row and
        // find the new boundary. The input already reflects the add, so the
        // row just below the old bound may be the added row itself.
        let (bound_node, before_bound_node) = if self.limit == 1 {
            let bound_node = self
                .pull_one(
                    constraint,
                    Start {
                        row: bound.clone(),
                        basis: Basis::At,
                    },
                    false,
                )
                .expect("bound row must be fetchable");
            (bound_node, None)
        } else {
            let mut pulled = self.input.fetch(FetchRequest {
                constraint,
                start: Some(Start {
                    row: bound.clone(),
                    basis: Basis::At,
                }),
                reverse: true,
            });
            let bound_node = pulled.next().expect("bound row must be fetchable");
            (bound_node, pulled.next())
        };
        let new_bound = match &before_bound_node {
            Some(bb) if self.cmp(&node.row, &bb.row) != Ordering::Greater => bb.row.clone(),
            _ => node.row.clone(),
        };
        self.set_state(key, state.size, Some(new_bound), max_bound);
        self.output.push(Change::Remove { node: bound_node });
        self.output.push(Change::Add { node });
    }

    fn push_remove(
        &self,
        key: StorageKey,
        state: TakeState,
        max_bound: Option<Row>,
        constraint: Option<Constraint>,
        node: Node,
    ) {
        let Some(bound) = state.bound.clone() else {
            return;
        };
        if self.cmp(&node.row, &bound) == Ordering::Greater {
            return;
        }
        // A row inside the window went away. Refill from the first row past
        // the bound; if the bound itself was removed and nothing lies
        // beyond, the row just below it becomes the new bound.
        let before = self.pull_one(
            constraint.clone(),
            Start {
                row: bound.clone(),
                basis: Basis::After,
            },
            true,
        );
        let mut new_bound: Option<(Node, bool)> = before.map(|n| (n, false));
        if !matches!(new_bound, Some((_, true))) {
            for candidate in self.input.fetch(FetchRequest {
                constraint,
                start: Some(Start {
                    row: bound.clone(),
                    basis: Basis::At,
                }),
                reverse: false,
            }) {
                let past = self.cmp(&candidate.row, &bound) == Ordering::Greater;
                new_bound = Some((candidate, past));
                if past {
                    break;
                }
            }
        }
        match new_bound {
            Some((replacement, true)) => {
                self.set_state(key, state.size, Some(replacement.row.clone()), max_bound);
                self.output.push(Change::Remove { node });
                self.output.push(Change::Add { node: replacement });
            }
            other => {
                self.set_state(key, state.size - 1, other.map(|(n, _)| n.row), max_bound);
                self.output.push(Change::Remove { node });
            }
        }
    }

    fn push_edit(&self, old_node: Node, node: Node) {
        if let Some(k) = self.partition_key {
            let old_value = old_node.row.get(k).unwrap_or(&Value::Null);
            let new_value = node.row.get(k).unwrap_or(&Value::Null);
            if old_value != new_value {
                // The row moved to another partition's window.
                self.push_non_edit(Change::Remove { node: old_node });
                self.push_non_edit(Change::Add { node });
                return;
            }
        }
        let key = state_key(self.partition_value(&old_node.row));
        let Some(state) = self.get_state(&key) else {
            return;
        };
        let max_bound = self.get_max_bound();
        let constraint = self.partition_constraint(&old_node.row);
        let bound = state.bound.clone().expect("Bound should be set");
        let old_cmp = self.cmp(&old_node.row, &bound);
        let new_cmp = self.cmp(&node.row, &bound);

        match old_cmp {
            Ordering::Equal => {
                // The bound row itself was edited.
                if new_cmp == Ordering::Equal {
                    self.output.push(Change::Edit { old_node, node });
                    return;
                }
                if new_cmp == Ordering::Less {
                    if self.limit == 1 {
                        self.set_state(key, state.size, Some(node.row.clone()), max_bound);
                        self.output.push(Change::Edit { old_node, node });
                        return;
                    }
                    // Still in the window, but no longer necessarily the
                    // bound: the row now just below the old bound is.
                    let before_bound = self
                        .pull_one(
                            constraint,
                            Start {
                                row: bound,
                                basis: Basis::After,
                            },
                            true,
                        )
                        .expect("window must hold a row below the bound");
                    self.set_state(key, state.size, Some(before_bound.row), max_bound);
                    self.output.push(Change::Edit { old_node, node });
                    return;
                }
                // The bound row moved up; the first row at or past the old
                // bound becomes the new bound.
                let new_bound_node = self
                    .pull_one(
                        constraint,
                        Start {
                            row: bound,
                            basis: Basis::At,
                        },
                        false,
                    )
                    .expect("edited row must be fetchable");
                if self.cmp(&new_bound_node.row, &node.row) == Ordering::Equal {
                    // The edited row is still the bound.
                    self.set_state(key, state.size, Some(node.row.clone()), max_bound);
                    self.output.push(Change::Edit { old_node, node });
                    return;
                }
                self.set_state(key, state.size, Some(new_bound_node.row.clone()), max_bound);
                self.output.push(Change::Remove { node: old_node });
                self.output.push(Change::Add {
                    node: new_bound_node,
                });
            }
            Ordering::Greater => {
                assert!(
                    new_cmp != Ordering::Equal,
                    "row has duplicate primary key"
                );
                if new_cmp == Ordering::Greater {
                    // Outside the window before and after.
                    return;
                }
                // The row entered the window, pushing the bound row out.
                let mut pulled = self.input.fetch(FetchRequest {
                    constraint,
                    start: Some(Start {
                        row: bound,
                        basis: Basis::At,
                    }),
                    reverse: true,
                });
                let old_bound_node = pulled.next().expect("bound row must be fetchable");
                let new_bound_node = pulled.next().expect("window must hold a second row");
                self.set_state(key, state.size, Some(new_bound_node.row), max_bound);
                self.output.push(Change::Remove {
                    node: old_bound_node,
                });
                self.output.push(Change::Add { node });
            }
            Ordering::Less => {
                assert!(
                    new_cmp != Ordering::Equal,
                    "row has duplicate primary key"
                );
                if new_cmp == Ordering::Less {
                    // Inside the window before and after.
                    self.output.push(Change::Edit { old_node, node });
                    return;
                }
                // The row left the window past the bound; the first row
                // beyond the old bound replaces it.
                let after_bound = self
                    .pull_one(
                        constraint,
                        Start {
                            row: bound,
                            basis: Basis::After,
                        },
                        false,
                    )
                    .expect("a row must exist past the bound");
                if self.cmp(&after_bound.row, &node.row) == Ordering::Equal {
                    // The edited row becomes the new bound.
                    self.set_state(key, state.size, Some(node.row.clone()), max_bound);
                    self.output.push(Change::Edit { old_node, node });
                    return;
                }
                self.set_state(key, state.size, Some(after_bound.row.clone()), max_bound);
                self.output.push(Change::Remove { node: old_node });
                self.output.push(Change::Add { node: after_bound });
            }
        }
    }
}

impl Operator for Take {
    fn schema(&self) -> Rc<Schema> {
        self.schema.clone()
    }

    fn fetch(&self, req: FetchRequest) -> NodeStream {
        if self.constraint_matches(req.constraint.as_ref()) {
            let key = state_key(self.request_partition_value(&req));
            let Some(state) = self.get_state(&key) else {
                return self.initial_fetch(req);
            };
            let Some(bound) = state.bound else {
                return empty_stream();
            };
            let schema = self.schema.clone();
            let reverse = req.reverse;
            let inner = self.input.fetch(req);
            if reverse {
                Box::new(inner.skip_while(move |n| {
                    schema.compare_rows(&n.row, &bound) == Ordering::Greater
                }))
            } else {
                Box::new(inner.take_while(move |n| {
                    schema.compare_rows(&bound, &n.row) != Ordering::Less
                }))
            }
        } else {
            // Constrained on something other than the partition key, so no
            // single window state applies. Bound the scan by the largest
            // bound ever set and filter each row by its own partition.
            let Some(max_bound) = self.get_max_bound() else {
                return empty_stream();
            };
            let partition_key = self
                .partition_key
                .expect("constraint mismatch requires a partition key");
            let outer_schema = self.schema.clone();
            let inner_schema = self.schema.clone();
            let storage = self.storage.clone();
            Box::new(
                self.input
                    .fetch(req)
                    .take_while(move |n| {
                        outer_schema.compare_rows(&n.row, &max_bound) != Ordering::Greater
                    })
                    .filter(move |n| {
                        let value = n.row.get(partition_key).cloned().unwrap_or(Value::Null);
                        match storage.borrow().get(&state_key(Some(value))) {
                            Some(TakeEntry::State(state)) => state.bound.is_some_and(|b| {
                                inner_schema.compare_rows(&b, &n.row) != Ordering::Less
                            }),
                            _ => false,
                        }
                    }),
            )
        }
    }

    fn cleanup(&self, req: FetchRequest) -> NodeStream {
        assert!(
            req.start.is_none(),
            "take cleanup must not carry a start bound"
        );
        assert!(
            self.constraint_matches(req.constraint.as_ref()),
            "take cleanup must be constrained on the partition key"
        );
        let key = state_key(self.request_partition_value(&req));
        let state = self.get_state(&key).expect("cleanup of unhydrated take");
        self.storage.borrow_mut().del(&key);
        let Some(bound) = state.bound else {
            return empty_stream();
        };
        let schema = self.schema.clone();
        Box::new(
            self.input
                .cleanup(req)
                .take_while(move |n| schema.compare_rows(&bound, &n.row) != Ordering::Less),
        )
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.output.set(output);
    }

    fn destroy(&self) {
        if !self.destroyed.replace(true) {
            self.input.destroy();
        }
    }
}

impl Output for Take {
    fn push(&self, change: Change) {
        match change {
            Change::Edit { old_node, node } => self.push_edit(old_node, node),
            change => self.push_non_edit(change),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Capture, CapturedChange, CapturedNode};
    use crate::change::{ChildChange, SourceChange};
    use crate::source::Source;
    use alloc::vec;
    use rill_storage::memory_handle;

    fn row(id: i64) -> Row {
        Row::new(vec![Value::Int64(id)])
    }

    fn setup(limit: usize, ids: &[i64]) -> (Rc<Source>, Rc<Take>, Rc<Capture>) {
        let source = Source::new("t", vec!["id".into()], vec![0]).unwrap();
        for &id in ids {
            source.apply(SourceChange::Add { row: row(id) }).unwrap();
        }
        let conn = source.connect(vec![]).unwrap();
        let take = Take::new(conn, memory_handle(), limit, None);
        let capture = Capture::new(take.clone());
        (source, take, capture)
    }

    fn window(capture: &Capture) -> Vec<i64> {
        capture
            .hydrate()
            .into_iter()
            .map(|n| n.row.get(0).unwrap().as_i64().unwrap())
            .collect()
    }

    #[test]
    #[should_panic(expected = "take limit must be positive")]
    fn test_zero_limit_rejected() {
        let source = Source::new("t", vec!["id".into()], vec![0]).unwrap();
        let conn = source.connect(vec![]).unwrap();
        Take::new(conn, memory_handle(), 0, None);
    }

    #[test]
    fn test_initial_fetch_bounds_window() {
        let (_s, _t, capture) = setup(3, &[1, 2, 3, 4, 5]);
        assert_eq!(window(&capture), vec![1, 2, 3]);
        // Subsequent fetches serve from the recorded bound.
        assert_eq!(window(&capture), vec![1, 2, 3]);
    }

    #[test]
    fn test_window_smaller_than_limit() {
        let (source, _t, capture) = setup(5, &[1, 2]);
        assert_eq!(window(&capture), vec![1, 2]);
        // There is free capacity, so a push past the current bound grows
        // the window.
        source.apply(SourceChange::Add { row: row(7) }).unwrap();
        assert_eq!(
            capture.take_pushes(),
            vec![CapturedChange::Add(CapturedNode::leaf(row(7)))]
        );
        assert_eq!(window(&capture), vec![1, 2, 7]);
    }

    #[test]
    fn test_add_beyond_full_window_ignored() {
        // Full window, add beyond the bound: nothing moves.
        let (source, _t, capture) = setup(5, &[4, 6, 8, 10, 12, 14]);
        assert_eq!(window(&capture), vec![4, 6, 8, 10, 12]);
        source.apply(SourceChange::Add { row: row(16) }).unwrap();
        assert!(capture.pushes().is_empty());
        assert_eq!(window(&capture), vec![4, 6, 8, 10, 12]);
    }

    #[test]
    fn test_add_inside_full_window_evicts_bound() {
        // Full window, add below the window start: the bound row is evicted.
        let (source, _t, capture) = setup(5, &[4, 6, 8, 10, 12]);
        assert_eq!(window(&capture), vec![4, 6, 8, 10, 12]);
        source.apply(SourceChange::Add { row: row(3) }).unwrap();
        assert_eq!(
            capture.take_pushes(),
            vec![
                CapturedChange::Remove(CapturedNode::leaf(row(12))),
                CapturedChange::Add(CapturedNode::leaf(row(3))),
            ]
        );
        assert_eq!(window(&capture), vec![3, 4, 6, 8, 10]);
    }

    #[test]
    fn test_remove_inside_window_refills() {
        let (source, _t, capture) = setup(3, &[1, 2, 3, 4, 5]);
        assert_eq!(window(&capture), vec![1, 2, 3]);
        source.apply(SourceChange::Remove { row: row(2) }).unwrap();
        assert_eq!(
            capture.take_pushes(),
            vec![
                CapturedChange::Remove(CapturedNode::leaf(row(2))),
                CapturedChange::Add(CapturedNode::leaf(row(4))),
            ]
        );
        assert_eq!(window(&capture), vec![1, 3, 4]);
    }

    #[test]
    fn test_remove_bound_without_replacement_shrinks() {
        let (source, _t, capture) = setup(3, &[1, 2]);
        assert_eq!(window(&capture), vec![1, 2]);
        source.apply(SourceChange::Remove { row: row(2) }).unwrap();
        assert_eq!(
            capture.take_pushes(),
            vec![CapturedChange::Remove(CapturedNode::leaf(row(2)))]
        );
        assert_eq!(window(&capture), vec![1]);
    }

    #[test]
    fn test_remove_beyond_window_ignored() {
        let (source, _t, capture) = setup(3, &[1, 2, 3, 4]);
        assert_eq!(window(&capture), vec![1, 2, 3]);
        source.apply(SourceChange::Remove { row: row(4) }).unwrap();
        assert!(capture.pushes().is_empty());
    }

    #[test]
    fn test_push_before_hydration_ignored() {
        let (source, _t, capture) = setup(3, &[1, 2, 3]);
        source.apply(SourceChange::Add { row: row(0) }).unwrap();
        assert!(capture.pushes().is_empty());
        // Hydration after the push sees the row.
        assert_eq!(window(&capture), vec![0, 1, 2]);
    }

    #[test]
    fn test_edit_inside_window_passes_through() {
        let source = Source::new("t", vec!["id".into(), "v".into()], vec![0]).unwrap();
        let r = |id: i64, v: i64| Row::new(vec![Value::Int64(id), Value::Int64(v)]);
        for id in [1, 2, 3, 4] {
            source.apply(SourceChange::Add { row: r(id, id * 10) }).unwrap();
        }
        let conn = source.connect(vec![]).unwrap();
        let take = Take::new(conn, memory_handle(), 3, None);
        let capture = Capture::new(take);
        capture.hydrate();
        source
            .apply(SourceChange::Edit {
                old_row: r(2, 20),
                row: r(2, 21),
            })
            .unwrap();
        assert_eq!(
            capture.take_pushes(),
            vec![CapturedChange::Edit {
                old: CapturedNode::leaf(r(2, 20)),
                new: CapturedNode::leaf(r(2, 21)),
            }]
        );
    }

    #[test]
    fn test_edit_moving_row_past_bound_splits() {
        // Sorted by v; editing v moves the row across the boundary.
        let source = Source::new("t", vec!["id".into(), "v".into()], vec![0]).unwrap();
        let r = |id: i64, v: i64| Row::new(vec![Value::Int64(id), Value::Int64(v)]);
        for (id, v) in [(1, 10), (2, 20), (3, 30), (4, 40)] {
            source.apply(SourceChange::Add { row: r(id, v) }).unwrap();
        }
        let conn = source.connect(vec![(1, rill_core::Direction::Asc)]).unwrap();
        let take = Take::new(conn, memory_handle(), 3, None);
        let capture = Capture::new(take);
        assert_eq!(
            capture
                .hydrate()
                .into_iter()
                .map(|n| n.row.get(0).unwrap().as_i64().unwrap())
                .collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        // Row 2 jumps past the bound (v 20 -> 99): row 4 takes its place.
        source
            .apply(SourceChange::Edit {
                old_row: r(2, 20),
                row: r(2, 99),
            })
            .unwrap();
        assert_eq!(
            capture.take_pushes(),
            vec![
                CapturedChange::Remove(CapturedNode::leaf(r(2, 20))),
                CapturedChange::Add(CapturedNode::leaf(r(4, 40))),
            ]
        );
        // Row 4 edited to the bottom of the window: stays an edit, the
        // bound recomputes to row 3.
        source
            .apply(SourceChange::Edit {
                old_row: r(4, 40),
                row: r(4, 5),
            })
            .unwrap();
        assert_eq!(
            capture.take_pushes(),
            vec![CapturedChange::Edit {
                old: CapturedNode::leaf(r(4, 40)),
                new: CapturedNode::leaf(r(4, 5)),
            }]
        );
        // A row beyond the recomputed bound is still ignored.
        source.apply(SourceChange::Add { row: r(5, 50) }).unwrap();
        assert!(capture.pushes().is_empty());
    }

    #[test]
    fn test_edit_entering_window_evicts_bound() {
        let source = Source::new("t", vec!["id".into(), "v".into()], vec![0]).unwrap();
        let r = |id: i64, v: i64| Row::new(vec![Value::Int64(id), Value::Int64(v)]);
        for (id, v) in [(1, 10), (2, 20), (3, 30), (4, 40)] {
            source.apply(SourceChange::Add { row: r(id, v) }).unwrap();
        }
        let conn = source.connect(vec![(1, rill_core::Direction::Asc)]).unwrap();
        let take = Take::new(conn, memory_handle(), 3, None);
        let capture = Capture::new(take);
        capture.hydrate();
        // Row 4 (outside) edited inside: the bound row 3 is pushed out.
        source
            .apply(SourceChange::Edit {
                old_row: r(4, 40),
                row: r(4, 15),
            })
            .unwrap();
        assert_eq!(
            capture.take_pushes(),
            vec![
                CapturedChange::Remove(CapturedNode::leaf(r(3, 30))),
                CapturedChange::Add(CapturedNode::leaf(r(4, 15))),
            ]
        );
        let ids: Vec<i64> = capture
            .hydrate()
            .into_iter()
            .map(|n| n.row.get(0).unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 4, 2]);
    }

    #[test]
    fn test_partitioned_windows_are_independent() {
        // Two parents (10, 20), limit 2 children each.
        let source = Source::new("c", vec!["id".into(), "parent".into()], vec![0]).unwrap();
        let r = |id: i64, parent: i64| Row::new(vec![Value::Int64(id), Value::Int64(parent)]);
        for (id, parent) in [(1, 10), (2, 10), (3, 10), (4, 20), (5, 20)] {
            source
                .apply(SourceChange::Add { row: r(id, parent) })
                .unwrap();
        }
        let conn = source.connect(vec![]).unwrap();
        let take = Take::new(conn, memory_handle(), 2, Some(1));
        let capture = Capture::new(take);

        let fetch_parent = |p: i64| {
            capture
                .fetch(FetchRequest::constrained(1, Value::Int64(p)))
                .into_iter()
                .map(|n| n.row.get(0).unwrap().as_i64().unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(fetch_parent(10), vec![1, 2]);
        assert_eq!(fetch_parent(20), vec![4, 5]);

        // A change in one partition leaves the other untouched.
        source.apply(SourceChange::Remove { row: r(1, 10) }).unwrap();
        assert_eq!(
            capture.take_pushes(),
            vec![
                CapturedChange::Remove(CapturedNode::leaf(r(1, 10))),
                CapturedChange::Add(CapturedNode::leaf(r(3, 10))),
            ]
        );
        assert_eq!(fetch_parent(10), vec![2, 3]);
        assert_eq!(fetch_parent(20), vec![4, 5]);
    }

    #[test]
    fn test_partitioned_fetch_without_constraint_uses_max_bound() {
        let source = Source::new("c", vec!["id".into(), "parent".into()], vec![0]).unwrap();
        let r = |id: i64, parent: i64| Row::new(vec![Value::Int64(id), Value::Int64(parent)]);
        for (id, parent) in [(1, 10), (2, 10), (3, 10), (4, 20), (5, 20)] {
            source
                .apply(SourceChange::Add { row: r(id, parent) })
                .unwrap();
        }
        let conn = source.connect(vec![]).unwrap();
        let take = Take::new(conn, memory_handle(), 2, Some(1));
        let capture = Capture::new(take);

        // Nothing hydrated yet: an unconstrained fetch sees nothing.
        assert!(capture.hydrate().is_empty());

        capture.fetch(FetchRequest::constrained(1, Value::Int64(10)));
        capture.fetch(FetchRequest::constrained(1, Value::Int64(20)));

        let ids: Vec<i64> = capture
            .hydrate()
            .into_iter()
            .map(|n| n.row.get(0).unwrap().as_i64().unwrap())
            .collect();
        // Rows inside each partition's window, id 3 excluded.
        assert_eq!(ids, vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_child_change_forwarded_inside_bound() {
        let (_s, take, capture) = setup(2, &[1, 2, 3]);
        capture.hydrate();
        let child = |id: i64| Change::Child {
            row: row(id),
            child: ChildChange {
                relationship_name: "items".into(),
                change: Box::new(Change::Add {
                    node: Node::leaf(row(100)),
                }),
            },
        };
        take.push(child(2));
        take.push(child(3));
        let pushes = capture.take_pushes();
        assert_eq!(pushes.len(), 1);
        assert!(
            matches!(&pushes[0], CapturedChange::Child { row: r, .. } if *r == row(2))
        );
    }

    #[test]
    fn test_cleanup_releases_state() {
        let (_s, _t, capture) = setup(3, &[1, 2, 3, 4]);
        assert_eq!(window(&capture), vec![1, 2, 3]);
        let cleaned: Vec<i64> = capture
            .cleanup(FetchRequest::all())
            .into_iter()
            .map(|n| n.row.get(0).unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(cleaned, vec![1, 2, 3]);
        // State is gone: the next fetch re-hydrates.
        assert_eq!(window(&capture), vec![1, 2, 3]);
    }
}
