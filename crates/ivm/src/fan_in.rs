//! FanIn operator: merges query-plan branches back into one stream.
//!
//! The branches downstream of one [`FanOut`](crate::fan_out::FanOut) (for
//! example, one filter per disjunct of an OR) each see every upstream change
//! and each produce their own filtered view. FanIn recombines them:
//!
//! - `fetch` is a k-way merge over the branch streams, deduplicating rows
//!   that compare equal under the shared comparator (a row satisfying more
//!   than one disjunct appears in more than one branch).
//! - `push` coalesces the copies of one logical change arriving through
//!   several branches into a single downstream push: the first occurrence
//!   within one FanOut propagation step is forwarded, structurally equal
//!   repeats are suppressed. The ledger is keyed by the FanOut's step
//!   counter, so nothing persists across propagation steps.
//! - `cleanup` drives every branch's cleanup path exactly once per branch -
//!   each branch owns its own filter state even though they share the
//!   FanOut - while emitting the same deduplicated merge as `fetch`.

use crate::change::Change;
use crate::fan_out::FanOut;
use crate::node::{Node, NodeStream};
use crate::operator::{FetchRequest, Operator, Output, OutputSlot, PullMode, pull};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::cmp::Ordering;
use core::iter::Peekable;
use rill_core::{Row, Schema};

/// Structural identity of a change, used as the dedup key. Relationship
/// streams cannot be compared, so identity is the change shape plus every
/// row it carries, recursing through child changes.
#[derive(Clone, Debug, PartialEq)]
enum ChangeKey {
    Add(Row),
    Remove(Row),
    Edit(Row, Row),
    Child(Row, String, Box<ChangeKey>),
}

impl ChangeKey {
    fn of(change: &Change) -> Self {
        match change {
            Change::Add { node } => ChangeKey::Add(node.row.clone()),
            Change::Remove { node } => ChangeKey::Remove(node.row.clone()),
            Change::Edit { old_node, node } => {
                ChangeKey::Edit(old_node.row.clone(), node.row.clone())
            }
            Change::Child { row, child } => ChangeKey::Child(
                row.clone(),
                child.relationship_name.clone(),
                Box::new(ChangeKey::of(&child.change)),
            ),
        }
    }
}

struct PushLedger {
    seq: u64,
    forwarded: Vec<ChangeKey>,
}

pub struct FanIn {
    fan_out: Rc<FanOut>,
    inputs: Vec<Rc<dyn Operator>>,
    schema: Rc<Schema>,
    output: OutputSlot,
    destroyed: Cell<bool>,
    ledger: RefCell<PushLedger>,
}

impl FanIn {
    /// Builds a FanIn over the ordered branch list. Every branch must share
    /// the FanOut ancestor's row ordering.
    pub fn new(fan_out: Rc<FanOut>, inputs: Vec<Rc<dyn Operator>>) -> Rc<Self> {
        assert!(!inputs.is_empty(), "fan-in requires at least one branch");
        let schema = fan_out.schema();
        for input in &inputs {
            assert!(
                input.schema().sort() == schema.sort(),
                "fan-in branches must share the fan-out ordering"
            );
        }
        let fan_in = Rc::new(Self {
            fan_out,
            inputs,
            schema,
            output: OutputSlot::new(),
            destroyed: Cell::new(false),
            ledger: RefCell::new(PushLedger {
                seq: 0,
                forwarded: Vec::new(),
            }),
        });
        for input in &fan_in.inputs {
            input.set_output(Rc::downgrade(&fan_in) as Weak<dyn Output>);
        }
        fan_in
    }

    fn merge(&self, mode: PullMode, req: FetchRequest) -> NodeStream {
        let streams: Vec<Peekable<NodeStream>> = self
            .inputs
            .iter()
            .map(|input| pull(input, mode, req.clone()).peekable())
            .collect();
        Box::new(MergeStream {
            schema: self.schema.clone(),
            reverse: req.reverse,
            streams,
        })
    }
}

impl Operator for FanIn {
    fn schema(&self) -> Rc<Schema> {
        self.schema.clone()
    }

    fn fetch(&self, req: FetchRequest) -> NodeStream {
        self.merge(PullMode::Fetch, req)
    }

    fn cleanup(&self, req: FetchRequest) -> NodeStream {
        // Every branch's cleanup runs - the merge drains all of them - even
        // though duplicate rows are emitted once.
        self.merge(PullMode::Cleanup, req)
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.output.set(output);
    }

    fn destroy(&self) {
        if !self.destroyed.replace(true) {
            for input in &self.inputs {
                input.destroy();
            }
        }
    }
}

impl Output for FanIn {
    fn push(&self, change: Change) {
        let seq = self.fan_out.push_seq();
        {
            let mut ledger = self.ledger.borrow_mut();
            if ledger.seq != seq {
                ledger.seq = seq;
                ledger.forwarded.clear();
            }
            let key = ChangeKey::of(&change);
            if ledger.forwarded.contains(&key) {
                return;
            }
            ledger.forwarded.push(key);
        }
        self.output.push(change);
    }
}

/// K-way merge over the branch streams, deduplicating rows that compare
/// equal: when several branches surface the same row, all of them advance
/// but only one copy is emitted.
struct MergeStream {
    schema: Rc<Schema>,
    reverse: bool,
    streams: Vec<Peekable<NodeStream>>,
}

impl Iterator for MergeStream {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let mut best: Option<(usize, Row)> = None;
        for i in 0..self.streams.len() {
            let Some(candidate) = self.streams[i].peek() else {
                continue;
            };
            let row = candidate.row.clone();
            match &best {
                None => best = Some((i, row)),
                Some((_, best_row)) => {
                    let cmp = self.schema.compare_rows(&row, best_row);
                    let earlier = if self.reverse {
                        cmp == Ordering::Greater
                    } else {
                        cmp == Ordering::Less
                    };
                    if earlier {
                        best = Some((i, row));
                    }
                }
            }
        }
        let (best, _) = best?;
        let node = self.streams[best].next().expect("peeked stream must yield");
        // Advance every other branch sitting on the same row.
        for (i, stream) in self.streams.iter_mut().enumerate() {
            if i == best {
                continue;
            }
            if let Some(peeked) = stream.peek() {
                if self.schema.compare_rows(&peeked.row, &node.row) == Ordering::Equal {
                    stream.next();
                }
            }
        }
        Some(node)
    }
}
