//! Terminal consumer that materializes lazy results.
//!
//! `Capture` sits at the downstream end of an operator chain: it expands the
//! lazy nodes and relationship streams produced by `fetch`/`cleanup` into
//! plain values, and records every pushed change in expanded form. It is the
//! reference implementation of the view-consumer contract and the harness
//! the operator tests are written against.

use crate::change::Change;
use crate::node::{Node, NodeStream};
use crate::operator::{FetchRequest, Operator, Output};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use rill_core::Row;

/// A fully-materialized node: the row plus its expanded relationships,
/// sorted by relationship name.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedNode {
    pub row: Row,
    pub relationships: Vec<(String, Vec<CapturedNode>)>,
}

/// A fully-materialized change.
#[derive(Clone, Debug, PartialEq)]
pub enum CapturedChange {
    Add(CapturedNode),
    Remove(CapturedNode),
    Edit {
        old: CapturedNode,
        new: CapturedNode,
    },
    Child {
        row: Row,
        relationship_name: String,
        change: Box<CapturedChange>,
    },
}

/// Expands a node, evaluating every relationship thunk and draining the
/// resulting streams.
pub fn expand_node(node: Node) -> CapturedNode {
    let mut relationships: Vec<(String, Vec<CapturedNode>)> = node
        .relationships
        .iter()
        .map(|(name, rel)| (name.clone(), expand_stream(rel())))
        .collect();
    relationships.sort_by(|a, b| a.0.cmp(&b.0));
    CapturedNode {
        row: node.row,
        relationships,
    }
}

/// Drains a stream, expanding each node.
pub fn expand_stream(stream: NodeStream) -> Vec<CapturedNode> {
    stream.map(expand_node).collect()
}

/// Expands a change, materializing the nodes it carries.
pub fn expand_change(change: Change) -> CapturedChange {
    match change {
        Change::Add { node } => CapturedChange::Add(expand_node(node)),
        Change::Remove { node } => CapturedChange::Remove(expand_node(node)),
        Change::Edit { old_node, node } => CapturedChange::Edit {
            old: expand_node(old_node),
            new: expand_node(node),
        },
        Change::Child { row, child } => CapturedChange::Child {
            row,
            relationship_name: child.relationship_name,
            change: Box::new(expand_change(*child.change)),
        },
    }
}

/// Terminal consumer wrapping the outermost operator of a chain.
pub struct Capture {
    input: Rc<dyn Operator>,
    pushes: RefCell<Vec<CapturedChange>>,
}

impl Capture {
    /// Wraps an operator and registers as its output.
    pub fn new(input: Rc<dyn Operator>) -> Rc<Self> {
        let capture = Rc::new(Self {
            input,
            pushes: RefCell::new(Vec::new()),
        });
        capture
            .input
            .set_output(Rc::downgrade(&capture) as Weak<dyn Output>);
        capture
    }

    /// Fetches everything in the operator's order, fully expanded.
    pub fn hydrate(&self) -> Vec<CapturedNode> {
        self.fetch(FetchRequest::all())
    }

    /// Fetches with an explicit request, fully expanded.
    pub fn fetch(&self, req: FetchRequest) -> Vec<CapturedNode> {
        expand_stream(self.input.fetch(req))
    }

    /// Cleans up with an explicit request, fully expanded. Draining the
    /// result is what drives the release of upstream state.
    pub fn cleanup(&self, req: FetchRequest) -> Vec<CapturedNode> {
        expand_stream(self.input.cleanup(req))
    }

    /// The changes pushed so far, in arrival order.
    pub fn pushes(&self) -> Vec<CapturedChange> {
        self.pushes.borrow().clone()
    }

    /// Drains and returns the recorded changes.
    pub fn take_pushes(&self) -> Vec<CapturedChange> {
        core::mem::take(&mut *self.pushes.borrow_mut())
    }

    /// Tears down the wrapped chain.
    pub fn destroy(&self) {
        self.input.destroy();
    }
}

impl Output for Capture {
    fn push(&self, change: Change) {
        let expanded = expand_change(change);
        self.pushes.borrow_mut().push(expanded);
    }
}

impl CapturedNode {
    /// Convenience constructor for expected values in tests.
    pub fn leaf(row: Row) -> Self {
        Self {
            row,
            relationships: Vec::new(),
        }
    }
}
