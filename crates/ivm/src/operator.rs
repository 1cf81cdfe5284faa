//! The operator contract: pull-side and push-side traits, fetch requests,
//! and output wiring.
//!
//! Ownership flows downstream to upstream: an operator owns `Rc` handles to
//! its inputs, and an input holds only a `Weak` back-reference to the output
//! registered on it. Destroying the outermost operator of a subscription
//! propagates upstream and unhooks every link exactly once.

use crate::change::Change;
use crate::node::NodeStream;
use alloc::rc::{Rc, Weak};
use core::cell::RefCell;
use rill_core::{ColumnId, Row, Schema, Value};

/// Restricts a fetch to rows whose `key` column equals `value`.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub key: ColumnId,
    pub value: Value,
}

/// Inclusion semantics of a fetch start bound, relative to the traversal
/// direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Basis {
    /// Start one row before the bound (the bound's predecessor in traversal
    /// order, or the first row at/past the bound if it has no predecessor).
    Before,
    /// Start at the bound row if present, else the first row past it.
    At,
    /// Start strictly past the bound row.
    After,
}

/// A resumable cursor: where a fetch stream starts.
#[derive(Clone, Debug)]
pub struct Start {
    pub row: Row,
    pub basis: Basis,
}

/// A pull request against an operator.
#[derive(Clone, Debug, Default)]
pub struct FetchRequest {
    pub constraint: Option<Constraint>,
    pub start: Option<Start>,
    pub reverse: bool,
}

impl FetchRequest {
    /// A request for everything, in the operator's order.
    pub fn all() -> Self {
        Self::default()
    }

    /// A request constrained to rows whose `key` column equals `value`.
    pub fn constrained(key: ColumnId, value: Value) -> Self {
        Self {
            constraint: Some(Constraint { key, value }),
            start: None,
            reverse: false,
        }
    }
}

/// Push side of the operator contract: where changes are delivered.
pub trait Output {
    /// Delivers one change. Must complete synchronously, forwarding
    /// downstream as needed, before returning to the caller.
    fn push(&self, change: Change);
}

/// Pull side of the operator contract.
pub trait Operator {
    /// Schema of this operator's output. Operators that preserve ordering
    /// delegate to their (primary) input.
    fn schema(&self) -> Rc<Schema>;

    /// Returns an ordered, lazy, single-pass stream of the operator's
    /// current result. Each call returns a fresh stream.
    fn fetch(&self, req: FetchRequest) -> NodeStream;

    /// Identical contract to `fetch`, but additionally releases any state
    /// retained for the returned rows: the caller is discarding interest.
    fn cleanup(&self, req: FetchRequest) -> NodeStream;

    /// Registers the downstream output pushes are forwarded to.
    fn set_output(&self, output: Weak<dyn Output>);

    /// Tears the operator down, propagating to its inputs exactly once.
    fn destroy(&self);
}

/// Whether a pull is hydrating (`fetch`) or releasing (`cleanup`) state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullMode {
    Fetch,
    Cleanup,
}

/// Pulls from an operator in the given mode.
pub fn pull(op: &Rc<dyn Operator>, mode: PullMode, req: FetchRequest) -> NodeStream {
    match mode {
        PullMode::Fetch => op.fetch(req),
        PullMode::Cleanup => op.cleanup(req),
    }
}

/// The single registered output of an operator.
///
/// Pushing through an unset (or already-dropped) slot is a contract
/// violation: the graph is mis-wired, and the push panics loudly.
pub struct OutputSlot {
    output: RefCell<Option<Weak<dyn Output>>>,
}

impl OutputSlot {
    pub fn new() -> Self {
        Self {
            output: RefCell::new(None),
        }
    }

    /// Registers the output, replacing any previous registration.
    pub fn set(&self, output: Weak<dyn Output>) {
        *self.output.borrow_mut() = Some(output);
    }

    /// Pushes a change to the registered output.
    pub fn push(&self, change: Change) {
        let output = self
            .output
            .borrow()
            .clone()
            .and_then(|weak| weak.upgrade())
            .expect("Output not set");
        output.push(change);
    }
}

impl Default for OutputSlot {
    fn default() -> Self {
        Self::new()
    }
}
