//! FanOut operator: one upstream subscription, many logical branches.
//!
//! A pure broadcaster. Every push received from the single input is
//! forwarded, unmodified, to every registered branch output in registration
//! order; fetch and cleanup delegate straight to the input, since branches
//! do their own filtering on top. FanOut also numbers its propagation steps
//! so the matching [`FanIn`](crate::fan_in::FanIn) can scope its push
//! deduplication to a single step.

use crate::change::Change;
use crate::node::NodeStream;
use crate::operator::{FetchRequest, Operator, Output};
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use rill_core::Schema;

pub struct FanOut {
    input: Rc<dyn Operator>,
    schema: Rc<Schema>,
    outputs: RefCell<Vec<Weak<dyn Output>>>,
    push_seq: Cell<u64>,
    destroy_count: Cell<usize>,
    destroyed: Cell<bool>,
}

impl FanOut {
    pub fn new(input: Rc<dyn Operator>) -> Rc<Self> {
        let schema = input.schema();
        let fan_out = Rc::new(Self {
            input,
            schema,
            outputs: RefCell::new(Vec::new()),
            push_seq: Cell::new(0),
            destroy_count: Cell::new(0),
            destroyed: Cell::new(false),
        });
        fan_out
            .input
            .set_output(Rc::downgrade(&fan_out) as Weak<dyn Output>);
        fan_out
    }

    /// The sequence number of the propagation step currently (or most
    /// recently) broadcast.
    pub(crate) fn push_seq(&self) -> u64 {
        self.push_seq.get()
    }

    fn destroy_input_once(&self) {
        if !self.destroyed.replace(true) {
            self.input.destroy();
        }
    }
}

impl Operator for FanOut {
    fn schema(&self) -> Rc<Schema> {
        self.schema.clone()
    }

    fn fetch(&self, req: FetchRequest) -> NodeStream {
        self.input.fetch(req)
    }

    fn cleanup(&self, req: FetchRequest) -> NodeStream {
        self.input.cleanup(req)
    }

    /// Registers one more branch. Unlike other operators, FanOut accepts
    /// many outputs.
    fn set_output(&self, output: Weak<dyn Output>) {
        self.outputs.borrow_mut().push(output);
    }

    /// Each branch propagates its destroy here; the input is destroyed
    /// exactly once, when the last branch has let go.
    fn destroy(&self) {
        let branches = self.outputs.borrow().len();
        let count = self.destroy_count.get() + 1;
        self.destroy_count.set(count);
        if count >= branches.max(1) {
            self.destroy_input_once();
        }
    }
}

impl Output for FanOut {
    fn push(&self, change: Change) {
        self.push_seq.set(self.push_seq.get() + 1);
        let outputs = self.outputs.borrow().clone();
        assert!(!outputs.is_empty(), "Output not set");
        for output in outputs {
            if let Some(output) = output.upgrade() {
                output.push(change.clone());
            }
        }
    }
}
