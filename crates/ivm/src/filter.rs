//! Filter operator: passes through rows matching a predicate.

use crate::change::Change;
use crate::node::NodeStream;
use crate::operator::{FetchRequest, Operator, Output, OutputSlot, PullMode, pull};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use core::cell::Cell;
use rill_core::{Row, Schema};

/// Row predicate shared between the push path and fetch streams.
pub type Predicate = Rc<dyn Fn(&Row) -> bool>;

/// Stateless predicate operator.
///
/// The one subtlety is edits: an edit whose old and new rows fall on
/// opposite sides of the predicate must surface as a remove or an add, never
/// silently vanish or appear.
pub struct Filter {
    input: Rc<dyn Operator>,
    predicate: Predicate,
    schema: Rc<Schema>,
    output: OutputSlot,
    destroyed: Cell<bool>,
}

impl Filter {
    pub fn new(input: Rc<dyn Operator>, predicate: impl Fn(&Row) -> bool + 'static) -> Rc<Self> {
        let schema = input.schema();
        let filter = Rc::new(Self {
            input,
            predicate: Rc::new(predicate),
            schema,
            output: OutputSlot::new(),
            destroyed: Cell::new(false),
        });
        filter
            .input
            .set_output(Rc::downgrade(&filter) as Weak<dyn Output>);
        filter
    }

    fn stream(&self, mode: PullMode, req: FetchRequest) -> NodeStream {
        let predicate = self.predicate.clone();
        Box::new(pull(&self.input, mode, req).filter(move |node| predicate(&node.row)))
    }
}

impl Operator for Filter {
    fn schema(&self) -> Rc<Schema> {
        self.schema.clone()
    }

    fn fetch(&self, req: FetchRequest) -> NodeStream {
        self.stream(PullMode::Fetch, req)
    }

    fn cleanup(&self, req: FetchRequest) -> NodeStream {
        self.stream(PullMode::Cleanup, req)
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

impl Output for Filter {
    fn push(&self, change: Change) {
        match change {
            Change::Add { ref node } => {
                if (self.predicate)(&node.row) {
                    self.output.push(change);
                }
            }
            Change::Remove { ref node } => {
                if (self.predicate)(&node.row) {
                    self.output.push(change);
                }
            }
            Change::Child { ref row, .. } => {
                if (self.predicate)(row) {
                    self.output.push(change);
                }
            }
            Change::Edit { old_node, node } => {
                let old_in = (self.predicate)(&old_node.row);
                let new_in = (self.predicate)(&node.row);
                match (old_in, new_in) {
                    (true, true) => self.output.push(Change::Edit { old_node, node }),
                    (true, false) => self.output.push(Change::Remove { node: old_node }),
                    (false, true) => self.output.push(Change::Add { node }),
                    (false, false) => {}
                }
            }
        }
    }
}
