//! Nodes and streams: the shapes flowing between operators.
//!
//! A `Node` is one hierarchical result row plus its lazily-evaluable child
//! relationships. Streams are plain iterators: lazy, finite, single-pass, and
//! not restartable - a second traversal of a relationship requires calling
//! its thunk again, which issues a fresh fetch against the child operator.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use hashbrown::HashMap;
use rill_core::Row;

/// A lazy, single-pass, finite stream of nodes.
pub type NodeStream = Box<dyn Iterator<Item = Node>>;

/// A lazily-evaluable relationship: calling the thunk issues the nested
/// fetch (or cleanup) against the child operator and returns a fresh stream.
pub type Relationship = Rc<dyn Fn() -> NodeStream>;

/// One hierarchical result row with its named relationships.
#[derive(Clone)]
pub struct Node {
    pub row: Row,
    pub relationships: HashMap<String, Relationship>,
}

impl Node {
    /// Creates a node with no relationships.
    pub fn leaf(row: Row) -> Self {
        Self {
            row,
            relationships: HashMap::new(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.relationships.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Node")
            .field("row", &self.row)
            .field("relationships", &names)
            .finish()
    }
}

/// Returns a stream yielding nothing.
pub fn empty_stream() -> NodeStream {
    Box::new(core::iter::empty())
}
