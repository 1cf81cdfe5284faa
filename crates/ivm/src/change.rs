//! Change types: the deltas flowing downstream through the operator graph.

use crate::node::Node;
use alloc::boxed::Box;
use alloc::string::String;
use rill_core::Row;

/// A delta describing how the data visible at one operator moved.
///
/// Matched exhaustively at every operator boundary. `Edit` carries both
/// versions of the row so a downstream operator can split it into a
/// remove/add pair when the edit crosses one of its boundaries (a filter
/// predicate, a skip bound, a take window).
#[derive(Clone, Debug)]
pub enum Change {
    /// The node is now present.
    Add { node: Node },
    /// The node is no longer present.
    Remove { node: Node },
    /// Same primary key, values changed.
    Edit { old_node: Node, node: Node },
    /// A nested change inside one relationship of an unchanged parent row.
    Child { row: Row, child: ChildChange },
}

/// The payload of a [`Change::Child`]: which relationship moved, and how.
#[derive(Clone, Debug)]
pub struct ChildChange {
    pub relationship_name: String,
    pub change: Box<Change>,
}

impl Change {
    /// The row this change is keyed on at the current operator: the (new)
    /// row for add/remove/edit, the unchanged parent row for child changes.
    pub fn row(&self) -> &Row {
        match self {
            Change::Add { node } | Change::Remove { node } => &node.row,
            Change::Edit { node, .. } => &node.row,
            Change::Child { row, .. } => row,
        }
    }
}

/// A raw mutation accepted by [`Source::apply`](crate::source::Source::apply).
///
/// This is the boundary shape handed in by the replication layer; the source
/// validates it and converts it into [`Change`]s for its connections.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceChange {
    Add { row: Row },
    Remove { row: Row },
    Edit { old_row: Row, row: Row },
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use rill_core::Value;

    fn row(v: i64) -> Row {
        Row::new(vec![Value::Int64(v)])
    }

    #[test]
    fn test_change_row() {
        let add = Change::Add {
            node: Node::leaf(row(1)),
        };
        assert_eq!(add.row(), &row(1));

        let edit = Change::Edit {
            old_node: Node::leaf(row(1)),
            node: Node::leaf(row(2)),
        };
        assert_eq!(edit.row(), &row(2));

        let child = Change::Child {
            row: row(3),
            child: ChildChange {
                relationship_name: "items".into(),
                change: Box::new(add),
            },
        };
        assert_eq!(child.row(), &row(3));
    }
}
