//! Join operator: hierarchical parent/child relationships.
//!
//! Join does not flatten: each parent node gains a named relationship whose
//! value is a lazily-fetched stream of the child rows with
//! `child[child_key] == parent[parent_key]`.
//!
//! The hard part is the *lifetime* of the child-side state. Multiple parent
//! rows may share one join-key value, so releasing interest while processing
//! one parent must not tear down child state another parent still needs.
//! Join reference-counts by keying a storage entry per
//! `["pKeySet", join_key_value, ...parent_primary_key]`: set on fetch,
//! deleted on cleanup, and an actual child `cleanup` is only issued when the
//! probe shows no other parent holds the same join-key value.

use crate::change::{Change, ChildChange};
use crate::node::{Node, NodeStream, Relationship};
use crate::operator::{FetchRequest, Operator, Output, OutputSlot, PullMode, pull};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use core::cell::Cell;
use rill_core::{ColumnId, Row, Schema, Value};
use rill_storage::{StorageHandle, StorageKey};

/// Storage handle injected into a Join instance. The values are unit
/// markers; the keys are the reference-count set.
pub type JoinStorage = StorageHandle<()>;

pub struct Join {
    parent: Rc<dyn Operator>,
    child: Rc<dyn Operator>,
    storage: JoinStorage,
    parent_key: ColumnId,
    child_key: ColumnId,
    relationship_name: String,
    schema: Rc<Schema>,
    output: OutputSlot,
    destroyed: Cell<bool>,
    self_weak: Weak<Join>,
    parent_port: Rc<ParentPort>,
    child_port: Rc<ChildPort>,
}

/// Routes pushes from the parent input into the join.
struct ParentPort(Weak<Join>);

/// Routes pushes from the child input into the join.
struct ChildPort(Weak<Join>);

impl Output for ParentPort {
    fn push(&self, change: Change) {
        self.0
            .upgrade()
            .expect("join was dropped")
            .push_parent(change);
    }
}

impl Output for ChildPort {
    fn push(&self, change: Change) {
        self.0
            .upgrade()
            .expect("join was dropped")
            .push_child(change);
    }
}

impl Join {
    pub fn new(
        parent: Rc<dyn Operator>,
        child: Rc<dyn Operator>,
        storage: JoinStorage,
        parent_key: ColumnId,
        child_key: ColumnId,
        relationship_name: impl Into<String>,
    ) -> Rc<Self> {
        assert!(
            !Rc::ptr_eq(&parent, &child),
            "parent and child must be different operators"
        );
        let schema = parent.schema();
        let join = Rc::new_cyclic(|weak: &Weak<Join>| Self {
            parent,
            child,
            storage,
            parent_key,
            child_key,
            relationship_name: relationship_name.into(),
            schema,
            output: OutputSlot::new(),
            destroyed: Cell::new(false),
            self_weak: weak.clone(),
            parent_port: Rc::new(ParentPort(weak.clone())),
            child_port: Rc::new(ChildPort(weak.clone())),
        });
        join.parent
            .set_output(Rc::downgrade(&join.parent_port) as Weak<dyn Output>);
        join.child
            .set_output(Rc::downgrade(&join.child_port) as Weak<dyn Output>);
        join
    }

    fn this(&self) -> Rc<Join> {
        self.self_weak.upgrade().expect("join was dropped")
    }

    fn join_value(&self, parent_row: &Row) -> Value {
        parent_row
            .get(self.parent_key)
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn pkeyset_prefix(&self, join_value: Value) -> StorageKey {
        alloc::vec![Value::String("pKeySet".into()), join_value]
    }

    fn pkeyset_key(&self, parent_row: &Row) -> StorageKey {
        let mut key = self.pkeyset_prefix(self.join_value(parent_row));
        key.extend(self.schema.primary_key_values(parent_row));
        key
    }

    /// Attaches the relationship to one parent node, maintaining the
    /// reference-count set.
    fn process_parent_node(
        &self,
        row: Row,
        mut relationships: hashbrown::HashMap<String, Relationship>,
        mode: PullMode,
    ) -> Node {
        let join_value = self.join_value(&row);
        let storage_key = self.pkeyset_key(&row);

        let mut method = mode;
        if mode == PullMode::Cleanup {
            // Another parent row with the same join-key value still holds
            // the child subscription: fetch instead of releasing it.
            let entries = self
                .storage
                .borrow()
                .scan_prefix(&self.pkeyset_prefix(join_value.clone()));
            if entries.len() >= 2 {
                method = PullMode::Fetch;
            }
        }

        let child = self.child.clone();
        let child_key = self.child_key;
        let rel: Relationship = {
            let join_value = join_value.clone();
            Rc::new(move || {
                pull(
                    &child,
                    method,
                    FetchRequest::constrained(child_key, join_value.clone()),
                )
            })
        };

        match mode {
            PullMode::Fetch => self.storage.borrow_mut().set(storage_key, ()),
            PullMode::Cleanup => {
                self.storage.borrow_mut().del(&storage_key);
            }
        }

        relationships.insert(self.relationship_name.clone(), rel);
        Node { row, relationships }
    }

    fn push_parent(&self, change: Change) {
        match change {
            Change::Add { node } => {
                let node = self.process_parent_node(node.row, node.relationships, PullMode::Fetch);
                self.output.push(Change::Add { node });
            }
            Change::Remove { node } => {
                let node =
                    self.process_parent_node(node.row, node.relationships, PullMode::Cleanup);
                self.output.push(Change::Remove { node });
            }
            Change::Child { .. } => self.output.push(change),
            Change::Edit { old_node, node } => {
                let old_value = old_node.row.get(self.parent_key).unwrap_or(&Value::Null);
                let new_value = node.row.get(self.parent_key).unwrap_or(&Value::Null);
                if old_value == new_value {
                    // The join key is unchanged: forward as an edit with
                    // relationships re-derived on both sides.
                    let old_node = self.process_parent_node(
                        old_node.row,
                        old_node.relationships,
                        PullMode::Cleanup,
                    );
                    let node =
                        self.process_parent_node(node.row, node.relationships, PullMode::Fetch);
                    self.output.push(Change::Edit { old_node, node });
                } else {
                    self.push_parent(Change::Remove { node: old_node });
                    self.push_parent(Change::Add { node });
                }
            }
        }
    }

    fn push_child(&self, change: Change) {
        match change {
            Change::Add { node } => {
                let row = node.row.clone();
                self.wrap_to_parents(&row, Change::Add { node });
            }
            Change::Remove { node } => {
                let row = node.row.clone();
                self.wrap_to_parents(&row, Change::Remove { node });
            }
            Change::Child { row, child } => {
                let routing = row.clone();
                self.wrap_to_parents(&routing, Change::Child { row, child });
            }
            Change::Edit { old_node, node } => {
                let old_value = old_node.row.get(self.child_key).unwrap_or(&Value::Null);
                let new_value = node.row.get(self.child_key).unwrap_or(&Value::Null);
                if old_value == new_value {
                    let row = node.row.clone();
                    self.wrap_to_parents(&row, Change::Edit { old_node, node });
                } else {
                    // The edit moved the row to another relationship: a
                    // remove under the old parents, an add under the new.
                    let old_row = old_node.row.clone();
                    let new_row = node.row.clone();
                    self.wrap_to_parents(&old_row, Change::Remove { node: old_node });
                    self.wrap_to_parents(&new_row, Change::Add { node });
                }
            }
        }
    }

    /// Emits one wrapped child change per matching parent row. A single
    /// child-side change fans out to every parent sharing the key value.
    fn wrap_to_parents(&self, child_row: &Row, change: Change) {
        let value = child_row
            .get(self.child_key)
            .cloned()
            .unwrap_or(Value::Null);
        let parents = self
            .parent
            .fetch(FetchRequest::constrained(self.parent_key, value));
        for parent in parents {
            self.output.push(Change::Child {
                row: parent.row,
                child: ChildChange {
                    relationship_name: self.relationship_name.clone(),
                    change: Box::new(change.clone()),
                },
            });
        }
    }
}

impl Operator for Join {
    fn schema(&self) -> Rc<Schema> {
        // Join preserves the parent's order.
        self.schema.clone()
    }

    fn fetch(&self, req: FetchRequest) -> NodeStream {
        let this = self.this();
        Box::new(self.parent.fetch(req).map(move |node| {
            this.process_parent_node(node.row, node.relationships, PullMode::Fetch)
        }))
    }

    fn cleanup(&self, req: FetchRequest) -> NodeStream {
        let this = self.this();
        Box::new(self.parent.cleanup(req).map(move |node| {
            this.process_parent_node(node.row, node.relationships, PullMode::Cleanup)
        }))
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.output.set(output);
    }

    fn destroy(&self) {
        if !self.destroyed.replace(true) {
            self.parent.destroy();
            self.child.destroy();
        }
    }
}
