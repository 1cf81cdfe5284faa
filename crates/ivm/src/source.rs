//! In-memory source: the authoritative, ordered row set for one table.
//!
//! A `Source` is created once per table and lives for the process lifetime
//! of the replica. It is the only producer of raw changes: the replication
//! layer applies mutations through [`Source::apply`], which validates them,
//! updates every index, and then pushes the resulting change to every
//! connected output. Because the data structure is updated *before* the
//! pushes go out, a fetch issued reentrantly from inside a push callback
//! sees the post-mutation state.
//!
//! `connect` returns an independent view handle sorted by a caller-specified
//! ordering. One index is kept per distinct ordering, shared by all
//! connections that use it, and backfilled from the primary index on first
//! use. Secondary indexes are dropped when the last connection using them
//! disconnects; the primary-key index is permanent.

use crate::change::{Change, SourceChange};
use crate::node::{Node, NodeStream};
use crate::operator::{Constraint, FetchRequest, Operator, Output, Start};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::cmp::Ordering;
use rill_core::{ColumnId, Error, Result, Row, Schema, SortSpec, Value};

struct IndexState {
    schema: Rc<Schema>,
    rows: Vec<Row>,
    /// Connections using this index. Unused for the primary index, which is
    /// never dropped.
    used_by: Vec<u64>,
}

struct ConnectionState {
    id: u64,
    output: Option<Weak<dyn Output>>,
}

/// The canonical, sorted, deduplicated-by-primary-key row set of one table.
pub struct Source {
    table_name: String,
    columns: Vec<String>,
    primary_key: Vec<ColumnId>,
    primary_schema: Rc<Schema>,
    indexes: RefCell<BTreeMap<SortSpec, IndexState>>,
    connections: RefCell<Vec<ConnectionState>>,
    next_connection_id: Cell<u64>,
}

impl Source {
    /// Creates an empty source for a table.
    pub fn new(
        table_name: impl Into<String>,
        columns: Vec<String>,
        primary_key: Vec<ColumnId>,
    ) -> Result<Rc<Self>> {
        let table_name = table_name.into();
        let primary_schema = Rc::new(Schema::new(
            table_name.clone(),
            columns.clone(),
            primary_key.clone(),
        )?);
        let mut indexes = BTreeMap::new();
        indexes.insert(
            primary_schema.sort().clone(),
            IndexState {
                schema: primary_schema.clone(),
                rows: Vec::new(),
                used_by: Vec::new(),
            },
        );
        Ok(Rc::new(Self {
            table_name,
            columns,
            primary_key,
            primary_schema,
            indexes: RefCell::new(indexes),
            connections: RefCell::new(Vec::new()),
            next_connection_id: Cell::new(0),
        }))
    }

    /// Returns the number of rows currently stored.
    pub fn len(&self) -> usize {
        let indexes = self.indexes.borrow();
        indexes[self.primary_schema.sort()].rows.len()
    }

    /// Returns true if the source holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sort specifications of the live indexes. For testing index cleanup.
    pub fn index_sorts(&self) -> Vec<SortSpec> {
        self.indexes.borrow().keys().cloned().collect()
    }

    /// Opens a new connection over this source, sorted by `sort` (with the
    /// primary key appended as tiebreaker). Many simultaneous connections
    /// are supported; each tracks its own output.
    pub fn connect(self: &Rc<Self>, sort: SortSpec) -> Result<Rc<SourceConnection>> {
        let schema = Rc::new(Schema::with_sort(
            self.table_name.clone(),
            self.columns.clone(),
            self.primary_key.clone(),
            sort,
        )?);
        let id = self.next_connection_id.get();
        self.next_connection_id.set(id + 1);
        self.get_or_create_index(&schema, id);
        self.connections
            .borrow_mut()
            .push(ConnectionState { id, output: None });
        Ok(Rc::new(SourceConnection {
            source: self.clone(),
            id,
            schema,
            destroyed: Cell::new(false),
        }))
    }

    fn get_or_create_index(&self, schema: &Rc<Schema>, connection_id: u64) {
        let mut indexes = self.indexes.borrow_mut();
        if let Some(index) = indexes.get_mut(schema.sort()) {
            if !index.used_by.contains(&connection_id) {
                index.used_by.push(connection_id);
            }
            return;
        }
        // Backfill the new index from the primary one.
        let mut rows = indexes[self.primary_schema.sort()].rows.clone();
        rows.sort_by(|a, b| schema.compare_rows(a, b));
        indexes.insert(
            schema.sort().clone(),
            IndexState {
                schema: schema.clone(),
                rows,
                used_by: alloc::vec![connection_id],
            },
        );
    }

    fn set_connection_output(&self, id: u64, output: Weak<dyn Output>) {
        let mut connections = self.connections.borrow_mut();
        let connection = connections
            .iter_mut()
            .find(|c| c.id == id)
            .expect("Connection not found");
        connection.output = Some(output);
    }

    fn disconnect(&self, id: u64) {
        self.connections.borrow_mut().retain(|c| c.id != id);
        let primary_sort = self.primary_schema.sort().clone();
        let mut indexes = self.indexes.borrow_mut();
        indexes.retain(|sort, index| {
            if *sort == primary_sort {
                return true;
            }
            index.used_by.retain(|&c| c != id);
            !index.used_by.is_empty()
        });
    }

    /// Applies a raw mutation from the upstream change source.
    ///
    /// Data-shape errors (wrong arity, duplicate add, remove or edit of a
    /// missing row) are rejected here and never reach the operator graph.
    /// Edits that keep the primary key push a single edit change; edits that
    /// move the primary key push a remove of the old row followed by an add
    /// of the new one.
    pub fn apply(&self, change: SourceChange) -> Result<()> {
        let changes = self.validate(&change)?;
        {
            let mut indexes = self.indexes.borrow_mut();
            for index in indexes.values_mut() {
                apply_to_index(index, &change);
            }
        }
        for change in changes {
            let outputs: Vec<Weak<dyn Output>> = self
                .connections
                .borrow()
                .iter()
                .filter_map(|c| c.output.clone())
                .collect();
            for output in outputs {
                if let Some(output) = output.upgrade() {
                    output.push(change.clone());
                }
            }
        }
        Ok(())
    }

    /// Validates a mutation and returns the change(s) to push downstream.
    fn validate(&self, change: &SourceChange) -> Result<Vec<Change>> {
        match change {
            SourceChange::Add { row } => {
                self.check_arity(row)?;
                if self.contains(row) {
                    return Err(Error::duplicate_row(
                        &self.table_name,
                        self.primary_schema.primary_key_values(row),
                    ));
                }
                Ok(alloc::vec![Change::Add {
                    node: Node::leaf(row.clone()),
                }])
            }
            SourceChange::Remove { row } => {
                self.check_arity(row)?;
                if !self.contains(row) {
                    return Err(Error::row_not_found(
                        &self.table_name,
                        self.primary_schema.primary_key_values(row),
                    ));
                }
                Ok(alloc::vec![Change::Remove {
                    node: Node::leaf(row.clone()),
                }])
            }
            SourceChange::Edit { old_row, row } => {
                self.check_arity(old_row)?;
                self.check_arity(row)?;
                if !self.contains(old_row) {
                    return Err(Error::row_not_found(
                        &self.table_name,
                        self.primary_schema.primary_key_values(old_row),
                    ));
                }
                if self.primary_schema.compare_rows(old_row, row) == Ordering::Equal {
                    Ok(alloc::vec![Change::Edit {
                        old_node: Node::leaf(old_row.clone()),
                        node: Node::leaf(row.clone()),
                    }])
                } else {
                    // The edit moved the primary key.
                    if self.contains(row) {
                        return Err(Error::duplicate_row(
                            &self.table_name,
                            self.primary_schema.primary_key_values(row),
                        ));
                    }
                    Ok(alloc::vec![
                        Change::Remove {
                            node: Node::leaf(old_row.clone()),
                        },
                        Change::Add {
                            node: Node::leaf(row.clone()),
                        },
                    ])
                }
            }
        }
    }

    fn check_arity(&self, row: &Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::arity_mismatch(
                &self.table_name,
                self.columns.len(),
                row.len(),
            ));
        }
        Ok(())
    }

    /// Whether a row with this primary key is present.
    fn contains(&self, row: &Row) -> bool {
        let indexes = self.indexes.borrow();
        let primary = &indexes[self.primary_schema.sort()];
        primary
            .rows
            .binary_search_by(|r| self.primary_schema.compare_rows(r, row))
            .is_ok()
    }
}

fn apply_to_index(index: &mut IndexState, change: &SourceChange) {
    match change {
        SourceChange::Add { row } => insert_sorted(index, row.clone()),
        SourceChange::Remove { row } => remove_sorted(index, row),
        SourceChange::Edit { old_row, row } => {
            // The old row may not land at the same position as the new one,
            // so this is always a delete plus an insert.
            remove_sorted(index, old_row);
            insert_sorted(index, row.clone());
        }
    }
}

fn insert_sorted(index: &mut IndexState, row: Row) {
    match index
        .rows
        .binary_search_by(|r| index.schema.compare_rows(r, &row))
    {
        Err(pos) => index.rows.insert(pos, row),
        // The comparator tiebreaks on the primary key and duplicates are
        // rejected in validate().
        Ok(_) => unreachable!("duplicate row in index"),
    }
}

fn remove_sorted(index: &mut IndexState, row: &Row) {
    match index
        .rows
        .binary_search_by(|r| index.schema.compare_rows(r, row))
    {
        Ok(pos) => {
            index.rows.remove(pos);
        }
        Err(_) => unreachable!("missing row in index"),
    }
}

/// One connected view over a [`Source`], sorted by its own ordering.
pub struct SourceConnection {
    source: Rc<Source>,
    id: u64,
    schema: Rc<Schema>,
    destroyed: Cell<bool>,
}

impl SourceConnection {
    /// The source this connection reads from.
    pub fn source(&self) -> &Rc<Source> {
        &self.source
    }

    fn stream(&self, req: FetchRequest) -> NodeStream {
        Box::new(SourceFetch {
            source: self.source.clone(),
            schema: self.schema.clone(),
            constraint: req.constraint,
            reverse: req.reverse,
            state: CursorState::Initial(req.start),
        })
    }
}

impl Operator for SourceConnection {
    fn schema(&self) -> Rc<Schema> {
        self.schema.clone()
    }

    fn fetch(&self, req: FetchRequest) -> NodeStream {
        self.stream(req)
    }

    fn cleanup(&self, req: FetchRequest) -> NodeStream {
        // The source retains no per-fetch state.
        self.stream(req)
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.source.set_connection_output(self.id, output);
    }

    fn destroy(&self) {
        if !self.destroyed.replace(true) {
            self.source.disconnect(self.id);
        }
    }
}

enum CursorState {
    Initial(Option<Start>),
    After(Row),
    Done,
}

/// Lazy cursor over one source index.
///
/// The cursor is tracked by row value, not position: a mutation applied
/// between two pulls cannot make the stream skip or repeat rows.
struct SourceFetch {
    source: Rc<Source>,
    schema: Rc<Schema>,
    constraint: Option<Constraint>,
    reverse: bool,
    state: CursorState,
}

impl Iterator for SourceFetch {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        if matches!(self.state, CursorState::Done) {
            return None;
        }
        let found: Option<Row> = {
            let indexes = self.source.indexes.borrow();
            indexes.get(self.schema.sort()).and_then(|index| {
                let pos = match &self.state {
                    CursorState::Initial(start) => initial_position(
                        &index.rows,
                        &self.schema,
                        start.as_ref(),
                        self.constraint.as_ref(),
                        self.reverse,
                    ),
                    CursorState::After(last) => next_position(
                        &index.rows,
                        &self.schema,
                        last,
                        self.constraint.as_ref(),
                        self.reverse,
                    ),
                    CursorState::Done => None,
                };
                pos.map(|i| index.rows[i].clone())
            })
        };
        match found {
            Some(row) => {
                self.state = CursorState::After(row.clone());
                Some(Node::leaf(row))
            }
            None => {
                self.state = CursorState::Done;
                None
            }
        }
    }
}

fn matches(constraint: Option<&Constraint>, row: &Row) -> bool {
    match constraint {
        None => true,
        Some(c) => row.get(c.key).unwrap_or(&Value::Null) == &c.value,
    }
}

/// First index with a row >= `row`.
fn lower_bound(rows: &[Row], schema: &Schema, row: &Row) -> usize {
    rows.partition_point(|r| schema.compare_rows(r, row) == Ordering::Less)
}

/// First index with a row > `row`.
fn upper_bound(rows: &[Row], schema: &Schema, row: &Row) -> usize {
    rows.partition_point(|r| schema.compare_rows(r, row) != Ordering::Greater)
}

fn scan_forward(rows: &[Row], from: usize, constraint: Option<&Constraint>) -> Option<usize> {
    (from..rows.len()).find(|&i| matches(constraint, &rows[i]))
}

fn scan_backward(rows: &[Row], from: usize, constraint: Option<&Constraint>) -> Option<usize> {
    (0..=from).rev().find(|&i| matches(constraint, &rows[i]))
}

/// Resolves the first row of a stream per the request's start bound.
fn initial_position(
    rows: &[Row],
    schema: &Schema,
    start: Option<&Start>,
    constraint: Option<&Constraint>,
    reverse: bool,
) -> Option<usize> {
    use crate::operator::Basis;

    if rows.is_empty() {
        return None;
    }
    let Some(start) = start else {
        return if reverse {
            scan_backward(rows, rows.len() - 1, constraint)
        } else {
            scan_forward(rows, 0, constraint)
        };
    };
    if !reverse {
        let lb = lower_bound(rows, schema, &start.row);
        match start.basis {
            Basis::At => scan_forward(rows, lb, constraint),
            Basis::After => scan_forward(rows, upper_bound(rows, schema, &start.row), constraint),
            Basis::Before => {
                // The nearest matching predecessor; if there is none, the
                // first matching row at or past the bound.
                if lb > 0 {
                    if let Some(i) = scan_backward(rows, lb - 1, constraint) {
                        return Some(i);
                    }
                }
                scan_forward(rows, lb, constraint)
            }
        }
    } else {
        match start.basis {
            Basis::At => {
                let ub = upper_bound(rows, schema, &start.row);
                (ub > 0).then(|| scan_backward(rows, ub - 1, constraint))?
            }
            Basis::After => {
                let lb = lower_bound(rows, schema, &start.row);
                (lb > 0).then(|| scan_backward(rows, lb - 1, constraint))?
            }
            Basis::Before => {
                // Mirrored: the nearest matching successor, else the first
                // matching row at or below the bound.
                let ub = upper_bound(rows, schema, &start.row);
                if ub < rows.len() {
                    if let Some(i) = scan_forward(rows, ub, constraint) {
                        return Some(i);
                    }
                }
                (ub > 0).then(|| scan_backward(rows, ub - 1, constraint))?
            }
        }
    }
}

/// Resolves the strict successor (in traversal order) of the last row.
fn next_position(
    rows: &[Row],
    schema: &Schema,
    last: &Row,
    constraint: Option<&Constraint>,
    reverse: bool,
) -> Option<usize> {
    if !reverse {
        scan_forward(rows, upper_bound(rows, schema, last), constraint)
    } else {
        let lb = lower_bound(rows, schema, last);
        (lb > 0).then(|| scan_backward(rows, lb - 1, constraint))?
    }
}
