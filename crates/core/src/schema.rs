//! Schema and ordering definitions for Rill.
//!
//! A `Schema` describes the output of one operator: the column names, the
//! primary key, and the sort specification its rows are emitted in. The sort
//! specification always carries the primary key appended as a tiebreaker so
//! that `compare_rows` is a total order and rows with equal sort keys are
//! still deterministically ordered.

use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;

/// Index of a column within a row.
pub type ColumnId = usize;

/// Sort direction for one column of a sort specification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Asc,
    Desc,
}

/// A sort specification: columns in significance order, each with a
/// direction.
pub type SortSpec = Vec<(ColumnId, Direction)>;

/// Schema of the rows emitted by one operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    table_name: String,
    columns: Vec<String>,
    primary_key: Vec<ColumnId>,
    sort: SortSpec,
}

impl Schema {
    /// Creates a schema sorted by the primary key ascending.
    pub fn new(
        table_name: impl Into<String>,
        columns: Vec<String>,
        primary_key: Vec<ColumnId>,
    ) -> Result<Self> {
        let sort = primary_key.iter().map(|&c| (c, Direction::Asc)).collect();
        Self::with_sort(table_name, columns, primary_key, sort)
    }

    /// Creates a schema with an explicit sort specification. Primary-key
    /// columns missing from the specification are appended ascending.
    pub fn with_sort(
        table_name: impl Into<String>,
        columns: Vec<String>,
        primary_key: Vec<ColumnId>,
        sort: SortSpec,
    ) -> Result<Self> {
        let table_name = table_name.into();
        if columns.is_empty() {
            return Err(Error::invalid_schema("table must have at least one column"));
        }
        if primary_key.is_empty() {
            return Err(Error::invalid_schema("table must have a primary key"));
        }
        for &c in &primary_key {
            if c >= columns.len() {
                return Err(Error::column_out_of_range(&table_name, c));
            }
        }
        for &(c, _) in &sort {
            if c >= columns.len() {
                return Err(Error::column_out_of_range(&table_name, c));
            }
        }
        let sort = normalize_sort(sort, &primary_key);
        Ok(Self {
            table_name,
            columns,
            primary_key,
            sort,
        })
    }

    /// Returns the table name.
    #[inline]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Returns the column names.
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the primary key column ids.
    #[inline]
    pub fn primary_key(&self) -> &[ColumnId] {
        &self.primary_key
    }

    /// Returns the sort specification, primary-key tiebreaker included.
    #[inline]
    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    /// Compares two rows under this schema's sort specification. Total order:
    /// the tiebreaking primary key guarantees `Equal` only for rows with the
    /// same identity.
    pub fn compare_rows(&self, a: &Row, b: &Row) -> Ordering {
        for &(column, direction) in &self.sort {
            let av = a.get(column).unwrap_or(&Value::Null);
            let bv = b.get(column).unwrap_or(&Value::Null);
            let cmp = av.cmp(bv);
            if cmp != Ordering::Equal {
                return match direction {
                    Direction::Asc => cmp,
                    Direction::Desc => cmp.reverse(),
                };
            }
        }
        Ordering::Equal
    }

    /// Extracts the primary-key values of a row.
    pub fn primary_key_values(&self, row: &Row) -> Vec<Value> {
        self.primary_key
            .iter()
            .map(|&c| row.get(c).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

/// Appends primary-key columns missing from `sort`, ascending, so the result
/// is a total order.
fn normalize_sort(mut sort: SortSpec, primary_key: &[ColumnId]) -> SortSpec {
    for &pk in primary_key {
        if !sort.iter().any(|&(c, _)| c == pk) {
            sort.push((pk, Direction::Asc));
        }
    }
    sort
}
