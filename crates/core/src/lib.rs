//! Rill Core - Core types for the Rill sync engine.
//!
//! This crate provides the foundational types shared by the engine:
//!
//! - `Value`: scalar values that can appear in a row cell
//! - `Row`: a positional sequence of values
//! - `Schema`: column names, primary key, and sort specification of an
//!   operator's output, with a total-order row comparator
//! - `Error`: source-boundary error types
//!
//! # Example
//!
//! ```rust
//! use rill_core::{Row, Schema, Value};
//!
//! let schema = Schema::new("users", vec!["id".into(), "name".into()], vec![0]).unwrap();
//!
//! let a = Row::new(vec![Value::Int64(1), Value::String("Alice".into())]);
//! let b = Row::new(vec![Value::Int64(2), Value::String("Bob".into())]);
//!
//! assert!(schema.compare_rows(&a, &b).is_lt());
//! ```

#![no_std]

extern crate alloc;

mod error;
mod row;
pub mod schema;
mod value;

pub use error::{Error, Result};
pub use row::Row;
pub use schema::{ColumnId, Direction, Schema, SortSpec};
pub use value::{JsonbValue, Value};
