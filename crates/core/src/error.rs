//! Error types for Rill.

use crate::value::Value;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// Result type alias for Rill operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for source-boundary operations.
///
/// These are the recoverable, data-shape errors raised when validating
/// schemas and upstream mutations. Mis-wired operator graphs are programmer
/// errors and panic instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid schema definition.
    InvalidSchema {
        message: String,
    },
    /// Column id out of range for the table's schema.
    ColumnOutOfRange {
        table: String,
        column: usize,
    },
    /// Row has the wrong number of values for the table.
    ArityMismatch {
        table: String,
        expected: usize,
        got: usize,
    },
    /// A row with this primary key already exists.
    DuplicateRow {
        table: String,
        key: Vec<Value>,
    },
    /// No row with this primary key exists.
    RowNotFound {
        table: String,
        key: Vec<Value>,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSchema { message } => {
                write!(f, "Invalid schema: {}", message)
            }
            Error::ColumnOutOfRange { table, column } => {
                write!(f, "Column {} out of range for table {}", column, table)
            }
            Error::ArityMismatch {
                table,
                expected,
                got,
            } => {
                write!(
                    f,
                    "Row arity mismatch for table {}: expected {} values, got {}",
                    table, expected, got
                )
            }
            Error::DuplicateRow { table, key } => {
                write!(f, "Row already exists in table {}: {:?}", table, key)
            }
            Error::RowNotFound { table, key } => {
                write!(f, "Row not found in table {}: {:?}", table, key)
            }
        }
    }
}

impl Error {
    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Error::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a column out of range error.
    pub fn column_out_of_range(table: impl Into<String>, column: usize) -> Self {
        Error::ColumnOutOfRange {
            table: table.into(),
            column,
        }
    }

    /// Creates an arity mismatch error.
    pub fn arity_mismatch(table: impl Into<String>, expected: usize, got: usize) -> Self {
        Error::ArityMismatch {
            table: table.into(),
            expected,
            got,
        }
    }

    /// Creates a duplicate row error.
    pub fn duplicate_row(table: impl Into<String>, key: Vec<Value>) -> Self {
        Error::DuplicateRow {
            table: table.into(),
            key,
        }
    }

    /// Creates a row not found error.
    pub fn row_not_found(table: impl Into<String>, key: Vec<Value>) -> Self {
        Error::RowNotFound {
            table: table.into(),
            key,
        }
    }
}
