//! Rill IVM - Incremental view maintenance for the Rill sync engine.
//!
//! This crate implements the dataflow operator graph that keeps live,
//! hierarchical query results correct as the underlying data mutates,
//! without re-executing queries from scratch.
//!
//! # Core Concepts
//!
//! - [`Source`]: the authoritative, sorted row set of one table and the
//!   single origin of raw changes; supports many independently-ordered
//!   connections over the same data
//! - [`Operator`]/[`Output`]: the pull (`fetch`/`cleanup`) and push
//!   contract every node of the graph implements
//! - [`Change`]: the add/remove/edit/child deltas flowing downstream
//! - Per-instance [`Storage`](rill_storage::Storage): operator-local
//!   bookkeeping, so subscriptions sharing a source never interfere
//!
//! # Operators
//!
//! - [`Filter`]: predicate, with edit-splitting across the boundary
//! - [`Skip`]: resume-from-cursor lower bound
//! - [`Take`]: bounded window (`LIMIT`), optionally per partition value
//! - [`Join`]: lazily-fetched parent/child relationships with
//!   reference-counted child subscriptions
//! - [`FanOut`]/[`FanIn`]: plan branching and duplicate-free re-merging
//!
//! Each query subscription instantiates its own chain of operators wired to
//! shared sources; `destroy()` on the outermost operator tears the chain
//! down. Everything is single-threaded and synchronous: a mutation applied
//! to a source propagates to every consumer before `apply` returns.
//!
//! # Example
//!
//! ```rust
//! use rill_core::Value;
//! use rill_ivm::{Capture, Source, SourceChange, Take};
//! use rill_storage::memory_handle;
//!
//! let source = Source::new("users", vec!["id".into()], vec![0]).unwrap();
//! let take = Take::new(source.connect(vec![]).unwrap(), memory_handle(), 2, None);
//! let view = Capture::new(take);
//!
//! view.hydrate();
//! source.apply(SourceChange::Add {
//!     row: vec![Value::Int64(1)].into(),
//! }).unwrap();
//! assert_eq!(view.pushes().len(), 1);
//! ```

#![no_std]

extern crate alloc;

pub mod capture;
pub mod change;
pub mod fan_in;
pub mod fan_out;
pub mod filter;
pub mod join;
pub mod node;
pub mod operator;
pub mod skip;
pub mod source;
pub mod take;

pub use capture::{Capture, CapturedChange, CapturedNode};
pub use change::{Change, ChildChange, SourceChange};
pub use fan_in::FanIn;
pub use fan_out::FanOut;
pub use filter::Filter;
pub use join::{Join, JoinStorage};
pub use node::{Node, NodeStream, Relationship};
pub use operator::{
    Basis, Constraint, FetchRequest, Operator, Output, PullMode, Start,
};
pub use skip::{Bound, Skip};
pub use source::{Source, SourceConnection};
pub use take::{Take, TakeEntry, TakeState, TakeStorage};
