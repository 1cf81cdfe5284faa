//! Skip operator: resume-from-cursor semantics.
//!
//! Skip drops every row on the excluded side of a fixed bound, implementing
//! pagination resumption. The interesting part is composing with a caller
//! that carries its own start bound: the effective start of a pull is the
//! tighter of the two, and a `Before`-basis caller bound can resolve *onto*
//! the skip boundary, which requires probing the input for the true
//! predecessor row.

use crate::change::Change;
use crate::node::{NodeStream, empty_stream};
use crate::operator::{Basis, FetchRequest, Operator, Output, OutputSlot, PullMode, Start, pull};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use core::cell::Cell;
use core::cmp::Ordering;
use rill_core::{Row, Schema};

/// The traversal bound: rows before `row` (or at `row`, if `exclusive`) are
/// dropped.
#[derive(Clone, Debug)]
pub struct Bound {
    pub row: Row,
    pub exclusive: bool,
}

/// The effective start of a pull after tightening against the bound.
enum EffectiveStart {
    Start(Option<Start>),
    /// The whole requested range is excluded.
    Empty,
}

pub struct Skip {
    input: Rc<dyn Operator>,
    bound: Bound,
    schema: Rc<Schema>,
    output: OutputSlot,
    destroyed: Cell<bool>,
}

impl Skip {
    pub fn new(input: Rc<dyn Operator>, bound: Bound) -> Rc<Self> {
        let schema = input.schema();
        let skip = Rc::new(Self {
            input,
            bound,
            schema,
            output: OutputSlot::new(),
            destroyed: Cell::new(false),
        });
        skip.input
            .set_output(Rc::downgrade(&skip) as Weak<dyn Output>);
        skip
    }

    /// Whether a row is on the included side of the bound.
    fn should_be_present(&self, row: &Row) -> bool {
        match self.schema.compare_rows(&self.bound.row, row) {
            Ordering::Less => true,
            Ordering::Equal => !self.bound.exclusive,
            Ordering::Greater => false,
        }
    }

    fn bound_start(&self) -> Start {
        Start {
            row: self.bound.row.clone(),
            basis: if self.bound.exclusive {
                Basis::After
            } else {
                Basis::At
            },
        }
    }

    /// Computes the tighter of the bound and the caller's own start.
    fn effective_start(&self, req: &FetchRequest) -> EffectiveStart {
        let Some(start) = &req.start else {
            return if req.reverse {
                // Reverse streams begin at the top; the bound truncates the
                // tail instead.
                EffectiveStart::Start(None)
            } else {
                EffectiveStart::Start(Some(self.bound_start()))
            };
        };

        let cmp = self.schema.compare_rows(&self.bound.row, &start.row);
        if !req.reverse {
            match cmp {
                // The caller's bound is moot.
                Ordering::Greater => EffectiveStart::Start(Some(self.bound_start())),
                Ordering::Equal => match start.basis {
                    Basis::Before => EffectiveStart::Start(Some(self.bound_start())),
                    // The more exclusive of the two wins.
                    Basis::At => EffectiveStart::Start(Some(self.bound_start())),
                    Basis::After => EffectiveStart::Start(Some(Start {
                        row: self.bound.row.clone(),
                        basis: Basis::After,
                    })),
                },
                Ordering::Less => match start.basis {
                    // The caller's bound is already tighter.
                    Basis::At | Basis::After => EffectiveStart::Start(Some(start.clone())),
                    // A Before-basis start resolves to the predecessor row,
                    // which may land at or before the skip boundary. Probe
                    // the input for it and take the max.
                    Basis::Before => self.tightened_predecessor(req, start),
                },
            }
        } else {
            // Reverse traversal: mirrored, with the bound truncating the
            // tail of the stream rather than adjusting the start.
            match cmp {
                Ordering::Greater => match start.basis {
                    // The successor of the start row may still be inside.
                    Basis::Before => EffectiveStart::Start(Some(start.clone())),
                    Basis::At | Basis::After => EffectiveStart::Empty,
                },
                Ordering::Equal => match start.basis {
                    Basis::Before => EffectiveStart::Start(Some(start.clone())),
                    Basis::At => {
                        if self.bound.exclusive {
                            EffectiveStart::Empty
                        } else {
                            EffectiveStart::Start(Some(start.clone()))
                        }
                    }
                    Basis::After => EffectiveStart::Empty,
                },
                Ordering::Less => EffectiveStart::Start(Some(start.clone())),
            }
        }
    }

    /// Resolves a forward `Before`-basis start whose row sits past the
    /// bound: fetch the predecessor and pick the max of it and the bound.
    fn tightened_predecessor(&self, req: &FetchRequest, start: &Start) -> EffectiveStart {
        let mut probe = self.input.fetch(FetchRequest {
            constraint: req.constraint.clone(),
            start: Some(Start {
                row: start.row.clone(),
                basis: Basis::Before,
            }),
            reverse: false,
        });
        let Some(predecessor) = probe.next() else {
            return EffectiveStart::Start(Some(self.bound_start()));
        };
        match self.schema.compare_rows(&self.bound.row, &predecessor.row) {
            Ordering::Greater => EffectiveStart::Start(Some(self.bound_start())),
            Ordering::Equal if self.bound.exclusive => EffectiveStart::Start(Some(Start {
                row: self.bound.row.clone(),
                basis: Basis::After,
            })),
            _ => EffectiveStart::Start(Some(Start {
                row: predecessor.row,
                basis: Basis::At,
            })),
        }
    }

    fn stream(&self, mode: PullMode, req: FetchRequest) -> NodeStream {
        let start = match self.effective_start(&req) {
            EffectiveStart::Empty => return empty_stream(),
            EffectiveStart::Start(start) => start,
        };
        let inner = pull(
            &self.input,
            mode,
            FetchRequest {
                constraint: req.constraint,
                start,
                reverse: req.reverse,
            },
        );
        if req.reverse {
            let schema = self.schema.clone();
            let bound = self.bound.clone();
            Box::new(inner.take_while(move |node| {
                match schema.compare_rows(&bound.row, &node.row) {
                    Ordering::Less => true,
                    Ordering::Equal => !bound.exclusive,
                    Ordering::Greater => false,
                }
            }))
        } else {
            inner
        }
    }
}

impl Operator for Skip {
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

impl Output for Skip {
    fn push(&self, change: Change) {
        match change {
            Change::Add { ref node } => {
                if self.should_be_present(&node.row) {
                    self.output.push(change);
                }
            }
            Change::Remove { ref node } => {
                if self.should_be_present(&node.row) {
                    self.output.push(change);
                }
            }
            Change::Child { ref row, .. } => {
                if self.should_be_present(row) {
                    self.output.push(change);
                }
            }
            Change::Edit { old_node, node } => {
                let old_in = self.should_be_present(&old_node.row);
                let new_in = self.should_be_present(&node.row);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Capture, CapturedChange, CapturedNode};
    use crate::change::SourceChange;
    use crate::source::Source;
    use alloc::vec;
    use alloc::vec::Vec;
    use rill_core::{Direction, Value};

    fn user_row(id: i64, start_date: &str) -> Row {
        Row::new(vec![Value::Int64(id), Value::String(start_date.into())])
    }

    fn users_source() -> Rc<Source> {
        let source =
            Source::new("users", vec!["id".into(), "startDate".into()], vec![0]).unwrap();
        for (id, date) in [
            (1, "2019-06-18"),
            (2, "2020-08-01"),
            (3, "2021-12-07"),
            (4, "2022-12-01"),
            (5, "2023-04-01"),
            (6, "2023-09-01"),
            (7, "2024-06-01"),
        ] {
            source
                .apply(SourceChange::Add {
                    row: user_row(id, date),
                })
                .unwrap();
        }
        source
    }

    fn skip_chain(bound_date: &str, bound_id: i64, exclusive: bool) -> (Rc<Source>, Rc<Capture>) {
        let source = users_source();
        let conn = source.connect(vec![(1, Direction::Asc)]).unwrap();
        let skip = Skip::new(
            conn,
            Bound {
                row: user_row(bound_id, bound_date),
                exclusive,
            },
        );
        (source, Capture::new(skip))
    }

    fn fetched_ids(capture: &Capture, req: FetchRequest) -> Vec<i64> {
        capture
            .fetch(req)
            .into_iter()
            .map(|n| n.row.get(0).unwrap().as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_fetch_inclusive_bound() {
        let (_s, capture) = skip_chain("2023-03-31", 5, false);
        assert_eq!(fetched_ids(&capture, FetchRequest::all()), vec![5, 6, 7]);
    }

    #[test]
    fn test_fetch_bound_row_present() {
        let (_s, capture) = skip_chain("2023-04-01", 5, false);
        assert_eq!(fetched_ids(&capture, FetchRequest::all()), vec![5, 6, 7]);
        let (_s, capture) = skip_chain("2023-04-01", 5, true);
        assert_eq!(fetched_ids(&capture, FetchRequest::all()), vec![6, 7]);
    }

    #[test]
    fn test_fetch_caller_start_tighter() {
        let (_s, capture) = skip_chain("2023-03-31", 5, false);
        let req = FetchRequest {
            start: Some(Start {
                row: user_row(6, "2023-09-01"),
                basis: Basis::At,
            }),
            ..FetchRequest::all()
        };
        assert_eq!(fetched_ids(&capture, req), vec![6, 7]);
    }

    #[test]
    fn test_fetch_caller_start_moot() {
        let (_s, capture) = skip_chain("2023-03-31", 5, false);
        let req = FetchRequest {
            start: Some(Start {
                row: user_row(2, "2020-08-01"),
                basis: Basis::At,
            }),
            ..FetchRequest::all()
        };
        assert_eq!(fetched_ids(&capture, req), vec![5, 6, 7]);
    }

    #[test]
    fn test_fetch_before_basis_probes_predecessor() {
        let (_s, capture) = skip_chain("2023-03-31", 5, false);
        // Before-basis start on id 6 resolves to its predecessor id 5, which
        // is still inside the bound.
        let req = FetchRequest {
            start: Some(Start {
                row: user_row(6, "2023-09-01"),
                basis: Basis::Before,
            }),
            ..FetchRequest::all()
        };
        assert_eq!(fetched_ids(&capture, req), vec![5, 6, 7]);
        // Before-basis start on id 5: the predecessor (id 4) falls outside,
        // so the bound wins.
        let req = FetchRequest {
            start: Some(Start {
                row: user_row(5, "2023-04-01"),
                basis: Basis::Before,
            }),
            ..FetchRequest::all()
        };
        assert_eq!(fetched_ids(&capture, req), vec![5, 6, 7]);
    }

    #[test]
    fn test_fetch_reverse_truncates_at_bound() {
        let (_s, capture) = skip_chain("2023-03-31", 5, false);
        let req = FetchRequest {
            reverse: true,
            ..FetchRequest::all()
        };
        assert_eq!(fetched_ids(&capture, req), vec![7, 6, 5]);
    }

    #[test]
    fn test_fetch_reverse_excluded_range_is_empty() {
        let (_s, capture) = skip_chain("2023-03-31", 5, false);
        let req = FetchRequest {
            start: Some(Start {
                row: user_row(3, "2021-12-07"),
                basis: Basis::At,
            }),
            reverse: true,
            ..FetchRequest::all()
        };
        assert_eq!(fetched_ids(&capture, req), Vec::<i64>::new());
    }

    #[test]
    fn test_push_suppresses_rows_outside_bound() {
        let (source, capture) = skip_chain("2023-03-31", 5, false);
        capture.hydrate();
        source
            .apply(SourceChange::Add {
                row: user_row(8, "2020-01-01"),
            })
            .unwrap();
        assert!(capture.pushes().is_empty());
        source
            .apply(SourceChange::Add {
                row: user_row(9, "2024-12-01"),
            })
            .unwrap();
        assert_eq!(
            capture.take_pushes(),
            vec![CapturedChange::Add(CapturedNode::leaf(user_row(
                9,
                "2024-12-01"
            )))]
        );
    }

    #[test]
    fn test_push_edit_across_bound_splits() {
        let (source, capture) = skip_chain("2023-03-31", 5, false);
        capture.hydrate();
        // Moves from outside to inside: surfaces as an add.
        source
            .apply(SourceChange::Edit {
                old_row: user_row(2, "2020-08-01"),
                row: user_row(2, "2024-01-01"),
            })
            .unwrap();
        // Moves from inside to outside: surfaces as a remove.
        source
            .apply(SourceChange::Edit {
                old_row: user_row(6, "2023-09-01"),
                row: user_row(6, "2020-02-02"),
            })
            .unwrap();
        // Entirely outside: suppressed.
        source
            .apply(SourceChange::Edit {
                old_row: user_row(1, "2019-06-18"),
                row: user_row(1, "2019-07-01"),
            })
            .unwrap();
        assert_eq!(
            capture.take_pushes(),
            vec![
                CapturedChange::Add(CapturedNode::leaf(user_row(2, "2024-01-01"))),
                CapturedChange::Remove(CapturedNode::leaf(user_row(6, "2023-09-01"))),
            ]
        );
    }
}
