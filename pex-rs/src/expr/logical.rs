//! Short-circuit evaluation of `&&` and `||`.
//!
//! [`LogicalEval`] is an explicit state machine. The driver asks it which
//! operand to evaluate next, evaluates that operand however it likes
//! (possibly suspending), and reports the result back. The machine never
//! evaluates anything itself, so the driver decides how suspension works.

use super::ast::Node;
use super::registry::Sense;
use super::value::{Value, ValueBox};
use crate::error::EvalError;

/// Identifies the operand evaluation a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHandle(usize);

impl ChildHandle {
    /// Position of the operand in the call's argument list.
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    EvaluatingChild(ChildHandle),
    Done { value: bool, short_circuited: bool },
    Failed,
}

/// What the driver should do next.
#[derive(Debug)]
pub enum Step<'n> {
    Evaluate(ChildHandle, &'n Node),
    Done(bool),
}

#[derive(Debug)]
pub struct LogicalEval<'n> {
    sense: Sense,
    children: &'n [Node],
    cursor: usize,
    /// Boolean value of the last scalar examined.
    last: bool,
    state: State,
}

impl<'n> LogicalEval<'n> {
    /// Start evaluating `children` with the given sense.
    ///
    /// With no operands the result is false.
    pub fn begin(sense: Sense, children: &'n [Node]) -> (Self, Step<'n>) {
        let mut eval = LogicalEval {
            sense,
            children,
            cursor: 0,
            last: false,
            state: State::Start,
        };
        let step = eval.enter(0);
        (eval, step)
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Report the outcome of the operand identified by `handle`.
    ///
    /// An operand failure fails the whole operator.
    pub fn on_child_complete(
        &mut self,
        handle: ChildHandle,
        result: Result<Vec<ValueBox>, EvalError>,
    ) -> Result<Step<'n>, EvalError> {
        match self.state {
            State::EvaluatingChild(expected) if expected == handle => {}
            _ => return Err(EvalError::UnexpectedResume),
        }
        let values = match result {
            Ok(values) => values,
            Err(e) => {
                self.state = State::Failed;
                return Err(e);
            }
        };

        if scan(&values, self.sense.stop_on(), &mut self.last) {
            log::trace!(
                "{:?} short-circuited at operand {} with {}",
                self.sense,
                handle.index(),
                self.last
            );
            self.state = State::Done {
                value: self.last,
                short_circuited: true,
            };
            return Ok(Step::Done(self.last));
        }
        Ok(self.enter(self.cursor + 1))
    }

    fn enter(&mut self, index: usize) -> Step<'n> {
        self.cursor = index;
        match self.children.get(index) {
            Some(child) => {
                let handle = ChildHandle(index);
                self.state = State::EvaluatingChild(handle);
                Step::Evaluate(handle, child)
            }
            None => {
                self.state = State::Done {
                    value: self.last,
                    short_circuited: false,
                };
                Step::Done(self.last)
            }
        }
    }
}

/// Coerce each scalar in `values` (descending into groups) and record it in
/// `last`. Returns true on reaching the stop value.
fn scan(values: &[ValueBox], stop_on: bool, last: &mut bool) -> bool {
    for v in values {
        let stop = match &v.value {
            Value::Group(inner) => scan(inner, stop_on, last),
            _ => {
                *last = v.coerce_bool();
                *last == stop_on
            }
        };
        if stop {
            return true;
        }
    }
    false
}
