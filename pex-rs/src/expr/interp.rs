//! Expression interpreter.
//!
//! The [`Interpreter`] walks a parsed tree using an explicit frame stack
//! rather than recursion, so deeply nested expressions cannot overflow the
//! native stack and evaluation can suspend at any attribute reference. A
//! reference suspends when the [`Request`] answers with
//! [`Resolution::Pending`]; the interpreter awaits the value and resumes
//! exactly where it left off.

use std::collections::HashMap;

use tokio::sync::oneshot;

use super::ast::{Node, NodeKind};
use super::logical::{ChildHandle, LogicalEval, Step};
use super::registry::Evaluator;
use super::value::{Type, Value, ValueBox};
use crate::dict::Attribute;
use crate::error::EvalError;

// ── Request ───────────────────────────────────────────────────────────────────

/// Outcome of asking a [`Request`] for an attribute's values.
#[derive(Debug)]
pub enum Resolution {
    Ready(Result<Vec<ValueBox>, EvalError>),
    /// The values will arrive on the channel.
    Pending(oneshot::Receiver<Result<Vec<ValueBox>, EvalError>>),
}

/// Source of attribute values during evaluation.
pub trait Request {
    fn resolve(&mut self, attr: &Attribute) -> Resolution;
}

/// A request backed by an in-memory map from attribute name to values.
///
/// Missing attributes resolve to no values.
#[derive(Debug, Default, Clone)]
pub struct MapRequest {
    values: HashMap<String, Vec<ValueBox>>,
    lookups: Vec<String>,
}

impl MapRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value to `name`.
    pub fn insert(&mut self, name: &str, value: ValueBox) {
        self.values
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value);
    }

    pub fn get(&self, name: &str) -> Option<&[ValueBox]> {
        self.values.get(&name.to_ascii_lowercase()).map(Vec::as_slice)
    }

    /// Attribute names looked up so far, in order.
    pub fn lookups(&self) -> &[String] {
        &self.lookups
    }

    pub fn clear_lookups(&mut self) {
        self.lookups.clear();
    }
}

impl Request for MapRequest {
    fn resolve(&mut self, attr: &Attribute) -> Resolution {
        self.lookups.push(attr.name.clone());
        let values = self.get(&attr.name).map(<[ValueBox]>::to_vec).unwrap_or_default();
        Resolution::Ready(Ok(values))
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

enum Next<'n> {
    Eval(&'n Node),
    Return(Result<Vec<ValueBox>, EvalError>),
}

enum Progress<'n> {
    Descend(&'n Node),
    Complete(Result<Vec<ValueBox>, EvalError>),
}

enum Frame<'n> {
    /// Evaluates `children` in order, then combines their outputs.
    Sequence {
        node: &'n Node,
        children: &'n [Node],
        results: Vec<Vec<ValueBox>>,
    },
    Logical {
        node: &'n Node,
        eval: LogicalEval<'n>,
        pending: ChildHandle,
    },
}

impl<'n> Frame<'n> {
    fn on_result(&mut self, result: Result<Vec<ValueBox>, EvalError>) -> Progress<'n> {
        match self {
            Frame::Sequence {
                node,
                children,
                results,
            } => {
                let (node, children): (&'n Node, &'n [Node]) = (*node, *children);
                let values = match result {
                    Ok(values) => values,
                    Err(e) => return Progress::Complete(Err(e)),
                };
                results.push(values);
                match children.get(results.len()) {
                    Some(child) => Progress::Descend(child),
                    None => Progress::Complete(combine(node, std::mem::take(results))),
                }
            }
            Frame::Logical {
                node,
                eval,
                pending,
            } => match eval.on_child_complete(*pending, result) {
                Ok(Step::Evaluate(handle, child)) => {
                    *pending = handle;
                    Progress::Descend(child)
                }
                Ok(Step::Done(value)) => Progress::Complete(logical_result(node, value)),
                Err(e) => Progress::Complete(Err(e)),
            },
        }
    }
}

/// Combine the outputs of a sequence frame's children.
fn combine(node: &Node, results: Vec<Vec<ValueBox>>) -> Result<Vec<ValueBox>, EvalError> {
    match &node.kind {
        NodeKind::Call(call) => {
            let args = call.func.marshal_args(results)?;
            let value = call.func.call_sync(&args)?;
            cast_all(vec![value], node.cast)
        }
        _ => cast_all(results.into_iter().flatten().collect(), node.cast),
    }
}

fn logical_result(node: &Node, value: bool) -> Result<Vec<ValueBox>, EvalError> {
    cast_all(vec![ValueBox::new(Value::Bool(value))], node.cast)
}

fn cast_all(values: Vec<ValueBox>, cast: Option<Type>) -> Result<Vec<ValueBox>, EvalError> {
    match cast {
        None => Ok(values),
        Some(ty) => values
            .iter()
            .map(|v| v.cast(ty).map_err(EvalError::from))
            .collect(),
    }
}

// ── Interpreter ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Interpreter {
    suspensions: usize,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times evaluation has waited on a pending attribute.
    pub fn suspensions(&self) -> usize {
        self.suspensions
    }

    /// Evaluate `root` against `request`, producing its list of values.
    pub async fn eval(
        &mut self,
        root: &Node,
        request: &mut dyn Request,
    ) -> Result<Vec<ValueBox>, EvalError> {
        let mut stack: Vec<Frame<'_>> = Vec::new();
        let mut next = Next::Eval(root);
        loop {
            next = match next {
                Next::Eval(node) => self.enter(node, &mut stack, request).await,
                Next::Return(result) => {
                    let Some(frame) = stack.last_mut() else {
                        return result;
                    };
                    match frame.on_result(result) {
                        Progress::Descend(child) => Next::Eval(child),
                        Progress::Complete(result) => {
                            stack.pop();
                            Next::Return(result)
                        }
                    }
                }
            };
        }
    }

    async fn enter<'n>(
        &mut self,
        node: &'n Node,
        stack: &mut Vec<Frame<'n>>,
        request: &mut dyn Request,
    ) -> Next<'n> {
        match &node.kind {
            NodeKind::Literal(v) => Next::Return(cast_all(vec![v.clone()], node.cast)),
            NodeKind::Reference(attr) => {
                let result = self.resolve(attr, request).await;
                Next::Return(result.and_then(|values| cast_all(values, node.cast)))
            }
            NodeKind::Group(children) => sequence(node, children, stack),
            NodeKind::Call(call) => match call.func.evaluator {
                Evaluator::Sync(_) => sequence(node, &call.args, stack),
                Evaluator::Logical(sense) => {
                    let (eval, step) = LogicalEval::begin(sense, &call.args);
                    match step {
                        Step::Evaluate(pending, child) => {
                            stack.push(Frame::Logical {
                                node,
                                eval,
                                pending,
                            });
                            Next::Eval(child)
                        }
                        Step::Done(value) => Next::Return(logical_result(node, value)),
                    }
                }
            },
        }
    }

    async fn resolve(
        &mut self,
        attr: &Attribute,
        request: &mut dyn Request,
    ) -> Result<Vec<ValueBox>, EvalError> {
        match request.resolve(attr) {
            Resolution::Ready(result) => result,
            Resolution::Pending(rx) => {
                self.suspensions += 1;
                log::trace!("suspended on &{}", attr.name);
                let result = rx.await.map_err(|_| EvalError::Cancelled {
                    attr: attr.name.clone(),
                })?;
                log::trace!("resumed with &{}", attr.name);
                result
            }
        }
    }
}

fn sequence<'n>(node: &'n Node, children: &'n [Node], stack: &mut Vec<Frame<'n>>) -> Next<'n> {
    match children.first() {
        Some(first) => {
            stack.push(Frame::Sequence {
                node,
                children,
                results: Vec::with_capacity(children.len()),
            });
            Next::Eval(first)
        }
        None => Next::Return(combine(node, Vec::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::Dictionary;
    use crate::expr::parser::{parse, ParseRules};
    use crate::expr::registry::Registry;

    fn tree(text: &str, dict: &mut Dictionary) -> Node {
        let reg = Registry::with_expressions().unwrap();
        let mut rules = ParseRules::new(&reg, dict);
        parse(text, &mut rules).unwrap().root
    }

    fn dict() -> Dictionary {
        let mut d = Dictionary::new();
        d.define("A", Type::Bool).unwrap();
        d.define("B", Type::Bool).unwrap();
        d.define("C", Type::Bool).unwrap();
        d.define("Port", Type::Uint32).unwrap();
        d.define("Name", Type::String).unwrap();
        d
    }

    /// Answers every lookup through a channel, forcing a suspension.
    #[derive(Default)]
    struct DeferredRequest {
        values: HashMap<String, Vec<ValueBox>>,
        lookups: Vec<String>,
    }

    impl Request for DeferredRequest {
        fn resolve(&mut self, attr: &Attribute) -> Resolution {
            let (tx, rx) = oneshot::channel();
            let values = self.values.get(&attr.name).cloned().unwrap_or_default();
            self.lookups.push(attr.name.clone());
            // Sent straight away; the receiver is still awaited.
            let _ = tx.send(Ok(values));
            Resolution::Pending(rx)
        }
    }

    /// Drops every sender, so every suspension is abandoned.
    struct AbandonedRequest;

    impl Request for AbandonedRequest {
        fn resolve(&mut self, _attr: &Attribute) -> Resolution {
            let (tx, rx) = oneshot::channel();
            drop(tx);
            Resolution::Pending(rx)
        }
    }

    fn bools(req: &mut MapRequest, pairs: &[(&str, bool)]) {
        for &(name, v) in pairs {
            req.insert(name, ValueBox::new(Value::Bool(v)));
        }
    }

    #[tokio::test]
    async fn literal_and_arithmetic() {
        let mut d = dict();
        let n = tree("&Port + 1", &mut d);
        let mut req = MapRequest::new();
        req.insert("Port", ValueBox::new(Value::Uint32(41)));
        let out = Interpreter::new().eval(&n, &mut req).await.unwrap();
        assert_eq!(out, vec![ValueBox::new(Value::Int64(42))]);
    }

    #[tokio::test]
    async fn and_short_circuits_lookups() {
        let mut d = dict();
        let n = tree("&A && &B && &C", &mut d);
        let mut req = MapRequest::new();
        bools(&mut req, &[("A", true), ("B", false), ("C", true)]);
        let out = Interpreter::new().eval(&n, &mut req).await.unwrap();
        assert_eq!(out, vec![ValueBox::new(Value::Bool(false))]);
        assert_eq!(req.lookups(), ["A", "B"]);
    }

    #[tokio::test]
    async fn or_short_circuits_lookups() {
        let mut d = dict();
        let n = tree("&A || &B || &C", &mut d);
        let mut req = MapRequest::new();
        bools(&mut req, &[("A", false), ("B", true), ("C", false)]);
        let out = Interpreter::new().eval(&n, &mut req).await.unwrap();
        assert_eq!(out, vec![ValueBox::new(Value::Bool(true))]);
        assert_eq!(req.lookups(), ["A", "B"]);
    }

    #[tokio::test]
    async fn suspends_and_resumes() {
        let mut d = dict();
        let n = tree("(&A || &B) && &C", &mut d);
        let mut req = DeferredRequest::default();
        req.values.insert("A".into(), vec![ValueBox::new(Value::Bool(false))]);
        req.values.insert("B".into(), vec![ValueBox::new(Value::Bool(true))]);
        req.values.insert("C".into(), vec![ValueBox::new(Value::Bool(true))]);
        let mut interp = Interpreter::new();
        let out = interp.eval(&n, &mut req).await.unwrap();
        assert_eq!(out, vec![ValueBox::new(Value::Bool(true))]);
        assert_eq!(interp.suspensions(), 3);
        assert_eq!(req.lookups, ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn abandoned_resolution_is_cancelled() {
        let mut d = dict();
        let n = tree("&Port + 1", &mut d);
        let mut req = AbandonedRequest;
        let err = Interpreter::new().eval(&n, &mut req).await.unwrap_err();
        assert_eq!(err, EvalError::Cancelled { attr: "Port".into() });
    }

    #[tokio::test]
    async fn child_failure_fails_logical() {
        let mut d = dict();
        let n = tree("&A || (&Port / 0)", &mut d);
        let mut req = MapRequest::new();
        bools(&mut req, &[("A", false)]);
        req.insert("Port", ValueBox::new(Value::Uint32(1)));
        let err = Interpreter::new().eval(&n, &mut req).await.unwrap_err();
        assert!(matches!(err, EvalError::Calc(_)));
    }

    #[tokio::test]
    async fn missing_attribute_is_false_in_logical() {
        let mut d = dict();
        let n = tree("&A || &B", &mut d);
        let mut req = MapRequest::new();
        let out = Interpreter::new().eval(&n, &mut req).await.unwrap();
        assert_eq!(out, vec![ValueBox::new(Value::Bool(false))]);
    }

    #[tokio::test]
    async fn missing_attribute_fails_arithmetic() {
        let mut d = dict();
        let n = tree("&Port + 1", &mut d);
        let mut req = MapRequest::new();
        let err = Interpreter::new().eval(&n, &mut req).await.unwrap_err();
        assert!(matches!(err, EvalError::ArgumentCount { position: 1, got: 0, .. }));
    }

    #[tokio::test]
    async fn reference_cast_applied() {
        let mut d = dict();
        let n = tree("(string)&Port", &mut d);
        let mut req = MapRequest::new();
        req.insert("Port", ValueBox::tainted(Value::Uint32(7)));
        let out = Interpreter::new().eval(&n, &mut req).await.unwrap();
        assert_eq!(out, vec![ValueBox::tainted(Value::from("7"))]);
    }

    #[tokio::test]
    async fn multi_valued_reference_in_logical() {
        let mut d = dict();
        let n = tree("&Name && &A", &mut d);
        let mut req = MapRequest::new();
        req.insert("Name", ValueBox::new(Value::from("bob")));
        req.insert("Name", ValueBox::new(Value::from("")));
        bools(&mut req, &[("A", true)]);
        let out = Interpreter::new().eval(&n, &mut req).await.unwrap();
        assert_eq!(out, vec![ValueBox::new(Value::Bool(false))]);
        assert_eq!(req.lookups(), ["Name"]);
    }

    #[tokio::test]
    async fn deep_nesting_does_not_recurse() {
        let mut d = dict();
        let text = format!("{}&Port{}", "(".repeat(100), " + 1)".repeat(100));
        let n = tree(&text, &mut d);
        let mut req = MapRequest::new();
        req.insert("Port", ValueBox::new(Value::Uint32(0)));
        let out = Interpreter::new().eval(&n, &mut req).await.unwrap();
        assert_eq!(out, vec![ValueBox::new(Value::Int64(100))]);
    }
}
