//! Expression tree.

use std::sync::Arc;

use bitflags::bitflags;

use super::lexer::Operator;
use super::registry::Function;
use super::value::{Type, ValueBox};
use crate::dict::Attribute;

bitflags! {
    /// Properties of a node, aggregated bottom-up.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u8 {
        /// Result depends only on the node's inputs; may be folded.
        const PURE = 1 << 0;
        /// Evaluation may suspend.
        const NEEDS_ASYNC = 1 << 1;
    }
}

impl Flags {
    /// Fold a child's flags into its parent's.
    ///
    /// A parent is pure only if every child is; it needs async if any child
    /// does.
    pub fn merge(&mut self, child: Flags) {
        if !child.contains(Flags::PURE) {
            self.remove(Flags::PURE);
        }
        if child.contains(Flags::NEEDS_ASYNC) {
            self.insert(Flags::NEEDS_ASYNC);
        }
    }

    pub fn is_pure(self) -> bool {
        self.contains(Flags::PURE)
    }

    pub fn needs_async(self) -> bool {
        self.contains(Flags::NEEDS_ASYNC)
    }
}

/// Byte range in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub flags: Flags,
    /// Conversion applied to the node's output.
    pub cast: Option<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Literal(ValueBox),
    Reference(Arc<Attribute>),
    Call(Call),
    /// One argument position of a call; evaluates to the concatenation of its
    /// children's outputs.
    Group(Vec<Node>),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub func: Arc<Function>,
    pub op: Operator,
    pub args: Vec<Node>,
}

impl PartialEq for Call {
    fn eq(&self, other: &Self) -> bool {
        (Arc::ptr_eq(&self.func, &other.func) || self.func.name == other.func.name)
            && self.op == other.op
            && self.args == other.args
    }
}

impl Node {
    pub fn literal(value: ValueBox, span: Span) -> Self {
        Node {
            kind: NodeKind::Literal(value),
            span,
            flags: Flags::PURE,
            cast: None,
        }
    }

    /// Attribute references depend on the request, so are never pure.
    pub fn reference(attr: Arc<Attribute>, span: Span, cast: Option<Type>) -> Self {
        Node {
            kind: NodeKind::Reference(attr),
            span,
            flags: Flags::empty(),
            cast,
        }
    }

    /// A call node. Arguments are wrapped in groups.
    pub fn call(func: Arc<Function>, op: Operator, args: Vec<Node>, span: Span) -> Self {
        let mut node = Node {
            kind: NodeKind::Call(Call {
                func,
                op,
                args: args.into_iter().map(Node::grouped).collect(),
            }),
            span,
            flags: Flags::empty(),
            cast: None,
        };
        node.update_flags();
        node
    }

    /// Wrap this node in a group, unless it already is one.
    pub fn grouped(self) -> Node {
        if matches!(self.kind, NodeKind::Group(_)) {
            return self;
        }
        Node {
            span: self.span,
            flags: self.flags,
            cast: None,
            kind: NodeKind::Group(vec![self]),
        }
    }

    /// Append another argument to a call (n-ary flattening).
    pub fn push_arg(&mut self, arg: Node) {
        if let NodeKind::Call(call) = &mut self.kind {
            self.span.end = self.span.end.max(arg.span.end);
            call.args.push(arg.grouped());
            self.update_flags();
        }
    }

    /// Group every call argument in this subtree. Idempotent.
    pub fn group_args(&mut self) {
        match &mut self.kind {
            NodeKind::Call(call) => {
                call.args = std::mem::take(&mut call.args)
                    .into_iter()
                    .map(|mut arg| {
                        arg.group_args();
                        arg.grouped()
                    })
                    .collect();
            }
            NodeKind::Group(children) => {
                for child in children.iter_mut() {
                    child.group_args();
                }
            }
            NodeKind::Literal(_) | NodeKind::Reference(_) => {}
        }
    }

    /// Recompute this node's flags from its function and children.
    pub fn update_flags(&mut self) {
        self.flags = match &self.kind {
            NodeKind::Literal(_) => Flags::PURE,
            NodeKind::Reference(_) => Flags::empty(),
            NodeKind::Call(call) => {
                let mut flags = call.func.flags;
                for arg in &call.args {
                    flags.merge(arg.flags);
                }
                flags
            }
            NodeKind::Group(children) => {
                let mut flags = Flags::PURE;
                for child in children {
                    flags.merge(child.flags);
                }
                flags
            }
        };
    }

    /// Number of nodes on the longest path down to a leaf.
    pub fn height(&self) -> usize {
        let children = match &self.kind {
            NodeKind::Literal(_) | NodeKind::Reference(_) => return 1,
            NodeKind::Call(call) => &call.args,
            NodeKind::Group(children) => children,
        };
        1 + children.iter().map(Node::height).max().unwrap_or(0)
    }

    pub fn as_literal(&self) -> Option<&ValueBox> {
        match &self.kind {
            NodeKind::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&Call> {
        match &self.kind {
            NodeKind::Call(c) => Some(c),
            _ => None,
        }
    }

    /// The type this node is known to produce, if any: its cast, or the
    /// declared type of a referenced attribute.
    pub fn output_type(&self) -> Option<Type> {
        self.cast.or(match &self.kind {
            NodeKind::Reference(attr) => Some(attr.ty),
            _ => None,
        })
    }
}
