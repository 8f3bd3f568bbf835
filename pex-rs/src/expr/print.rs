//! Canonical text form of an expression tree.
//!
//! Binary operations are fully parenthesised, so the output parses back to
//! an equivalent tree whatever the precedence of the operators involved.

use std::fmt;

use super::ast::{Call, Node, NodeKind};
use super::registry::Fixity;
use super::value::{Type, Value, ValueBox};

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Literal(v) => write_literal(f, v),
            NodeKind::Reference(attr) => {
                write_cast(f, self)?;
                write!(f, "&{}", attr.name)
            }
            // A cast must precede any prefix operator, so a cast prefix
            // expression is bracketed.
            NodeKind::Call(call) if self.cast.is_some() && call.func.fixity == Fixity::Prefix => {
                write_cast(f, self)?;
                f.write_str("(")?;
                (call.func.printer)(f, call)?;
                f.write_str(")")
            }
            NodeKind::Call(call) => {
                write_cast(f, self)?;
                (call.func.printer)(f, call)
            }
            NodeKind::Group(children) => match children.as_slice() {
                [only] => only.fmt(f),
                _ => {
                    f.write_str("(")?;
                    for (i, child) in children.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        child.fmt(f)?;
                    }
                    f.write_str(")")
                }
            },
        }
    }
}

/// Canonical text of `node`.
pub fn print(node: &Node) -> String {
    node.to_string()
}

fn write_cast(f: &mut fmt::Formatter<'_>, node: &Node) -> fmt::Result {
    match node.cast {
        Some(ty) => write!(f, "({ty})"),
        None => Ok(()),
    }
}

fn write_literal(f: &mut fmt::Formatter<'_>, v: &ValueBox) -> fmt::Result {
    match &v.value {
        Value::String(s) => {
            f.write_str("\"")?;
            for ch in s.chars() {
                match ch {
                    '"' => f.write_str("\\\"")?,
                    '\\' => f.write_str("\\\\")?,
                    '\n' => f.write_str("\\n")?,
                    '\r' => f.write_str("\\r")?,
                    '\t' => f.write_str("\\t")?,
                    c => write!(f, "{c}")?,
                }
            }
            f.write_str("\"")
        }
        // Other types would not read back as themselves without a cast.
        Value::Uint8(_) | Value::Uint16(_) | Value::Uint32(_) | Value::Uint64(_) => {
            write!(f, "({}){}", v.ty(), v.value)
        }
        other => write!(f, "{other}"),
    }
}

/// `(lhs OP rhs)`
pub fn print_binary(f: &mut fmt::Formatter<'_>, call: &Call) -> fmt::Result {
    match call.args.as_slice() {
        [lhs, rhs] if call.op.is_comparison() => {
            write!(f, "({lhs} {} ", call.op)?;
            write_compared(f, rhs, ungroup(lhs).output_type())?;
            f.write_str(")")
        }
        [lhs, rhs] => write!(f, "({lhs} {} {rhs})", call.op),
        args => write_list(f, call, args),
    }
}

/// Right-hand side of a comparison. The parser reads a literal there as the
/// left side's type where it can, so a literal of any other type is written
/// with its own cast.
fn write_compared(f: &mut fmt::Formatter<'_>, rhs: &Node, hint: Option<Type>) -> fmt::Result {
    let node = ungroup(rhs);
    let (Some(v), Some(hint)) = (node.as_literal(), hint) else {
        return write!(f, "{rhs}");
    };
    let ty = v.ty();
    if ty == hint || ty.is_unsigned() {
        return write_literal(f, v);
    }
    write!(f, "({ty})")?;
    match &v.value {
        Value::Int64(n) if *n < 0 => write!(f, "({v})"),
        Value::Float64(x) if *x < 0.0 => write!(f, "({v})"),
        _ => write_literal(f, v),
    }
}

fn ungroup(node: &Node) -> &Node {
    match &node.kind {
        NodeKind::Group(children) => match children.as_slice() {
            [only] => only,
            _ => node,
        },
        _ => node,
    }
}

/// `OPoperand`
pub fn print_unary(f: &mut fmt::Formatter<'_>, call: &Call) -> fmt::Result {
    match call.args.as_slice() {
        [operand] => write!(f, "{}{operand}", call.op),
        args => write_list(f, call, args),
    }
}

/// `(a OP b OP c)`
pub fn print_logical(f: &mut fmt::Formatter<'_>, call: &Call) -> fmt::Result {
    write_list(f, call, &call.args)
}

fn write_list(f: &mut fmt::Formatter<'_>, call: &Call, args: &[Node]) -> fmt::Result {
    f.write_str("(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", call.op)?;
        }
        write!(f, "{arg}")?;
    }
    f.write_str(")")
}
