//! Binary arithmetic, bitwise and comparison operations on [`ValueBox`]es.

use std::cmp::Ordering;

use thiserror::Error;

use super::lexer::Operator;
use super::value::{Type, Value, ValueBox};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("invalid operands for '{op}': {lhs} and {rhs}")]
    InvalidOperands { op: Operator, lhs: Type, rhs: Type },
    #[error("overflow in '{op}'")]
    Overflow { op: Operator },
    #[error("division by zero")]
    DivisionByZero,
    #[error("shift amount {0} is out of range")]
    ShiftRange(i128),
    #[error("cannot compare {lhs} with {rhs}")]
    Incomparable { lhs: Type, rhs: Type },
    #[error("'{0}' is not a binary operator")]
    NotBinary(Operator),
}

/// Numeric operand after promotion.
enum Num {
    Int(i128),
    Float(f64),
}

fn numeric(v: &Value) -> Option<Num> {
    match v {
        Value::Float64(x) => Some(Num::Float(*x)),
        Value::Bool(_) => None,
        other => other.as_i128().map(Num::Int),
    }
}

/// Result type for integer arithmetic: unsigned only if both sides are.
fn integer_result(a: &Value, b: &Value) -> Type {
    if a.ty().is_unsigned() && b.ty().is_unsigned() {
        Type::Uint64
    } else {
        Type::Int64
    }
}

/// Apply `op` to `a` and `b`. The result is tainted if either input is.
pub fn binary_op(a: &ValueBox, op: Operator, b: &ValueBox) -> Result<ValueBox, CalcError> {
    let value = if op.is_comparison() {
        let ord = compare(&a.value, &b.value)?;
        Value::Bool(match op {
            Operator::Eq => ord == Ordering::Equal,
            Operator::Ne => ord != Ordering::Equal,
            Operator::Lt => ord == Ordering::Less,
            Operator::Le => ord != Ordering::Greater,
            Operator::Gt => ord == Ordering::Greater,
            _ => ord != Ordering::Less,
        })
    } else {
        arith(&a.value, op, &b.value)?
    };
    Ok(ValueBox {
        value,
        tainted: a.tainted || b.tainted,
    })
}

fn arith(a: &Value, op: Operator, b: &Value) -> Result<Value, CalcError> {
    let invalid = || CalcError::InvalidOperands {
        op,
        lhs: a.ty(),
        rhs: b.ty(),
    };

    match (a, op, b) {
        (Value::String(x), Operator::Add, Value::String(y)) => {
            return Ok(Value::String(format!("{x}{y}")));
        }
        (Value::Octets(x), Operator::Add, Value::Octets(y)) => {
            let mut out = x.clone();
            out.extend_from_slice(y);
            return Ok(Value::Octets(out));
        }
        _ => {}
    }

    match (numeric(a), numeric(b)) {
        (Some(Num::Int(x)), Some(Num::Int(y))) => {
            let n = int_op(x, op, y)?;
            Value::from_i128(n, integer_result(a, b)).map_err(|_| CalcError::Overflow { op })
        }
        (Some(x), Some(y)) => {
            let (x, y) = (as_f64(x), as_f64(y));
            let r = match op {
                Operator::Add => x + y,
                Operator::Sub => x - y,
                Operator::Mul => x * y,
                Operator::Div => {
                    if y == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    x / y
                }
                _ => return Err(invalid()),
            };
            if !r.is_finite() {
                return Err(CalcError::Overflow { op });
            }
            Ok(Value::Float64(r))
        }
        _ => Err(invalid()),
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(x) => x,
    }
}

fn int_op(x: i128, op: Operator, y: i128) -> Result<i128, CalcError> {
    let overflow = CalcError::Overflow { op };
    match op {
        Operator::Add => x.checked_add(y).ok_or(overflow),
        Operator::Sub => x.checked_sub(y).ok_or(overflow),
        Operator::Mul => x.checked_mul(y).ok_or(overflow),
        Operator::Div => {
            if y == 0 {
                return Err(CalcError::DivisionByZero);
            }
            Ok(x / y)
        }
        Operator::BitAnd => Ok(x & y),
        Operator::BitOr => Ok(x | y),
        Operator::BitXor => Ok(x ^ y),
        Operator::Shl | Operator::Shr => {
            if !(0..64).contains(&y) {
                return Err(CalcError::ShiftRange(y));
            }
            if op == Operator::Shl {
                x.checked_mul(1i128 << y).ok_or(overflow)
            } else {
                Ok(x >> y)
            }
        }
        _ => Err(CalcError::NotBinary(op)),
    }
}

/// Order two values.
///
/// Numbers compare across widths, strings and octets bytewise, addresses
/// within their family. A string compared against a typed value is first
/// parsed as that type.
pub fn compare(a: &Value, b: &Value) -> Result<Ordering, CalcError> {
    let incomparable = || CalcError::Incomparable {
        lhs: a.ty(),
        rhs: b.ty(),
    };

    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return match (x, y) {
            (Num::Int(x), Num::Int(y)) => Ok(x.cmp(&y)),
            (x, y) => as_f64(x).partial_cmp(&as_f64(y)).ok_or_else(incomparable),
        };
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Octets(x), Value::Octets(y)) => Ok(x.cmp(y)),
        (Value::Ipv4Addr(x), Value::Ipv4Addr(y)) => Ok(x.cmp(y)),
        (Value::Ipv6Addr(x), Value::Ipv6Addr(y)) => Ok(x.cmp(y)),
        (Value::Ipv4Prefix(x, xl), Value::Ipv4Prefix(y, yl)) => Ok((x, xl).cmp(&(y, yl))),
        (Value::Ipv6Prefix(x, xl), Value::Ipv6Prefix(y, yl)) => Ok((x, xl).cmp(&(y, yl))),
        (Value::Ipv4Addr(_), Value::Ipv4Prefix(..)) | (Value::Ipv6Addr(_), Value::Ipv6Prefix(..)) => {
            let a = a.cast(b.ty()).map_err(|_| incomparable())?;
            compare(&a, b)
        }
        (Value::Ipv4Prefix(..), Value::Ipv4Addr(_)) | (Value::Ipv6Prefix(..), Value::Ipv6Addr(_)) => {
            let b = b.cast(a.ty()).map_err(|_| incomparable())?;
            compare(a, &b)
        }
        (Value::String(s), other) if other.ty() != Type::Group => {
            let a = Value::parse_as(s, other.ty()).map_err(|_| incomparable())?;
            compare(&a, other)
        }
        (other, Value::String(s)) if other.ty() != Type::Group => {
            let b = Value::parse_as(s, other.ty()).map_err(|_| incomparable())?;
            compare(other, &b)
        }
        _ => Err(incomparable()),
    }
}
