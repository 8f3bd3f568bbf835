//! Typed runtime values.
//!
//! Every operand an expression produces is a [`ValueBox`]: a typed [`Value`]
//! plus a taint marker recording whether the data came from the network.
//! Literal parsing and casting live here too, since both the parser (for
//! literal operands and explicit casts) and the interpreter (for casts on
//! attribute references) need them.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

// ── Types ─────────────────────────────────────────────────────────────────────

/// The data type of a [`Value`], as named in casts and dictionary entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int64,
    Float64,
    String,
    Octets,
    Ipv4Addr,
    Ipv6Addr,
    Ipv4Prefix,
    Ipv6Prefix,
    Group,
}

impl Type {
    pub fn name(self) -> &'static str {
        match self {
            Type::Bool => "bool",
            Type::Uint8 => "uint8",
            Type::Uint16 => "uint16",
            Type::Uint32 => "uint32",
            Type::Uint64 => "uint64",
            Type::Int64 => "int64",
            Type::Float64 => "float64",
            Type::String => "string",
            Type::Octets => "octets",
            Type::Ipv4Addr => "ipv4addr",
            Type::Ipv6Addr => "ipv6addr",
            Type::Ipv4Prefix => "ipv4prefix",
            Type::Ipv6Prefix => "ipv6prefix",
            Type::Group => "group",
        }
    }

    /// Look up a type by the name used in casts (`(uint32)`) and dictionaries.
    ///
    /// `ipaddr`, `integer` and `byte` are accepted as legacy aliases.
    pub fn from_name(name: &str) -> Option<Type> {
        Some(match name.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Type::Bool,
            "uint8" | "byte" => Type::Uint8,
            "uint16" | "short" => Type::Uint16,
            "uint32" | "integer" => Type::Uint32,
            "uint64" | "integer64" => Type::Uint64,
            "int64" | "signed" => Type::Int64,
            "float64" | "double" => Type::Float64,
            "string" => Type::String,
            "octets" => Type::Octets,
            "ipaddr" | "ipv4addr" => Type::Ipv4Addr,
            "ipv6addr" => Type::Ipv6Addr,
            "ipv4prefix" => Type::Ipv4Prefix,
            "ipv6prefix" => Type::Ipv6Prefix,
            "group" => Type::Group,
            _ => return None,
        })
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Type::Uint8 | Type::Uint16 | Type::Uint32 | Type::Uint64 | Type::Int64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, Type::Uint8 | Type::Uint16 | Type::Uint32 | Type::Uint64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self == Type::Float64
    }

    /// Inclusive integer range representable by this type.
    fn integer_range(self) -> Option<(i128, i128)> {
        Some(match self {
            Type::Uint8 => (0, u8::MAX as i128),
            Type::Uint16 => (0, u16::MAX as i128),
            Type::Uint32 => (0, u32::MAX as i128),
            Type::Uint64 => (0, u64::MAX as i128),
            Type::Int64 => (i64::MIN as i128, i64::MAX as i128),
            _ => return None,
        })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure converting text or a value to a target [`Type`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CastError {
    #[error("cannot cast {from} to {to}")]
    Unsupported { from: Type, to: Type },
    #[error("invalid {ty} value '{text}'")]
    Invalid { ty: Type, text: String },
    #[error("{value} is out of range for {ty}")]
    OutOfRange { ty: Type, value: String },
}

// ── Values ────────────────────────────────────────────────────────────────────

/// A typed scalar, or a group of values produced by one argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Int64(i64),
    Float64(f64),
    String(String),
    Octets(Vec<u8>),
    Ipv4Addr(Ipv4Addr),
    Ipv6Addr(Ipv6Addr),
    Ipv4Prefix(Ipv4Addr, u8),
    Ipv6Prefix(Ipv6Addr, u8),
    Group(Vec<ValueBox>),
}

/// A [`Value`] plus its taint marker.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBox {
    pub value: Value,
    pub tainted: bool,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Uint8(n) => write!(f, "{n}"),
            Value::Uint16(n) => write!(f, "{n}"),
            Value::Uint32(n) => write!(f, "{n}"),
            Value::Uint64(n) => write!(f, "{n}"),
            Value::Int64(n) => write!(f, "{n}"),
            Value::Float64(x) => {
                // Integral floats need a '.' or an exponent to read back as
                // floats.
                if *x == 0.0 {
                    // Both zeros.
                    f.write_str("0.0")
                } else if x.fract() != 0.0 || !x.is_finite() {
                    write!(f, "{x}")
                } else if x.abs() < 1e15 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x:e}")
                }
            }
            Value::String(s) => f.write_str(s),
            Value::Octets(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Value::Ipv4Addr(a) => write!(f, "{a}"),
            Value::Ipv6Addr(a) => write!(f, "{a}"),
            Value::Ipv4Prefix(a, len) => write!(f, "{a}/{len}"),
            Value::Ipv6Prefix(a, len) => write!(f, "{a}/{len}"),
            Value::Group(values) => {
                f.write_str("(")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for ValueBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl Value {
    pub fn ty(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Uint8(_) => Type::Uint8,
            Value::Uint16(_) => Type::Uint16,
            Value::Uint32(_) => Type::Uint32,
            Value::Uint64(_) => Type::Uint64,
            Value::Int64(_) => Type::Int64,
            Value::Float64(_) => Type::Float64,
            Value::String(_) => Type::String,
            Value::Octets(_) => Type::Octets,
            Value::Ipv4Addr(_) => Type::Ipv4Addr,
            Value::Ipv6Addr(_) => Type::Ipv6Addr,
            Value::Ipv4Prefix(..) => Type::Ipv4Prefix,
            Value::Ipv6Prefix(..) => Type::Ipv6Prefix,
            Value::Group(_) => Type::Group,
        }
    }

    /// Integer view of any integer-typed value (and bool as 0/1).
    pub(crate) fn as_i128(&self) -> Option<i128> {
        Some(match self {
            Value::Bool(b) => *b as i128,
            Value::Uint8(n) => *n as i128,
            Value::Uint16(n) => *n as i128,
            Value::Uint32(n) => *n as i128,
            Value::Uint64(n) => *n as i128,
            Value::Int64(n) => *n as i128,
            _ => return None,
        })
    }

    /// Build an integer value of type `ty`, checking its range.
    pub(crate) fn from_i128(n: i128, ty: Type) -> Result<Value, CastError> {
        let out_of_range = || CastError::OutOfRange {
            ty,
            value: n.to_string(),
        };
        let (lo, hi) = ty.integer_range().ok_or(CastError::Unsupported {
            from: Type::Int64,
            to: ty,
        })?;
        if n < lo || n > hi {
            return Err(out_of_range());
        }
        Ok(match ty {
            Type::Uint8 => Value::Uint8(n as u8),
            Type::Uint16 => Value::Uint16(n as u16),
            Type::Uint32 => Value::Uint32(n as u32),
            Type::Uint64 => Value::Uint64(n as u64),
            _ => Value::Int64(n as i64),
        })
    }

    // ── Literal parsing ──────────────────────────────────────────────────────

    /// Parse `text` as a value of type `ty`.
    pub fn parse_as(text: &str, ty: Type) -> Result<Value, CastError> {
        let invalid = || CastError::Invalid {
            ty,
            text: text.to_owned(),
        };
        let trimmed = text.trim();
        match ty {
            Type::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            Type::Uint8 | Type::Uint16 | Type::Uint32 | Type::Uint64 | Type::Int64 => {
                let n = parse_integer(trimmed).ok_or_else(invalid)?;
                Value::from_i128(n, ty)
            }
            Type::Float64 => trimmed
                .parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .map(Value::Float64)
                .ok_or_else(invalid),
            Type::String => Ok(Value::String(text.to_owned())),
            Type::Octets => match trimmed.strip_prefix("0x") {
                Some(hex) => parse_hex(hex).map(Value::Octets).ok_or_else(invalid),
                None => Ok(Value::Octets(text.as_bytes().to_vec())),
            },
            Type::Ipv4Addr => match trimmed.split_once('/') {
                Some((addr, "32")) => addr.parse().map(Value::Ipv4Addr).map_err(|_| invalid()),
                Some(_) => Err(invalid()),
                None => trimmed.parse().map(Value::Ipv4Addr).map_err(|_| invalid()),
            },
            Type::Ipv6Addr => match trimmed.split_once('/') {
                Some((addr, "128")) => addr.parse().map(Value::Ipv6Addr).map_err(|_| invalid()),
                Some(_) => Err(invalid()),
                None => trimmed.parse().map(Value::Ipv6Addr).map_err(|_| invalid()),
            },
            Type::Ipv4Prefix => {
                let (addr, len) = split_prefix(trimmed, 32).ok_or_else(invalid)?;
                let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
                Ok(ipv4_prefix(addr, len))
            }
            Type::Ipv6Prefix => {
                let (addr, len) = split_prefix(trimmed, 128).ok_or_else(invalid)?;
                let addr: Ipv6Addr = addr.parse().map_err(|_| invalid())?;
                Ok(ipv6_prefix(addr, len))
            }
            Type::Group => Err(CastError::Unsupported {
                from: Type::String,
                to: Type::Group,
            }),
        }
    }

    /// Infer the type of an unquoted literal.
    ///
    /// Returns `None` when the text is not a recognisable literal.
    pub fn infer(text: &str) -> Option<Value> {
        match text {
            "true" => return Some(Value::Bool(true)),
            "false" => return Some(Value::Bool(false)),
            _ => {}
        }
        if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = text.parse::<i64>() {
                return Some(Value::Int64(n));
            }
            return text.parse::<u64>().ok().map(Value::Uint64);
        }
        if let Some(hex) = text.strip_prefix("0x") {
            return parse_hex(hex).map(Value::Octets);
        }
        let candidates = if text.contains('/') {
            [Type::Ipv4Prefix, Type::Ipv6Prefix]
        } else {
            [Type::Ipv4Addr, Type::Ipv6Addr]
        };
        for ty in candidates {
            if let Ok(v) = Value::parse_as(text, ty) {
                return Some(v);
            }
        }
        if text.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            return text
                .parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .map(Value::Float64);
        }
        None
    }

    // ── Casting ──────────────────────────────────────────────────────────────

    /// Convert this value to `to`.
    pub fn cast(&self, to: Type) -> Result<Value, CastError> {
        let from = self.ty();
        if from == to {
            return Ok(self.clone());
        }
        let unsupported = || CastError::Unsupported { from, to };
        match (self, to) {
            (Value::Group(_), _) | (_, Type::Group) => Err(unsupported()),

            (Value::String(s), _) => Value::parse_as(s, to),
            (Value::Octets(bytes), Type::String) => {
                Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()))
            }
            (_, Type::String) => Ok(Value::String(self.to_string())),

            (Value::Float64(x), Type::Bool) => Ok(Value::Bool(*x != 0.0)),
            (_, Type::Bool) => self
                .as_i128()
                .map(|n| Value::Bool(n != 0))
                .ok_or_else(unsupported),

            (Value::Float64(x), t) if t.is_integer() => {
                if !x.is_finite() {
                    return Err(CastError::OutOfRange {
                        ty: t,
                        value: x.to_string(),
                    });
                }
                Value::from_i128(x.trunc() as i128, t)
            }
            (Value::Ipv4Addr(a), Type::Uint32) => Ok(Value::Uint32(u32::from(*a))),
            (_, t) if t.is_integer() => {
                let n = self.as_i128().ok_or_else(unsupported)?;
                Value::from_i128(n, t)
            }
            (_, Type::Float64) => self
                .as_i128()
                .map(|n| Value::Float64(n as f64))
                .ok_or_else(unsupported),

            (Value::Uint32(n), Type::Ipv4Addr) => Ok(Value::Ipv4Addr(Ipv4Addr::from(*n))),
            (Value::Ipv4Prefix(a, 32), Type::Ipv4Addr) => Ok(Value::Ipv4Addr(*a)),
            (Value::Ipv4Addr(a), Type::Ipv4Prefix) => Ok(Value::Ipv4Prefix(*a, 32)),
            (Value::Ipv6Addr(a), Type::Ipv4Addr) => {
                a.to_ipv4_mapped().map(Value::Ipv4Addr).ok_or_else(unsupported)
            }
            (Value::Ipv4Addr(a), Type::Ipv6Addr) => Ok(Value::Ipv6Addr(a.to_ipv6_mapped())),
            (Value::Ipv6Prefix(a, 128), Type::Ipv6Addr) => Ok(Value::Ipv6Addr(*a)),
            (Value::Ipv6Addr(a), Type::Ipv6Prefix) => Ok(Value::Ipv6Prefix(*a, 128)),

            (Value::Ipv4Addr(a), Type::Octets) => Ok(Value::Octets(a.octets().to_vec())),
            (Value::Ipv6Addr(a), Type::Octets) => Ok(Value::Octets(a.octets().to_vec())),
            (v, Type::Octets) => match v {
                Value::Uint8(n) => Ok(Value::Octets(n.to_be_bytes().to_vec())),
                Value::Uint16(n) => Ok(Value::Octets(n.to_be_bytes().to_vec())),
                Value::Uint32(n) => Ok(Value::Octets(n.to_be_bytes().to_vec())),
                Value::Uint64(n) => Ok(Value::Octets(n.to_be_bytes().to_vec())),
                Value::Int64(n) => Ok(Value::Octets(n.to_be_bytes().to_vec())),
                _ => Err(unsupported()),
            },

            _ => Err(unsupported()),
        }
    }
}

impl ValueBox {
    pub fn new(value: Value) -> Self {
        ValueBox {
            value,
            tainted: false,
        }
    }

    pub fn tainted(value: Value) -> Self {
        ValueBox {
            value,
            tainted: true,
        }
    }

    /// A group box holding `values`; tainted if any member is.
    pub fn group(values: Vec<ValueBox>) -> Self {
        let tainted = values.iter().any(|v| v.tainted);
        ValueBox {
            value: Value::Group(values),
            tainted,
        }
    }

    pub fn ty(&self) -> Type {
        self.value.ty()
    }

    /// Cast to `to`, keeping the taint marker.
    pub fn cast(&self, to: Type) -> Result<ValueBox, CastError> {
        Ok(ValueBox {
            value: self.value.cast(to)?,
            tainted: self.tainted,
        })
    }

    /// Boolean interpretation used by the logical operators.
    ///
    /// This differs from a bool cast: strings and octets are true when
    /// non-empty regardless of content, and addresses are true unless they are
    /// the unspecified address.
    pub fn coerce_bool(&self) -> bool {
        match &self.value {
            Value::Bool(b) => *b,
            Value::String(s) => !s.is_empty(),
            Value::Octets(bytes) => !bytes.is_empty(),
            Value::Ipv4Addr(a) => !a.is_unspecified(),
            Value::Ipv6Addr(a) => !a.is_unspecified(),
            Value::Ipv4Prefix(a, len) => !(*len == 0 && a.is_unspecified()),
            Value::Ipv6Prefix(a, len) => !(*len == 0 && a.is_unspecified()),
            other => matches!(other.cast(Type::Bool), Ok(Value::Bool(true))),
        }
    }
}

impl From<Value> for ValueBox {
    fn from(value: Value) -> Self {
        ValueBox::new(value)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int64(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Uint32(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float64(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Ipv4Addr> for Value {
    fn from(a: Ipv4Addr) -> Self {
        Value::Ipv4Addr(a)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn parse_integer(text: &str) -> Option<i128> {
    if let Some(hex) = text.strip_prefix("0x") {
        return i128::from_str_radix(hex, 16).ok();
    }
    text.parse::<i128>().ok()
}

fn parse_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// Split `addr/len`; a bare address gets the full-length prefix.
fn split_prefix(text: &str, max: u8) -> Option<(&str, u8)> {
    match text.split_once('/') {
        Some((addr, len)) => {
            let len: u8 = len.parse().ok()?;
            (len <= max).then_some((addr, len))
        }
        None => Some((text, max)),
    }
}

fn ipv4_prefix(addr: Ipv4Addr, len: u8) -> Value {
    let mask = if len == 0 { 0 } else { u32::MAX << (32 - u32::from(len)) };
    Value::Ipv4Prefix(Ipv4Addr::from(u32::from(addr) & mask), len)
}

fn ipv6_prefix(addr: Ipv6Addr, len: u8) -> Value {
    let mask = if len == 0 { 0 } else { u128::MAX << (128 - u32::from(len)) };
    Value::Ipv6Prefix(Ipv6Addr::from(u128::from(addr) & mask), len)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
