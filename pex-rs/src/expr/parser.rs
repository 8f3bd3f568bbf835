//! Expression parser.
//!
//! Operands are read by the field parser; infix operators are combined by
//! precedence climbing. Every call node is handed to the purifier as soon as
//! it is built, so constant sub-expressions are already folded when the
//! parse returns.
//!
//! ```text
//! expr     := field (operator expr)*
//! field    := unary* cast? ( '(' expr ')' | operand )
//! unary    := '+' | '-' | '!'
//! cast     := '(' typename ')'
//! ```

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::runtime::Runtime;

use super::ast::{Flags, Node, NodeKind, Span};
use super::interp::{Interpreter, Request};
use super::lexer::{Cursor, Operator};
use super::purify;
use super::registry::{Precedence, Registry};
use super::value::{Type, Value, ValueBox};
use crate::dict::{self, Attribute, Dictionary};
use crate::error::{EvalError, ParseError};

/// Deepest nesting of brackets and prefix operators accepted.
const MAX_DEPTH: usize = 256;

/// Tallest tree the parser builds, counted in nodes. A call adds two levels
/// and at most two nested fields to its printed form, so the canonical text
/// of any parsed tree parses again.
const MAX_HEIGHT: usize = MAX_DEPTH;

/// What a parse may consult and modify.
pub struct ParseRules<'a> {
    pub registry: &'a Registry,
    /// Unknown attributes are defined here when `allow_unknown` is set.
    pub dictionary: &'a mut Dictionary,
    pub allow_unknown: bool,
}

impl<'a> ParseRules<'a> {
    pub fn new(registry: &'a Registry, dictionary: &'a mut Dictionary) -> Self {
        ParseRules {
            registry,
            dictionary,
            allow_unknown: false,
        }
    }

    pub fn allow_unknown(mut self, allow: bool) -> Self {
        self.allow_unknown = allow;
        self
    }
}

/// A parsed expression and its aggregate flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub root: Node,
    pub flags: Flags,
}

impl Parsed {
    /// Whether the whole expression folded to a single value.
    pub fn is_constant(&self) -> bool {
        self.root.as_literal().is_some()
    }
}

impl fmt::Display for Parsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt(f)
    }
}

/// Parse `text` into a tree.
///
/// Empty or whitespace-only input yields an empty string literal.
pub fn parse(text: &str, rules: &mut ParseRules<'_>) -> Result<Parsed, ParseError> {
    let mut parser = Parser {
        cur: Cursor::new(text),
        rules,
        depth: 0,
    };
    let root = parser.root()?;
    log::debug!("parsed {text:?} as {root}");
    Ok(Parsed {
        flags: root.flags,
        root,
    })
}

// ── Ephemeral expressions ─────────────────────────────────────────────────────

/// A parsed expression bound to a runtime, for one-off evaluation.
pub struct Ephemeral<'rt> {
    parsed: Parsed,
    runtime: &'rt Runtime,
}

impl<'rt> Ephemeral<'rt> {
    pub fn root(&self) -> &Node {
        &self.parsed.root
    }

    pub fn flags(&self) -> Flags {
        self.parsed.flags
    }

    pub fn into_parsed(self) -> Parsed {
        self.parsed
    }

    /// Evaluate against `request`, blocking on the bound runtime until done.
    pub fn eval(&self, request: &mut dyn Request) -> Result<Vec<ValueBox>, EvalError> {
        let mut interp = Interpreter::new();
        self.runtime.block_on(interp.eval(&self.parsed.root, request))
    }
}

/// Parse `text` for evaluation on `runtime`.
pub fn parse_ephemeral<'rt>(
    text: &str,
    rules: &mut ParseRules<'_>,
    runtime: &'rt Runtime,
) -> Result<Ephemeral<'rt>, ParseError> {
    Ok(Ephemeral {
        parsed: parse(text, rules)?,
        runtime,
    })
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser<'t, 'r, 'a> {
    cur: Cursor<'t>,
    rules: &'r mut ParseRules<'a>,
    depth: usize,
}

impl<'t, 'r, 'a> Parser<'t, 'r, 'a> {
    fn root(&mut self) -> Result<Node, ParseError> {
        self.cur.skip_ws();
        if self.cur.is_eof() {
            let end = self.cur.pos();
            return Ok(Node::literal(
                ValueBox::new(Value::String(String::new())),
                Span::new(0, end),
            ));
        }
        self.expression(Precedence::LOWEST, false, None)
    }

    /// Parse operands joined by operators binding tighter than `prev`.
    ///
    /// `bracket` says whether a `)` may end the expression; `hint` is a type
    /// to try first for a literal first operand.
    fn expression(
        &mut self,
        prev: Precedence,
        bracket: bool,
        hint: Option<Type>,
    ) -> Result<Node, ParseError> {
        let mut lhs = self.field(hint)?;
        let mut height = check_height(lhs.height(), lhs.span.start)?;
        loop {
            self.cur.skip_ws();
            let at = self.cur.pos();
            match self.cur.peek() {
                None => return Ok(lhs),
                Some(b')') if bracket => return Ok(lhs),
                Some(b')') => return Err(ParseError::syntax(at, "Unexpected ')'")),
                Some(_) => {}
            }

            let Some((op, len)) = self.cur.operator() else {
                return Err(ParseError::syntax(
                    at,
                    format!("Expected operator at '{}'", self.cur.preview(4)),
                ));
            };
            if matches!(op, Operator::RegexMatch | Operator::RegexNotMatch) {
                return Err(self.regex_comparison(op, at, len));
            }
            let registry = self.rules.registry;
            let (Some(func), Some(precedence)) = (registry.binary(op), registry.precedence(op)) else {
                return Err(ParseError::syntax(at, format!("Invalid operator '{op}'")));
            };
            if precedence <= prev {
                return Ok(lhs);
            }
            self.cur.advance_by(len);

            let rhs_hint = if op.is_comparison() {
                lhs.output_type()
            } else {
                None
            };
            let rhs = self.expression(precedence, bracket, rhs_hint)?;
            let rhs_height = rhs.height();

            let same_chain = matches!(&lhs.kind, NodeKind::Call(call) if call.op == op);
            if registry.is_flattened(op) && same_chain && lhs.cast.is_none() {
                log::trace!("flattened {op} chain at {}", rhs.span.start);
                // Call and group above each argument.
                height = check_height(height.max(rhs_height + 2), at)?;
                lhs.push_arg(rhs);
                continue;
            }

            let span = Span::new(lhs.span.start, rhs.span.end);
            let mut node = Node::call(Arc::clone(func), op, vec![lhs, rhs], span);
            fold(&mut node)?;
            height = match &node.kind {
                NodeKind::Literal(_) => 1,
                _ => check_height(height.max(rhs_height) + 2, at)?,
            };
            lhs = node;
        }
    }

    fn field(&mut self, hint: Option<Type>) -> Result<Node, ParseError> {
        self.cur.skip_ws();
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::syntax(self.cur.pos(), "Expression is nested too deeply"));
        }
        self.depth += 1;
        let result = self.field_inner(hint);
        self.depth -= 1;
        result
    }

    fn field_inner(&mut self, hint: Option<Type>) -> Result<Node, ParseError> {
        let start = self.cur.pos();
        match self.cur.peek() {
            Some(b'+') => {
                self.cur.advance();
                return self.field(hint);
            }
            Some(b'-') => return self.unary(Operator::Sub, start),
            Some(b'!') => return self.unary(Operator::Not, start),
            _ => {}
        }

        let cast = self.cast();
        self.cur.skip_ws();
        if !self.cur.eat(b'(') {
            return self.operand(start, cast, hint);
        }

        let mut node = self.expression(Precedence::LOWEST, true, None)?;
        self.cur.skip_ws();
        if !self.cur.eat(b')') {
            return Err(ParseError::syntax(self.cur.pos(), "Failed to find trailing ')'"));
        }
        node.span = Span::new(start, self.cur.pos());
        if let Some(ty) = cast {
            apply_cast(&mut node, ty, start)?;
        }
        Ok(node)
    }

    fn unary(&mut self, op: Operator, start: usize) -> Result<Node, ParseError> {
        self.cur.advance();
        let operand = self.field(None)?;
        let func = self
            .rules
            .registry
            .unary(op)
            .ok_or_else(|| ParseError::syntax(start, format!("Invalid operator '{op}'")))?;
        check_height(operand.height() + 2, start)?;
        let span = Span::new(start, operand.span.end);
        let mut node = Node::call(Arc::clone(func), op, vec![operand], span);
        fold(&mut node)?;
        Ok(node)
    }

    /// Consume `(typename)` if present. Anything else in brackets is left
    /// for the sub-expression parser.
    fn cast(&mut self) -> Option<Type> {
        let mark = self.cur.pos();
        if !self.cur.eat(b'(') {
            return None;
        }
        self.cur.skip_ws();
        let name = self.cur.take_while(|b| b.is_ascii_alphanumeric());
        self.cur.skip_ws();
        if let Some(ty) = Type::from_name(name) {
            if ty != Type::Group && self.cur.eat(b')') {
                return Some(ty);
            }
        }
        self.cur.set_pos(mark);
        None
    }

    fn operand(
        &mut self,
        start: usize,
        cast: Option<Type>,
        hint: Option<Type>,
    ) -> Result<Node, ParseError> {
        let at = self.cur.pos();
        match self.cur.peek() {
            Some(quote @ (b'"' | b'\'')) => {
                let text = self.quoted(quote)?;
                let value = match (cast, hint) {
                    (Some(ty), _) => Value::parse_as(&text, ty)
                        .map_err(|e| ParseError::syntax(at, format!("Failed parsing string: {e}")))?,
                    (None, Some(ty)) => {
                        Value::parse_as(&text, ty).unwrap_or(Value::String(text))
                    }
                    (None, None) => Value::String(text),
                };
                Ok(Node::literal(ValueBox::new(value), Span::new(start, self.cur.pos())))
            }
            Some(b'`') => Err(ParseError::syntax(
                at,
                "Unexpected back-quoted string; command execution is not supported",
            )),
            Some(b'/') => Err(ParseError::syntax(at, "Unexpected regular expression")),
            Some(b'&') => self.attribute(start, cast),
            _ => self.bareword(start, cast, hint),
        }
    }

    /// Read a quoted string; the cursor is on the opening quote.
    fn quoted(&mut self, quote: u8) -> Result<String, ParseError> {
        self.cur.advance();
        let mut out = Vec::new();
        loop {
            let Some(b) = self.cur.advance() else {
                return Err(ParseError::syntax(
                    self.cur.pos(),
                    format!("Unterminated string, expected {}", quote as char),
                ));
            };
            if b == quote {
                break;
            }
            if b != b'\\' {
                out.push(b);
                continue;
            }
            let Some(esc) = self.cur.advance() else {
                return Err(ParseError::syntax(
                    self.cur.pos(),
                    format!("Unterminated string, expected {}", quote as char),
                ));
            };
            match (quote, esc) {
                (b'"', b'n') => out.push(b'\n'),
                (b'"', b'r') => out.push(b'\r'),
                (b'"', b't') => out.push(b'\t'),
                (_, b'\\') => out.push(b'\\'),
                (q, e) if q == e => out.push(e),
                (_, e) => {
                    out.push(b'\\');
                    out.push(e);
                }
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn bareword(
        &mut self,
        start: usize,
        cast: Option<Type>,
        hint: Option<Type>,
    ) -> Result<Node, ParseError> {
        let at = self.cur.pos();
        let mut word = self.cur.bareword();
        if word.is_empty() {
            return Err(ParseError::syntax(at, "Expected operand"));
        }
        // `/` ends a bareword, but after an address it introduces a prefix length.
        if self.cur.peek() == Some(b'/')
            && matches!(self.cur.peek_at(1), Some(b'0'..=b'9'))
            && word.parse::<IpAddr>().is_ok()
        {
            self.cur.advance();
            self.cur.take_while(|b| b.is_ascii_digit());
            word = self.cur.slice(at, self.cur.pos());
        }

        let value = match (cast, hint) {
            (Some(ty), _) => Value::parse_as(word, ty)
                .map_err(|e| ParseError::syntax(at, format!("Failed parsing '{word}': {e}")))?,
            (None, Some(ty)) => match Value::parse_as(word, ty) {
                Ok(v) => v,
                Err(_) => infer(word, at)?,
            },
            (None, None) => infer(word, at)?,
        };
        Ok(Node::literal(ValueBox::new(value), Span::new(start, self.cur.pos())))
    }

    fn attribute(&mut self, start: usize, cast: Option<Type>) -> Result<Node, ParseError> {
        let at = self.cur.pos();
        self.cur.advance();
        let name = self.cur.take_while(dict::is_name_byte);
        if name.is_empty() {
            return Err(ParseError::syntax(self.cur.pos(), "Expected attribute name after '&'"));
        }
        let attr = match self.rules.dictionary.get(name) {
            Some(attr) => attr,
            None => self.define_unknown(name, cast, at)?,
        };
        Ok(Node::reference(attr, Span::new(start, self.cur.pos()), cast))
    }

    fn define_unknown(
        &mut self,
        name: &str,
        cast: Option<Type>,
        at: usize,
    ) -> Result<Arc<Attribute>, ParseError> {
        if !self.rules.allow_unknown {
            return Err(ParseError::syntax(at, format!("Unknown attribute '{name}'")));
        }
        let ty = match cast {
            Some(ty) => ty,
            None if dict::is_raw_name(name) => Type::Octets,
            None => {
                return Err(ParseError::syntax(
                    at,
                    format!("Unknown attribute '{name}' needs a cast to give it a type"),
                ))
            }
        };
        self.rules
            .dictionary
            .register_unknown(name, ty)
            .map_err(|e| ParseError::semantic(at, format!("Failed defining attribute {name}: {e}")))
    }

    #[cfg(feature = "regex")]
    fn regex_comparison(&mut self, op: Operator, at: usize, len: usize) -> ParseError {
        self.cur.advance_by(len);
        self.cur.skip_ws();
        match self.regex_literal() {
            Err(e) => e,
            Ok(re) => {
                log::debug!("rejecting comparison against /{}/", re.as_str());
                ParseError::syntax(
                    at,
                    format!("Invalid operator '{op}' - regular expression comparisons are not supported in expressions"),
                )
            }
        }
    }

    #[cfg(not(feature = "regex"))]
    fn regex_comparison(&mut self, op: Operator, at: usize, _len: usize) -> ParseError {
        ParseError::syntax(
            at,
            format!("Invalid operator '{op}' - regular expressions are not supported in this build"),
        )
    }

    /// Read and compile `/pattern/flags` or `m<delim>pattern<delim>flags`.
    #[cfg(feature = "regex")]
    fn regex_literal(&mut self) -> Result<regex::Regex, ParseError> {
        let at = self.cur.pos();
        let delim = match (self.cur.peek(), self.cur.peek_at(1)) {
            (Some(b'/'), _) => b'/',
            (Some(b'm'), Some(d)) if d.is_ascii_punctuation() => {
                self.cur.advance();
                d
            }
            _ => return Err(ParseError::syntax(at, "Expected regular expression")),
        };
        self.cur.advance();
        let body = self.cur.pos();

        let mut pattern = Vec::new();
        loop {
            let unterminated = || {
                ParseError::syntax(
                    at,
                    format!("Regular expression does not end with '{}'", delim as char),
                )
            };
            match self.cur.advance() {
                None => return Err(unterminated()),
                Some(b) if b == delim => break,
                Some(b'\\') => match self.cur.advance() {
                    None => return Err(unterminated()),
                    Some(b) if b == delim => pattern.push(b),
                    Some(b) => pattern.extend_from_slice(&[b'\\', b]),
                },
                Some(b) => pattern.push(b),
            }
        }

        let flags_at = self.cur.pos();
        let flags = self.cur.take_while(|b| b.is_ascii_alphabetic());
        if let Some(bad) = flags.chars().find(|c| !"imsux".contains(*c)) {
            return Err(ParseError::syntax(
                flags_at,
                format!("Unsupported regular expression flag '{bad}'"),
            ));
        }

        let pattern = String::from_utf8_lossy(&pattern).into_owned();
        regex::RegexBuilder::new(&pattern)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .ignore_whitespace(flags.contains('x'))
            .build()
            .map_err(|e| ParseError::syntax(body, format!("Invalid regular expression: {e}")))
    }
}

fn infer(word: &str, at: usize) -> Result<Value, ParseError> {
    Value::infer(word)
        .ok_or_else(|| ParseError::syntax(at, format!("Failed parsing '{word}' as a value")))
}

/// Record `ty` on `node`, converting literals straight away.
fn apply_cast(node: &mut Node, ty: Type, at: usize) -> Result<(), ParseError> {
    if let NodeKind::Literal(v) = &node.kind {
        let v = v
            .cast(ty)
            .map_err(|e| ParseError::semantic(at, e.to_string()))?;
        node.kind = NodeKind::Literal(v);
        return Ok(());
    }
    match node.cast {
        Some(existing) if existing != ty => Err(ParseError::syntax(
            at,
            format!("Conflicting casts to {existing} and {ty}"),
        )),
        _ => {
            node.cast = Some(ty);
            Ok(())
        }
    }
}

fn check_height(height: usize, at: usize) -> Result<usize, ParseError> {
    if height > MAX_HEIGHT {
        return Err(ParseError::syntax(at, "Expression is nested too deeply"));
    }
    Ok(height)
}

/// Run the purifier, reporting failures against the node.
fn fold(node: &mut Node) -> Result<(), ParseError> {
    let at = node.span.start;
    purify::purify(node)
        .map(|_| ())
        .map_err(|e| ParseError::semantic(at, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::interp::MapRequest;
    use crate::expr::print::print;
    use std::net::Ipv4Addr;

    fn dict() -> Dictionary {
        let mut d = Dictionary::new();
        d.define("Port", Type::Uint32).unwrap();
        d.define("Name", Type::String).unwrap();
        d.define("Addr", Type::Ipv4Addr).unwrap();
        d.define("A", Type::Bool).unwrap();
        d.define("B", Type::Bool).unwrap();
        d
    }

    fn parse_with(text: &str, d: &mut Dictionary, allow_unknown: bool) -> Result<Parsed, ParseError> {
        let reg = Registry::with_expressions().unwrap();
        let mut rules = ParseRules::new(&reg, d).allow_unknown(allow_unknown);
        parse(text, &mut rules)
    }

    fn p(text: &str) -> Result<Parsed, ParseError> {
        parse_with(text, &mut dict(), false)
    }

    fn value(text: &str) -> Value {
        match p(text) {
            Ok(parsed) => match parsed.root.kind {
                NodeKind::Literal(v) => v.value,
                other => panic!("{text:?} did not fold: {other:?}"),
            },
            Err(e) => panic!("{text:?} failed: {e}"),
        }
    }

    fn err(text: &str) -> ParseError {
        match p(text) {
            Ok(parsed) => panic!("{text:?} parsed as {parsed}"),
            Err(e) => e,
        }
    }

    fn printed(text: &str) -> String {
        print(&p(text).unwrap().root)
    }

    // ── Precedence ───────────────────────────────────────────────────────────

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(value("1 + 2 * 3"), Value::Int64(7));
        assert_eq!(value("(1 + 2) * 3"), Value::Int64(9));
        assert_eq!(value("10 - 3 - 2"), Value::Int64(5));
        assert_eq!(value("8 / 4 / 2"), Value::Int64(1));
        assert_eq!(value("2 * 3 + 4 * 5"), Value::Int64(26));
        assert_eq!(value("1 << 2 + 1"), Value::Int64(8));
        assert_eq!(value("1 | 2 ^ 3 & 1"), Value::Int64(3));
        assert_eq!(value("1 + 2 == 3"), Value::Bool(true));
        assert_eq!(value("2 < 3 == 1 < 2"), Value::Bool(true));
    }

    #[test]
    fn associativity_with_references() {
        assert_eq!(printed("&Port - 3 - 2"), "((&Port - 3) - 2)");
        assert_eq!(printed("&Port / 4 * 2"), "((&Port / 4) * 2)");
        assert_eq!(printed("&Port + 1 * 2"), "(&Port + 2)");
    }

    #[test]
    fn constant_folding() {
        let parsed = p("2 + 3").unwrap();
        assert!(parsed.is_constant());
        assert_eq!(parsed.root.as_literal().map(|v| &v.value), Some(&Value::Int64(5)));
        assert!(parsed.flags.is_pure());
    }

    #[test]
    fn references_are_not_folded() {
        let parsed = p("&Port + 1").unwrap();
        assert!(!parsed.flags.is_pure());
        assert_eq!(print(&parsed.root), "(&Port + 1)");
    }

    // ── Logical chains ───────────────────────────────────────────────────────

    #[test]
    fn logical_chain_flattens() {
        let parsed = p("1 && 2 && 3").unwrap();
        let call = parsed.root.as_call().unwrap();
        assert_eq!(call.op, Operator::And);
        assert_eq!(call.args.len(), 3);
        assert!(call.args.iter().all(|a| matches!(&a.kind, NodeKind::Group(c) if c.len() == 1)));
        assert_eq!(print(&parsed.root), "(1 && 2 && 3)");
        assert!(parsed.flags.needs_async());
    }

    #[test]
    fn mixed_logical_operators() {
        assert_eq!(printed("&A || &B && &A"), "(&A || (&B && &A))");
        assert_eq!(printed("&A && &B || &A"), "((&A && &B) || &A)");
        assert_eq!(printed("&A || &B || &A || &B"), "(&A || &B || &A || &B)");
    }

    // ── Unary operators ──────────────────────────────────────────────────────

    #[test]
    fn unary_chains() {
        assert_eq!(value("!!true"), Value::Bool(true));
        assert_eq!(value("- -5"), Value::Int64(5));
        assert_eq!(value("-5"), Value::Int64(-5));
        assert_eq!(value("+5"), Value::Int64(5));
        assert_eq!(value("!0"), Value::Bool(true));
        assert_eq!(value("-2 * 3"), Value::Int64(-6));
        assert_eq!(printed("-&Port"), "-&Port");
        assert_eq!(printed("!&A"), "!&A");
    }

    // ── Casts ────────────────────────────────────────────────────────────────

    #[test]
    fn casts() {
        assert_eq!(value("(string)5"), Value::from("5"));
        assert_eq!(value("(uint8)200"), Value::Uint8(200));
        assert_eq!(value("(string)(1 + 2)"), Value::from("3"));
        assert_eq!(value("( uint32 ) 7"), Value::Uint32(7));
        assert_eq!(printed("(string)&Port"), "(string)&Port");
        assert_eq!(printed("(string)(&Port + 1)"), "(string)(&Port + 1)");
        assert!(matches!(err("(uint8)300"), ParseError::Syntax { offset: 7, .. }));
        assert_eq!(err("(foo)").offset(), 1);
    }

    // ── Operands ─────────────────────────────────────────────────────────────

    #[test]
    fn quoted_strings() {
        assert_eq!(value(r#""a\tb""#), Value::from("a\tb"));
        assert_eq!(value(r#""say \"hi\"""#), Value::from("say \"hi\""));
        assert_eq!(value(r#""a\qb""#), Value::from("a\\qb"));
        assert_eq!(value(r"'it\'s'"), Value::from("it's"));
        assert_eq!(value(r"'a\nb'"), Value::from("a\\nb"));
        assert_eq!(value(r#""ab" + "cd""#), Value::from("abcd"));
    }

    #[test]
    fn addresses() {
        assert_eq!(value("192.0.2.1"), Value::Ipv4Addr(Ipv4Addr::new(192, 0, 2, 1)));
        assert_eq!(value("10.1.0.0/16"), Value::Ipv4Prefix(Ipv4Addr::new(10, 1, 0, 0), 16));
        assert_eq!(value("fe80::1 < fe80::2"), Value::Bool(true));
        assert_eq!(value("192.0.2.1 == 192.0.2.1"), Value::Bool(true));
        assert_eq!(value("10 / 2"), Value::Int64(5));
    }

    #[test]
    fn empty_input() {
        assert_eq!(value(""), Value::from(""));
        assert_eq!(value("   "), Value::from(""));
    }

    // ── Hinting ──────────────────────────────────────────────────────────────

    fn rhs_literal(text: &str) -> Value {
        let parsed = p(text).unwrap();
        let call = parsed.root.as_call().unwrap();
        match &call.args[1].kind {
            NodeKind::Group(children) => children[0].as_literal().unwrap().value.clone(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn comparison_hints_rhs_type() {
        assert_eq!(rhs_literal("&Port == 5"), Value::Uint32(5));
        assert_eq!(rhs_literal(r#"&Port == "5""#), Value::Uint32(5));
        assert_eq!(rhs_literal("&Name == 5"), Value::from("5"));
        assert_eq!(rhs_literal("(string)&Port != 5"), Value::from("5"));
        assert_eq!(rhs_literal("&Addr == 192.0.2.1"), Value::Ipv4Addr(Ipv4Addr::new(192, 0, 2, 1)));
        // Hint does not fit: fall back to inference.
        assert_eq!(rhs_literal("&Port == 1.5"), Value::Float64(1.5));
        // Arithmetic is not hinted.
        assert_eq!(rhs_literal("&Port + 5"), Value::Int64(5));
    }

    // ── Unknown attributes ───────────────────────────────────────────────────

    #[test]
    fn unknown_attributes() {
        let e = err("&Nope == 1");
        assert_eq!(e.message(), "Unknown attribute 'Nope'");
        assert_eq!(e.offset(), 0);

        let mut d = dict();
        parse_with("(uint32)&Foo > 1", &mut d, true).unwrap();
        let foo = d.get("Foo").unwrap();
        assert_eq!(foo.ty, Type::Uint32);
        assert!(foo.unknown);
        // Later references resolve to the same definition.
        let again = parse_with("&Foo", &mut d, true).unwrap();
        assert!(matches!(&again.root.kind, NodeKind::Reference(a) if Arc::ptr_eq(a, &foo)));

        parse_with("&Attr-26.9.1", &mut d, true).unwrap();
        assert_eq!(d.get("Attr-26.9.1").unwrap().ty, Type::Octets);

        assert!(matches!(parse_with("&Bar", &mut d, true), Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn sealed_dictionary_is_semantic_error() {
        let mut d = dict();
        d.seal();
        let e = parse_with("1 + (uint32)&Foo", &mut d, true).unwrap_err();
        assert!(matches!(e, ParseError::Semantic { offset: 12, .. }));
        assert!(e.message().starts_with("Failed defining attribute Foo"));
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    #[test]
    fn syntax_errors_carry_offsets() {
        assert_eq!(err("1 + ").offset(), 4);
        assert_eq!(err("1 +").offset(), 3);
        let e = err("(1 + 2");
        assert_eq!(e.offset(), 6);
        assert_eq!(e.message(), "Failed to find trailing ')'");
        let e = err("1 + 2)");
        assert_eq!((e.offset(), e.message()), (5, "Unexpected ')'"));
        let e = err("1 2");
        assert_eq!((e.offset(), e.message()), (2, "Expected operator at '2'"));
        let e = err("1 = 2");
        assert_eq!((e.offset(), e.message()), (2, "Invalid operator '='"));
        assert_eq!(err("\"abc").offset(), 4);
        assert_eq!(err("1 + `ls`").offset(), 4);
        let e = err("/foo/");
        assert_eq!((e.offset(), e.message()), (0, "Unexpected regular expression"));
        assert_eq!(err("bogus").offset(), 0);
        assert_eq!(err("()").offset(), 1);
        assert_eq!(err("& == 1").offset(), 1);
    }

    #[test]
    fn folding_errors_are_semantic() {
        let e = err("1 / 0");
        assert!(matches!(e, ParseError::Semantic { offset: 0, .. }));
        let e = err("2 + (1 / 0)");
        assert_eq!(e.offset(), 5);
        assert!(matches!(err("\"a\" - 1"), ParseError::Semantic { .. }));
    }

    #[test]
    fn nesting_is_limited() {
        let deep = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert_eq!(err(&deep).message(), "Expression is nested too deeply");
        let ok = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(value(&ok), Value::Int64(1));
    }

    #[test]
    fn long_operator_chains_are_bounded() {
        let long = format!("&Port{}", " + &Port".repeat(10_000));
        assert_eq!(err(&long).message(), "Expression is nested too deeply");

        let short = p(&format!("&Port{}", " + &Port".repeat(100))).unwrap();
        assert!(short.root.height() <= MAX_HEIGHT);
        assert_eq!(printed(&print(&short.root)), print(&short.root));

        // Flattened and folded chains do not grow.
        let flat = p(&format!("&A{}", " && &B".repeat(10_000))).unwrap();
        assert_eq!(flat.root.height(), 3);
        assert_eq!(value(&format!("0{}", " + 1".repeat(10_000))), Value::Int64(10_000));
    }

    #[cfg(feature = "regex")]
    #[test]
    fn regex_comparisons_rejected() {
        let e = err("&Name =~ /^bob/i");
        assert_eq!(e.offset(), 6);
        assert!(e.message().contains("not supported"));
        let e = err("&Name !~ m:a/b:");
        assert!(e.message().contains("not supported"));
        let e = err("&Name =~ /(/");
        assert!(e.message().starts_with("Invalid regular expression"));
        let e = err("&Name =~ /abc");
        assert!(e.message().starts_with("Regular expression does not end"));
        let e = err("&Name =~ /abc/q");
        assert_eq!(e.message(), "Unsupported regular expression flag 'q'");
    }

    #[cfg(not(feature = "regex"))]
    #[test]
    fn regex_comparisons_unavailable() {
        let e = err("&Name =~ /^bob/");
        assert!(e.message().contains("not supported in this build"));
    }

    // ── Printing ─────────────────────────────────────────────────────────────

    #[test]
    fn print_parse_round_trip() {
        for text in [
            "&Port + 1 * &Port",
            "(&A || &B) && !&A",
            "-&Port < 5",
            "(string)&Port == \"a\\\"b\"",
            "&Addr == 10.0.0.1 || &Name != 'x'",
            "(uint32)7 + &Port",
            "&Port - -3",
            "10.0.0.0/8",
            "(string)(-&Port)",
            "(uint32)(!&A)",
            "-(string)&Port",
            "1e20",
            "1e16 + &Port",
            "2.5 * 1e300",
        ] {
            let first = printed(text);
            let second = printed(&first);
            assert_eq!(first, second, "round trip of {text:?}");
        }
    }

    #[test]
    fn cast_prefix_expression_prints_bracketed() {
        assert_eq!(printed("(string)(-&Port)"), "(string)(-&Port)");
        assert_eq!(printed("(uint32)(!&A)"), "(uint32)(!&A)");
    }

    #[test]
    fn compared_literal_of_another_type_prints_its_cast() {
        assert_eq!(printed("&Port == (3 + 1)"), "(&Port == (int64)4)");
        assert_eq!(printed("&Port == 4"), "(&Port == (uint32)4)");
        assert_eq!(printed("&Port == -5"), "(&Port == (int64)(-5))");
        assert_eq!(printed(r#"&Port == "ab""#), r#"(&Port == (string)"ab")"#);
        assert_eq!(printed("(string)&Port < (1 + 2)"), "((string)&Port < (int64)3)");
        assert_eq!(printed("&Name == 5"), r#"(&Name == "5")"#);
        for text in ["&Port == (3 + 1)", "&Port == -5", "(string)&Port < (1 + 2)"] {
            let first = printed(text);
            assert_eq!(printed(&first), first, "round trip of {text:?}");
            assert_eq!(rhs_literal(&first), rhs_literal(text));
        }
    }

    #[test]
    fn float_literals_keep_their_type() {
        assert_eq!(printed("1e20"), "1e20");
        assert_eq!(value(&printed("1e16")), Value::Float64(1e16));
        assert!(err("1e309").message().starts_with("Failed parsing '1e309'"));
        assert!(err("(float64)inf").message().starts_with("Failed parsing"));
        assert_eq!(err("1e300 * 1e300").message(), "overflow in '*'");
    }

    #[test]
    fn grouping_idempotent_on_parsed_tree() {
        let parsed = p("&A && (&Port + 1 == 2) || !&B").unwrap();
        let mut root = parsed.root.clone();
        root.group_args();
        assert_eq!(root, parsed.root);
    }

    // ── Ephemeral ────────────────────────────────────────────────────────────

    #[test]
    fn ephemeral_eval() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let reg = Registry::with_expressions().unwrap();
        let mut d = dict();
        let mut rules = ParseRules::new(&reg, &mut d);
        let expr = parse_ephemeral("&Port * 2 > 10 && &Name", &mut rules, &rt).unwrap();
        assert!(expr.flags().needs_async());

        let mut req = MapRequest::new();
        req.insert("Port", ValueBox::new(Value::Uint32(6)));
        req.insert("Name", ValueBox::new(Value::from("bob")));
        assert_eq!(expr.eval(&mut req).unwrap(), vec![ValueBox::new(Value::Bool(true))]);

        let mut req = MapRequest::new();
        req.insert("Port", ValueBox::new(Value::Uint32(1)));
        assert_eq!(expr.eval(&mut req).unwrap(), vec![ValueBox::new(Value::Bool(false))]);
        assert_eq!(req.lookups(), ["Port"]);
    }
}
