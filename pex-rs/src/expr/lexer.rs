//! Byte cursor and operator recognition for the expression parser.
//!
//! There is no separate token stream: the parser pulls operands and
//! operators straight off a [`Cursor`], because whether a character starts an
//! operand or an operator depends on where the parser is.

use std::fmt;
use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

/// Every operator spelling the expression language knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Not,
    Assign,
    RegexMatch,
    RegexNotMatch,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::BitAnd => "&",
            Operator::BitOr => "|",
            Operator::BitXor => "^",
            Operator::Shl => "<<",
            Operator::Shr => ">>",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Not => "!",
            Operator::Assign => "=",
            Operator::RegexMatch => "=~",
            Operator::RegexNotMatch => "!~",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spellings recognised in infix position. `!` alone is prefix-only.
const INFIX: &[Operator] = &[
    Operator::Ne,
    Operator::BitAnd,
    Operator::And,
    Operator::Mul,
    Operator::Add,
    Operator::Sub,
    Operator::Div,
    Operator::BitXor,
    Operator::BitOr,
    Operator::Or,
    Operator::Lt,
    Operator::Shl,
    Operator::Le,
    Operator::Assign,
    Operator::Eq,
    Operator::RegexMatch,
    Operator::RegexNotMatch,
    Operator::Gt,
    Operator::Ge,
    Operator::Shr,
];

fn infix_matcher() -> &'static AhoCorasick {
    static MATCHER: OnceLock<AhoCorasick> = OnceLock::new();
    MATCHER.get_or_init(|| {
        AhoCorasickBuilder::new()
            .match_kind(MatchKind::LeftmostLongest)
            .anchored(true)
            .build(INFIX.iter().map(|op| op.as_str()))
    })
}

/// Characters that end an unquoted operand.
pub(crate) fn is_terminal(b: u8) -> bool {
    b.is_ascii_whitespace()
        || matches!(
            b,
            b'(' | b')'
                | b'+'
                | b'-'
                | b'*'
                | b'/'
                | b'='
                | b'!'
                | b'~'
                | b'&'
                | b'|'
                | b'^'
                | b'<'
                | b'>'
                | b','
        )
}

// ── Cursor ────────────────────────────────────────────────────────────────────

pub(crate) struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a str) -> Self {
        Cursor { src, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.src.len());
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    pub fn peek_at(&self, n: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos + n).copied()
    }

    pub fn advance(&mut self) -> Option<u8> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    pub fn advance_by(&mut self, n: usize) {
        self.set_pos(self.pos + n);
    }

    pub fn eat(&mut self, ch: u8) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    pub fn rest(&self) -> &'a str {
        self.src.get(self.pos..).unwrap_or("")
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        self.src.get(start..end).unwrap_or("")
    }

    /// Up to `n` characters of remaining input, for error messages.
    pub fn preview(&self, n: usize) -> String {
        self.rest().chars().take(n).collect()
    }

    /// Consume bytes while `pred` holds and return them.
    ///
    /// `pred` must only accept ASCII so the slice ends on a char boundary.
    pub fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if pred(b)) {
            self.pos += 1;
        }
        self.slice(start, self.pos)
    }

    /// Consume an unquoted operand: everything up to a terminal character.
    pub fn bareword(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if !is_terminal(b)) {
            self.pos += 1;
        }
        self.slice(start, self.pos)
    }

    /// Longest infix operator at the cursor, with its length. Does not consume.
    pub fn operator(&self) -> Option<(Operator, usize)> {
        let m = infix_matcher().find(self.rest())?;
        (m.start() == 0).then(|| (INFIX[m.pattern()], m.end()))
    }
}
