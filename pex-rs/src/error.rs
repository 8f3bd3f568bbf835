//! Error types shared by the parser and the evaluator.

use thiserror::Error;

use crate::expr::calc::CalcError;
use crate::expr::value::CastError;

/// Failure turning expression text into a tree.
///
/// Every variant carries the byte offset into the input where the problem
/// was detected, so callers can point at it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Malformed input: bad token, missing operand, unbalanced bracket.
    #[error("{offset}: {message}")]
    Syntax { offset: usize, message: String },
    /// Well-formed input that cannot be accepted, such as constant folding
    /// failing or an attribute that cannot be defined.
    #[error("{offset}: {message}")]
    Semantic { offset: usize, message: String },
}

impl ParseError {
    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        ParseError::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub fn semantic(offset: usize, message: impl Into<String>) -> Self {
        ParseError::Semantic {
            offset,
            message: message.into(),
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            ParseError::Syntax { offset, .. } | ParseError::Semantic { offset, .. } => *offset,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ParseError::Syntax { message, .. } | ParseError::Semantic { message, .. } => message,
        }
    }
}

/// Failure evaluating a tree, whether while folding constants at parse time
/// or at run time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("{func}: expected {expected} argument(s), got {got}")]
    Arity {
        func: String,
        expected: usize,
        got: usize,
    },
    /// An argument position held no values, or more than it accepts.
    #[error("{func}: wrong number of values for argument {position}: {got}")]
    ArgumentCount {
        func: String,
        position: usize,
        got: usize,
    },
    #[error("{func}: argument {position}: {source}")]
    ArgumentCast {
        func: String,
        position: usize,
        source: CastError,
    },
    #[error(transparent)]
    Cast(#[from] CastError),
    #[error(transparent)]
    Calc(#[from] CalcError),
    #[error("failed resolving &{attr}: {message}")]
    Resolve { attr: String, message: String },
    #[error("resolution of &{attr} was abandoned")]
    Cancelled { attr: String },
    #[error("{0} cannot be called synchronously")]
    NotSync(String),
    #[error("logical evaluation resumed out of sequence")]
    UnexpectedResume,
}
