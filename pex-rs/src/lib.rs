//! pex: a policy expression engine.
//!
//! Infix expressions over typed request attributes (`&NAS-Port > 1024 &&
//! &User-Name`) are parsed with precedence climbing, constant
//! sub-expressions are folded at parse time, and the remaining tree is
//! evaluated against a [`Request`](expr::Request) with short-circuiting
//! `&&`/`||` that may suspend while attribute values are fetched.

pub mod cli;
pub mod config;
pub mod dict;
pub mod error;
pub mod expr;

pub use dict::{Attribute, Dictionary};
pub use error::{EvalError, ParseError};
