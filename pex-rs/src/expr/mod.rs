//! Expression language: parsing, constant folding, printing and evaluation.

pub mod ast;
pub mod builtins;
pub mod calc;
pub mod interp;
pub mod lexer;
pub mod logical;
pub mod parser;
pub mod print;
pub mod purify;
pub mod registry;
pub mod value;

pub use ast::{Call, Flags, Node, NodeKind, Span};
pub use interp::{Interpreter, MapRequest, Request, Resolution};
pub use lexer::Operator;
pub use logical::{ChildHandle, LogicalEval, Step};
pub use parser::{parse, parse_ephemeral, Ephemeral, ParseRules, Parsed};
pub use print::print;
pub use registry::{ArgSpec, Evaluator, Fixity, Function, Precedence, Registry, RegistryError, Sense};
pub use value::{Type, Value, ValueBox};
