//! Function registry and operator precedence table.
//!
//! Every operator in an expression is carried out by a named [`Function`]
//! registered here. The parser looks functions up by operator; the purifier
//! and the interpreter call them through their [`Evaluator`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::ast::{Call, Flags};
use super::lexer::Operator;
use super::value::{Type, Value, ValueBox};
use crate::error::EvalError;

/// A synchronous function body. Each argument arrives as a group box.
pub type SyncFn = fn(&[ValueBox]) -> Result<ValueBox, EvalError>;

/// Writes the canonical text of a call.
pub type PrintFn = fn(&mut fmt::Formatter<'_>, &Call) -> fmt::Result;

/// Which value ends a logical operator early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    /// `&&`: stops on the first false operand.
    And,
    /// `||`: stops on the first true operand.
    Or,
}

impl Sense {
    pub fn stop_on(self) -> bool {
        matches!(self, Sense::Or)
    }
}

#[derive(Clone, Copy)]
pub enum Evaluator {
    Sync(SyncFn),
    /// Short-circuit evaluation, driven by the interpreter.
    Logical(Sense),
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evaluator::Sync(_) => f.write_str("Sync"),
            Evaluator::Logical(sense) => write!(f, "Logical({sense:?})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixity {
    Prefix,
    Infix,
}

/// Declared shape of one argument position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    /// Values are cast to this type before the call; `None` takes any type.
    pub ty: Option<Type>,
    pub required: bool,
    /// Join multiple values into one string before the call.
    pub concat: bool,
}

impl ArgSpec {
    pub const fn any() -> Self {
        ArgSpec {
            ty: None,
            required: true,
            concat: false,
        }
    }

    pub const fn typed(ty: Type) -> Self {
        ArgSpec {
            ty: Some(ty),
            required: true,
            concat: false,
        }
    }
}

pub struct Function {
    pub name: String,
    pub operator: Option<Operator>,
    pub fixity: Fixity,
    /// Fixed argument list, or `None` for variable arity.
    pub args: Option<Vec<ArgSpec>>,
    pub flags: Flags,
    /// Implemented by this crate, so safe to run at parse time.
    pub internal: bool,
    pub evaluator: Evaluator,
    pub printer: PrintFn,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("operator", &self.operator)
            .field("fixity", &self.fixity)
            .field("args", &self.args)
            .field("flags", &self.flags)
            .field("internal", &self.internal)
            .field("evaluator", &self.evaluator)
            .finish()
    }
}

impl Function {
    /// Turn per-argument value lists into the group boxes the body expects,
    /// applying each position's [`ArgSpec`].
    pub fn marshal_args(&self, groups: Vec<Vec<ValueBox>>) -> Result<Vec<ValueBox>, EvalError> {
        let Some(specs) = &self.args else {
            return Ok(groups.into_iter().map(ValueBox::group).collect());
        };
        if groups.len() > specs.len() {
            return Err(EvalError::Arity {
                func: self.name.clone(),
                expected: specs.len(),
                got: groups.len(),
            });
        }

        let mut groups = groups.into_iter();
        let mut out = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            let position = i + 1;
            let mut values = groups.next().unwrap_or_default();
            if values.is_empty() && spec.required {
                return Err(EvalError::ArgumentCount {
                    func: self.name.clone(),
                    position,
                    got: 0,
                });
            }
            if spec.concat && values.len() > 1 {
                let tainted = values.iter().any(|v| v.tainted);
                let text: String = values.iter().map(|v| v.to_string()).collect();
                values = vec![ValueBox {
                    value: Value::String(text),
                    tainted,
                }];
            }
            if let Some(ty) = spec.ty {
                values = values
                    .iter()
                    .map(|v| {
                        v.cast(ty).map_err(|source| EvalError::ArgumentCast {
                            func: self.name.clone(),
                            position,
                            source,
                        })
                    })
                    .collect::<Result<_, _>>()?;
            }
            out.push(ValueBox::group(values));
        }
        Ok(out)
    }

    /// Run a synchronous function on already-marshalled arguments.
    pub fn call_sync(&self, args: &[ValueBox]) -> Result<ValueBox, EvalError> {
        match self.evaluator {
            Evaluator::Sync(f) => f(args),
            Evaluator::Logical(_) => Err(EvalError::NotSync(self.name.clone())),
        }
    }
}

// ── Precedence ────────────────────────────────────────────────────────────────

/// Binding strength of an infix operator: tier first, then tie-breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Precedence {
    pub tier: u8,
    pub tie: u8,
}

impl Precedence {
    /// Below every operator; the starting point of a parse.
    pub const LOWEST: Precedence = Precedence::new(0, 0);

    pub const fn new(tier: u8, tie: u8) -> Self {
        Precedence { tier, tie }
    }
}

const PRECEDENCE: &[(Operator, Precedence)] = &[
    (Operator::Or, Precedence::new(2, 0)),
    (Operator::And, Precedence::new(2, 1)),
    (Operator::BitOr, Precedence::new(3, 0)),
    (Operator::BitXor, Precedence::new(3, 1)),
    (Operator::BitAnd, Precedence::new(3, 2)),
    (Operator::Eq, Precedence::new(4, 0)),
    (Operator::Ne, Precedence::new(4, 0)),
    (Operator::Lt, Precedence::new(5, 0)),
    (Operator::Le, Precedence::new(5, 0)),
    (Operator::Gt, Precedence::new(5, 0)),
    (Operator::Ge, Precedence::new(5, 0)),
    (Operator::Shl, Precedence::new(6, 0)),
    (Operator::Shr, Precedence::new(6, 0)),
    (Operator::Add, Precedence::new(7, 0)),
    (Operator::Sub, Precedence::new(7, 0)),
    (Operator::Mul, Precedence::new(8, 0)),
    (Operator::Div, Precedence::new(8, 0)),
];

/// Operators whose chains collapse into one n-ary call.
const FLATTENED: &[Operator] = &[Operator::And, Operator::Or];

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("function '{0}' is already registered")]
    Duplicate(String),
    #[error("operator '{0}' already has a function")]
    DuplicateOperator(Operator),
}

#[derive(Debug)]
pub struct Registry {
    functions: HashMap<String, Arc<Function>>,
    infix: HashMap<Operator, Arc<Function>>,
    prefix: HashMap<Operator, Arc<Function>>,
    precedence: HashMap<Operator, Precedence>,
    flattened: HashSet<Operator>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An empty registry with the standard precedence table.
    pub fn new() -> Self {
        Registry {
            functions: HashMap::new(),
            infix: HashMap::new(),
            prefix: HashMap::new(),
            precedence: PRECEDENCE.iter().copied().collect(),
            flattened: FLATTENED.iter().copied().collect(),
        }
    }

    /// A registry holding every expression operator.
    pub fn with_expressions() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        super::builtins::register(&mut registry)?;
        Ok(registry)
    }

    pub fn register_function(&mut self, func: Function) -> Result<Arc<Function>, RegistryError> {
        if self.functions.contains_key(&func.name) {
            return Err(RegistryError::Duplicate(func.name));
        }
        let by_op = match func.fixity {
            Fixity::Infix => &mut self.infix,
            Fixity::Prefix => &mut self.prefix,
        };
        if let Some(op) = func.operator {
            if by_op.contains_key(&op) {
                return Err(RegistryError::DuplicateOperator(op));
            }
        }
        let func = Arc::new(func);
        if let Some(op) = func.operator {
            by_op.insert(op, Arc::clone(&func));
        }
        log::trace!("registered function {}", func.name);
        self.functions.insert(func.name.clone(), Arc::clone(&func));
        Ok(func)
    }

    pub fn function(&self, name: &str) -> Option<&Arc<Function>> {
        self.functions.get(name)
    }

    /// The function implementing infix `op`.
    pub fn binary(&self, op: Operator) -> Option<&Arc<Function>> {
        self.infix.get(&op)
    }

    /// The function implementing prefix `op`.
    pub fn unary(&self, op: Operator) -> Option<&Arc<Function>> {
        self.prefix.get(&op)
    }

    pub fn precedence(&self, op: Operator) -> Option<Precedence> {
        self.precedence.get(&op).copied()
    }

    pub fn is_flattened(&self, op: Operator) -> bool {
        self.flattened.contains(&op)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
