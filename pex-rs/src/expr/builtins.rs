//! Operator implementations registered by [`Registry::with_expressions`].
//!
//! [`Registry::with_expressions`]: super::registry::Registry::with_expressions

use super::ast::Flags;
use super::calc;
use super::lexer::Operator;
use super::print::{print_binary, print_logical, print_unary};
use super::registry::{ArgSpec, Evaluator, Fixity, Function, Registry, RegistryError, Sense};
use super::value::{Type, Value, ValueBox};
use crate::error::EvalError;

/// The single value in argument `position` (1-based) of `func`.
fn single<'a>(func: &str, args: &'a [ValueBox], position: usize) -> Result<&'a ValueBox, EvalError> {
    let arg = args.get(position - 1).ok_or_else(|| EvalError::Arity {
        func: func.to_owned(),
        expected: position,
        got: args.len(),
    })?;
    match &arg.value {
        Value::Group(values) if values.len() == 1 => Ok(&values[0]),
        Value::Group(values) => Err(EvalError::ArgumentCount {
            func: func.to_owned(),
            position,
            got: values.len(),
        }),
        _ => Ok(arg),
    }
}

fn binary(func: &str, op: Operator, args: &[ValueBox]) -> Result<ValueBox, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::Arity {
            func: func.to_owned(),
            expected: 2,
            got: args.len(),
        });
    }
    let lhs = single(func, args, 1)?;
    let rhs = single(func, args, 2)?;
    Ok(calc::binary_op(lhs, op, rhs)?)
}

macro_rules! binary_fns {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            fn $name(args: &[ValueBox]) -> Result<ValueBox, EvalError> {
                binary(stringify!($name), Operator::$op, args)
            }
        )*

        const BINARY: &[(&str, Operator, fn(&[ValueBox]) -> Result<ValueBox, EvalError>)] = &[
            $((stringify!($name), Operator::$op, $name)),*
        ];
    };
}

binary_fns! {
    op_add => Add,
    op_sub => Sub,
    op_mul => Mul,
    op_div => Div,
    op_and => BitAnd,
    op_or => BitOr,
    op_xor => BitXor,
    op_rshift => Shr,
    op_lshift => Shl,
    cmp_eq => Eq,
    cmp_ne => Ne,
    cmp_lt => Lt,
    cmp_le => Le,
    cmp_gt => Gt,
    cmp_ge => Ge,
}

fn unary_minus(args: &[ValueBox]) -> Result<ValueBox, EvalError> {
    let v = single("unary_minus", args, 1)?;
    Ok(calc::binary_op(&ValueBox::new(Value::Int64(0)), Operator::Sub, v)?)
}

fn unary_not(args: &[ValueBox]) -> Result<ValueBox, EvalError> {
    let v = single("unary_not", args, 1)?.cast(Type::Bool)?;
    Ok(ValueBox {
        value: Value::Bool(!matches!(v.value, Value::Bool(true))),
        tainted: v.tainted,
    })
}

/// Register every expression operator into `registry`.
pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    for &(name, op, body) in BINARY {
        registry.register_function(Function {
            name: name.into(),
            operator: Some(op),
            fixity: Fixity::Infix,
            args: Some(vec![ArgSpec::any(), ArgSpec::any()]),
            flags: Flags::PURE,
            internal: true,
            evaluator: Evaluator::Sync(body),
            printer: print_binary,
        })?;
    }

    for (name, op, sense) in [
        ("logical_and", Operator::And, Sense::And),
        ("logical_or", Operator::Or, Sense::Or),
    ] {
        registry.register_function(Function {
            name: name.into(),
            operator: Some(op),
            fixity: Fixity::Infix,
            args: None,
            flags: Flags::PURE | Flags::NEEDS_ASYNC,
            internal: true,
            evaluator: Evaluator::Logical(sense),
            printer: print_logical,
        })?;
    }

    registry.register_function(Function {
        name: "unary_minus".into(),
        operator: Some(Operator::Sub),
        fixity: Fixity::Prefix,
        args: Some(vec![ArgSpec {
            ty: None,
            required: true,
            concat: true,
        }]),
        flags: Flags::PURE,
        internal: true,
        evaluator: Evaluator::Sync(unary_minus),
        printer: print_unary,
    })?;

    registry.register_function(Function {
        name: "unary_not".into(),
        operator: Some(Operator::Not),
        fixity: Fixity::Prefix,
        args: Some(vec![ArgSpec::typed(Type::Bool)]),
        flags: Flags::PURE,
        internal: true,
        evaluator: Evaluator::Sync(unary_not),
        printer: print_unary,
    })?;

    log::debug!("registered {} expression functions", registry.len());
    Ok(())
}
