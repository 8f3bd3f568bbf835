//! Constant folding.
//!
//! A call whose function is internal and pure, and whose every argument is a
//! single literal, is evaluated once at parse time and replaced by its result.

use super::ast::{Flags, Node, NodeKind};
use super::registry::Evaluator;
use crate::error::EvalError;

/// Fold `node` in place if it qualifies. Returns whether it was folded.
///
/// On error the node is left untouched.
pub fn purify(node: &mut Node) -> Result<bool, EvalError> {
    let NodeKind::Call(call) = &node.kind else {
        return Ok(false);
    };
    if !node.flags.is_pure() || !call.func.internal || call.func.args.is_none() {
        return Ok(false);
    }
    if !matches!(call.func.evaluator, Evaluator::Sync(_)) {
        return Ok(false);
    }

    let mut groups = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        let NodeKind::Group(children) = &arg.kind else {
            return Ok(false);
        };
        match children.as_slice() {
            [only] => match only.as_literal() {
                Some(v) => groups.push(vec![v.clone()]),
                None => return Ok(false),
            },
            _ => return Ok(false),
        }
    }

    let args = call.func.marshal_args(groups)?;
    let mut result = call.func.call_sync(&args)?;
    if let Some(ty) = node.cast {
        result = result.cast(ty)?;
    }
    log::trace!("folded {} to {}", node, result);

    node.kind = NodeKind::Literal(result);
    node.flags = Flags::PURE;
    node.cast = None;
    Ok(true)
}
