//! Null-semantics adjustment of user predicates.
//!
//! Under [`NullComparisonMode::ClrSemantics`] equality behaves the way it
//! does in the host language: `null = null` is true and comparing a null
//! with a value is simply false, never unknown. The adjuster spells that
//! out with explicit null tests so the engine's three-valued logic gives
//! the same answer. The same holds for `<`, `<=`, `>` and `>=` under a
//! `not`: a null operand makes the comparison false before it is negated.
//!
//! IN lists and null tests are never touched, so generated type predicates
//! built from them survive a second pass unchanged.

use crate::ast::{BinaryOp, Expr, OperatorNode, Value};
use crate::config::NullComparisonMode;

/// Adjust every `Filter` predicate in the tree.
pub fn adjust_tree(node: OperatorNode, mode: NullComparisonMode) -> OperatorNode {
    if mode == NullComparisonMode::NativeSemantics {
        return node;
    }
    match node {
        OperatorNode::Source { .. } => node,
        OperatorNode::Filter { predicate, input } => OperatorNode::Filter {
            predicate: adjust(predicate, mode),
            input: Box::new(adjust_tree(*input, mode)),
        },
        OperatorNode::Project { columns, input } => OperatorNode::Project {
            columns,
            input: Box::new(adjust_tree(*input, mode)),
        },
        OperatorNode::Sort { keys, input } => OperatorNode::Sort {
            keys,
            input: Box::new(adjust_tree(*input, mode)),
        },
        OperatorNode::Skip { count, input } => OperatorNode::Skip {
            count,
            input: Box::new(adjust_tree(*input, mode)),
        },
        OperatorNode::Take { count, input } => OperatorNode::Take {
            count,
            input: Box::new(adjust_tree(*input, mode)),
        },
        OperatorNode::TypeFilter { subtype, input } => OperatorNode::TypeFilter {
            subtype,
            input: Box::new(adjust_tree(*input, mode)),
        },
    }
}

/// Adjust one predicate. Descends through `and`, `or` and `not`; every
/// other expression is a leaf. Already adjusted comparisons are left as
/// they are, so adjusting twice changes nothing.
pub fn adjust(predicate: Expr, mode: NullComparisonMode) -> Expr {
    if mode == NullComparisonMode::NativeSemantics {
        return predicate;
    }
    adjust_under(predicate, false)
}

fn adjust_under(predicate: Expr, negated: bool) -> Expr {
    if is_adjusted(&predicate) {
        return predicate;
    }
    match predicate {
        Expr::Binary {
            op: op @ (BinaryOp::And | BinaryOp::Or),
            left,
            right,
        } => Expr::binary(op, adjust_under(*left, negated), adjust_under(*right, negated)),
        Expr::Not(inner) => Expr::Not(Box::new(adjust_under(*inner, !negated))),
        Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } => equality(*left, *right),
        Expr::Binary {
            op: BinaryOp::Ne,
            left,
            right,
        } => inequality(*left, *right),
        // Outside a `not`, unknown already filters like false.
        Expr::Binary {
            op: op @ (BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte),
            left,
            right,
        } if negated => ordering(op, *left, *right),
        other => other,
    }
}

/// Whether `e` is the expansion of the comparison at its leftmost leaf.
fn is_adjusted(e: &Expr) -> bool {
    if !matches!(e, Expr::Binary { op: BinaryOp::And | BinaryOp::Or, .. }) {
        return false;
    }
    let mut seed = e;
    while let Expr::Binary {
        op: BinaryOp::And | BinaryOp::Or,
        left,
        ..
    } = seed
    {
        seed = &**left;
    }
    let Expr::Binary { op, left, right } = seed else {
        return false;
    };
    let (left, right) = ((**left).clone(), (**right).clone());
    let expanded = match op {
        BinaryOp::Eq => equality(left, right),
        BinaryOp::Ne => inequality(left, right),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => ordering(*op, left, right),
        _ => return false,
    };
    expanded == *e
}

fn is_null_literal(e: &Expr) -> bool {
    matches!(e, Expr::Literal(Value::Null))
}

fn equality(left: Expr, right: Expr) -> Expr {
    match (left.is_literal(), right.is_literal()) {
        (true, true) => left.equals(right),
        _ if is_null_literal(&right) => left.is_null(),
        _ if is_null_literal(&left) => right.is_null(),
        // literal = e  AND  e IS NOT NULL
        (false, true) => right.equals(left.clone()).and(left.is_not_null()),
        (true, false) => left.equals(right.clone()).and(right.is_not_null()),
        (false, false) => {
            let both_set = left
                .clone()
                .equals(right.clone())
                .and(left.clone().is_not_null())
                .and(right.clone().is_not_null());
            both_set.or(left.is_null().and(right.is_null()))
        }
    }
}

/// `a < b` is false, not unknown, when either side is null.
fn ordering(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let mut adjusted = Expr::binary(op, left.clone(), right.clone());
    for operand in [left, right] {
        if !operand.is_literal() || is_null_literal(&operand) {
            adjusted = adjusted.and(operand.is_not_null());
        }
    }
    adjusted
}

fn inequality(left: Expr, right: Expr) -> Expr {
    match (left.is_literal(), right.is_literal()) {
        (true, true) => left.not_equals(right),
        _ if is_null_literal(&right) => left.is_not_null(),
        _ if is_null_literal(&left) => right.is_not_null(),
        (false, true) => left.clone().not_equals(right).or(left.is_null()),
        (true, false) => right.clone().not_equals(left).or(right.is_null()),
        (false, false) => {
            let both_set = left
                .clone()
                .not_equals(right.clone())
                .and(left.clone().is_not_null())
                .and(right.clone().is_not_null());
            let only_left = left.clone().is_null().and(right.clone().is_not_null());
            let only_right = left.is_not_null().and(right.is_null());
            both_set.or(only_left).or(only_right)
        }
    }
}
