//! Sort lifting and pagination boundaries.
//!
//! The pass moves every sort as far up the tree as it can go without
//! crossing a truncation, pushes projections below truncations, and merges
//! adjacent operators of the same kind. A truncation (`Skip`/`Take`) keeps
//! the sort directly beneath it: that pair is one windowed stage and is
//! opaque to further hoisting.
//!
//! When a row-wise operator (or the final result) sits above a truncation,
//! the truncation's key list is restated in a fresh `Sort` directly above
//! it, so that the order the truncation established is carried on to the
//! outermost stage.
//!
//! The canonical form the pass produces:
//!
//! ```text
//! Sort keys                     <- restated / user order, outermost
//!   Project ... (hidden keys)
//!     Filter ...
//!       Take n                  <- windowed stage
//!         Skip s
//!           Sort keys
//!             ...
//! ```

use tracing::{debug, warn};

use crate::ast::{col, BinaryOp, Expr, OperatorNode, ProjectColumn, SortKey};
use crate::error::{LiftError, LiftResult};

/// What the parent of a node expects from the node's row order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consumer {
    /// The final result, or a truncation seen through row-wise operators.
    NeedsOrder,
    /// Some sort further up decides the order.
    Ordered,
    /// Immediate input of a skip/take.
    Window,
}

impl Consumer {
    /// Consumer seen by the input of a row-wise operator.
    fn through(self) -> Self {
        match self {
            Consumer::Window => Consumer::NeedsOrder,
            other => other,
        }
    }
}

/// Fixed-point driver for the sort-lift rules.
#[derive(Debug, Clone)]
pub struct SortLift {
    max_passes: usize,
}

impl Default for SortLift {
    fn default() -> Self {
        Self { max_passes: 32 }
    }
}

impl SortLift {
    pub fn new(max_passes: usize) -> Self {
        Self { max_passes }
    }

    /// Rewrite a tree into canonical form.
    ///
    /// Fails with [`LiftError::UnorderedTruncation`] if a skip/take in the
    /// input has no sort beneath it, and with
    /// [`LiftError::InvariantViolation`] if the result is not canonical.
    pub fn rewrite(&self, tree: OperatorNode) -> LiftResult<OperatorNode> {
        check_ordered(&tree)?;

        let mut current = tree;
        let mut passes = 0;
        loop {
            if passes >= self.max_passes {
                warn!(max_passes = self.max_passes, "sort lift stopped before reaching a fixed point");
                break;
            }
            passes += 1;

            let mut pass = Pass::default();
            current = pass.visit(current, Consumer::NeedsOrder);
            if pass.applied == 0 {
                debug!(passes, "sort lift reached fixed point");
                break;
            }
            debug!(pass = passes, rules = pass.applied, "sort lift pass");
        }

        verify_canonical(&current)?;
        Ok(current)
    }
}

/// Reject truncations that have nothing to truncate by.
pub fn check_ordered(node: &OperatorNode) -> LiftResult<()> {
    match node {
        OperatorNode::Skip { input, .. } if input.order_source().is_none() => {
            Err(LiftError::UnorderedTruncation { operator: "Skip" })
        }
        OperatorNode::Take { input, .. } if input.order_source().is_none() => {
            Err(LiftError::UnorderedTruncation { operator: "Take" })
        }
        _ => match node.input() {
            Some(input) => check_ordered(input),
            None => Ok(()),
        },
    }
}

/// Every `Skip` sits on a `Sort`; every `Take` on a `Sort` or on such a
/// `Skip`.
pub fn verify_canonical(node: &OperatorNode) -> LiftResult<()> {
    match node {
        OperatorNode::Skip { input, .. } if !matches!(input.as_ref(), OperatorNode::Sort { .. }) => {
            return Err(LiftError::invariant(format!(
                "skip input is {} after rewriting, expected Sort",
                input.kind()
            )));
        }
        OperatorNode::Take { .. } if node.truncation_keys().is_none() => {
            let found = node.input().map_or("nothing", |i| i.kind());
            return Err(LiftError::invariant(format!(
                "take input is {} after rewriting, expected Sort or Skip over Sort",
                found
            )));
        }
        _ => {}
    }
    match node.input() {
        Some(input) => verify_canonical(input),
        None => Ok(()),
    }
}

/// One bottom-up sweep over the tree.
#[derive(Debug, Default)]
struct Pass {
    applied: usize,
}

impl Pass {
    fn visit(&mut self, node: OperatorNode, consumer: Consumer) -> OperatorNode {
        match node {
            OperatorNode::Source { .. } => node,
            OperatorNode::Filter { predicate, input } => {
                let input = self.visit(*input, consumer.through());
                self.filter(predicate, input)
            }
            OperatorNode::TypeFilter { subtype, input } => {
                let input = self.visit(*input, consumer.through());
                self.type_filter(subtype, input)
            }
            OperatorNode::Project { columns, input } => {
                // A projection over a truncation is pushed below it, so it
                // does not end the window.
                let input = self.visit(*input, consumer);
                self.project(columns, input)
            }
            OperatorNode::Sort { keys, input } => {
                let input = self.visit(*input, Consumer::Ordered);
                self.sort(keys, input)
            }
            OperatorNode::Skip { count, input } => {
                let input = self.visit(*input, Consumer::Window);
                let node = self.skip(count, input);
                self.restate(node, consumer)
            }
            OperatorNode::Take { count, input } => {
                let input = self.visit(*input, Consumer::Window);
                let node = self.take(count, input);
                self.restate(node, consumer)
            }
        }
    }

    fn applied(&mut self, rule: &'static str) {
        self.applied += 1;
        debug!(rule, "rewrite rule applied");
    }

    fn filter(&mut self, predicate: Expr, input: OperatorNode) -> OperatorNode {
        match input {
            OperatorNode::Filter {
                predicate: inner,
                input,
            } => {
                self.applied("fuse filters");
                input.filter(fuse(inner, predicate))
            }
            OperatorNode::Sort { keys, input } => {
                self.applied("lift sort over filter");
                input.filter(predicate).sort(keys)
            }
            input => input.filter(predicate),
        }
    }

    /// Only reachable when the pass runs on a tree whose type filters are
    /// not resolved yet.
    fn type_filter(&mut self, subtype: String, input: OperatorNode) -> OperatorNode {
        match input {
            OperatorNode::Sort { keys, input } => {
                self.applied("lift sort over type filter");
                input.of_type(subtype).sort(keys)
            }
            input => input.of_type(subtype),
        }
    }

    fn project(&mut self, columns: Vec<ProjectColumn>, input: OperatorNode) -> OperatorNode {
        match input {
            OperatorNode::Project {
                columns: inner,
                input,
            } => {
                self.applied("merge projections");
                input.project(compose(columns, &inner))
            }
            OperatorNode::Sort { keys, input } => {
                self.applied("lift sort over projection");
                let (columns, keys) = carry_keys(columns, keys);
                input.project(columns).sort(keys)
            }
            OperatorNode::Skip { count, input } => {
                self.applied("push projection below skip");
                input.project(columns).skip(count)
            }
            OperatorNode::Take { count, input } => {
                self.applied("push projection below take");
                input.project(columns).take(count)
            }
            input => input.project(columns),
        }
    }

    fn sort(&mut self, keys: Vec<SortKey>, input: OperatorNode) -> OperatorNode {
        match input {
            OperatorNode::Sort { input, .. } => {
                self.applied("drop shadowed sort");
                input.sort(keys)
            }
            input => input.sort(keys),
        }
    }

    fn skip(&mut self, count: u64, input: OperatorNode) -> OperatorNode {
        match input {
            OperatorNode::Skip {
                count: inner,
                input,
            } => {
                self.applied("merge skips");
                input.skip(inner.saturating_add(count))
            }
            OperatorNode::Take {
                count: limit,
                input,
            } => {
                self.applied("swap skip below take");
                input.skip(count).take(limit.saturating_sub(count))
            }
            input => input.skip(count),
        }
    }

    fn take(&mut self, count: u64, input: OperatorNode) -> OperatorNode {
        match input {
            OperatorNode::Take {
                count: inner,
                input,
            } => {
                self.applied("merge takes");
                input.take(inner.min(count))
            }
            input => input.take(count),
        }
    }

    fn restate(&mut self, node: OperatorNode, consumer: Consumer) -> OperatorNode {
        if consumer != Consumer::NeedsOrder {
            return node;
        }
        match node.truncation_keys().map(|keys| keys.to_vec()) {
            Some(keys) => {
                self.applied("restate order above truncation");
                node.sort(keys)
            }
            None => node,
        }
    }
}

/// `inner AND outer`, minus the outer conjuncts the inner one already has.
fn fuse(inner: Expr, outer: Expr) -> Expr {
    let mut known = Vec::new();
    conjuncts(&inner, &mut known);
    let mut added = Vec::new();
    conjuncts(&outer, &mut added);
    if !added.iter().any(|c| known.contains(c)) {
        return inner.and(outer);
    }
    let rest: Vec<Expr> = added
        .into_iter()
        .filter(|c| !known.contains(c))
        .cloned()
        .collect();
    match rest.into_iter().reduce(Expr::and) {
        Some(rest) => inner.and(rest),
        None => inner,
    }
}

fn conjuncts<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            conjuncts(left, out);
            conjuncts(right, out);
        }
        other => out.push(other),
    }
}

/// Compose `outer` over `inner`: the result reads straight from the
/// inner projection's input.
fn compose(outer: Vec<ProjectColumn>, inner: &[ProjectColumn]) -> Vec<ProjectColumn> {
    let lookup = |name: &str| {
        inner
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.expr.clone())
            .unwrap_or_else(|| col(name))
    };
    outer
        .into_iter()
        .map(|c| ProjectColumn {
            expr: c.expr.substitute(&lookup),
            ..c
        })
        .collect()
}

/// Re-express sort keys over a projection's output, adding hidden columns
/// for keys the projection does not produce.
fn carry_keys(mut columns: Vec<ProjectColumn>, keys: Vec<SortKey>) -> (Vec<ProjectColumn>, Vec<SortKey>) {
    let mut lifted = Vec::with_capacity(keys.len());
    for key in keys {
        let name = match columns.iter().find(|c| c.expr == key.expr) {
            Some(c) => c.name.clone(),
            None => {
                let base = key.expr.as_column().unwrap_or("OrderKey");
                let name = unique_name(&columns, base);
                columns.push(ProjectColumn::hidden(name.clone(), key.expr.clone()));
                name
            }
        };
        lifted.push(SortKey {
            expr: col(name),
            direction: key.direction,
        });
    }
    (columns, lifted)
}

fn unique_name(columns: &[ProjectColumn], base: &str) -> String {
    let taken = |name: &str| columns.iter().any(|c| c.name == name);
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::lit;
    use pretty_assertions::assert_eq;

    fn keys() -> Vec<SortKey> {
        vec![SortKey::desc(col("FirstName")), SortKey::asc(col("Id"))]
    }

    fn owners() -> OperatorNode {
        OperatorNode::source("Owners")
    }

    fn even() -> Expr {
        col("Id").modulo(lit(2)).equals(lit(0))
    }

    fn projection() -> Vec<ProjectColumn> {
        vec![
            ProjectColumn::passthrough("FirstName"),
            ProjectColumn::passthrough("Id"),
            ProjectColumn::new("Foo", col("Id").mul(lit(5))),
        ]
    }

    fn lift(tree: OperatorNode) -> OperatorNode {
        SortLift::default().rewrite(tree).unwrap()
    }

    #[test]
    fn test_sort_lifted_above_filter() {
        let out = lift(owners().sort(keys()).filter(even()));
        assert_eq!(out, owners().filter(even()).sort(keys()));
    }

    #[test]
    fn test_sort_lifted_above_projection() {
        let out = lift(owners().sort(keys()).project(projection()));
        assert_eq!(out, owners().project(projection()).sort(keys()));
    }

    #[test]
    fn test_dropped_key_becomes_hidden_column() {
        let tree = owners()
            .sort(vec![SortKey::asc(col("LastName"))])
            .project(vec![ProjectColumn::passthrough("Id")]);
        let out = lift(tree);
        assert_eq!(
            out,
            owners()
                .project(vec![
                    ProjectColumn::passthrough("Id"),
                    ProjectColumn::hidden("LastName", col("LastName")),
                ])
                .sort(vec![SortKey::asc(col("LastName"))])
        );
    }

    #[test]
    fn test_hidden_name_avoids_collision() {
        let tree = owners()
            .sort(vec![SortKey::asc(col("Id"))])
            .project(vec![ProjectColumn::new("Id", col("Id").add(lit(1)))]);
        let out = lift(tree);
        let OperatorNode::Sort { keys, input } = out else {
            panic!("expected sort at the root");
        };
        assert_eq!(keys, vec![SortKey::asc(col("Id1"))]);
        let OperatorNode::Project { columns, .. } = *input else {
            panic!("expected projection");
        };
        assert_eq!(columns[1], ProjectColumn::hidden("Id1", col("Id")));
    }

    #[test]
    fn test_computed_key_matches_projected_column() {
        let tree = owners()
            .sort(vec![SortKey::asc(col("Id").mul(lit(5)))])
            .project(projection());
        let out = lift(tree);
        assert_eq!(out, owners().project(projection()).sort(vec![SortKey::asc(col("Foo"))]));
    }

    #[test]
    fn test_skip_then_filter_keeps_filter_outside_window() {
        let out = lift(owners().sort(keys()).skip(5).filter(even()));
        assert_eq!(out, owners().sort(keys()).skip(5).filter(even()).sort(keys()));
    }

    #[test]
    fn test_take_then_filter_restates_order() {
        let out = lift(owners().sort(keys()).take(10).filter(even()));
        assert_eq!(out, owners().sort(keys()).take(10).filter(even()).sort(keys()));
    }

    #[test]
    fn test_projection_moves_below_truncation() {
        let out = lift(owners().sort(keys()).skip(5).take(10).project(projection()));
        let expected = owners()
            .project(projection())
            .sort(keys())
            .skip(5)
            .take(10)
            .sort(keys());
        assert_eq!(out, expected);
    }

    #[test]
    fn test_root_truncation_gets_restated_sort() {
        let out = lift(owners().sort(keys()).take(3));
        assert_eq!(out, owners().sort(keys()).take(3).sort(keys()));
    }

    #[test]
    fn test_skip_over_take_normalizes() {
        let out = lift(owners().sort(keys()).take(10).skip(4));
        assert_eq!(out, owners().sort(keys()).skip(4).take(6).sort(keys()));
    }

    #[test]
    fn test_skip_past_take_leaves_nothing() {
        let out = lift(owners().sort(keys()).take(3).skip(4));
        assert_eq!(out, owners().sort(keys()).skip(4).take(0).sort(keys()));
    }

    #[test]
    fn test_adjacent_truncations_merge() {
        assert_eq!(
            lift(owners().sort(keys()).skip(2).skip(3)),
            owners().sort(keys()).skip(5).sort(keys())
        );
        assert_eq!(
            lift(owners().sort(keys()).take(7).take(3)),
            owners().sort(keys()).take(3).sort(keys())
        );
    }

    #[test]
    fn test_filters_fuse_inner_first() {
        let p = col("Id").greater_than(lit(1));
        let q = col("Id").less_than(lit(9));
        let out = lift(owners().filter(p.clone()).filter(q.clone()));
        assert_eq!(out, owners().filter(p.and(q)));
    }

    #[test]
    fn test_fused_filters_drop_repeated_conjuncts() {
        let p = col("Id").greater_than(lit(1));
        let q = col("Id").less_than(lit(9));
        let out = lift(owners().filter(p.clone()).filter(p.clone().and(q.clone())));
        assert_eq!(out, owners().filter(p.clone().and(q)));

        let out = lift(owners().filter(p.clone()).filter(p.clone()));
        assert_eq!(out, owners().filter(p));
    }

    #[test]
    fn test_sort_lifted_above_type_filter() {
        let out = lift(owners().sort(keys()).of_type("ArubaOwner"));
        assert_eq!(out, owners().of_type("ArubaOwner").sort(keys()));

        let out = lift(owners().sort(keys()).take(3).of_type("ArubaOwner"));
        assert_eq!(out, owners().sort(keys()).take(3).of_type("ArubaOwner").sort(keys()));
    }

    #[test]
    fn test_outer_sort_shadows_inner() {
        let out = lift(owners().sort(keys()).sort(vec![SortKey::asc(col("Alias"))]));
        assert_eq!(out, owners().sort(vec![SortKey::asc(col("Alias"))]));
    }

    #[test]
    fn test_projections_compose() {
        let out = lift(
            owners()
                .project(vec![ProjectColumn::new("Foo", col("Id").mul(lit(5)))])
                .project(vec![ProjectColumn::new("Bar", col("Foo").add(lit(1)))]),
        );
        assert_eq!(
            out,
            owners().project(vec![ProjectColumn::new("Bar", col("Id").mul(lit(5)).add(lit(1)))])
        );
    }

    #[test]
    fn test_unordered_truncation_rejected() {
        let err = SortLift::default().rewrite(owners().take(3)).unwrap_err();
        assert!(matches!(err, LiftError::UnorderedTruncation { operator: "Take" }));

        let err = SortLift::default()
            .rewrite(owners().filter(even()).skip(1))
            .unwrap_err();
        assert_eq!(err.to_string(), "Skip requires ordered input; add a sort below it");
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let trees = vec![
            owners().sort(keys()).skip(5).filter(even()),
            owners().sort(keys()).skip(5).take(10).project(projection()),
            owners().sort(keys()).take(10).filter(even()).project(projection()),
        ];
        for tree in trees {
            let once = lift(tree);
            let twice = lift(once.clone());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_verify_canonical_rejects_loose_take() {
        let loose = owners().sort(keys()).filter(even()).take(3);
        assert!(matches!(verify_canonical(&loose), Err(LiftError::InvariantViolation(_))));
    }

    #[test]
    fn test_pass_bound_still_verifies() {
        let err = SortLift::new(0)
            .rewrite(owners().sort(keys()).filter(even()).take(3))
            .unwrap_err();
        assert!(matches!(err, LiftError::InvariantViolation(_)));
    }
}
