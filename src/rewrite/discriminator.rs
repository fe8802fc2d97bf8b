//! Discriminator resolution.
//!
//! Replaces every `TypeFilter(T, input)` with
//! `Project(shape(T), Filter(predicate(T), input))` and restricts sources of
//! polymorphic entity sets to the discriminator values the model knows.
//!
//! Of several type filters stacked over the same rows only the outermost
//! projects; the ones below it keep every column and just filter. A filter
//! to the set's root type adds no predicate over the source restriction.

use tracing::debug;

use crate::ast::{col, Expr, OperatorNode, ProjectColumn, Value};
use crate::config::ConditionalShaping;
use crate::error::{LiftError, LiftResult};
use crate::mapping::{ConditionTest, EntitySet, Metadata};

/// Resolves type filters against frozen metadata.
pub struct DiscriminatorResolver<'m> {
    metadata: &'m Metadata,
    shaping: ConditionalShaping,
}

impl<'m> DiscriminatorResolver<'m> {
    pub fn new(metadata: &'m Metadata, shaping: ConditionalShaping) -> Self {
        Self { metadata, shaping }
    }

    /// Resolve the whole tree, bottom-up.
    pub fn resolve(&self, node: OperatorNode) -> LiftResult<OperatorNode> {
        self.resolve_under(node, None)
    }

    /// `outer` is the subtype of the nearest enclosing type filter with only
    /// row operators in between. That filter shapes the rows, so this one
    /// only restricts them.
    fn resolve_under(&self, node: OperatorNode, outer: Option<&str>) -> LiftResult<OperatorNode> {
        Ok(match node {
            OperatorNode::Source { relation } => {
                let set = self.metadata.relation(&relation)?;
                let source = OperatorNode::Source { relation };
                match self.extent_predicate(set) {
                    Some(predicate) => source.filter(predicate),
                    None => source,
                }
            }
            OperatorNode::TypeFilter { subtype, input } => {
                let set = self.relation_of(&subtype, &input)?;
                let predicate = self.type_predicate(set, &subtype)?;
                if let Some(outer) = outer {
                    if !self.metadata.is_subtype_of(outer, &subtype)
                        && !self.metadata.is_subtype_of(&subtype, outer)
                    {
                        return Err(LiftError::resolution(
                            outer,
                            format!("unrelated to the earlier type filter '{}'", subtype),
                        ));
                    }
                }
                let input = self.resolve_under(*input, Some(subtype.as_str()))?;
                // The source restriction already selects the whole hierarchy.
                let restricted = if self.extent_predicate(set).as_ref() == Some(&predicate) {
                    input
                } else {
                    input.filter(predicate.clone())
                };
                if outer.is_some() {
                    debug!(subtype = %subtype, "type filter shaped by an enclosing one");
                    restricted
                } else {
                    let shape = self.shape(set, &subtype, &predicate);
                    debug!(subtype = %subtype, columns = shape.len(), "resolved type filter");
                    restricted.project(shape)
                }
            }
            OperatorNode::Filter { predicate, input } => self.resolve_under(*input, outer)?.filter(predicate),
            OperatorNode::Project { columns, input } => self.resolve_under(*input, None)?.project(columns),
            OperatorNode::Sort { keys, input } => self.resolve_under(*input, outer)?.sort(keys),
            OperatorNode::Skip { count, input } => self.resolve_under(*input, outer)?.skip(count),
            OperatorNode::Take { count, input } => self.resolve_under(*input, outer)?.take(count),
        })
    }

    /// The entity set at the bottom of a chain. The rows must still be
    /// whole entities, so no projection may sit in between.
    fn relation_of(&self, subtype: &str, node: &OperatorNode) -> LiftResult<&'m EntitySet> {
        let mut cursor = node;
        loop {
            if let OperatorNode::Project { .. } = cursor {
                return Err(LiftError::resolution(subtype, "cannot filter by type after a projection"));
            }
            match cursor.input() {
                Some(input) => cursor = input,
                None => break,
            }
        }
        match cursor {
            OperatorNode::Source { relation } => self.metadata.relation(relation),
            _ => Err(LiftError::invariant("operator chain does not end in a source")),
        }
    }

    /// Row predicate selecting `subtype` and its descendants.
    pub fn type_predicate(&self, set: &EntitySet, subtype: &str) -> LiftResult<Expr> {
        if self.metadata.entity_type(subtype).is_none() {
            return Err(LiftError::resolution(subtype, "unknown entity type"));
        }
        if !self.metadata.is_subtype_of(subtype, &set.root_type) {
            return Err(LiftError::resolution(
                subtype,
                format!("not part of the '{}' hierarchy of entity set '{}'", set.root_type, set.name),
            ));
        }
        self.subtree_predicate(subtype)
            .ok_or_else(|| LiftError::resolution(subtype, "no discriminator condition is mapped"))
    }

    fn extent_predicate(&self, set: &EntitySet) -> Option<Expr> {
        set.discriminator.as_ref()?;
        self.subtree_predicate(&set.root_type)
    }

    /// OR over the subtree of each type's ANDed conditions, collapsed to one
    /// IN list when every type is one value test on the same column.
    fn subtree_predicate(&self, root: &str) -> Option<Expr> {
        let mapped: Vec<_> = self
            .metadata
            .subtree(root)
            .into_iter()
            .filter(|t| !t.conditions.is_empty())
            .collect();
        if mapped.is_empty() {
            return None;
        }

        let single_column = mapped[0].conditions[0].column();
        let collapsible = mapped.iter().all(|t| {
            t.conditions.len() == 1
                && t.conditions[0].column() == single_column
                && matches!(t.conditions[0].test(), ConditionTest::Equals(_))
        });

        if collapsible {
            let mut values: Vec<Value> = Vec::new();
            for t in &mapped {
                if let Some(v) = t.conditions[0].value() {
                    if !values.contains(v) {
                        values.push(v.clone());
                    }
                }
            }
            return Some(col(single_column).in_list(values));
        }

        mapped
            .iter()
            .filter_map(|t| t.conditions.iter().map(|c| c.predicate()).reduce(Expr::and))
            .reduce(Expr::or)
    }

    fn shape(&self, set: &EntitySet, subtype: &str, predicate: &Expr) -> Vec<ProjectColumn> {
        let root_columns = self.metadata.type_columns(&set.root_type);
        self.metadata
            .type_columns(subtype)
            .into_iter()
            .map(|column| {
                let gated = match self.shaping {
                    ConditionalShaping::Uniform => true,
                    ConditionalShaping::SubtypeOnly => !root_columns.contains(&column),
                };
                if gated {
                    let expr = Expr::case_when(predicate.clone(), col(&column));
                    ProjectColumn::new(column, expr)
                } else {
                    ProjectColumn::passthrough(column)
                }
            })
            .collect()
    }
}
