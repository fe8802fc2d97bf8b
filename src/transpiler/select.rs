//! Nested select statements.
//!
//! The emitter walks the rewritten tree bottom-up. Each operator either
//! merges into the statement built so far, when that statement still has a
//! free slot for it, or turns the statement into an aliased derived table
//! and starts a new one on top.

use std::collections::HashMap;

use tracing::trace;

use super::expr::{quote_ident, quote_table, render, render_keys};
use super::ToSql;
use crate::ast::{col, lit, Expr, OperatorNode, ProjectColumn, SortKey};
use crate::error::{LiftError, LiftResult};
use crate::mapping::Metadata;

/// Name of the window column added for skip stages.
pub const ROW_NUMBER: &str = "row_number";

/// What a statement was last shaped by; also the prefix of the alias it
/// gets when wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Extent,
    Filter,
    Project,
    Skip,
    Limit,
}

impl StatementKind {
    pub fn label(&self) -> &'static str {
        match self {
            StatementKind::Extent => "Extent",
            StatementKind::Filter => "Filter",
            StatementKind::Project => "Project",
            StatementKind::Skip => "Skip",
            StatementKind::Limit => "Limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    pub name: String,
    /// Over the columns of the FROM item.
    pub expr: Expr,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    Table { name: String, alias: String },
    Derived { query: Box<SelectStatement>, alias: String },
}

impl FromItem {
    pub fn alias(&self) -> &str {
        match self {
            FromItem::Table { alias, .. } | FromItem::Derived { alias, .. } => alias,
        }
    }
}

/// One SELECT. All expressions read the columns of `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub kind: StatementKind,
    pub top: Option<u64>,
    pub columns: Vec<SelectColumn>,
    /// `row_number() OVER (ORDER BY ...)`, appended after the columns.
    pub row_number: Option<Vec<SortKey>>,
    pub from: FromItem,
    pub predicate: Option<Expr>,
    pub order_by: Vec<SortKey>,
}

impl SelectStatement {
    /// Whether a WHERE conjunct can be added without changing meaning.
    fn accepts_filter(&self) -> bool {
        matches!(self.kind, StatementKind::Extent | StatementKind::Filter)
            && self.top.is_none()
            && self.row_number.is_none()
            && self.order_by.is_empty()
    }

    /// Whether the select list can be replaced.
    fn accepts_projection(&self) -> bool {
        self.top.is_none() && self.row_number.is_none()
    }

    /// Rewrite an expression over this statement's output into one over
    /// its FROM item.
    fn inline(&self, expr: &Expr) -> Expr {
        expr.substitute(&|name| {
            self.columns
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.expr.clone())
                .unwrap_or_else(|| col(name))
        })
    }

    fn inline_keys(&self, keys: &[SortKey]) -> Vec<SortKey> {
        keys.iter()
            .map(|k| SortKey {
                expr: self.inline(&k.expr),
                direction: k.direction,
            })
            .collect()
    }

    fn and_predicate(&mut self, predicate: Expr) {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
    }

    fn render(&self, depth: usize) -> String {
        let indent = "\t".repeat(depth);
        let alias = self.from.alias();
        let outermost = depth == 0;

        let mut columns: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !(outermost && c.hidden))
            .map(|c| format!("{} AS {}", render(&c.expr, alias), quote_ident(&c.name)))
            .collect();
        if let Some(keys) = &self.row_number {
            columns.push(format!(
                "row_number() OVER (ORDER BY {}) AS {}",
                render_keys(keys, alias),
                quote_ident(ROW_NUMBER)
            ));
        }

        let mut sql = String::from("SELECT ");
        if let Some(n) = self.top {
            sql.push_str(&format!("TOP ({}) ", n));
        }
        if outermost {
            sql.push('\n');
            sql.push_str(&columns.join(", \n"));
        } else {
            sql.push_str(&columns.join(", "));
        }

        sql.push('\n');
        sql.push_str(&indent);
        sql.push_str("FROM ");
        match &self.from {
            FromItem::Table { name, alias } => {
                sql.push_str(&format!("{} AS {}", quote_table(name), quote_ident(alias)));
            }
            FromItem::Derived { query, alias } => {
                sql.push_str("( ");
                sql.push_str(&query.render(depth + 1));
                sql.push('\n');
                sql.push_str(&indent);
                sql.push_str(&format!(")  AS {}", quote_ident(alias)));
            }
        }

        if let Some(predicate) = &self.predicate {
            sql.push('\n');
            sql.push_str(&indent);
            sql.push_str("WHERE ");
            sql.push_str(&render(predicate, alias));
        }

        if !self.order_by.is_empty() {
            sql.push('\n');
            sql.push_str(&indent);
            sql.push_str("ORDER BY ");
            sql.push_str(&render_keys(&self.order_by, alias));
        }

        sql
    }
}

impl ToSql for SelectStatement {
    fn to_sql(&self) -> String {
        self.render(0)
    }
}

/// Builds a [`SelectStatement`] from a rewritten tree.
pub struct Emitter<'m> {
    metadata: &'m Metadata,
    counters: HashMap<StatementKind, usize>,
}

impl<'m> Emitter<'m> {
    pub fn new(metadata: &'m Metadata) -> Self {
        Self {
            metadata,
            counters: HashMap::new(),
        }
    }

    fn next_alias(&mut self, kind: StatementKind) -> String {
        let n = self.counters.entry(kind).or_insert(0);
        *n += 1;
        format!("{}{}", kind.label(), n)
    }

    /// Turn `inner` into a derived table under a pass-through statement.
    fn wrap(&mut self, mut inner: SelectStatement, kind: StatementKind) -> SelectStatement {
        let alias = self.next_alias(inner.kind);
        if inner.top.is_none() {
            // Order is meaningless inside a derived table.
            inner.order_by.clear();
        }
        trace!(alias = %alias, "wrapped statement");
        let columns = inner
            .columns
            .iter()
            .map(|c| SelectColumn {
                name: c.name.clone(),
                expr: col(&c.name),
                hidden: c.hidden,
            })
            .collect();
        SelectStatement {
            kind,
            top: None,
            columns,
            row_number: None,
            from: FromItem::Derived {
                query: Box::new(inner),
                alias,
            },
            predicate: None,
            order_by: Vec::new(),
        }
    }

    pub fn statement(&mut self, node: &OperatorNode) -> LiftResult<SelectStatement> {
        match node {
            OperatorNode::Source { relation } => {
                let set = self.metadata.relation(relation)?;
                let alias = self.next_alias(StatementKind::Extent);
                let columns = self
                    .metadata
                    .relation_columns(set)
                    .into_iter()
                    .map(|name| SelectColumn {
                        expr: col(&name),
                        name,
                        hidden: false,
                    })
                    .collect();
                Ok(SelectStatement {
                    kind: StatementKind::Extent,
                    top: None,
                    columns,
                    row_number: None,
                    from: FromItem::Table {
                        name: set.table.clone(),
                        alias,
                    },
                    predicate: None,
                    order_by: Vec::new(),
                })
            }
            OperatorNode::Filter { predicate, input } => {
                let stmt = self.statement(input)?;
                if stmt.accepts_filter() {
                    let mut stmt = stmt;
                    let predicate = stmt.inline(predicate);
                    stmt.and_predicate(predicate);
                    stmt.kind = StatementKind::Filter;
                    trace!("merged filter");
                    Ok(stmt)
                } else {
                    let mut outer = self.wrap(stmt, StatementKind::Filter);
                    outer.predicate = Some(outer.inline(predicate));
                    Ok(outer)
                }
            }
            OperatorNode::Project { columns, input } => {
                let stmt = self.statement(input)?;
                let mut stmt = if stmt.accepts_projection() {
                    stmt
                } else {
                    self.wrap(stmt, StatementKind::Project)
                };
                stmt.columns = project(&stmt, columns);
                stmt.kind = StatementKind::Project;
                Ok(stmt)
            }
            OperatorNode::Sort { keys, input } => {
                let stmt = self.statement(input)?;
                if stmt.top.is_some() || stmt.row_number.is_some() {
                    if stmt.top.is_some() && stmt.order_by == stmt.inline_keys(keys) {
                        trace!("sort already satisfied by limited statement");
                        return Ok(stmt);
                    }
                    let mut outer = self.wrap(stmt, StatementKind::Project);
                    outer.order_by = outer.inline_keys(keys);
                    Ok(outer)
                } else {
                    let mut stmt = stmt;
                    stmt.order_by = stmt.inline_keys(keys);
                    Ok(stmt)
                }
            }
            OperatorNode::Skip { count, input } => match input.as_ref() {
                OperatorNode::Sort { keys, input } => self.window(*count, keys, input),
                other => Err(LiftError::invariant(format!(
                    "skip over {} reached the emitter",
                    other.kind()
                ))),
            },
            OperatorNode::Take { count, input } => {
                let mut stmt = match input.as_ref() {
                    OperatorNode::Sort { keys, input } => {
                        let stmt = self.statement(input)?;
                        let mut stmt = if stmt.accepts_projection() {
                            stmt
                        } else {
                            self.wrap(stmt, StatementKind::Project)
                        };
                        stmt.order_by = stmt.inline_keys(keys);
                        stmt
                    }
                    OperatorNode::Skip {
                        count: skip,
                        input: skip_input,
                    } => match skip_input.as_ref() {
                        OperatorNode::Sort { keys, input } => {
                            let mut stmt = self.window(*skip, keys, input)?;
                            stmt.order_by = stmt.inline_keys(keys);
                            stmt
                        }
                        other => {
                            return Err(LiftError::invariant(format!(
                                "skip over {} reached the emitter",
                                other.kind()
                            )));
                        }
                    },
                    other => {
                        return Err(LiftError::invariant(format!(
                            "take over {} reached the emitter",
                            other.kind()
                        )));
                    }
                };
                stmt.top = Some(*count);
                stmt.kind = StatementKind::Limit;
                Ok(stmt)
            }
            OperatorNode::TypeFilter { subtype, .. } => Err(LiftError::invariant(format!(
                "type filter for '{}' reached the emitter unresolved",
                subtype
            ))),
        }
    }

    /// `Skip(count, Sort(keys, input))`: number the rows, then keep those
    /// past `count`.
    fn window(&mut self, count: u64, keys: &[SortKey], input: &OperatorNode) -> LiftResult<SelectStatement> {
        let stmt = self.statement(input)?;
        let mut stmt = if stmt.accepts_projection() {
            stmt
        } else {
            self.wrap(stmt, StatementKind::Project)
        };
        stmt.order_by.clear();
        stmt.row_number = Some(stmt.inline_keys(keys));

        let mut outer = self.wrap(stmt, StatementKind::Skip);
        let offset = i64::try_from(count).unwrap_or(i64::MAX);
        outer.predicate = Some(col(ROW_NUMBER).greater_than(lit(offset)));
        Ok(outer)
    }
}

fn project(stmt: &SelectStatement, columns: &[ProjectColumn]) -> Vec<SelectColumn> {
    columns
        .iter()
        .map(|c| SelectColumn {
            name: c.name.clone(),
            expr: stmt.inline(&c.expr),
            hidden: c.hidden,
        })
        .collect()
}
