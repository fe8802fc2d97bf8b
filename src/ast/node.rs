//! The operator tree.
//!
//! Trees are built bottom-up from a [`OperatorNode::source`], in the same
//! order the query operators were written:
//!
//! ```
//! use liftql::ast::*;
//!
//! let tree = OperatorNode::source("Owners")
//!     .sort(vec![SortKey::desc(col("FirstName")), SortKey::asc(col("Id"))])
//!     .skip(5)
//!     .filter(col("Id").modulo(lit(2)).equals(lit(0)));
//! assert_eq!(tree.kind(), "Filter");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::expr::Expr;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// One entry of a sort key list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            direction: SortDirection::Desc,
        }
    }
}

/// An output column of a projection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectColumn {
    pub name: String,
    pub expr: Expr,
    /// Carried only to feed a sort key above the projection; never part of
    /// the final result.
    #[serde(default)]
    pub hidden: bool,
}

impl ProjectColumn {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
            hidden: false,
        }
    }

    /// A pass-through column named after its source column.
    pub fn passthrough(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            expr: Expr::Column(name.clone()),
            name,
            hidden: false,
        }
    }

    pub fn hidden(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
            hidden: true,
        }
    }
}

/// A logical query operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorNode {
    /// A registered relation (entity set).
    Source { relation: String },
    Filter {
        predicate: Expr,
        input: Box<OperatorNode>,
    },
    Project {
        columns: Vec<ProjectColumn>,
        input: Box<OperatorNode>,
    },
    Sort {
        keys: Vec<SortKey>,
        input: Box<OperatorNode>,
    },
    Skip {
        count: u64,
        input: Box<OperatorNode>,
    },
    Take {
        count: u64,
        input: Box<OperatorNode>,
    },
    /// Restrict to rows of `subtype` or one of its descendants.
    TypeFilter {
        subtype: String,
        input: Box<OperatorNode>,
    },
}

impl OperatorNode {
    pub fn source(relation: impl Into<String>) -> Self {
        OperatorNode::Source {
            relation: relation.into(),
        }
    }

    pub fn filter(self, predicate: Expr) -> Self {
        OperatorNode::Filter {
            predicate,
            input: Box::new(self),
        }
    }

    pub fn project(self, columns: Vec<ProjectColumn>) -> Self {
        OperatorNode::Project {
            columns,
            input: Box::new(self),
        }
    }

    pub fn sort(self, keys: Vec<SortKey>) -> Self {
        OperatorNode::Sort {
            keys,
            input: Box::new(self),
        }
    }

    pub fn skip(self, count: u64) -> Self {
        OperatorNode::Skip {
            count,
            input: Box::new(self),
        }
    }

    pub fn take(self, count: u64) -> Self {
        OperatorNode::Take {
            count,
            input: Box::new(self),
        }
    }

    pub fn of_type(self, subtype: impl Into<String>) -> Self {
        OperatorNode::TypeFilter {
            subtype: subtype.into(),
            input: Box::new(self),
        }
    }

    /// Operator name, as shown by `explain`.
    pub fn kind(&self) -> &'static str {
        match self {
            OperatorNode::Source { .. } => "Source",
            OperatorNode::Filter { .. } => "Filter",
            OperatorNode::Project { .. } => "Project",
            OperatorNode::Sort { .. } => "Sort",
            OperatorNode::Skip { .. } => "Skip",
            OperatorNode::Take { .. } => "Take",
            OperatorNode::TypeFilter { .. } => "TypeFilter",
        }
    }

    pub fn input(&self) -> Option<&OperatorNode> {
        match self {
            OperatorNode::Source { .. } => None,
            OperatorNode::Filter { input, .. }
            | OperatorNode::Project { input, .. }
            | OperatorNode::Sort { input, .. }
            | OperatorNode::Skip { input, .. }
            | OperatorNode::Take { input, .. }
            | OperatorNode::TypeFilter { input, .. } => Some(input),
        }
    }

    /// The key list that orders this node's output rows, looking through
    /// order-preserving operators down to the nearest sort.
    ///
    /// Projections may rename the key columns on the way up, so keys found
    /// below a projection are only valid when the projection passes them
    /// through; callers that need keys over their own input should use
    /// [`OperatorNode::truncation_keys`] on a rewritten tree instead.
    pub fn order_source(&self) -> Option<&[SortKey]> {
        match self {
            OperatorNode::Sort { keys, .. } => Some(keys),
            OperatorNode::Source { .. } => None,
            OperatorNode::Filter { input, .. }
            | OperatorNode::Project { input, .. }
            | OperatorNode::Skip { input, .. }
            | OperatorNode::Take { input, .. }
            | OperatorNode::TypeFilter { input, .. } => input.order_source(),
        }
    }

    /// For a canonical truncation stage (`Skip`/`Take` over `Sort`, or
    /// `Take` over `Skip` over `Sort`), the keys it truncates by.
    pub fn truncation_keys(&self) -> Option<&[SortKey]> {
        match self {
            OperatorNode::Skip { input, .. } => match input.as_ref() {
                OperatorNode::Sort { keys, .. } => Some(keys),
                _ => None,
            },
            OperatorNode::Take { input, .. } => match input.as_ref() {
                OperatorNode::Sort { keys, .. } => Some(keys),
                skip @ OperatorNode::Skip { .. } => skip.truncation_keys(),
                _ => None,
            },
            _ => None,
        }
    }

    /// Number of nodes in the chain.
    pub fn depth(&self) -> usize {
        1 + self.input().map_or(0, |i| i.depth())
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        match self {
            OperatorNode::Source { relation } => writeln!(f, "{}Source {}", pad, relation)?,
            OperatorNode::Filter { predicate, .. } => writeln!(f, "{}Filter {}", pad, predicate)?,
            OperatorNode::Project { columns, .. } => {
                let cols: Vec<String> = columns
                    .iter()
                    .map(|c| {
                        let hidden = if c.hidden { " (hidden)" } else { "" };
                        match c.expr.as_column() {
                            Some(src) if src == c.name => format!("{}{}", c.name, hidden),
                            _ => format!("{} as {}{}", c.expr, c.name, hidden),
                        }
                    })
                    .collect();
                writeln!(f, "{}Project {}", pad, cols.join(", "))?
            }
            OperatorNode::Sort { keys, .. } => {
                let keys: Vec<String> = keys
                    .iter()
                    .map(|k| format!("{} {}", k.expr, k.direction.to_string().to_lowercase()))
                    .collect();
                writeln!(f, "{}Sort {}", pad, keys.join(", "))?
            }
            OperatorNode::Skip { count, .. } => writeln!(f, "{}Skip {}", pad, count)?,
            OperatorNode::Take { count, .. } => writeln!(f, "{}Take {}", pad, count)?,
            OperatorNode::TypeFilter { subtype, .. } => {
                writeln!(f, "{}TypeFilter {}", pad, subtype)?
            }
        }
        match self.input() {
            Some(input) => input.fmt_indented(f, indent + 1),
            None => Ok(()),
        }
    }
}

/// Indented tree rendering, outermost operator first.
impl fmt::Display for OperatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}
