//! Relational emitter.
//!
//! Lowers a rewritten operator tree into T-SQL text built from nested
//! sub-selects.

pub mod expr;
pub mod select;

pub use select::{Emitter, FromItem, SelectColumn, SelectStatement, StatementKind};

use crate::ast::OperatorNode;
use crate::error::LiftResult;
use crate::mapping::Metadata;

/// Trait for converting statements to SQL.
pub trait ToSql {
    /// Convert this node to a SQL string.
    fn to_sql(&self) -> String;
}

/// Emit SQL for a tree that has already been through the rewriter.
pub fn emit(tree: &OperatorNode, metadata: &Metadata) -> LiftResult<String> {
    let statement = Emitter::new(metadata).statement(tree)?;
    Ok(statement.to_sql())
}
