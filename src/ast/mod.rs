//! Operator tree and expression model.

pub mod expr;
pub mod node;

pub use expr::{col, lit, BinaryOp, Expr, Value};
pub use node::{OperatorNode, ProjectColumn, SortDirection, SortKey};
