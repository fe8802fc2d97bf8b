//! # liftql — sort-lifting relational query compiler
//!
//! liftql takes a chain of logical query operators (filter, project, sort,
//! skip, take, type filter) written against an entity model, rewrites it
//! into a canonical form where every sort sits as high as it can and every
//! skip/take keeps the order it truncates by, then emits T-SQL built from
//! nested sub-selects.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use liftql::prelude::*;
//! use std::sync::Arc;
//!
//! let config = Config::load("liftql.toml")?;
//! let compiler = Compiler::new(Arc::new(config.metadata.freeze()?), config.compiler);
//!
//! let tree = liftql::parse("Owners | order FirstName desc, Id | skip 5 | where Id % 2 = 0")?;
//! let sql = compiler.compile(tree)?;
//! // SELECT ... FROM ( ... row_number() OVER (ORDER BY ...) ... ) AS [Skip1]
//! // WHERE ... ORDER BY [Skip1].[FirstName] DESC, [Skip1].[Id] ASC
//! ```
//!
//! ## Stages
//!
//! | Stage                   | Module                       |
//! |-------------------------|------------------------------|
//! | Null-semantics adjuster | [`rewrite::null_semantics`]  |
//! | Discriminator resolver  | [`rewrite::discriminator`]   |
//! | Sort lift               | [`rewrite::sort_lift`]       |
//! | Relational emitter      | [`transpiler`]               |

pub mod ast;
pub mod compiler;
pub mod config;
pub mod error;
pub mod mapping;
pub mod parser;
pub mod rewrite;
pub mod transpiler;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::compiler::{Compiler, Explain};
    pub use crate::config::{CompilerOptions, ConditionalShaping, Config, NullComparisonMode};
    pub use crate::error::*;
    pub use crate::mapping::*;
    pub use crate::parser::parse;
    pub use crate::transpiler::ToSql;
}

/// Parse a pipeline string into an operator tree.
///
/// # Example
///
/// ```
/// use liftql::parse;
///
/// let tree = parse("Owners | order Id | take 3").unwrap();
/// assert_eq!(tree.kind(), "Take");
/// ```
pub fn parse(input: &str) -> Result<ast::OperatorNode, error::LiftError> {
    parser::parse(input)
}
