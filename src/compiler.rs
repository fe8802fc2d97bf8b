//! The compile entry point: rewrite, then emit.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::ast::OperatorNode;
use crate::config::CompilerOptions;
use crate::error::LiftResult;
use crate::mapping::Metadata;
use crate::rewrite;
use crate::transpiler;

/// Compiles operator trees against one frozen model.
///
/// Cheap to clone; the metadata is shared.
#[derive(Debug, Clone)]
pub struct Compiler {
    metadata: Arc<Metadata>,
    options: CompilerOptions,
}

/// Every stage of one compilation, for `explain`.
#[derive(Debug, Clone)]
pub struct Explain {
    pub input: OperatorNode,
    pub rewritten: OperatorNode,
    pub sql: String,
}

impl Compiler {
    pub fn new(metadata: Arc<Metadata>, options: CompilerOptions) -> Self {
        Self { metadata, options }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Run all rewrite stages and return the canonical tree.
    pub fn rewrite(&self, tree: OperatorNode) -> LiftResult<OperatorNode> {
        rewrite::rewrite(tree, &self.metadata, &self.options)
    }

    /// Compile a tree to SQL text.
    pub fn compile(&self, tree: OperatorNode) -> LiftResult<String> {
        let depth = tree.depth();
        let rewritten = self.rewrite(tree)?;
        debug!(input_depth = depth, output_depth = rewritten.depth(), "tree rewritten");
        transpiler::emit(&rewritten, &self.metadata)
    }

    pub fn explain(&self, tree: OperatorNode) -> LiftResult<Explain> {
        let rewritten = self.rewrite(tree.clone())?;
        let sql = transpiler::emit(&rewritten, &self.metadata)?;
        Ok(Explain {
            input: tree,
            rewritten,
            sql,
        })
    }
}

impl fmt::Display for Explain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Input:")?;
        write!(f, "{}", self.input)?;
        writeln!(f, "\nRewritten:")?;
        write!(f, "{}", self.rewritten)?;
        writeln!(f, "\nSQL:")?;
        writeln!(f, "{}", self.sql)
    }
}
