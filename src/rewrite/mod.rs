//! Tree rewrites, in the order the compiler runs them:
//!
//! 1. [`null_semantics`]: adjust user filter predicates.
//! 2. [`discriminator`]: expand type filters, restrict polymorphic sources.
//! 3. [`sort_lift`]: global sort-lift / pagination-boundary pass.

pub mod discriminator;
pub mod null_semantics;
pub mod sort_lift;

pub use discriminator::DiscriminatorResolver;
pub use sort_lift::SortLift;

use crate::ast::OperatorNode;
use crate::config::CompilerOptions;
use crate::error::LiftResult;
use crate::mapping::Metadata;

/// Run every rewrite stage over a caller's tree. Rewriting the result
/// again emits the same SQL.
pub fn rewrite(
    tree: OperatorNode,
    metadata: &Metadata,
    options: &CompilerOptions,
) -> LiftResult<OperatorNode> {
    sort_lift::check_ordered(&tree)?;
    let tree = null_semantics::adjust_tree(tree, options.null_semantics);
    let tree = DiscriminatorResolver::new(metadata, options.shaping).resolve(tree)?;
    SortLift::new(options.max_rewrite_passes).rewrite(tree)
}
