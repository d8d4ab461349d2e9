//! Lowering errors.

use marrow_core::{BlockId, CoreError, VarId};
use thiserror::Error;

/// Errors produced while flattening a function into static form.
#[derive(Debug, Error)]
pub enum LowerError {
    /// An incoming edge carried more than one origin def without a phi.
    #[error("heterogeneous edge into block {block} for variable {var}")]
    HeterogeneousEdge { block: BlockId, var: VarId },

    /// A phi's incoming predecessors do not match the block's CFG
    /// predecessors.
    #[error("phi predecessors of block {block} do not match its CFG predecessors")]
    PhiPredecessorMismatch { block: BlockId },

    /// A two-way block has no condition def to branch on.
    #[error("block {block} branches two ways but holds no condition def")]
    MissingCondition { block: BlockId },

    /// Forks with more than two cases are not lowered.
    #[error("fork at block {block} has {cases} cases; at most 2 are supported")]
    UnsupportedFork { block: BlockId, cases: usize },

    /// A block without successors does not end in `terminate`.
    #[error("leaf block {block} does not end in terminate")]
    MissingTerminator { block: BlockId },

    /// The dynamic IR layer reported a structural error.
    #[error(transparent)]
    Core(#[from] CoreError),
}
