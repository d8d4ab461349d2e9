//! Back-end error types.

use thiserror::Error;

/// Errors produced while JIT compiling a static function.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// LLVM reported an error (verification, engine creation, builder).
    #[error("llvm error: {0}")]
    Llvm(String),

    /// The static function uses a feature this back end does not lower.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An operand referenced a def that was never materialised.
    #[error("unknown def {var}#{def}")]
    UnknownDef { var: u32, def: u32 },

    /// The compiled symbol could not be resolved.
    #[error("function lookup failed: {0}")]
    Lookup(String),
}
