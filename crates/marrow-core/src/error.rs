//! Error types for the dynamic IR layer.
//!
//! [`CoreError`] covers structural misuse of the IR containers; these are
//! programming errors of the embedding layer and propagate as *fatal*.
//! [`CompileError`] is the builder-facing exception carrying a source
//! location and a recovery state: *stable* errors leave the partially-built
//! function intact for the caller, *fatal* errors reset the builder.

use thiserror::Error;

use crate::ast::Loc;
use crate::id::{BlockId, CompId, InstrId, TimelineId, VarId};
use crate::metadata::Opcode;
use crate::types::IrType;

/// Structural errors produced by the marrow-core containers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A variable name was not found in the function.
    #[error("variable not found: '{name}'")]
    VariableNotFound { name: String },

    /// Attempting to create a variable whose name already exists.
    #[error("duplicate variable name: '{name}'")]
    DuplicateVariable { name: String },

    /// A variable id was out of range.
    #[error("invalid variable id: {0}")]
    InvalidVariable(VarId),

    /// A component id did not name a block.
    #[error("component {0} is not a block")]
    NotABlock(CompId),

    /// A component id did not name a sequence.
    #[error("component {0} is not a sequence")]
    NotASequence(CompId),

    /// A component id did not name a fork.
    #[error("component {0} is not a fork")]
    NotAFork(CompId),

    /// An instruction id was not found.
    #[error("instruction not found: {0}")]
    InstructionNotFound(InstrId),

    /// A use-timeline id was not found in its def-timeline.
    #[error("use-timeline not found: {0}")]
    TimelineNotFound(TimelineId),

    /// An instruction position was out of range for the block body.
    #[error("position {pos} out of range in block {block}")]
    PositionOutOfRange { block: BlockId, pos: usize },

    /// The operand count does not match the opcode arity.
    #[error("opcode {op:?} expects {expected} operands, got {got}")]
    ArityMismatch {
        op: Opcode,
        expected: usize,
        got: usize,
    },

    /// A def-producing opcode was appended without a target variable,
    /// or a non-def opcode with one.
    #[error("opcode {op:?} {reason}")]
    DefMismatch { op: Opcode, reason: &'static str },

    /// An abstract family head was used as an instruction opcode.
    #[error("opcode {0:?} is abstract and cannot be instantiated")]
    AbstractOpcode(Opcode),

    /// An internal invariant of the SSA machinery was violated.
    #[error("invariant violation: {reason}")]
    InvariantViolation { reason: String },
}

/// Recovery state of a builder error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorState {
    /// The builder state is preserved; the caller may continue.
    Stable,
    /// The builder discards the partially-built function.
    Fatal,
}

/// The builder-facing compile exception.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A syntactic construct is missing a required operand.
    #[error("missing operand{}", fmt_loc(.loc))]
    MissingOperand { loc: Option<Loc> },

    /// An identifier does not name a known variable.
    #[error("undefined variable '{name}'{}", fmt_loc(.loc))]
    UndefinedVariable { name: String, loc: Option<Loc> },

    /// Two types met that have no useful common ancestor.
    #[error("type conflict between {lhs} and {rhs}{}", fmt_loc(.loc))]
    TypeConflict {
        lhs: IrType,
        rhs: IrType,
        loc: Option<Loc>,
    },

    /// The IR layer reported a structural error; the builder state is
    /// no longer trustworthy.
    #[error("internal error: {0}")]
    Internal(#[from] CoreError),
}

impl CompileError {
    /// Whether this error preserves the builder state.
    pub fn state(&self) -> ErrorState {
        match self {
            CompileError::MissingOperand { .. }
            | CompileError::UndefinedVariable { .. }
            | CompileError::TypeConflict { .. } => ErrorState::Stable,
            CompileError::Internal(_) => ErrorState::Fatal,
        }
    }

    pub fn location(&self) -> Option<Loc> {
        match self {
            CompileError::MissingOperand { loc }
            | CompileError::UndefinedVariable { loc, .. }
            | CompileError::TypeConflict { loc, .. } => *loc,
            CompileError::Internal(_) => None,
        }
    }
}

fn fmt_loc(loc: &Option<Loc>) -> String {
    match loc {
        Some(l) => format!(" near line {}, column {}", l.line, l.column),
        None => String::new(),
    }
}
