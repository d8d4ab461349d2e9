//! Static IR for the marrow compiler: the flat, numbered, SSA-explicit
//! function form consumed by the JIT back end, and the lowering pass that
//! produces it from the dynamic IR.

pub mod error;
pub mod function;
pub mod lower;

pub use error::LowerError;
pub use function::{
    StaticBlock, StaticConstant, StaticDef, StaticFunction, StaticInstruction, StaticOperand,
    StaticVariable,
};
pub use lower::lower;
