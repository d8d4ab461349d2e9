//! Dynamic IR core for the marrow compiler: a structured control-flow graph
//! with lazily-maintained SSA.
//!
//! The function owns a tree of structured components (blocks, sequences,
//! forks, loops). Per block and variable, a def-timeline records local defs
//! and the joined incoming value; reaching defs are located on demand by the
//! def-resolution engine, which materialises phi instructions only where
//! joins are heterogeneous. The def-propagator keeps downstream joins
//! consistent as defs are inserted and erased.

pub mod ast;
pub mod block;
pub mod build;
pub mod component;
pub mod error;
pub mod function;
pub mod id;
pub mod instruction;
pub mod link_set;
pub mod metadata;
pub mod propagate;
pub mod resolve;
pub mod timeline;
pub mod types;
pub mod verify;
pub mod visit;

// Re-export commonly used types
pub use ast::{BinaryOp, Expr, ExprKind, Loc, Stmt, StmtKind, UnaryOp};
pub use block::{Block, OperandSpec};
pub use build::IrBuilder;
pub use component::{Component, Fork, Loop, LoopRole, Sequence};
pub use error::{CompileError, CoreError, ErrorState};
pub use function::{Function, Variable};
pub use id::{BlockId, CompId, DefId, DtKey, InstrId, TimelineId, VarId};
pub use instruction::{Def, Instruction, Operand, Use};
pub use link_set::LinkSet;
pub use metadata::{Arity, Opcode, OpcodeInfo};
pub use timeline::{DefTimeline, IncomingNode, TimelineHead, UseId, UseTimeline};
pub use types::{lca, Constant, IrType, ScalarType};
pub use verify::validate;
