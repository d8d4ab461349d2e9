//! Instructions, operands, defs and uses.
//!
//! An instruction pairs an opcode with an optional def and an ordered operand
//! sequence. An operand is either a typed constant or a *use*: a reference to
//! a variable bound to exactly one use-timeline in the enclosing block. The
//! binding is by [`TimelineId`], so a use transparently follows its timeline
//! when a phi materialises at the timeline's head.

use smallvec::SmallVec;

use crate::id::{DefId, InstrId, TimelineId, VarId};
use crate::metadata::Opcode;
use crate::types::{Constant, IrType};

/// An SSA def: the `id`-th definition of `var`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Def {
    pub var: VarId,
    pub id: DefId,
    /// Inferred type of the defined value, when known.
    pub ty: Option<IrType>,
}

/// A use of a variable, bound to a use-timeline in its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub var: VarId,
    pub timeline: TimelineId,
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Constant(Constant),
    Use(Use),
}

impl Operand {
    pub fn as_use(&self) -> Option<&Use> {
        match self {
            Operand::Use(u) => Some(u),
            Operand::Constant(_) => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Operand::Constant(c) => Some(c),
            Operand::Use(_) => None,
        }
    }
}

/// An instruction: opcode tag, optional def, ordered operands.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub id: InstrId,
    pub op: Opcode,
    pub def: Option<Def>,
    pub operands: SmallVec<[Operand; 2]>,
}

impl Instruction {
    pub fn new(id: InstrId, op: Opcode, def: Option<Def>, operands: SmallVec<[Operand; 2]>) -> Self {
        Instruction {
            id,
            op,
            def,
            operands,
        }
    }

    /// Returns `true` if this instruction produces a def.
    pub fn has_def(&self) -> bool {
        self.def.is_some()
    }

    pub fn is_phi(&self) -> bool {
        self.op == Opcode::Phi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn operand_accessors() {
        let c = Operand::Constant(Constant::I32(3));
        assert!(c.as_constant().is_some());
        assert!(c.as_use().is_none());

        let u = Operand::Use(Use {
            var: VarId(0),
            timeline: TimelineId(1),
        });
        assert!(u.as_use().is_some());
        assert!(u.as_constant().is_none());
    }

    #[test]
    fn phi_predicate() {
        let phi = Instruction::new(
            InstrId(0),
            Opcode::Phi,
            Some(Def {
                var: VarId(0),
                id: DefId(0),
                ty: None,
            }),
            smallvec![],
        );
        assert!(phi.is_phi());
        assert!(phi.has_def());
    }
}
