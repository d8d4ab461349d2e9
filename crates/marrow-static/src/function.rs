//! The static function: the flat, numbered, SSA-explicit form handed to the
//! JIT back end.
//!
//! Blocks are topologically numbered with `blocks[0]` the entry; phi
//! instructions come first in each block, carrying `2N` operands as
//! alternating `(use, predecessor-block-id)` pairs. Defs are `(variable,
//! def)` pairs with a dense per-variable id space; `args[0]` is the return
//! slot. The whole structure serializes with serde, which the round-trip
//! tests rely on.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use marrow_core::{Constant, IrType, Opcode, ScalarType};

/// A numbered SSA def: the `def`-th definition of variable `var`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaticDef {
    pub var: u32,
    pub def: u32,
}

impl StaticDef {
    pub fn new(var: u32, def: u32) -> Self {
        StaticDef { var, def }
    }
}

/// A constant operand: a type tag plus little-endian payload bytes.
///
/// An empty payload marks the *undefined* value: the back end lowers it to a
/// runtime uninitialised-use report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConstant {
    pub ty: IrType,
    pub bytes: Vec<u8>,
}

impl StaticConstant {
    pub fn undefined(ty: IrType) -> Self {
        StaticConstant { ty, bytes: vec![] }
    }

    pub fn is_undefined(&self) -> bool {
        self.bytes.is_empty()
    }

    /// A block-id reference, used in phi operand pairs.
    pub fn block_ref(id: u32) -> Self {
        StaticConstant {
            ty: IrType::Scalar(ScalarType::U32),
            bytes: id.to_le_bytes().to_vec(),
        }
    }

    pub fn from_constant(c: &Constant) -> Self {
        let (ty, bytes) = match *c {
            Constant::Bool(v) => (c.ty(), vec![u8::from(v)]),
            Constant::I8(v) => (c.ty(), v.to_le_bytes().to_vec()),
            Constant::I16(v) => (c.ty(), v.to_le_bytes().to_vec()),
            Constant::I32(v) => (c.ty(), v.to_le_bytes().to_vec()),
            Constant::I64(v) => (c.ty(), v.to_le_bytes().to_vec()),
            Constant::U8(v) => (c.ty(), v.to_le_bytes().to_vec()),
            Constant::U16(v) => (c.ty(), v.to_le_bytes().to_vec()),
            Constant::U32(v) => (c.ty(), v.to_le_bytes().to_vec()),
            Constant::U64(v) => (c.ty(), v.to_le_bytes().to_vec()),
            Constant::Single(v) => (c.ty(), v.to_le_bytes().to_vec()),
            Constant::Double(v) => (c.ty(), v.to_le_bytes().to_vec()),
            Constant::Char(v) => (c.ty(), (v as u32).to_le_bytes().to_vec()),
            Constant::ComplexSingle(re, im) => {
                let mut b = re.to_le_bytes().to_vec();
                b.extend(im.to_le_bytes());
                (c.ty(), b)
            }
            Constant::ComplexDouble(re, im) => {
                let mut b = re.to_le_bytes().to_vec();
                b.extend(im.to_le_bytes());
                (c.ty(), b)
            }
        };
        StaticConstant { ty, bytes }
    }

    pub fn as_u32(&self) -> Option<u32> {
        let arr: [u8; 4] = self.bytes.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(arr))
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.bytes.first().map(|b| *b != 0)
    }

    /// The payload sign-extended to `i64`, for integral types.
    pub fn as_i64(&self) -> Option<i64> {
        use ScalarType::*;
        match self.ty {
            IrType::Scalar(Bool) => self.as_bool().map(i64::from),
            IrType::Scalar(I8) => Some(i8::from_le_bytes(self.bytes.get(..1)?.try_into().ok()?) as i64),
            IrType::Scalar(I16) => {
                Some(i16::from_le_bytes(self.bytes.get(..2)?.try_into().ok()?) as i64)
            }
            IrType::Scalar(I32) => {
                Some(i32::from_le_bytes(self.bytes.get(..4)?.try_into().ok()?) as i64)
            }
            IrType::Scalar(I64) => {
                Some(i64::from_le_bytes(self.bytes.get(..8)?.try_into().ok()?))
            }
            IrType::Scalar(U8) => Some(*self.bytes.first()? as i64),
            IrType::Scalar(U16) => {
                Some(u16::from_le_bytes(self.bytes.get(..2)?.try_into().ok()?) as i64)
            }
            IrType::Scalar(U32 | Char | WChar | Char16 | Char32) => {
                Some(u32::from_le_bytes(self.bytes.get(..4)?.try_into().ok()?) as i64)
            }
            IrType::Scalar(U64) => {
                Some(u64::from_le_bytes(self.bytes.get(..8)?.try_into().ok()?) as i64)
            }
            _ => None,
        }
    }

    /// The payload widened to `f64`, for floating types.
    pub fn as_f64(&self) -> Option<f64> {
        use ScalarType::*;
        match self.ty {
            IrType::Scalar(Single) => {
                Some(f32::from_le_bytes(self.bytes.get(..4)?.try_into().ok()?) as f64)
            }
            IrType::Scalar(Double | LongDouble) => {
                Some(f64::from_le_bytes(self.bytes.get(..8)?.try_into().ok()?))
            }
            _ => None,
        }
    }
}

/// A static instruction operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StaticOperand {
    Use(StaticDef),
    Constant(StaticConstant),
}

/// A static instruction: opcode, optional def, ordered operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticInstruction {
    pub op: Opcode,
    pub def: Option<StaticDef>,
    pub operands: SmallVec<[StaticOperand; 2]>,
}

/// A numbered static block. Phi instructions come first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticBlock {
    pub name: String,
    pub instructions: Vec<StaticInstruction>,
}

/// A variable of the static function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticVariable {
    pub name: String,
    pub ty: IrType,
    pub num_defs: u32,
}

/// The flat SSA function consumed by the JIT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticFunction {
    pub name: String,
    /// Variable ids of the signature; `args[0]` is the return slot.
    pub args: Vec<u32>,
    pub variables: Vec<StaticVariable>,
    pub blocks: Vec<StaticBlock>,
}

impl StaticFunction {
    pub fn variable(&self, id: u32) -> &StaticVariable {
        &self.variables[id as usize]
    }

    /// The return slot variable id.
    pub fn ret_var(&self) -> u32 {
        self.args[0]
    }

    /// The parameter variable ids (everything after the return slot).
    pub fn param_vars(&self) -> &[u32] {
        &self.args[1..]
    }
}

impl fmt::Display for StaticFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {} (", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let v = self.variable(*arg);
            write!(f, "{}: {}", v.name, v.ty)?;
        }
        writeln!(f, ")")?;
        for (num, block) in self.blocks.iter().enumerate() {
            writeln!(f, "{}: {{ {} }}", num, block.name)?;
            for instr in &block.instructions {
                write!(f, "  ")?;
                if let Some(d) = instr.def {
                    write!(f, "{}#{} = ", self.variable(d.var).name, d.def)?;
                }
                write!(f, "{}", instr.op.name())?;
                for opnd in &instr.operands {
                    match opnd {
                        StaticOperand::Use(u) => {
                            write!(f, " {}#{}", self.variable(u.var).name, u.def)?
                        }
                        StaticOperand::Constant(c) => {
                            if c.is_undefined() {
                                write!(f, " undef")?;
                            } else if c.ty == IrType::Scalar(ScalarType::U32) {
                                write!(f, " ->{}", c.as_u32().unwrap_or(0))?;
                            } else if let Some(v) = c.as_f64() {
                                write!(f, " {}", v)?;
                            } else if let Some(v) = c.as_i64() {
                                write!(f, " {}", v)?;
                            } else {
                                write!(f, " const<{}>", c.ty)?;
                            }
                        }
                    }
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
