//! The closed opcode set and its static attribute table.
//!
//! Every opcode carries a fixed record of attributes: printable name, arity,
//! whether instructions with this opcode produce a def, whether the opcode is
//! abstract (a family head that never appears on an instruction), and the
//! base opcode it derives from. Family queries ("is this an arithmetic op?")
//! walk the base chain via [`Opcode::is_a`].

use serde::{Deserialize, Serialize};

/// Operand count classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arity {
    NAry,
    Nullary,
    Unary,
    Binary,
    Ternary,
}

impl Arity {
    /// The exact operand count, or `None` for n-ary.
    pub fn count(self) -> Option<usize> {
        match self {
            Arity::NAry => None,
            Arity::Nullary => Some(0),
            Arity::Unary => Some(1),
            Arity::Binary => Some(2),
            Arity::Ternary => Some(3),
        }
    }
}

/// The closed instruction opcode set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Phi,
    Assign,
    Call,
    Fetch,
    Convert,
    Terminate,

    /// Abstract family head for branches.
    Branch,
    CBranch,
    UcBranch,

    /// Abstract family head for relational ops.
    Relation,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    /// Abstract family head for arithmetic ops.
    Arithmetic,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Rem,
    Neg,

    /// Abstract family head for logical ops.
    Logical,
    LAnd,
    LOr,
    LNot,

    /// Abstract family head for bitwise ops.
    Bitwise,
    BAnd,
    BOr,
    BXor,
    BShiftL,
    BAShiftR,
    BLShiftR,
    BNot,
}

/// Static attributes of an opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    pub name: &'static str,
    pub arity: Arity,
    pub has_def: bool,
    pub is_abstract: bool,
    pub base: Option<Opcode>,
}

const fn info(
    name: &'static str,
    arity: Arity,
    has_def: bool,
    is_abstract: bool,
    base: Option<Opcode>,
) -> OpcodeInfo {
    OpcodeInfo {
        name,
        arity,
        has_def,
        is_abstract,
        base,
    }
}

impl Opcode {
    /// Every opcode, abstract family heads included.
    pub const ALL: [Opcode; 36] = [
        Opcode::Phi,
        Opcode::Assign,
        Opcode::Call,
        Opcode::Fetch,
        Opcode::Convert,
        Opcode::Terminate,
        Opcode::Branch,
        Opcode::CBranch,
        Opcode::UcBranch,
        Opcode::Relation,
        Opcode::Eq,
        Opcode::Ne,
        Opcode::Lt,
        Opcode::Le,
        Opcode::Gt,
        Opcode::Ge,
        Opcode::Arithmetic,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Rem,
        Opcode::Neg,
        Opcode::Logical,
        Opcode::LAnd,
        Opcode::LOr,
        Opcode::LNot,
        Opcode::Bitwise,
        Opcode::BAnd,
        Opcode::BOr,
        Opcode::BXor,
        Opcode::BShiftL,
        Opcode::BAShiftR,
        Opcode::BLShiftR,
        Opcode::BNot,
    ];

    /// The static attribute record for this opcode.
    pub const fn info(self) -> OpcodeInfo {
        use Arity::*;
        use Opcode as Op;
        match self {
            Op::Phi => info("phi", NAry, true, false, None),
            Op::Assign => info("assign", Unary, true, false, None),
            Op::Call => info("call", NAry, true, false, None),
            Op::Fetch => info("fetch", Unary, true, false, None),
            Op::Convert => info("convert", Unary, true, false, None),
            Op::Terminate => info("terminate", NAry, false, false, None),

            Op::Branch => info("branch", NAry, false, true, None),
            Op::CBranch => info("br", Binary, false, false, Some(Op::Branch)),
            Op::UcBranch => info("ubr", Unary, false, false, Some(Op::Branch)),

            Op::Relation => info("relation", Binary, true, true, None),
            Op::Eq => info("==", Binary, true, false, Some(Op::Relation)),
            Op::Ne => info("!=", Binary, true, false, Some(Op::Relation)),
            Op::Lt => info("<", Binary, true, false, Some(Op::Relation)),
            Op::Le => info("<=", Binary, true, false, Some(Op::Relation)),
            Op::Gt => info(">", Binary, true, false, Some(Op::Relation)),
            Op::Ge => info(">=", Binary, true, false, Some(Op::Relation)),

            Op::Arithmetic => info("arithmetic", NAry, true, true, None),
            Op::Add => info("+", Binary, true, false, Some(Op::Arithmetic)),
            Op::Sub => info("-", Binary, true, false, Some(Op::Arithmetic)),
            Op::Mul => info("*", Binary, true, false, Some(Op::Arithmetic)),
            Op::Div => info("/", Binary, true, false, Some(Op::Arithmetic)),
            Op::Mod => info("mod", Binary, true, false, Some(Op::Arithmetic)),
            Op::Rem => info("rem", Binary, true, false, Some(Op::Arithmetic)),
            Op::Neg => info("neg", Unary, true, false, Some(Op::Arithmetic)),

            Op::Logical => info("logical", NAry, true, true, None),
            Op::LAnd => info("&&", Binary, true, false, Some(Op::Logical)),
            Op::LOr => info("||", Binary, true, false, Some(Op::Logical)),
            Op::LNot => info("!", Unary, true, false, Some(Op::Logical)),

            Op::Bitwise => info("bitwise", NAry, true, true, None),
            Op::BAnd => info("&", Binary, true, false, Some(Op::Bitwise)),
            Op::BOr => info("|", Binary, true, false, Some(Op::Bitwise)),
            Op::BXor => info("^", Binary, true, false, Some(Op::Bitwise)),
            Op::BShiftL => info("<<", Binary, true, false, Some(Op::Bitwise)),
            Op::BAShiftR => info(">>", Binary, true, false, Some(Op::Bitwise)),
            Op::BLShiftR => info(">>>", Binary, true, false, Some(Op::Bitwise)),
            Op::BNot => info("~", Unary, true, false, Some(Op::Bitwise)),
        }
    }

    pub const fn name(self) -> &'static str {
        self.info().name
    }

    pub const fn arity(self) -> Arity {
        self.info().arity
    }

    pub const fn has_def(self) -> bool {
        self.info().has_def
    }

    pub const fn is_abstract(self) -> bool {
        self.info().is_abstract
    }

    pub const fn base(self) -> Option<Opcode> {
        self.info().base
    }

    /// Returns `true` if this opcode is `family` or derives from it.
    pub fn is_a(self, family: Opcode) -> bool {
        let mut op = self;
        loop {
            if op == family {
                return true;
            }
            match op.base() {
                Some(b) => op = b,
                None => return false,
            }
        }
    }
}
