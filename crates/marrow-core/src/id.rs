//! Stable ID newtypes for IR entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety so
//! that a `VarId` cannot be accidentally used where a `CompId` is expected.
//!
//! Cross-owner references between def-timelines (incoming nodes pointing at
//! predecessor timelines, and the reverse `succs` links) are expressed as
//! [`DtKey`] values resolved by lookup. Ownership stays a tree; only keys
//! cross owner boundaries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Variable identity within a function. Indexes the function's variable arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarId(pub u32);

/// Component identity within a function. Indexes the component arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompId(pub u32);

/// A [`CompId`] known to name a block component.
///
/// Constructed only by the function when allocating blocks, so holding a
/// `BlockId` is a proof that the slot contains a [`Component::Block`]
/// (see [`crate::component::Component`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Stable instruction identity, unique within a function.
///
/// Survives insertion and erasure of other instructions; the position of an
/// instruction inside its block is looked up on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrId(pub u32);

/// Stable use-timeline identity, unique within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimelineId(pub u32);

/// SSA def number within a variable. Monotonically assigned, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DefId(pub u32);

/// Key addressing the def-timeline of variable `var` inside block `block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DtKey {
    pub block: BlockId,
    pub var: VarId,
}

impl DtKey {
    pub fn new(block: BlockId, var: VarId) -> Self {
        DtKey { block, var }
    }
}

impl From<BlockId> for CompId {
    fn from(b: BlockId) -> Self {
        CompId(b.0)
    }
}

// Display implementations -- just print the inner value.

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TimelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.block, self.var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_to_comp_id() {
        let b = BlockId(7);
        let c: CompId = b.into();
        assert_eq!(c, CompId(7));
    }

    #[test]
    fn dt_key_ordering_is_block_major() {
        let a = DtKey::new(BlockId(0), VarId(5));
        let b = DtKey::new(BlockId(1), VarId(0));
        assert!(a < b);
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", VarId(3)), "3");
        assert_eq!(format!("{}", DtKey::new(BlockId(1), VarId(2))), "(1, 2)");
    }

    #[test]
    fn serde_roundtrip() {
        let key = DtKey::new(BlockId(4), VarId(9));
        let json = serde_json::to_string(&key).unwrap();
        let back: DtKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }
}
