//! The closed IR type set, its join-semilattice, and constant values.
//!
//! Types form a forest rooted at [`IrType::Any`]: every scalar and pointer
//! type is a descendant of `any`, while `void` is the single type outside the
//! hierarchy. [`lca`] computes the deepest common ancestor and is what the
//! static lowering uses to unify variable types and label phi results.
//!
//! The numeric chains follow the reference hierarchy:
//! `single -> double -> any`, `i8 -> i16 -> i32 -> i64 -> any`, and the
//! unsigned tower likewise. Character, boolean and complex types hang
//! directly off `any`, as do all pointer forms.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar kinds; each also has a raw pointer form ([`IrType::Pointer`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    LongDouble,
    Double,
    Single,
    I64,
    I32,
    I16,
    I8,
    U64,
    U32,
    U16,
    U8,
    Char,
    WChar,
    Char16,
    Char32,
    Bool,
    ComplexSingle,
    ComplexDouble,
}

/// A type in the closed IR type set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IrType {
    /// The root of the lattice: the dynamic boxed value type.
    Any,
    /// The unit of no value. The only type that is not a descendant of `any`.
    Void,
    Scalar(ScalarType),
    Pointer(ScalarType),
}

impl ScalarType {
    /// The parent of this scalar in the type hierarchy.
    fn base(self) -> IrType {
        use ScalarType::*;
        match self {
            Single => IrType::Scalar(Double),
            I32 => IrType::Scalar(I64),
            I16 => IrType::Scalar(I32),
            I8 => IrType::Scalar(I16),
            U32 => IrType::Scalar(U64),
            U16 => IrType::Scalar(U32),
            U8 => IrType::Scalar(U16),
            LongDouble | Double | I64 | U64 | Char | WChar | Char16 | Char32 | Bool
            | ComplexSingle | ComplexDouble => IrType::Any,
        }
    }

    pub fn name(self) -> &'static str {
        use ScalarType::*;
        match self {
            LongDouble => "ldouble",
            Double => "double",
            Single => "single",
            I64 => "i64",
            I32 => "i32",
            I16 => "i16",
            I8 => "i8",
            U64 => "ui64",
            U32 => "ui32",
            U16 => "ui16",
            U8 => "ui8",
            Char => "char",
            WChar => "wchar",
            Char16 => "char16",
            Char32 => "char32",
            Bool => "bool",
            ComplexSingle => "fcomplex",
            ComplexDouble => "complex",
        }
    }

    /// All scalar kinds, in declaration order.
    pub const ALL: [ScalarType; 18] = [
        ScalarType::LongDouble,
        ScalarType::Double,
        ScalarType::Single,
        ScalarType::I64,
        ScalarType::I32,
        ScalarType::I16,
        ScalarType::I8,
        ScalarType::U64,
        ScalarType::U32,
        ScalarType::U16,
        ScalarType::U8,
        ScalarType::Char,
        ScalarType::WChar,
        ScalarType::Char16,
        ScalarType::Char32,
        ScalarType::Bool,
        ScalarType::ComplexSingle,
        ScalarType::ComplexDouble,
    ];
}

impl IrType {
    /// The parent type in the hierarchy; `None` for `any` and `void`.
    pub fn base(self) -> Option<IrType> {
        match self {
            IrType::Any | IrType::Void => None,
            IrType::Scalar(s) => Some(s.base()),
            IrType::Pointer(_) => Some(IrType::Any),
        }
    }

    /// Distance from the root of this type's tree.
    pub fn depth(self) -> u32 {
        let mut d = 0;
        let mut t = self;
        while let Some(b) = t.base() {
            d += 1;
            t = b;
        }
        d
    }

    pub fn is_integral(self) -> bool {
        use ScalarType::*;
        matches!(
            self,
            IrType::Scalar(I64 | I32 | I16 | I8 | U64 | U32 | U16 | U8 | Bool)
        )
    }

    pub fn is_unsigned(self) -> bool {
        use ScalarType::*;
        matches!(self, IrType::Scalar(U64 | U32 | U16 | U8))
    }

    pub fn is_floating(self) -> bool {
        use ScalarType::*;
        matches!(self, IrType::Scalar(LongDouble | Double | Single))
    }

    pub fn name(self) -> String {
        match self {
            IrType::Any => "any".to_string(),
            IrType::Void => "void".to_string(),
            IrType::Scalar(s) => s.name().to_string(),
            IrType::Pointer(s) => format!("{}*", s.name()),
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Computes the deepest common ancestor of `a` and `b`.
///
/// `any` absorbs everything in its hierarchy; `void` joined with anything
/// other than itself yields `any` (the lattice top), keeping the operation
/// total.
pub fn lca(mut a: IrType, mut b: IrType) -> IrType {
    loop {
        if a == b {
            return a;
        }
        let (da, db) = (a.depth(), b.depth());
        if da < db {
            // b must have a base, since its depth is positive
            b = b.base().expect("positive depth implies a base");
        } else if db < da {
            a = a.base().expect("positive depth implies a base");
        } else {
            match (a.base(), b.base()) {
                (Some(pa), Some(pb)) => {
                    a = pa;
                    b = pb;
                }
                // distinct roots (any vs void)
                _ => return IrType::Any,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// A typed constant value carried by an instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Single(f32),
    Double(f64),
    Char(char),
    ComplexSingle(f32, f32),
    ComplexDouble(f64, f64),
}

impl Constant {
    pub fn ty(self) -> IrType {
        use ScalarType::*;
        IrType::Scalar(match self {
            Constant::Bool(_) => Bool,
            Constant::I8(_) => I8,
            Constant::I16(_) => I16,
            Constant::I32(_) => I32,
            Constant::I64(_) => I64,
            Constant::U8(_) => U8,
            Constant::U16(_) => U16,
            Constant::U32(_) => U32,
            Constant::U64(_) => U64,
            Constant::Single(_) => Single,
            Constant::Double(_) => Double,
            Constant::Char(_) => Char,
            Constant::ComplexSingle(..) => ComplexSingle,
            Constant::ComplexDouble(..) => ComplexDouble,
        })
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Bool(v) => write!(f, "{}", v),
            Constant::I8(v) => write!(f, "{}", v),
            Constant::I16(v) => write!(f, "{}", v),
            Constant::I32(v) => write!(f, "{}", v),
            Constant::I64(v) => write!(f, "{}", v),
            Constant::U8(v) => write!(f, "{}", v),
            Constant::U16(v) => write!(f, "{}", v),
            Constant::U32(v) => write!(f, "{}", v),
            Constant::U64(v) => write!(f, "{}", v),
            Constant::Single(v) => write!(f, "{}", v),
            Constant::Double(v) => write!(f, "{}", v),
            Constant::Char(v) => write!(f, "'{}'", v),
            Constant::ComplexSingle(re, im) => write!(f, "{}+{}i", re, im),
            Constant::ComplexDouble(re, im) => write!(f, "{}+{}i", re, im),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn all_types() -> Vec<IrType> {
        let mut v = vec![IrType::Any, IrType::Void];
        for s in ScalarType::ALL {
            v.push(IrType::Scalar(s));
            v.push(IrType::Pointer(s));
        }
        v
    }

    #[test]
    fn depth_of_roots_is_zero() {
        assert_eq!(IrType::Any.depth(), 0);
        assert_eq!(IrType::Void.depth(), 0);
    }

    #[test]
    fn integer_chain_depths() {
        assert_eq!(IrType::Scalar(ScalarType::I64).depth(), 1);
        assert_eq!(IrType::Scalar(ScalarType::I32).depth(), 2);
        assert_eq!(IrType::Scalar(ScalarType::I16).depth(), 3);
        assert_eq!(IrType::Scalar(ScalarType::I8).depth(), 4);
    }

    #[test]
    fn lca_single_double() {
        assert_eq!(
            lca(
                IrType::Scalar(ScalarType::Single),
                IrType::Scalar(ScalarType::Double)
            ),
            IrType::Scalar(ScalarType::Double)
        );
    }

    #[test]
    fn lca_i8_i64_is_i64() {
        assert_eq!(
            lca(
                IrType::Scalar(ScalarType::I8),
                IrType::Scalar(ScalarType::I64)
            ),
            IrType::Scalar(ScalarType::I64)
        );
    }

    #[test]
    fn lca_int_double_is_any() {
        assert_eq!(
            lca(
                IrType::Scalar(ScalarType::I32),
                IrType::Scalar(ScalarType::Double)
            ),
            IrType::Any
        );
    }

    #[test]
    fn lca_void_scalar_is_any() {
        assert_eq!(lca(IrType::Void, IrType::Scalar(ScalarType::I32)), IrType::Any);
        assert_eq!(lca(IrType::Void, IrType::Void), IrType::Void);
    }

    #[test]
    fn lca_pointer_forms() {
        assert_eq!(
            lca(
                IrType::Pointer(ScalarType::Double),
                IrType::Pointer(ScalarType::Double)
            ),
            IrType::Pointer(ScalarType::Double)
        );
        assert_eq!(
            lca(
                IrType::Pointer(ScalarType::Double),
                IrType::Pointer(ScalarType::I64)
            ),
            IrType::Any
        );
    }

    #[test]
    fn constant_types() {
        assert_eq!(Constant::I32(1).ty(), IrType::Scalar(ScalarType::I32));
        assert_eq!(Constant::Bool(true).ty(), IrType::Scalar(ScalarType::Bool));
        assert_eq!(
            Constant::Double(0.5).ty(),
            IrType::Scalar(ScalarType::Double)
        );
    }

    fn arb_type() -> impl Strategy<Value = IrType> {
        let types = all_types();
        (0..types.len()).prop_map(move |i| types[i])
    }

    proptest! {
        #[test]
        fn lca_is_idempotent(t in arb_type()) {
            prop_assert_eq!(lca(t, t), t);
        }

        #[test]
        fn lca_any_absorbs(t in arb_type()) {
            prop_assert_eq!(lca(IrType::Any, t), IrType::Any);
            prop_assert_eq!(lca(t, IrType::Any), IrType::Any);
        }

        #[test]
        fn lca_is_commutative(a in arb_type(), b in arb_type()) {
            prop_assert_eq!(lca(a, b), lca(b, a));
        }

        #[test]
        fn lca_is_associative(a in arb_type(), b in arb_type(), c in arb_type()) {
            prop_assert_eq!(lca(lca(a, b), c), lca(a, lca(b, c)));
        }

        #[test]
        fn lca_is_an_ancestor_of_both(a in arb_type(), b in arb_type()) {
            let j = lca(a, b);
            let ancestor = |mut t: IrType, target: IrType| {
                loop {
                    if t == target { return true; }
                    match t.base() { Some(p) => t = p, None => return false }
                }
            };
            // void joined with anything else maps to the lattice top
            if a == b || (a != IrType::Void && b != IrType::Void) {
                prop_assert!(ancestor(a, j));
                prop_assert!(ancestor(b, j));
            } else {
                prop_assert_eq!(j, IrType::Any);
            }
        }
    }
}
