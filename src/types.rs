//! The four-point category lattice tracked by the adaptive compiler.

use std::fmt;

/// Runtime type category of a value or an expression position.
///
/// `Ref` is the union of all boxed values; `Int` and `Bool` are the two
/// unboxed primitive categories. `Void` marks positions no value flows
/// through (the tail of a non-returning expression) and only appears on
/// expression annotations, never on runtime values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cat {
    Ref,
    Int,
    Bool,
    Void,
}

impl Cat {
    pub fn is_primitive(self) -> bool {
        matches!(self, Cat::Int | Cat::Bool)
    }

    pub(crate) fn to_bits(self) -> u8 {
        match self {
            Cat::Ref => 1,
            Cat::Int => 2,
            Cat::Bool => 3,
            Cat::Void => 4,
        }
    }

    pub(crate) fn from_bits(bits: u8) -> Cat {
        match bits {
            1 => Cat::Ref,
            2 => Cat::Int,
            3 => Cat::Bool,
            _ => Cat::Void,
        }
    }
}

impl fmt::Display for Cat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cat::Ref => "ref",
            Cat::Int => "int",
            Cat::Bool => "bool",
            Cat::Void => "void",
        };
        write!(f, "{}", name)
    }
}

/// A possibly-unknown expression type: the lattice element associated with a
/// variable or expression by inference and profiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprType {
    Unknown,
    Known(Cat),
}

impl ExprType {
    pub fn known(cat: Cat) -> ExprType {
        ExprType::Known(cat)
    }

    pub fn is_known(self) -> bool {
        matches!(self, ExprType::Known(_))
    }

    pub fn cat(self) -> Option<Cat> {
        match self {
            ExprType::Unknown => None,
            ExprType::Known(cat) => Some(cat),
        }
    }

    /// Lattice join. Unknown is the bottom element. Joining two distinct
    /// known categories widens to `Ref`, except that `Void` yields the other
    /// side: no value flows out of a void position, so it places no
    /// constraint on the join.
    pub fn union(self, other: ExprType) -> ExprType {
        match (self, other) {
            (ExprType::Unknown, t) => t,
            (t, ExprType::Unknown) => t,
            (ExprType::Known(a), ExprType::Known(b)) => {
                if a == b {
                    ExprType::Known(a)
                } else if a == Cat::Void {
                    ExprType::Known(b)
                } else if b == Cat::Void {
                    ExprType::Known(a)
                } else {
                    ExprType::Known(Cat::Ref)
                }
            }
        }
    }

    pub(crate) fn to_bits(self) -> u8 {
        match self {
            ExprType::Unknown => 0,
            ExprType::Known(cat) => cat.to_bits(),
        }
    }

    pub(crate) fn from_bits(bits: u8) -> ExprType {
        if bits == 0 {
            ExprType::Unknown
        } else {
            ExprType::Known(Cat::from_bits(bits))
        }
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprType::Unknown => write!(f, "unknown"),
            ExprType::Known(cat) => write!(f, "{}", cat),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ExprType; 5] = [
        ExprType::Unknown,
        ExprType::Known(Cat::Ref),
        ExprType::Known(Cat::Int),
        ExprType::Known(Cat::Bool),
        ExprType::Known(Cat::Void),
    ];

    #[test]
    fn union_with_unknown_is_identity() {
        for t in ALL {
            assert_eq!(ExprType::Unknown.union(t), t);
            assert_eq!(t.union(ExprType::Unknown), t);
        }
    }

    #[test]
    fn union_is_idempotent() {
        for t in ALL {
            assert_eq!(t.union(t), t);
        }
    }

    #[test]
    fn union_is_associative_and_commutative() {
        for a in ALL {
            for b in ALL {
                assert_eq!(a.union(b), b.union(a));
                for c in ALL {
                    assert_eq!(a.union(b).union(c), a.union(b.union(c)));
                }
            }
        }
    }

    #[test]
    fn distinct_primitives_widen_to_ref() {
        assert_eq!(
            ExprType::Known(Cat::Int).union(ExprType::Known(Cat::Bool)),
            ExprType::Known(Cat::Ref)
        );
    }

    #[test]
    fn void_yields_the_other_side() {
        assert_eq!(
            ExprType::Known(Cat::Void).union(ExprType::Known(Cat::Int)),
            ExprType::Known(Cat::Int)
        );
        assert_eq!(
            ExprType::Known(Cat::Void).union(ExprType::Known(Cat::Void)),
            ExprType::Known(Cat::Void)
        );
    }

    #[test]
    fn bits_round_trip() {
        for t in ALL {
            assert_eq!(ExprType::from_bits(t.to_bits()), t);
        }
    }
}
