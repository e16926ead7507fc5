//! Edge guards: conjunctions of relations between values.

use core::fmt;

use crate::Rvalue;

/// Relation between two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelCode {
    /// Unsigned less-or-equal.
    ULeq,
    /// Signed less-or-equal.
    SLeq,
    /// Unsigned greater-or-equal.
    UGeq,
    /// Signed greater-or-equal.
    SGeq,
    /// Unsigned less-than.
    ULess,
    /// Signed less-than.
    SLess,
    /// Unsigned greater-than.
    UGrtr,
    /// Signed greater-than.
    SGrtr,
    /// Equality.
    Eq,
    /// Inequality.
    Neq,
}

impl RelCode {
    /// The complementary relation.
    pub const fn negation(self) -> Self {
        match self {
            RelCode::ULeq => RelCode::UGrtr,
            RelCode::SLeq => RelCode::SGrtr,
            RelCode::UGeq => RelCode::ULess,
            RelCode::SGeq => RelCode::SLess,
            RelCode::ULess => RelCode::UGeq,
            RelCode::SLess => RelCode::SGeq,
            RelCode::UGrtr => RelCode::ULeq,
            RelCode::SGrtr => RelCode::SLeq,
            RelCode::Eq => RelCode::Neq,
            RelCode::Neq => RelCode::Eq,
        }
    }
}

impl fmt::Display for RelCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let glyph = match self {
            RelCode::ULeq => "≤ᵤ",
            RelCode::SLeq => "≤ₛ",
            RelCode::UGeq => "≥ᵤ",
            RelCode::SGeq => "≥ₛ",
            RelCode::ULess => "<ᵤ",
            RelCode::SLess => "<ₛ",
            RelCode::UGrtr => ">ᵤ",
            RelCode::SGrtr => ">ₛ",
            RelCode::Eq => "=",
            RelCode::Neq => "≠",
        };

        f.write_str(glyph)
    }
}

/// One two-operand relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Relation {
    /// Relation kind.
    pub code: RelCode,
    /// Left operand.
    pub left: Rvalue,
    /// Right operand.
    pub right: Rvalue,
}

impl Relation {
    /// Relate `left` and `right` by `code`.
    pub fn new(left: impl Into<Rvalue>, code: RelCode, right: impl Into<Rvalue>) -> Self {
        Self {
            code,
            left: left.into(),
            right: right.into(),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.code, self.right)
    }
}

/// Condition attached to a control-transfer edge.
///
/// A guard is the conjunction of its relations; the empty conjunction is
/// always true. [`Guard::negation`] complements every relation, which is the
/// exact negation for single-relation guards built by the branch helpers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Guard {
    /// Conjoined relations.
    pub relations: Vec<Relation>,
}

impl Guard {
    /// The always-true guard.
    pub const fn always() -> Self {
        Self {
            relations: Vec::new(),
        }
    }

    /// Guard holding a single relation.
    pub fn from_relation(left: impl Into<Rvalue>, code: RelCode, right: impl Into<Rvalue>) -> Self {
        Self {
            relations: vec![Relation::new(left, code, right)],
        }
    }

    /// True if the guard holds unconditionally.
    pub fn is_always(&self) -> bool {
        self.relations.is_empty()
    }

    /// Guard with every relation complemented.
    pub fn negation(&self) -> Self {
        Self {
            relations: self
                .relations
                .iter()
                .map(|rel| Relation {
                    code: rel.code.negation(),
                    left: rel.left.clone(),
                    right: rel.right.clone(),
                })
                .collect(),
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relations.is_empty() {
            return f.write_str("true");
        }

        for (idx, rel) in self.relations.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ∧ ")?;
            }
            write!(f, "{rel}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Variable;

    #[test]
    fn empty_guard_is_true() {
        assert!(Guard::always().is_always());
        assert!(Guard::always().negation().is_always());
        assert_eq!(format!("{}", Guard::always()), "true");
    }

    #[test]
    fn negation_complements() {
        let g = Guard::from_relation(Variable::new("Z", 1), RelCode::Eq, Rvalue::Constant(1));
        let n = g.negation();

        assert_eq!(n.relations[0].code, RelCode::Neq);
        assert_eq!(n.negation(), g);

        for code in [
            RelCode::ULeq,
            RelCode::SLeq,
            RelCode::UGeq,
            RelCode::SGeq,
            RelCode::ULess,
            RelCode::SLess,
            RelCode::UGrtr,
            RelCode::SGrtr,
            RelCode::Eq,
            RelCode::Neq,
        ] {
            assert_eq!(code.negation().negation(), code);
        }
    }
}
