//! IL operations and statements.

use core::fmt;

use crate::{Lvalue, Rvalue};

/// One typed operation over operands of type `V`.
///
/// The operand type is generic so abstract interpreters can instantiate the
/// same operation set over lattice elements instead of concrete rvalues.
/// Boolean operations treat zero as false and everything else as true;
/// signed integer operations reinterpret their operands as two's complement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operation<V> {
    /// Boolean conjunction.
    LogicAnd(V, V),
    /// Boolean disjunction.
    LogicOr(V, V),
    /// Boolean negation.
    LogicNeg(V),
    /// Boolean implication.
    LogicImpl(V, V),
    /// Boolean equivalence.
    LogicEquiv(V, V),
    /// Integer to boolean lift.
    LogicLift(V),
    /// Boolean right shift.
    LogicRshift(V, V),
    /// Boolean left shift.
    LogicLshift(V, V),

    /// Integer addition.
    IntAdd(V, V),
    /// Integer subtraction.
    IntSub(V, V),
    /// Integer multiplication.
    IntMul(V, V),
    /// Unsigned integer division.
    IntDiv(V, V),
    /// Unsigned integer modulo.
    IntMod(V, V),
    /// Bitwise and.
    IntAnd(V, V),
    /// Bitwise or.
    IntOr(V, V),
    /// Bitwise exclusive or.
    IntXor(V, V),
    /// Logical right shift.
    IntRshift(V, V),
    /// Left shift.
    IntLshift(V, V),
    /// Unsigned less-than comparison.
    IntLess(V, V),
    /// Equality comparison.
    IntEqual(V, V),
    /// Call to the procedure at the operand.
    IntCall(V),

    /// Identity assignment.
    UnivNop(V),
    /// SSA φ-function. Operands are indexed by predecessor-edge ordinal.
    UnivPhi(Vec<V>),
}

impl<V> Operation<V> {
    /// Operands in order.
    pub fn operands(&self) -> Vec<&V> {
        use Operation::*;

        match self {
            LogicAnd(a, b) | LogicOr(a, b) | LogicImpl(a, b) | LogicEquiv(a, b)
            | LogicRshift(a, b) | LogicLshift(a, b) | IntAdd(a, b) | IntSub(a, b)
            | IntMul(a, b) | IntDiv(a, b) | IntMod(a, b) | IntAnd(a, b) | IntOr(a, b)
            | IntXor(a, b) | IntRshift(a, b) | IntLshift(a, b) | IntLess(a, b)
            | IntEqual(a, b) => vec![a, b],
            LogicNeg(a) | LogicLift(a) | IntCall(a) | UnivNop(a) => vec![a],
            UnivPhi(ops) => ops.iter().collect(),
        }
    }

    /// Mutable operands in order.
    pub fn operands_mut(&mut self) -> Vec<&mut V> {
        use Operation::*;

        match self {
            LogicAnd(a, b) | LogicOr(a, b) | LogicImpl(a, b) | LogicEquiv(a, b)
            | LogicRshift(a, b) | LogicLshift(a, b) | IntAdd(a, b) | IntSub(a, b)
            | IntMul(a, b) | IntDiv(a, b) | IntMod(a, b) | IntAnd(a, b) | IntOr(a, b)
            | IntXor(a, b) | IntRshift(a, b) | IntLshift(a, b) | IntLess(a, b)
            | IntEqual(a, b) => vec![a, b],
            LogicNeg(a) | LogicLift(a) | IntCall(a) | UnivNop(a) => vec![a],
            UnivPhi(ops) => ops.iter_mut().collect(),
        }
    }

    /// True for [`Operation::UnivPhi`].
    pub const fn is_phi(&self) -> bool {
        matches!(self, Operation::UnivPhi(_))
    }

    /// True for [`Operation::IntCall`].
    pub const fn is_call(&self) -> bool {
        matches!(self, Operation::IntCall(_))
    }

    /// Rebuild the operation with every operand mapped through `f`.
    pub fn map<W>(&self, mut f: impl FnMut(&V) -> W) -> Operation<W> {
        use Operation::*;

        match self {
            LogicAnd(a, b) => LogicAnd(f(a), f(b)),
            LogicOr(a, b) => LogicOr(f(a), f(b)),
            LogicNeg(a) => LogicNeg(f(a)),
            LogicImpl(a, b) => LogicImpl(f(a), f(b)),
            LogicEquiv(a, b) => LogicEquiv(f(a), f(b)),
            LogicLift(a) => LogicLift(f(a)),
            LogicRshift(a, b) => LogicRshift(f(a), f(b)),
            LogicLshift(a, b) => LogicLshift(f(a), f(b)),
            IntAdd(a, b) => IntAdd(f(a), f(b)),
            IntSub(a, b) => IntSub(f(a), f(b)),
            IntMul(a, b) => IntMul(f(a), f(b)),
            IntDiv(a, b) => IntDiv(f(a), f(b)),
            IntMod(a, b) => IntMod(f(a), f(b)),
            IntAnd(a, b) => IntAnd(f(a), f(b)),
            IntOr(a, b) => IntOr(f(a), f(b)),
            IntXor(a, b) => IntXor(f(a), f(b)),
            IntRshift(a, b) => IntRshift(f(a), f(b)),
            IntLshift(a, b) => IntLshift(f(a), f(b)),
            IntLess(a, b) => IntLess(f(a), f(b)),
            IntEqual(a, b) => IntEqual(f(a), f(b)),
            IntCall(a) => IntCall(f(a)),
            UnivNop(a) => UnivNop(f(a)),
            UnivPhi(ops) => UnivPhi(ops.iter().map(|v| f(v)).collect()),
        }
    }

    /// Stable symbolic name of the operation.
    pub const fn name(&self) -> &'static str {
        use Operation::*;

        match self {
            LogicAnd(..) => "logic-and",
            LogicOr(..) => "logic-or",
            LogicNeg(..) => "logic-negation",
            LogicImpl(..) => "logic-implication",
            LogicEquiv(..) => "logic-equivalence",
            LogicLift(..) => "logic-lift-boolean",
            LogicRshift(..) => "logic-right-shift",
            LogicLshift(..) => "logic-left-shift",
            IntAdd(..) => "integer-addition",
            IntSub(..) => "integer-subtraction",
            IntMul(..) => "integer-multiplication",
            IntDiv(..) => "integer-division",
            IntMod(..) => "integer-modulo",
            IntAnd(..) => "integer-bitwise-and",
            IntOr(..) => "integer-bitwise-or",
            IntXor(..) => "integer-bitwise-xor",
            IntRshift(..) => "integer-right-shift",
            IntLshift(..) => "integer-left-shift",
            IntLess(..) => "integer-less-than",
            IntEqual(..) => "integer-equal-to",
            IntCall(..) => "integer-call-to",
            UnivNop(..) => "universal-no-op",
            UnivPhi(..) => "universal-phi",
        }
    }

    /// Infix glyph used when printing statements.
    const fn glyph(&self) -> &'static str {
        use Operation::*;

        match self {
            LogicAnd(..) | IntAnd(..) => "∧",
            LogicOr(..) | IntOr(..) => "∨",
            LogicNeg(..) => "¬",
            LogicImpl(..) => "→",
            LogicEquiv(..) => "↔",
            LogicLift(..) => "int ",
            LogicRshift(..) | IntRshift(..) => ">>",
            LogicLshift(..) | IntLshift(..) => "<<",
            IntAdd(..) => "+",
            IntSub(..) => "-",
            IntMul(..) => "×",
            IntDiv(..) => "÷",
            IntMod(..) => "%",
            IntXor(..) => "⊕",
            IntLess(..) => "<",
            IntEqual(..) => "=",
            IntCall(..) => "call ",
            UnivNop(..) => "",
            UnivPhi(..) => "ϕ",
        }
    }
}

/// One IL statement: `assignee ← operation(operands)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Statement {
    /// Operation computing the assigned value.
    pub op: Operation<Rvalue>,
    /// Target of the assignment.
    pub assignee: Lvalue,
}

impl Statement {
    /// Statement assigning the result of `op` to `assignee`.
    pub fn new(op: Operation<Rvalue>, assignee: impl Into<Lvalue>) -> Self {
        Self {
            op,
            assignee: assignee.into(),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ops = self.op.operands();

        write!(f, "{} ≔ ", self.assignee)?;
        match (&self.op, ops.as_slice()) {
            (op, []) => write!(f, "{}", op.glyph()),
            (op @ (Operation::IntCall(_) | Operation::UnivPhi(_)), _) => {
                write!(f, "{}(", op.glyph())?;
                for (idx, operand) in ops.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{operand}")?;
                }
                f.write_str(")")
            }
            (op, [a]) => write!(f, "{}{a}", op.glyph()),
            (op, [a, b]) => write!(f, "{a} {} {b}", op.glyph()),
            (op, _) => {
                write!(f, "{}(", op.name())?;
                for (idx, operand) in ops.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{operand}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Variable;

    fn var(n: &str) -> Rvalue {
        Rvalue::from(Variable::new(n, 8))
    }

    #[test]
    fn operand_arity() {
        assert_eq!(Operation::IntAdd(var("a"), var("b")).operands().len(), 2);
        assert_eq!(Operation::LogicNeg(var("a")).operands().len(), 1);
        assert_eq!(Operation::<Rvalue>::UnivPhi(vec![]).operands().len(), 0);
        assert_eq!(
            Operation::UnivPhi(vec![var("a"), var("b"), var("c")]).operands().len(),
            3
        );
    }

    #[test]
    fn operands_mut_rewrites_in_place() {
        let mut op = Operation::IntAdd(var("a"), var("b"));

        for operand in op.operands_mut() {
            *operand = Rvalue::Constant(0);
        }

        assert_eq!(op, Operation::IntAdd(Rvalue::Constant(0), Rvalue::Constant(0)));
    }

    #[test]
    fn map_preserves_shape() {
        let op = Operation::IntLess(var("a"), Rvalue::Constant(100));
        let widths = op.map(|rv| rv.is_constant());

        assert_eq!(widths, Operation::IntLess(false, true));
    }

    #[test]
    fn statement_display() {
        let st = Statement::new(
            Operation::IntAdd(var("i"), Rvalue::Constant(1)),
            Variable::new("i", 8),
        );

        assert_eq!(format!("{st}"), "i ≔ i + 1");
        assert_eq!(
            format!("{}", Statement::new(Operation::IntCall(var("f")), Lvalue::Undefined)),
            "? ≔ call (f)"
        );
    }
}
