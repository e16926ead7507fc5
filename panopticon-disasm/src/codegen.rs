//! IL construction facade.

use panopticon_il::{IlError, Lvalue, Memory, Operation, Rvalue, Statement, Variable};

use crate::{Architecture, DisassemblyError};

/// Marker selecting a fresh architecture-scoped temporary as the assignee.
pub struct Temp;

/// Assignment targets accepted by the code generator.
pub trait IntoAssignee<A: Architecture> {
    /// Resolve to a concrete lvalue.
    fn into_assignee(self, cg: &CodeGenerator<'_, A>) -> Lvalue;
}

impl<A: Architecture> IntoAssignee<A> for Lvalue {
    fn into_assignee(self, _: &CodeGenerator<'_, A>) -> Lvalue {
        self
    }
}

impl<A: Architecture> IntoAssignee<A> for Variable {
    fn into_assignee(self, _: &CodeGenerator<'_, A>) -> Lvalue {
        Lvalue::Variable(self)
    }
}

impl<A: Architecture> IntoAssignee<A> for Memory {
    fn into_assignee(self, _: &CodeGenerator<'_, A>) -> Lvalue {
        Lvalue::Memory(self)
    }
}

impl<A: Architecture> IntoAssignee<A> for Temp {
    fn into_assignee(self, cg: &CodeGenerator<'_, A>) -> Lvalue {
        Lvalue::Variable(A::temporary(cg.state))
    }
}

macro_rules! unary_op {
    ($(#[$doc:meta])* $name:ident, $variant:ident) => {
        $(#[$doc])*
        pub fn $name(
            &mut self,
            assignee: impl IntoAssignee<A>,
            op: impl Into<Rvalue>,
        ) -> Result<Rvalue, DisassemblyError> {
            let assignee = assignee.into_assignee(self);
            self.emit(assignee, Operation::$variant(op.into()))
        }
    };
}

macro_rules! binary_op {
    ($(#[$doc:meta])* $name:ident, $variant:ident) => {
        $(#[$doc])*
        pub fn $name(
            &mut self,
            assignee: impl IntoAssignee<A>,
            left: impl Into<Rvalue>,
            right: impl Into<Rvalue>,
        ) -> Result<Rvalue, DisassemblyError> {
            let assignee = assignee.into_assignee(self);
            self.emit(assignee, Operation::$variant(left.into(), right.into()))
        }
    };
}

/// Emits IL statements for one mnemonic.
///
/// Every method appends `assignee ← op(args)` and returns the assignee as
/// an rvalue; passing [`Temp`] as the assignee allocates a fresh temporary.
/// Emission checks the IL well-formedness rules and fails with
/// [`IlError::IllFormedIl`] on violation.
pub struct CodeGenerator<'a, A: Architecture> {
    statements: &'a mut Vec<Statement>,
    pub(crate) state: &'a A::State,
}

impl<'a, A: Architecture> CodeGenerator<'a, A> {
    /// Generator appending to `statements`.
    pub fn new(statements: &'a mut Vec<Statement>, state: &'a A::State) -> Self {
        Self { statements, state }
    }

    /// The architecture state of the surrounding match.
    pub fn arch_state(&self) -> &A::State {
        self.state
    }

    fn check(value: &Rvalue) -> Result<(), IlError> {
        match value {
            Rvalue::Undefined | Rvalue::Constant(_) => Ok(()),
            Rvalue::Variable(var) => {
                if var.name.is_empty() {
                    Err(IlError::IllFormedIl("variable with empty name".into()))
                } else if var.subscript.is_some() {
                    Err(IlError::IllFormedIl(format!(
                        "variable {} already has an SSA subscript",
                        var.name
                    )))
                } else if var.width == 0 || var.width > 64 {
                    Err(IlError::IllFormedIl(format!(
                        "variable {} has width {}",
                        var.name, var.width
                    )))
                } else {
                    Ok(())
                }
            }
            Rvalue::Memory(mem) => {
                if mem.name.is_empty() {
                    Err(IlError::IllFormedIl("memory space with empty name".into()))
                } else if mem.bytes == 0 {
                    Err(IlError::IllFormedIl(format!(
                        "zero-byte access into {}",
                        mem.name
                    )))
                } else if *mem.offset == *value {
                    Err(IlError::IllFormedIl(format!(
                        "memory reference into {} is its own offset",
                        mem.name
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Append `assignee ← op` after validating all involved values.
    pub fn emit(
        &mut self,
        assignee: Lvalue,
        op: Operation<Rvalue>,
    ) -> Result<Rvalue, DisassemblyError> {
        for operand in op.operands() {
            Self::check(operand)?;
        }
        Self::check(&Rvalue::from(assignee.clone()))?;

        self.statements.push(Statement::new(op, assignee.clone()));
        Ok(Rvalue::from(assignee))
    }

    unary_op!(
        /// `assignee ← op`.
        assign, UnivNop
    );
    unary_op!(
        /// `assignee ← ¬op` (boolean).
        not_b, LogicNeg
    );
    unary_op!(
        /// `assignee ← (bool)op`.
        lift_b, LogicLift
    );
    unary_op!(
        /// `assignee ← call(op)`.
        call_i, IntCall
    );

    binary_op!(
        /// `assignee ← a ∧ b` (boolean).
        and_b, LogicAnd
    );
    binary_op!(
        /// `assignee ← a ∨ b` (boolean).
        or_b, LogicOr
    );
    binary_op!(
        /// `assignee ← a → b` (boolean).
        impl_b, LogicImpl
    );
    binary_op!(
        /// `assignee ← a ↔ b` (boolean).
        equiv_b, LogicEquiv
    );
    binary_op!(
        /// `assignee ← a >> b` (boolean).
        rshift_b, LogicRshift
    );
    binary_op!(
        /// `assignee ← a << b` (boolean).
        lshift_b, LogicLshift
    );
    binary_op!(
        /// `assignee ← a + b`.
        add_i, IntAdd
    );
    binary_op!(
        /// `assignee ← a - b`.
        sub_i, IntSub
    );
    binary_op!(
        /// `assignee ← a × b`.
        mul_i, IntMul
    );
    binary_op!(
        /// `assignee ← a ÷ b` (unsigned).
        div_i, IntDiv
    );
    binary_op!(
        /// `assignee ← a % b` (unsigned).
        mod_i, IntMod
    );
    binary_op!(
        /// `assignee ← a & b`.
        and_i, IntAnd
    );
    binary_op!(
        /// `assignee ← a | b`.
        or_i, IntOr
    );
    binary_op!(
        /// `assignee ← a ⊕ b`.
        xor_i, IntXor
    );
    binary_op!(
        /// `assignee ← a >> b`.
        rshift_i, IntRshift
    );
    binary_op!(
        /// `assignee ← a << b`.
        lshift_i, IntLshift
    );
    binary_op!(
        /// `assignee ← a < b` (unsigned).
        less_i, IntLess
    );
    binary_op!(
        /// `assignee ← a = b`.
        equal_i, IntEqual
    );
}
