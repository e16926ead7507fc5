//! Intermediate language of the analysis core.
//!
//! Machine instructions are lifted into a small assignment-form IL: every
//! statement writes the result of one typed operation into an lvalue. The
//! operand model ([`Rvalue`]) is a closed sum over constants, variables,
//! memory references and the undefined value; operations are a closed sum
//! as well, so analyses can match exhaustively instead of dispatching
//! through virtual calls.

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod guard;
mod il;
mod mnemonic;
mod value;

pub use guard::{Guard, RelCode, Relation};
pub use il::{Operation, Statement};
pub use mnemonic::{FormatToken, Mnemonic, PHI_MNEMONIC};
pub use value::{Endianness, Lvalue, Memory, Rvalue, Variable};

/// Errors of the IL layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IlError {
    /// A value was used as a variant it does not have.
    #[error("value is not a {0}")]
    WrongVariant(&'static str),
    /// A statement violates the IL well-formedness rules.
    #[error("ill-formed IL: {0}")]
    IllFormedIl(String),
    /// A mnemonic format string could not be parsed.
    #[error("malformed format string {0:?}: {1}")]
    BadFormat(String, &'static str),
    /// A format token references an operand the mnemonic does not have.
    #[error("format string {0:?} references operand #{1} of a {2}-operand mnemonic")]
    MissingOperand(String, usize, usize),
}
