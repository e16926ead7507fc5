//! Disassembler framework.
//!
//! The lowest part of the analysis chain: rule trees built from bit
//! patterns consume a token stream and emit mnemonics plus lifted IL. The
//! matcher works like a backtracking recursive-descent parser over bit
//! patterns; semantic actions attached to the rules fill a [`SemState`]
//! with mnemonics and successor addresses, which the control-flow
//! reconstructor assembles into basic blocks and procedures.

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod architecture;
mod codegen;
mod matcher;
mod pattern;

pub use architecture::{Architecture, TemporaryAllocator, Token};
pub use codegen::{CodeGenerator, IntoAssignee, Temp};
pub use matcher::{Disassembler, SemState, TokenView};
pub use pattern::TokenPattern;

use panopticon_il::IlError;
use panopticon_region::RegionError;

/// Errors of the disassembler layer.
#[derive(Debug, thiserror::Error)]
pub enum DisassemblyError {
    /// A token-pattern literal could not be parsed.
    #[error("invalid token pattern {0:?}: {1}")]
    InvalidPattern(String, &'static str),
    /// A semantic action produced ill-formed IL.
    #[error(transparent)]
    Il(#[from] IlError),
    /// The underlying byte source failed.
    #[error(transparent)]
    Region(#[from] RegionError),
}
