//! Control-flow reconstruction and analyses over the IL.
//!
//! Mnemonics produced by the disassembler are fused into [`BasicBlock`]s,
//! grouped into [`Procedure`]s and linked into call-graph [`Program`]s.
//! On top of the procedure graph live the dominance and liveness analyses,
//! the SSA transform and a lattice-parametric abstract interpreter.

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod basic_block;
mod dflow;
mod interpreter;
pub mod procedure;
pub mod program;
mod ssa;

pub use basic_block::{BasicBlock, CfgNode};
pub use dflow::{dominance_tree, liveness, BlockLiveness, DominanceTree, Liveness};
pub use interpreter::{approximate, AbstractDomain, ConcreteDomain, KSetDomain, KSetValue};
pub use procedure::{Cfg, Procedure};
pub use program::Program;
pub use ssa::ssa;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use panopticon_disasm::DisassemblyError;
use panopticon_il::IlError;

/// Cooperative cancellation flag.
///
/// The long-running worklist algorithms poll the flag between iterations
/// and stop early when it is raised, leaving their result consistent but
/// possibly partial. Clones share the flag, so a controlling thread can
/// raise it while the analysis thread works.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    /// A fresh, unraised flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once [`Cancellation::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Errors of the analysis layer.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The disassembler rejected its rule set or a semantic action failed.
    #[error(transparent)]
    Disassembly(#[from] DisassemblyError),
    /// Ill-formed IL was encountered outside the disassembler.
    #[error(transparent)]
    Il(#[from] IlError),
    /// The operation needs a procedure entry, but none is set.
    #[error("procedure has no entry")]
    NoEntry,
    /// A vertex was expected to hold a basic block.
    #[error("vertex is not a basic block")]
    NotABlock,
}
