//! Basic blocks and control-flow graph nodes.

use core::fmt;

use panopticon_il::{Mnemonic, Rvalue, Statement};
use panopticon_types::Bound;

/// A straight-line sequence of mnemonics.
///
/// Mnemonics are address-adjacent and increasing; the block's area is the
/// hull over them. Synthetic zero-width mnemonics (φ-blocks) may share the
/// address of their successor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BasicBlock {
    area: Bound,
    mnemonics: Vec<Mnemonic>,
}

impl BasicBlock {
    /// Block over the given mnemonics.
    pub fn new(mnemonics: Vec<Mnemonic>) -> Self {
        let area = hull(&mnemonics);

        Self { area, mnemonics }
    }

    /// Address range covered by the block.
    pub fn area(&self) -> Bound {
        self.area
    }

    /// The mnemonics in address order.
    pub fn mnemonics(&self) -> &[Mnemonic] {
        &self.mnemonics
    }

    /// Mutate the mnemonic list; the area is recomputed afterwards.
    pub fn mutate_mnemonics(&mut self, f: impl FnOnce(&mut Vec<Mnemonic>)) {
        f(&mut self.mnemonics);
        self.area = hull(&self.mnemonics);
    }

    /// Run `f` over every IL statement in execution order.
    pub fn execute(&self, mut f: impl FnMut(&Statement)) {
        for mnemonic in &self.mnemonics {
            for statement in &mnemonic.instructions {
                f(statement);
            }
        }
    }

    /// Rewrite every IL statement in execution order.
    pub fn rewrite(&mut self, mut f: impl FnMut(&mut Statement)) {
        for mnemonic in &mut self.mnemonics {
            for statement in &mut mnemonic.instructions {
                f(statement);
            }
        }
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb@{}", self.area)
    }
}

fn hull(mnemonics: &[Mnemonic]) -> Bound {
    mnemonics
        .iter()
        .map(|m| m.area)
        .reduce(|acc, area| acc.hull(&area))
        .unwrap_or(Bound::new(0, 0))
}

/// Node of a procedure's control-transfer graph.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CfgNode {
    /// A decoded basic block.
    Block(BasicBlock),
    /// An unresolved control-transfer target.
    Value(Rvalue),
}

impl CfgNode {
    /// The basic block if this node holds one.
    pub fn as_block(&self) -> Option<&BasicBlock> {
        match self {
            CfgNode::Block(bb) => Some(bb),
            CfgNode::Value(_) => None,
        }
    }

    /// The mutable basic block if this node holds one.
    pub fn as_block_mut(&mut self) -> Option<&mut BasicBlock> {
        match self {
            CfgNode::Block(bb) => Some(bb),
            CfgNode::Value(_) => None,
        }
    }

    /// The unresolved target if this node holds one.
    pub fn as_value(&self) -> Option<&Rvalue> {
        match self {
            CfgNode::Block(_) => None,
            CfgNode::Value(rv) => Some(rv),
        }
    }
}
