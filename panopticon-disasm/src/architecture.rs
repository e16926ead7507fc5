//! Architecture abstraction.

use std::cell::Cell;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use panopticon_il::Variable;

/// One unit of disassembler input.
///
/// Architectures read their code in fixed-size chunks: single bytes for
/// x86, little-endian 16 bit words for AVR. Patterns are matched against
/// the zero-extended integer value of a token.
pub trait Token: Copy + Eq + Ord + Hash + fmt::Debug + 'static {
    /// Width of the token in bits.
    const WIDTH: u16;
    /// Width of the token in bytes.
    const BYTES: usize;

    /// Decode a token from little-endian bytes. `bytes` holds exactly
    /// [`Token::BYTES`] elements.
    fn from_le_bytes(bytes: &[u8]) -> Self;

    /// Zero-extended integer value.
    fn to_u64(self) -> u64;
}

impl Token for u8 {
    const WIDTH: u16 = 8;
    const BYTES: usize = 1;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn to_u64(self) -> u64 {
        self.into()
    }
}

impl Token for u16 {
    const WIDTH: u16 = 16;
    const BYTES: usize = 2;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn to_u64(self) -> u64 {
        self.into()
    }
}

impl Token for u32 {
    const WIDTH: u16 = 32;
    const BYTES: usize = 4;

    fn from_le_bytes(bytes: &[u8]) -> Self {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn to_u64(self) -> u64 {
        self.into()
    }
}

/// A machine architecture the disassembler can target.
pub trait Architecture: Sized + 'static {
    /// Input unit of the token stream.
    type Token: Token;
    /// Per-run machine state carried through the semantic actions, e.g.
    /// decoded prefixes or the flash size used to wrap jump targets.
    type State: Clone + fmt::Debug;

    /// Architectural register names with their widths in bits.
    fn registers(state: &Self::State) -> Vec<(&'static str, u16)>;

    /// Allocate a fresh temporary variable.
    fn temporary(state: &Self::State) -> Variable;
}

/// Allocator for architecture-scoped temporary variables.
///
/// Clones share one counter, so every temporary handed out during a
/// disassembly run gets a distinct name regardless of which mnemonic it
/// belongs to.
#[derive(Debug, Clone, Default)]
pub struct TemporaryAllocator {
    next: Rc<Cell<u64>>,
}

impl TemporaryAllocator {
    /// A fresh allocator starting at `t0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused temporary of the given width.
    pub fn fresh(&self, width: u16) -> Variable {
        let n = self.next.get();

        self.next.set(n + 1);
        Variable::new(format!("t{n}"), width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_decode_little_endian() {
        assert_eq!(u8::from_le_bytes([0x7f]), 0x7f);
        assert_eq!(u16::from_le_bytes([0x01, 0x0f]), 0x0f01);
        assert_eq!(u32::from_le_bytes([1, 2, 3, 4]), 0x0403_0201);
    }

    #[test]
    fn temporaries_are_unique_across_clones() {
        let alloc = TemporaryAllocator::new();
        let other = alloc.clone();

        assert_eq!(alloc.fresh(16).name, "t0");
        assert_eq!(other.fresh(8).name, "t1");
        assert_eq!(alloc.fresh(16).name, "t2");
    }
}
