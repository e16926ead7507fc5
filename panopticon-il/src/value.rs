//! Operand model of the IL.

use core::fmt;

use crate::IlError;

/// Byte order of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endianness {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

/// A named register-like cell with a fixed width in bits.
///
/// Before SSA construction variables carry no subscript; the rename pass
/// assigns one per definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Variable {
    /// Name of the variable. Non-empty for well-formed IL.
    pub name: String,
    /// Width in bits, 1 to 64.
    pub width: u16,
    /// SSA version, `None` until the rename pass ran.
    pub subscript: Option<u32>,
}

impl Variable {
    /// An unversioned variable.
    pub fn new(name: impl Into<String>, width: u16) -> Self {
        Self {
            name: name.into(),
            width,
            subscript: None,
        }
    }

    /// A versioned variable.
    pub fn versioned(name: impl Into<String>, width: u16, subscript: u32) -> Self {
        Self {
            name: name.into(),
            width,
            subscript: Some(subscript),
        }
    }

    /// Same variable with subscript `s`.
    pub fn with_subscript(&self, s: u32) -> Self {
        Self {
            name: self.name.clone(),
            width: self.width,
            subscript: Some(s),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subscript {
            Some(s) => write!(f, "{}_{}", self.name, s),
            None => f.write_str(&self.name),
        }
    }
}

/// A reference into a named memory space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Memory {
    /// Position of the first byte, itself a value.
    pub offset: Box<Rvalue>,
    /// Number of bytes read or written. At least 1 for well-formed IL.
    pub bytes: u16,
    /// Byte order of the access.
    pub endianness: Endianness,
    /// Name of the memory space ("ram", "flash", ...). Non-empty for
    /// well-formed IL.
    pub name: String,
}

impl Memory {
    /// Reference `bytes` bytes at `offset` inside the space called `name`.
    pub fn new(
        offset: impl Into<Rvalue>,
        bytes: u16,
        endianness: Endianness,
        name: impl Into<String>,
    ) -> Self {
        Self {
            offset: Box::new(offset.into()),
            bytes,
            endianness,
            name: name.into(),
        }
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{};{}]", self.name, self.offset, self.bytes)
    }
}

/// Any value the IL can read.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Rvalue {
    /// The distinguished unknown value.
    Undefined,
    /// A 64 bit unsigned integer.
    Constant(u64),
    /// A register-like cell.
    Variable(Variable),
    /// A memory reference.
    Memory(Memory),
}

impl Rvalue {
    /// True for [`Rvalue::Constant`].
    pub const fn is_constant(&self) -> bool {
        matches!(self, Rvalue::Constant(_))
    }

    /// True for [`Rvalue::Undefined`].
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Rvalue::Undefined)
    }

    /// True for [`Rvalue::Variable`].
    pub const fn is_variable(&self) -> bool {
        matches!(self, Rvalue::Variable(_))
    }

    /// True for [`Rvalue::Memory`].
    pub const fn is_memory(&self) -> bool {
        matches!(self, Rvalue::Memory(_))
    }

    /// Contents if this is a constant.
    pub const fn as_constant(&self) -> Option<u64> {
        match self {
            Rvalue::Constant(c) => Some(*c),
            _ => None,
        }
    }

    /// Variable if this is one.
    pub const fn as_variable(&self) -> Option<&Variable> {
        match self {
            Rvalue::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Memory reference if this is one.
    pub const fn as_memory(&self) -> Option<&Memory> {
        match self {
            Rvalue::Memory(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for Rvalue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rvalue::Undefined => f.write_str("?"),
            Rvalue::Constant(c) => write!(f, "{c}"),
            Rvalue::Variable(v) => v.fmt(f),
            Rvalue::Memory(m) => m.fmt(f),
        }
    }
}

impl From<u64> for Rvalue {
    fn from(c: u64) -> Self {
        Rvalue::Constant(c)
    }
}

impl From<Variable> for Rvalue {
    fn from(v: Variable) -> Self {
        Rvalue::Variable(v)
    }
}

impl From<Memory> for Rvalue {
    fn from(m: Memory) -> Self {
        Rvalue::Memory(m)
    }
}

impl From<Lvalue> for Rvalue {
    fn from(lv: Lvalue) -> Self {
        match lv {
            Lvalue::Undefined => Rvalue::Undefined,
            Lvalue::Variable(v) => Rvalue::Variable(v),
            Lvalue::Memory(m) => Rvalue::Memory(m),
        }
    }
}

/// Any value the IL can assign to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Lvalue {
    /// Assignment sink; the result is discarded.
    Undefined,
    /// A register-like cell.
    Variable(Variable),
    /// A memory reference.
    Memory(Memory),
}

impl Lvalue {
    /// Variable if this is one.
    pub const fn as_variable(&self) -> Option<&Variable> {
        match self {
            Lvalue::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable variable if this is one.
    pub fn as_variable_mut(&mut self) -> Option<&mut Variable> {
        match self {
            Lvalue::Variable(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Lvalue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Rvalue::from(self.clone()).fmt(f)
    }
}

impl From<Variable> for Lvalue {
    fn from(v: Variable) -> Self {
        Lvalue::Variable(v)
    }
}

impl From<Memory> for Lvalue {
    fn from(m: Memory) -> Self {
        Lvalue::Memory(m)
    }
}

impl TryFrom<Rvalue> for Lvalue {
    type Error = IlError;

    fn try_from(rv: Rvalue) -> Result<Self, IlError> {
        match rv {
            Rvalue::Undefined => Ok(Lvalue::Undefined),
            Rvalue::Variable(v) => Ok(Lvalue::Variable(v)),
            Rvalue::Memory(m) => Ok(Lvalue::Memory(m)),
            Rvalue::Constant(_) => Err(IlError::WrongVariant("lvalue")),
        }
    }
}
