//! Decoded machine instructions.

use core::fmt;

use panopticon_types::Bound;

use crate::{IlError, Rvalue, Statement};

/// Opcode of the synthetic mnemonic holding a block's φ-functions.
pub const PHI_MNEMONIC: &str = "internal-phis";

/// One token of a parsed format string.
///
/// The mini-language is `('{' Width (':' '-'? (':' Alias)?)? '}' | text)*`:
/// a field prints the next operand, masked to `width` bits and
/// sign-extended when the `-` modifier is present, unless it carries an
/// alias, in which case the alias is printed instead. Any other character
/// after the first `:` starts an alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FormatToken {
    /// Literal text.
    Literal(String),
    /// Operand reference.
    Field {
        /// Width of the printed value in bits.
        width: u16,
        /// Print constants as signed numbers.
        has_sign: bool,
        /// Replacement text; empty to print the operand itself.
        alias: String,
    },
}

fn parse_format(fmt: &str) -> Result<Vec<FormatToken>, IlError> {
    let mut tokens = Vec::new();
    let mut chars = fmt.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '{' {
            match tokens.last_mut() {
                Some(FormatToken::Literal(text)) => text.push(ch),
                _ => tokens.push(FormatToken::Literal(ch.to_string())),
            }
            continue;
        }

        let mut width: u16 = 0;
        let mut saw_digit = false;

        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            chars.next();
            saw_digit = true;
            width = width
                .checked_mul(10)
                .and_then(|w| w.checked_add(d as u16))
                .ok_or(IlError::BadFormat(fmt.to_string(), "field width overflows"))?;
        }

        if !saw_digit {
            return Err(IlError::BadFormat(fmt.to_string(), "field width missing"));
        }

        let mut has_sign = false;
        let mut alias = String::new();

        if chars.peek() == Some(&':') {
            chars.next();

            if chars.peek() == Some(&'-') {
                chars.next();
                has_sign = true;
            }

            if chars.peek() == Some(&':') {
                chars.next();
            }

            // everything up to the closing brace is the alias; an unknown
            // modifier character simply starts it
            while let Some(&c) = chars.peek() {
                if c == '}' {
                    break;
                }
                chars.next();
                alias.push(c);
            }
        }

        if chars.next() != Some('}') {
            return Err(IlError::BadFormat(fmt.to_string(), "unterminated field"));
        }

        tokens.push(FormatToken::Field {
            width,
            has_sign,
            alias,
        });
    }

    Ok(tokens)
}

/// Mask `value` to `width` bits, reading it as a signed number if requested.
fn format_constant(width: u16, has_sign: bool, value: u64) -> i64 {
    let width = width.min(64) as u32;

    if width == 0 {
        return 0;
    }

    let mask = u64::MAX >> (64 - width);
    let truncated = value & mask;

    if has_sign && width < 64 && truncated & (1 << (width - 1)) != 0 {
        (truncated | !mask) as i64
    } else {
        truncated as i64
    }
}

/// One decoded machine instruction and the IL modelling its semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mnemonic {
    /// Occupied address range, half-open.
    pub area: Bound,
    /// Opcode text ("add", "rjmp", ...).
    pub opcode: String,
    /// Operands in syntax order.
    pub operands: Vec<Rvalue>,
    /// IL statements executed by this instruction, in order.
    pub instructions: Vec<Statement>,
    /// Parsed format string, used when printing operands.
    pub format: Vec<FormatToken>,
    format_string: String,
}

impl Mnemonic {
    /// Build a mnemonic and parse its format string.
    ///
    /// Empty areas are reserved for synthetic mnemonics whose opcode starts
    /// with `internal-`.
    pub fn new(
        area: Bound,
        opcode: impl Into<String>,
        format: impl Into<String>,
        operands: Vec<Rvalue>,
        instructions: Vec<Statement>,
    ) -> Result<Self, IlError> {
        let opcode = opcode.into();
        let format_string = format.into();
        let tokens = parse_format(&format_string)?;

        if area.is_empty() && !opcode.starts_with("internal-") {
            return Err(IlError::IllFormedIl(format!(
                "mnemonic {opcode:?} covers no bytes"
            )));
        }

        let mut idx = 0;
        for token in &tokens {
            if let FormatToken::Field { alias, .. } = token {
                if alias.is_empty() && idx >= operands.len() {
                    return Err(IlError::MissingOperand(format_string, idx, operands.len()));
                }
                idx += 1;
            }
        }

        Ok(Self {
            area,
            opcode,
            operands,
            instructions,
            format: tokens,
            format_string,
        })
    }

    /// The synthetic mnemonic holding φ-functions, anchored at `at`.
    pub fn internal_phis(at: u64, instructions: Vec<Statement>) -> Self {
        Self {
            area: Bound::new(at, at),
            opcode: PHI_MNEMONIC.to_string(),
            operands: Vec::new(),
            instructions,
            format: Vec::new(),
            format_string: String::new(),
        }
    }

    /// True for synthetic mnemonics that occupy no bytes.
    pub fn is_synthetic(&self) -> bool {
        self.opcode.starts_with("internal-")
    }

    /// Original format string.
    pub fn format_string(&self) -> &str {
        &self.format_string
    }

    /// Render the operand list according to the format string.
    pub fn format_operands(&self) -> String {
        let mut out = String::new();
        let mut idx = 0;

        for token in &self.format {
            match token {
                FormatToken::Literal(text) => out.push_str(text),
                FormatToken::Field {
                    width,
                    has_sign,
                    alias,
                } => {
                    if alias.is_empty() {
                        match &self.operands[idx] {
                            Rvalue::Constant(c) => {
                                out.push_str(&format_constant(*width, *has_sign, *c).to_string())
                            }
                            other => out.push_str(&other.to_string()),
                        }
                    } else {
                        out.push_str(alias);
                    }
                    idx += 1;
                }
            }
        }

        out
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.opcode)?;

        if !self.operands.is_empty() {
            write!(f, " {}", self.format_operands())?;
        }

        Ok(())
    }
}
