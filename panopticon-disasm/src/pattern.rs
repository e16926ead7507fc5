//! Token bit patterns.

use std::collections::BTreeMap;

use crate::DisassemblyError;

/// Mask/pattern pair matched against one token, plus named capture groups.
///
/// Built from strings like `"0000 11 r@. d@..... r@...."`: `0` and `1` are
/// exact bits, `.` matches any bit, `name@....` captures the bits under the
/// dots into the group `name`, and spaces are ignored. A group occurring
/// more than once accumulates its bits in string-reading order. Patterns
/// shorter than the token are zero-extended on the high side; wider ones
/// are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPattern {
    mask: u64,
    pattern: u64,
    captures: BTreeMap<String, u64>,
}

#[derive(Clone, Copy, PartialEq)]
enum Bit {
    Zero,
    One,
    Any,
    Capture,
}

impl TokenPattern {
    /// Pattern matching exactly the token value `value`.
    pub fn exact(value: u64, token_width: u16) -> Self {
        Self {
            mask: ones(token_width),
            pattern: value & ones(token_width),
            captures: BTreeMap::new(),
        }
    }

    /// Parse a pattern string for tokens of `token_width` bits.
    pub fn parse(text: &str, token_width: u16) -> Result<Self, DisassemblyError> {
        let bad = |why| DisassemblyError::InvalidPattern(text.to_string(), why);
        let mut bits: Vec<(Bit, Option<String>)> = Vec::new();
        let mut captures: BTreeMap<String, u64> = BTreeMap::new();
        let mut chars = text.chars().peekable();

        while let Some(&ch) = chars.peek() {
            match ch {
                '0' => {
                    chars.next();
                    bits.push((Bit::Zero, None));
                }
                '1' => {
                    chars.next();
                    bits.push((Bit::One, None));
                }
                '.' => {
                    chars.next();
                    bits.push((Bit::Any, None));
                }
                ' ' => {
                    chars.next();
                }
                c if c.is_ascii_alphabetic() => {
                    let mut name = String::new();

                    while let Some(&c) = chars.peek() {
                        if c.is_ascii_alphabetic() {
                            chars.next();
                            name.push(c);
                        } else {
                            break;
                        }
                    }

                    if chars.next() != Some('@') {
                        return Err(bad("capture group name without '@'"));
                    }

                    // empty groups are allowed and read as zero
                    captures.entry(name.clone()).or_insert(0);

                    while chars.peek() == Some(&'.') {
                        chars.next();
                        bits.push((Bit::Capture, Some(name.clone())));
                    }
                }
                _ => return Err(bad("invalid character")),
            }
        }

        if bits.len() > usize::from(token_width) {
            return Err(bad("pattern wider than the token"));
        }

        // the pattern sits in the low bits; unmentioned high bits must be 0
        let mut mask = ones(token_width);
        let mut pattern = 0;
        let len = bits.len();

        for (idx, (bit, group)) in bits.into_iter().enumerate() {
            let pos = (len - 1 - idx) as u64;

            match bit {
                Bit::Zero => {}
                Bit::One => pattern |= 1 << pos,
                Bit::Any | Bit::Capture => mask &= !(1 << pos),
            }

            if let Some(name) = group {
                *captures.get_mut(&name).expect("registered above") |= 1 << pos;
            }
        }

        Ok(Self {
            mask,
            pattern,
            captures,
        })
    }

    /// True if the token value matches mask and pattern.
    pub fn matches(&self, token: u64) -> bool {
        token & self.mask == self.pattern
    }

    /// Fold the captured bits of `token` into `groups`.
    ///
    /// Bits are appended in string-reading order, so groups repeated across
    /// consecutive tokens concatenate instead of overwrite.
    pub fn apply_captures(&self, token: u64, groups: &mut BTreeMap<String, u64>) {
        for (name, capture_mask) in &self.captures {
            let mut value = groups.get(name).copied().unwrap_or(0);

            for bit in (0..64).rev() {
                if capture_mask >> bit & 1 == 1 {
                    value = (value << 1) | (token >> bit & 1);
                }
            }

            groups.insert(name.clone(), value);
        }
    }
}

fn ones(width: u16) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1 << width) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups_of(pat: &TokenPattern, token: u64) -> BTreeMap<String, u64> {
        let mut groups = BTreeMap::new();
        pat.apply_captures(token, &mut groups);
        groups
    }

    #[test]
    fn exact_bits() {
        let p = TokenPattern::parse("01101100", 8).unwrap();

        assert!(p.matches(108));
        assert!(!p.matches(109));
    }

    #[test]
    fn wildcards_match_any_bit() {
        let p = TokenPattern::parse("00..", 8).unwrap();

        // zero-extended on the high side
        assert!(p.matches(0));
        assert!(p.matches(3));
        assert!(!p.matches(4));
        assert!(!p.matches(0x13));
    }

    #[test]
    fn capture_groups_extract_in_reading_order() {
        let p = TokenPattern::parse("01 a@.. 1 b@ c@...", 8).unwrap();

        assert!(p.matches(0x7f));

        let groups = groups_of(&p, 0x7f);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups["a"], 3);
        assert_eq!(groups["b"], 0);
        assert_eq!(groups["c"], 7);
    }

    #[test]
    fn repeated_groups_concatenate() {
        // "a@..0a@.." over 01011: a = 0111
        let p = TokenPattern::parse("a@..0a@..", 16).unwrap();

        assert!(p.matches(0b01011));
        assert_eq!(groups_of(&p, 0b01011)["a"], 0b0111);

        let mut groups = BTreeMap::from([("a".to_string(), 0b01_u64)]);
        p.apply_captures(0b01011, &mut groups);
        assert_eq!(groups["a"], 0b010111);
    }

    #[test]
    fn spaces_are_ignored() {
        let a = TokenPattern::parse("0 0 0", 8).unwrap();
        let b = TokenPattern::parse("000", 8).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn too_wide_patterns_fail() {
        assert!(matches!(
            TokenPattern::parse("111111111", 8),
            Err(DisassemblyError::InvalidPattern(..))
        ));
        assert!(matches!(
            TokenPattern::parse("k@.........", 8),
            Err(DisassemblyError::InvalidPattern(..))
        ));
    }

    #[test]
    fn malformed_patterns_fail() {
        assert!(matches!(
            TokenPattern::parse("a111111", 8),
            Err(DisassemblyError::InvalidPattern(..))
        ));
        assert!(matches!(
            TokenPattern::parse("01!", 8),
            Err(DisassemblyError::InvalidPattern(..))
        ));
    }

    #[test]
    fn short_patterns_require_zero_high_bits() {
        let p = TokenPattern::parse("1111111", 8).unwrap();

        assert!(p.matches(0x7f));
        assert!(!p.matches(0xff));
    }
}
