//! Rule trees and the matching engine.

use std::collections::BTreeMap;
use std::rc::Rc;

use panopticon_il::{Guard, Mnemonic, Rvalue};
use panopticon_region::Slab;
use panopticon_types::{Bound, Offset};

use crate::{Architecture, CodeGenerator, DisassemblyError, Token, TokenPattern};

/// Semantic state threaded through a rule chain.
///
/// Inputs for the semantic action are the start address, the consumed
/// tokens and the capture groups; the action's outputs are mnemonics and
/// `(target, guard)` jumps. Failed rule alternatives run against a clone,
/// so their partial matches never leak into the final state.
pub struct SemState<A: Architecture> {
    /// Address of the first consumed token.
    pub address: Offset,
    /// Architecture state, mutable by semantic actions (prefix decoding).
    pub state: A::State,
    /// Tokens consumed so far.
    pub tokens: Vec<A::Token>,
    /// Accumulated capture groups.
    pub groups: BTreeMap<String, u64>,
    /// Mnemonics produced by the semantic actions, in order.
    pub mnemonics: Vec<Mnemonic>,
    /// Possible successor addresses with their guards.
    pub jumps: Vec<(Rvalue, Guard)>,
    next_address: Offset,
}

impl<A: Architecture> Clone for SemState<A> {
    fn clone(&self) -> Self {
        Self {
            address: self.address,
            state: self.state.clone(),
            tokens: self.tokens.clone(),
            groups: self.groups.clone(),
            mnemonics: self.mnemonics.clone(),
            jumps: self.jumps.clone(),
            next_address: self.next_address,
        }
    }
}

impl<A: Architecture> SemState<A> {
    /// State for a token sequence starting at `address`.
    pub fn new(address: Offset, state: A::State) -> Self {
        Self {
            address,
            state,
            tokens: Vec::new(),
            groups: BTreeMap::new(),
            mnemonics: Vec::new(),
            jumps: Vec::new(),
            next_address: address,
        }
    }

    /// Value of capture group `name`; absent groups read as zero.
    pub fn group(&self, name: &str) -> u64 {
        self.groups.get(name).copied().unwrap_or(0)
    }

    /// True if the pattern defined capture group `name`.
    pub fn has_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// Append a `len` byte long mnemonic.
    ///
    /// `semantics` receives a code generator that emits the mnemonic's IL.
    /// An empty format string is filled with one `{8}` field per operand.
    pub fn mnemonic(
        &mut self,
        len: u64,
        opcode: &str,
        format: &str,
        operands: Vec<Rvalue>,
        semantics: impl FnOnce(&mut CodeGenerator<'_, A>) -> Result<(), DisassemblyError>,
    ) -> Result<(), DisassemblyError> {
        let format = if format.is_empty() && !operands.is_empty() {
            operands
                .iter()
                .map(|_| "{8}")
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            format.to_string()
        };

        let mut statements = Vec::new();
        {
            let mut cg = CodeGenerator::new(&mut statements, &self.state);
            semantics(&mut cg)?;
        }

        let area = Bound::new(self.next_address, self.next_address + len);
        self.mnemonics
            .push(Mnemonic::new(area, opcode, format, operands, statements)?);
        self.next_address += len;

        Ok(())
    }

    /// Unconditional jump to `target`.
    pub fn jump(&mut self, target: impl Into<Rvalue>) {
        self.jumps.push((target.into(), Guard::always()));
    }

    /// Jump to `target` taken when `guard` holds.
    pub fn jump_if(&mut self, guard: Guard, target: impl Into<Rvalue>) {
        self.jumps.push((target.into(), guard));
    }
}

/// Bounded window of tokens decoded on demand from a slab.
pub struct TokenView<'a, A: Architecture> {
    slab: &'a Slab,
    base: Offset,
    end: Offset,
    _arch: std::marker::PhantomData<A>,
}

impl<'a, A: Architecture> TokenView<'a, A> {
    /// View of the bytes `[base, end)` of `slab`, clamped to the slab.
    pub fn new(slab: &'a Slab, base: Offset, end: Offset) -> Self {
        Self {
            slab,
            base,
            end: end.min(slab.size()),
            _arch: std::marker::PhantomData,
        }
    }

    /// Token number `idx` of the window.
    ///
    /// `None` past the window or when any of the token's bytes is
    /// undefined.
    pub fn token(&self, idx: usize) -> Option<A::Token> {
        let sz = A::Token::BYTES as u64;
        let start = self.base + idx as u64 * sz;

        if start + sz > self.end {
            return None;
        }

        let mut bytes = [0u8; 8];

        for (i, byte) in bytes.iter_mut().take(A::Token::BYTES).enumerate() {
            *byte = self.slab.get(start + i as u64)??;
        }

        Some(A::Token::from_le_bytes(&bytes[..A::Token::BYTES]))
    }
}

type Action<A> = Rc<dyn Fn(&mut SemState<A>) -> Result<(), DisassemblyError>>;

enum Rule<A: Architecture> {
    Pattern(TokenPattern),
    Sub(Rc<Disassembler<A>>),
    Seq(Box<Rule<A>>, Box<Rule<A>>),
}

fn match_rule<A: Architecture>(
    rule: &Rule<A>,
    view: &TokenView<'_, A>,
    pos: usize,
    state: &mut SemState<A>,
) -> Result<Option<usize>, DisassemblyError> {
    match rule {
        Rule::Pattern(pat) => match view.token(pos) {
            Some(token) if pat.matches(token.to_u64()) => {
                pat.apply_captures(token.to_u64(), &mut state.groups);
                state.tokens.push(token);
                Ok(Some(pos + 1))
            }
            _ => Ok(None),
        },
        Rule::Sub(sub) => sub.match_at(view, pos, state),
        Rule::Seq(first, second) => match match_rule(first, view, pos, state)? {
            Some(next) => match_rule(second, view, next, state),
            None => Ok(None),
        },
    }
}

/// A set of decoding rules for one architecture.
///
/// Rules are built with [`Disassembler::token`], [`Disassembler::pattern`]
/// and [`Disassembler::sub`], which chain sequentially until
/// [`Disassembler::bind`] attaches the semantic action and registers the
/// alternative. Alternatives are tried in registration order; the first
/// whose whole chain matches wins and runs its action. [`Disassembler::bind`]
/// without a preceding chain installs the failsafe, which consumes a single
/// token when nothing else matched.
pub struct Disassembler<A: Architecture> {
    alternatives: Vec<(Rule<A>, Action<A>)>,
    failsafe: Option<Action<A>>,
    current: Option<Rule<A>>,
}

impl<A: Architecture> Default for Disassembler<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Architecture> Disassembler<A> {
    /// Empty rule set matching nothing.
    pub fn new() -> Self {
        Self {
            alternatives: Vec::new(),
            failsafe: None,
            current: None,
        }
    }

    fn append(&mut self, rule: Rule<A>) {
        self.current = Some(match self.current.take() {
            None => rule,
            Some(prev) => Rule::Seq(Box::new(prev), Box::new(rule)),
        });
    }

    /// Append an exact-match token to the current chain.
    pub fn token(&mut self, value: A::Token) -> &mut Self {
        self.append(Rule::Pattern(TokenPattern::exact(
            value.to_u64(),
            A::Token::WIDTH,
        )));
        self
    }

    /// Append a parsed token pattern to the current chain.
    pub fn pattern(&mut self, text: &str) -> Result<&mut Self, DisassemblyError> {
        let pat = TokenPattern::parse(text, A::Token::WIDTH)?;

        self.append(Rule::Pattern(pat));
        Ok(self)
    }

    /// Append a sub-matcher to the current chain. Its semantic actions run
    /// before the one bound to this chain.
    pub fn sub(&mut self, sub: &Rc<Disassembler<A>>) -> &mut Self {
        self.append(Rule::Sub(Rc::clone(sub)));
        self
    }

    /// Attach `action` to the current chain and register it as the next
    /// alternative. Without a current chain this installs the failsafe.
    pub fn bind(
        &mut self,
        action: impl Fn(&mut SemState<A>) -> Result<(), DisassemblyError> + 'static,
    ) -> &mut Self {
        match self.current.take() {
            Some(rule) => self.alternatives.push((rule, Rc::new(action))),
            None => self.failsafe = Some(Rc::new(action)),
        }
        self
    }

    fn match_at(
        &self,
        view: &TokenView<'_, A>,
        pos: usize,
        state: &mut SemState<A>,
    ) -> Result<Option<usize>, DisassemblyError> {
        for (rule, action) in &self.alternatives {
            let mut probe = state.clone();

            if let Some(next) = match_rule(rule, view, pos, &mut probe)? {
                action(&mut probe)?;
                *state = probe;
                return Ok(Some(next));
            }
        }

        if let Some(failsafe) = &self.failsafe {
            if let Some(token) = view.token(pos) {
                let mut probe = state.clone();

                probe.tokens.push(token);
                failsafe(&mut probe)?;
                *state = probe;
                return Ok(Some(pos + 1));
            }
        }

        Ok(None)
    }

    /// Match the start of `view`, returning the number of consumed tokens
    /// and the resulting state.
    pub fn try_match(
        &self,
        view: &TokenView<'_, A>,
        state: SemState<A>,
    ) -> Result<Option<(usize, SemState<A>)>, DisassemblyError> {
        let mut state = state;
        let address = state.address;

        Ok(self.match_at(view, 0, &mut state)?.map(|consumed| {
            tracing::trace!(
                address,
                consumed,
                mnemonics = state.mnemonics.len(),
                "rule matched"
            );
            (consumed, state)
        }))
    }
}
