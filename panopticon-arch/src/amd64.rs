//! x86/AMD64 frontend.
//!
//! Single-byte tokens behind a chain of prefix sub-matchers: the legacy
//! operand-size prefix and both REX forms mutate the architecture state
//! carried in the semantic state, ModR/M and SIB bytes are dispatched
//! through dedicated sub-disassemblers (`rm`, `rm0`..`rm7` per register
//! class, `sib`), and immediates accumulate into the `a`/`b`/`c` capture
//! groups.

use std::rc::Rc;

use panopticon_analysis::{program, AnalysisError, Program};
use panopticon_disasm::{
    Architecture, CodeGenerator, Disassembler, DisassemblyError, SemState, Temp,
    TemporaryAllocator,
};
use panopticon_il::{Endianness, Guard, Memory, RelCode, Rvalue, Variable};
use panopticon_region::Slab;
use panopticon_types::Ref;
use tracing::trace;

/// The x86/AMD64 architecture tag.
pub struct Amd64;

/// Processor operating mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// 16 bit real mode.
    Real,
    /// 32 bit protected mode.
    Protected,
    /// 64 bit long mode.
    Long,
}

/// Decoded REX prefix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rex {
    /// 64 bit operand size.
    pub w: bool,
    /// High bit of the ModR/M reg field.
    pub r: bool,
    /// High bit of the SIB index field.
    pub x: bool,
    /// High bit of the ModR/M rm field.
    pub b: bool,
}

/// Prefix and mode state carried through a match.
#[derive(Clone, Debug)]
pub struct Amd64State {
    /// Operating mode; fixes the default operand size.
    pub mode: Mode,
    /// Effective operand size in bits, updated by prefixes.
    pub operand_size: u16,
    /// Effective address size in bits.
    pub address_size: u16,
    /// REX prefix of the current instruction, if any.
    pub rex: Option<Rex>,
    temps: TemporaryAllocator,
}

impl Amd64State {
    /// State for the given mode with its default sizes.
    pub fn new(mode: Mode) -> Self {
        let (operand_size, address_size) = match mode {
            Mode::Real => (16, 16),
            Mode::Protected => (32, 32),
            Mode::Long => (32, 64),
        };

        Self {
            mode,
            operand_size,
            address_size,
            rex: None,
            temps: TemporaryAllocator::new(),
        }
    }

    /// 32 bit protected mode.
    pub fn protected() -> Self {
        Self::new(Mode::Protected)
    }

    /// 64 bit long mode.
    pub fn long() -> Self {
        Self::new(Mode::Long)
    }
}

impl Architecture for Amd64 {
    type Token = u8;
    type State = Amd64State;

    fn registers(_: &Amd64State) -> Vec<(&'static str, u16)> {
        vec![
            ("al", 8),
            ("ah", 8),
            ("ax", 16),
            ("eax", 32),
            ("rax", 64),
            ("bl", 8),
            ("bh", 8),
            ("bx", 16),
            ("ebx", 32),
            ("rbx", 64),
            ("cl", 8),
            ("ch", 8),
            ("cx", 16),
            ("ecx", 32),
            ("rcx", 64),
            ("dl", 8),
            ("dh", 8),
            ("dx", 16),
            ("edx", 32),
            ("rdx", 64),
            ("sp", 16),
            ("esp", 32),
            ("rsp", 64),
            ("bp", 16),
            ("ebp", 32),
            ("rbp", 64),
            ("si", 16),
            ("esi", 32),
            ("rsi", 64),
            ("di", 16),
            ("edi", 32),
            ("rdi", 64),
            ("ZF", 1),
            ("CF", 1),
            ("SF", 1),
            ("OF", 1),
        ]
    }

    fn temporary(state: &Amd64State) -> Variable {
        state.temps.fresh(64)
    }
}

type Sm = SemState<Amd64>;
type Cg<'a> = CodeGenerator<'a, Amd64>;
type SemResult = Result<(), DisassemblyError>;
type Dis = Disassembler<Amd64>;

const GPR8: [&str; 8] = ["al", "cl", "dl", "bl", "ah", "ch", "dh", "bh"];
const GPR16: [&str; 8] = ["ax", "cx", "dx", "bx", "sp", "bp", "si", "di"];
const GPR32: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];
const GPR64: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

/// General-purpose register `index` at the given width.
pub fn decode_gpr(index: u64, width: u16, rex_extension: bool) -> Variable {
    let index = index as usize + if rex_extension { 8 } else { 0 };

    match width {
        8 => Variable::new(GPR8[index % 8], 8),
        16 => Variable::new(GPR16[index % 8], 16),
        32 => Variable::new(GPR32[index % 8], 32),
        _ => Variable::new(GPR64[index % 16], 64),
    }
}

fn flag(name: &str) -> Variable {
    Variable::new(name, 1)
}

fn accumulator(width: u16) -> Variable {
    decode_gpr(0, width, false)
}

fn skip(st: &mut Sm) {
    let next = st.address + st.tokens.len() as u64;

    st.jump(next);
}

/// Little-endian value of an immediate capture group.
///
/// Captures concatenate the bytes in stream order, so the first byte ends
/// up in the topmost bits; this puts them back in memory order.
fn immediate(st: &Sm, group: &str, bytes: u32) -> u64 {
    let raw = st.group(group);
    let mut value = 0;

    for i in 0..bytes {
        let byte = (raw >> (8 * (bytes - 1 - i))) & 0xff;

        value |= byte << (8 * i);
    }

    value
}

fn sign_extend(value: u64, bits: u32) -> u64 {
    if bits >= 64 {
        return value;
    }

    let mask = (1u64 << bits) - 1;
    let value = value & mask;

    if value & (1 << (bits - 1)) != 0 {
        value | !mask
    } else {
        value
    }
}

/// The ModR/M and SIB sub-matchers of one register class.
struct ModRm {
    /// Any reg field.
    any: Rc<Dis>,
    /// Fixed reg field 0 to 7, used by the immediate groups.
    by_reg: Vec<Rc<Dis>>,
}

fn sib_matcher() -> Result<Rc<Dis>, DisassemblyError> {
    let mut sib = Dis::new();

    sib.pattern("scale@.. index@... base@...")?.bind(|_| Ok(()));
    Ok(Rc::new(sib))
}

fn displacement8() -> Result<Rc<Dis>, DisassemblyError> {
    let mut d = Dis::new();

    d.pattern("disp@........")?.bind(|_| Ok(()));
    Ok(Rc::new(d))
}

fn displacement32(disp8: &Rc<Dis>) -> Result<Rc<Dis>, DisassemblyError> {
    let mut d = Dis::new();

    d.sub(disp8)
        .pattern("disp@........")?
        .pattern("disp@........")?
        .pattern("disp@........")?
        .bind(|_| Ok(()));
    Ok(Rc::new(d))
}

/// Build the ModR/M dispatcher for one value of the reg field (or any).
fn modrm_matcher(
    fixed_reg: Option<u8>,
    sib: &Rc<Dis>,
    disp8: &Rc<Dis>,
    disp32: &Rc<Dis>,
) -> Result<Rc<Dis>, DisassemblyError> {
    let reg = match fixed_reg {
        Some(r) => format!("{r:03b}"),
        None => "reg@...".to_string(),
    };
    let mut d = Dis::new();
    let fields = |md: u64, rm: Option<u64>| {
        move |st: &mut Sm| {
            st.groups.insert("mod".to_string(), md);
            if let Some(rm) = rm {
                st.groups.insert("rm".to_string(), rm);
            }
            Ok(())
        }
    };

    // register operand
    d.pattern(&format!("11 {reg} rm@..."))?.bind(fields(3, None));
    // indirect with SIB byte
    d.pattern(&format!("00 {reg} 100"))?.sub(sib).bind(fields(0, Some(4)));
    // absolute or rip-relative
    d.pattern(&format!("00 {reg} 101"))?.sub(disp32).bind(fields(0, Some(5)));
    // plain indirect
    d.pattern(&format!("00 {reg} rm@..."))?.bind(fields(0, None));
    // indirect with displacement
    d.pattern(&format!("01 {reg} 100"))?.sub(sib).sub(disp8).bind(fields(1, Some(4)));
    d.pattern(&format!("01 {reg} rm@..."))?.sub(disp8).bind(fields(1, None));
    d.pattern(&format!("10 {reg} 100"))?.sub(sib).sub(disp32).bind(fields(2, Some(4)));
    d.pattern(&format!("10 {reg} rm@..."))?.sub(disp32).bind(fields(2, None));

    Ok(Rc::new(d))
}

fn modrm_class(
    sib: &Rc<Dis>,
    disp8: &Rc<Dis>,
    disp32: &Rc<Dis>,
) -> Result<ModRm, DisassemblyError> {
    let any = modrm_matcher(None, sib, disp8, disp32)?;
    let by_reg = (0..8)
        .map(|r| modrm_matcher(Some(r), sib, disp8, disp32))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ModRm { any, by_reg })
}

/// Mod field of the last ModR/M byte.
fn modrm_mod(st: &Sm) -> u64 {
    st.group("mod")
}

/// The r/m operand described by the current capture groups.
///
/// Register operands resolve directly; memory operands read through
/// `pointer`, whose effective-address computation the caller emits inside
/// the mnemonic semantics.
fn rm_operand(st: &Sm, width: u16, pointer: &Variable) -> Rvalue {
    if modrm_mod(st) == 3 {
        let rex_b = st.state.rex.map(|r| r.b).unwrap_or(false);

        decode_gpr(st.group("rm"), width, rex_b).into()
    } else {
        Memory::new(
            Rvalue::from(pointer.clone()),
            (width / 8).max(1),
            Endianness::Little,
            "ram",
        )
        .into()
    }
}

/// `dst ← dst + src (+ carry)`, with the usual flag results.
fn add_semantics(c: &mut Cg<'_>, dst: Rvalue, src: Rvalue, width: u16, with_carry: bool) -> SemResult {
    let sum = c.add_i(Temp, dst.clone(), src)?;
    let full = if with_carry {
        let carry = c.lift_b(Temp, flag("CF"))?;

        c.add_i(Temp, sum, carry)?
    } else {
        sum
    };

    let limit = match width {
        8 => 0xffu64,
        16 => 0xffff,
        32 => 0xffff_ffff,
        _ => u64::MAX,
    };

    if width < 64 {
        let wrapped = c.mod_i(Temp, full.clone(), limit + 1)?;

        c.less_i(flag("CF"), limit, full)?;
        c.equal_i(flag("ZF"), wrapped.clone(), 0u64)?;
        c.less_i(flag("SF"), limit / 2, wrapped.clone())?;
        let dst_lv = panopticon_il::Lvalue::try_from(dst)?;

        c.emit(dst_lv, panopticon_il::Operation::UnivNop(wrapped))?;
    } else {
        c.equal_i(flag("ZF"), full.clone(), 0u64)?;
        let dst_lv = panopticon_il::Lvalue::try_from(dst)?;

        c.emit(dst_lv, panopticon_il::Operation::UnivNop(full))?;
    }

    Ok(())
}

fn sub_semantics(c: &mut Cg<'_>, dst: Rvalue, src: Rvalue, width: u16) -> SemResult {
    let limit = match width {
        8 => 0x100u64,
        16 => 0x1_0000,
        32 => 0x1_0000_0000,
        _ => 0,
    };

    c.less_i(flag("CF"), dst.clone(), src.clone())?;

    let diff = c.sub_i(Temp, dst.clone(), src)?;
    let wrapped = if limit > 0 {
        c.mod_i(Temp, diff, limit)?
    } else {
        diff
    };

    c.equal_i(flag("ZF"), wrapped.clone(), 0u64)?;

    let dst_lv = panopticon_il::Lvalue::try_from(dst)?;

    c.emit(dst_lv, panopticon_il::Operation::UnivNop(wrapped))?;
    Ok(())
}

/// `op acc, imm` encodings (0x04/0x05 style).
fn acc_imm(
    opcode: &'static str,
    width: u16,
    imm_bytes: u32,
    sem: fn(&mut Cg<'_>, Rvalue, Rvalue, u16) -> SemResult,
) -> impl Fn(&mut Sm) -> SemResult {
    move |st| {
        let imm = immediate(st, "a", imm_bytes);
        let acc = accumulator(width);
        let len = st.tokens.len() as u64;

        trace!(opcode, imm, "decoded accumulator form");

        st.mnemonic(
            len,
            opcode,
            "{8}, {32}",
            vec![acc.clone().into(), Rvalue::Constant(imm)],
            |c| sem(c, acc.clone().into(), Rvalue::Constant(imm), width),
        )?;
        skip(st);
        Ok(())
    }
}

/// `op r/m, imm` group encodings (0x80/0x81/0x83 style).
fn rm_imm(
    opcode: &'static str,
    width: u16,
    imm_bytes: u32,
    sign_extended: bool,
    sem: fn(&mut Cg<'_>, Rvalue, Rvalue, u16) -> SemResult,
) -> impl Fn(&mut Sm) -> SemResult {
    move |st| {
        let raw = immediate(st, "b", imm_bytes);
        let imm = if sign_extended {
            sign_extend(raw, imm_bytes * 8)
        } else {
            raw
        };
        let pointer = Amd64::temporary(&st.state);
        let operand = rm_operand(st, width, &pointer);
        let len = st.tokens.len() as u64;
        let state = snapshot_groups(st);

        st.mnemonic(
            len,
            opcode,
            "{32}, {32}",
            vec![operand.clone(), Rvalue::Constant(imm)],
            |c| {
                emit_address_from(&state, c, &pointer)?;
                sem(c, operand.clone(), Rvalue::Constant(imm), width)
            },
        )?;
        skip(st);
        Ok(())
    }
}

/// `op r/m, r` and `op r, r/m` encodings.
fn rm_reg(
    opcode: &'static str,
    width: u16,
    reg_is_destination: bool,
    sem: fn(&mut Cg<'_>, Rvalue, Rvalue, u16) -> SemResult,
) -> impl Fn(&mut Sm) -> SemResult {
    move |st| {
        let rex_r = st.state.rex.map(|r| r.r).unwrap_or(false);
        let reg = decode_gpr(st.group("reg"), width, rex_r);
        let pointer = Amd64::temporary(&st.state);
        let rm = rm_operand(st, width, &pointer);
        let (dst, src) = if reg_is_destination {
            (Rvalue::from(reg), rm)
        } else {
            (rm, Rvalue::from(reg))
        };
        let len = st.tokens.len() as u64;
        let state = snapshot_groups(st);

        st.mnemonic(
            len,
            opcode,
            "{32}, {32}",
            vec![dst.clone(), src.clone()],
            |c| {
                emit_address_from(&state, c, &pointer)?;
                sem(c, dst.clone(), src.clone(), width)
            },
        )?;
        skip(st);
        Ok(())
    }
}

/// Snapshot of the pieces `emit_address` needs.
struct GroupSnapshot {
    modrm_mod: u64,
    rm: u64,
    base: u64,
    index: u64,
    scale: u64,
    disp: u64,
    disp_bytes: u32,
    address_size: u16,
}

fn snapshot_groups(st: &Sm) -> GroupSnapshot {
    let disp_bytes = if st.group("mod") == 1 { 1 } else { 4 };

    GroupSnapshot {
        modrm_mod: st.group("mod"),
        rm: st.group("rm"),
        base: st.group("base"),
        index: st.group("index"),
        scale: st.group("scale"),
        disp: immediate(st, "disp", disp_bytes),
        disp_bytes,
        address_size: st.state.address_size,
    }
}

fn emit_address_from(snapshot: &GroupSnapshot, c: &mut Cg<'_>, pointer: &Variable) -> SemResult {
    if snapshot.modrm_mod == 3 {
        return Ok(());
    }

    let disp = sign_extend(snapshot.disp, snapshot.disp_bytes * 8);

    if snapshot.rm == 4 {
        let base = decode_gpr(snapshot.base, snapshot.address_size, false);
        let index = decode_gpr(snapshot.index, snapshot.address_size, false);
        let scale = 1u64 << snapshot.scale;
        let scaled = c.mul_i(Temp, index, scale)?;
        let sum = c.add_i(Temp, base, scaled)?;

        c.add_i(pointer.clone(), sum, disp)?;
    } else if snapshot.modrm_mod == 0 && snapshot.rm == 5 {
        c.assign(pointer.clone(), disp)?;
    } else {
        let base = decode_gpr(snapshot.rm, snapshot.address_size, false);

        c.add_i(pointer.clone(), base, disp)?;
    }

    Ok(())
}

/// Conditional jump on a computed condition.
fn jcc(
    opcode: &'static str,
    condition: fn(&mut Cg<'_>, &Variable) -> SemResult,
) -> impl Fn(&mut Sm) -> SemResult {
    move |st| {
        let disp = sign_extend(immediate(st, "a", 1), 8);
        let len = st.tokens.len() as u64;
        let fallthrough = st.address + len;
        let target = fallthrough.wrapping_add(disp);
        let cond = Variable::new("cond", 1);

        st.mnemonic(
            len,
            opcode,
            "{8:-}",
            vec![Rvalue::Constant(disp & 0xff)],
            |c| condition(c, &cond),
        )?;
        st.jump_if(
            Guard::from_relation(cond.clone(), RelCode::Eq, Rvalue::Constant(0)),
            fallthrough,
        );
        st.jump_if(
            Guard::from_relation(cond, RelCode::Eq, Rvalue::Constant(1)),
            target,
        );
        Ok(())
    }
}

/// The x86/AMD64 rule table for the given mode.
pub fn disassembler() -> Result<Dis, DisassemblyError> {
    let mut main = Dis::new();

    // prefixes
    let opsize_prefix = {
        let mut d = Dis::new();

        d.token(0x66).bind(|st: &mut Sm| {
            st.state.operand_size = 16;
            Ok(())
        });
        Rc::new(d)
    };
    let rex_prefix = {
        let mut d = Dis::new();

        d.pattern("01000 r@. x@. b@.")?.bind(|st: &mut Sm| {
            st.state.rex = Some(Rex {
                w: false,
                r: st.group("r") == 1,
                x: st.group("x") == 1,
                b: st.group("b") == 1,
            });
            Ok(())
        });
        Rc::new(d)
    };
    let rexw_prefix = {
        let mut d = Dis::new();

        d.pattern("01001 r@. x@. b@.")?.bind(|st: &mut Sm| {
            st.state.rex = Some(Rex {
                w: true,
                r: st.group("r") == 1,
                x: st.group("x") == 1,
                b: st.group("b") == 1,
            });
            st.state.operand_size = 64;
            Ok(())
        });
        Rc::new(d)
    };

    // immediates; groups concatenate across bytes
    let imm8_a = {
        let mut d = Dis::new();
        d.pattern("a@........")?.bind(|_| Ok(()));
        Rc::new(d)
    };
    let imm8_b = {
        let mut d = Dis::new();
        d.pattern("b@........")?.bind(|_| Ok(()));
        Rc::new(d)
    };
    let imm16_a = {
        let mut d = Dis::new();
        d.sub(&imm8_a).pattern("a@........")?.bind(|_| Ok(()));
        Rc::new(d)
    };
    let imm16_b = {
        let mut d = Dis::new();
        d.sub(&imm8_b).pattern("b@........")?.bind(|_| Ok(()));
        Rc::new(d)
    };
    let imm32_a = {
        let mut d = Dis::new();
        d.sub(&imm16_a)
            .pattern("a@........")?
            .pattern("a@........")?
            .bind(|_| Ok(()));
        Rc::new(d)
    };
    let imm32_b = {
        let mut d = Dis::new();
        d.sub(&imm16_b)
            .pattern("b@........")?
            .pattern("b@........")?
            .bind(|_| Ok(()));
        Rc::new(d)
    };

    // ModR/M machinery
    let sib = sib_matcher()?;
    let disp8 = displacement8()?;
    let disp32 = displacement32(&disp8)?;
    let rmbyte = modrm_class(&sib, &disp8, &disp32)?;
    let rmword = modrm_class(&sib, &disp8, &disp32)?;
    let rmlong = modrm_class(&sib, &disp8, &disp32)?;
    let rmquad = modrm_class(&sib, &disp8, &disp32)?;

    // AAA/AAD/AAM/AAS, 32 bit only
    for (token, opcode) in [(0x37u8, "aaa"), (0x3f, "aas")] {
        main.token(token).bind(move |st: &mut Sm| {
            st.mnemonic(1, opcode, "", vec![], |_| Ok(()))?;
            skip(st);
            Ok(())
        });
    }
    for (token, opcode) in [(0xd5u8, "aad"), (0xd4, "aam")] {
        main.token(token).sub(&imm8_a).bind(move |st: &mut Sm| {
            let imm = immediate(st, "a", 1);

            st.mnemonic(2, opcode, "{8}", vec![Rvalue::Constant(imm)], |_| Ok(()))?;
            skip(st);
            Ok(())
        });
    }

    // ADC
    main.token(0x14).sub(&imm8_a).bind(acc_imm("adc", 8, 1, |c, d, s, w| {
        add_semantics(c, d, s, w, true)
    }));
    main.sub(&opsize_prefix)
        .token(0x15)
        .sub(&imm16_a)
        .bind(acc_imm("adc", 16, 2, |c, d, s, w| add_semantics(c, d, s, w, true)));
    main.token(0x15).sub(&imm32_a).bind(acc_imm("adc", 32, 4, |c, d, s, w| {
        add_semantics(c, d, s, w, true)
    }));
    main.sub(&rexw_prefix)
        .token(0x15)
        .sub(&imm32_a)
        .bind(acc_imm("adc", 64, 4, |c, d, s, w| add_semantics(c, d, s, w, true)));

    main.token(0x80)
        .sub(&rmbyte.by_reg[2])
        .sub(&imm8_b)
        .bind(rm_imm("adc", 8, 1, false, |c, d, s, w| add_semantics(c, d, s, w, true)));
    main.sub(&rex_prefix)
        .token(0x80)
        .sub(&rmbyte.by_reg[2])
        .sub(&imm8_b)
        .bind(rm_imm("adc", 8, 1, false, |c, d, s, w| add_semantics(c, d, s, w, true)));
    main.sub(&opsize_prefix)
        .token(0x81)
        .sub(&rmword.by_reg[2])
        .sub(&imm16_b)
        .bind(rm_imm("adc", 16, 2, false, |c, d, s, w| add_semantics(c, d, s, w, true)));
    main.token(0x81)
        .sub(&rmlong.by_reg[2])
        .sub(&imm32_b)
        .bind(rm_imm("adc", 32, 4, false, |c, d, s, w| add_semantics(c, d, s, w, true)));
    main.sub(&rexw_prefix)
        .token(0x81)
        .sub(&rmquad.by_reg[2])
        .sub(&imm32_b)
        .bind(rm_imm("adc", 64, 4, true, |c, d, s, w| add_semantics(c, d, s, w, true)));
    main.sub(&opsize_prefix)
        .token(0x83)
        .sub(&rmword.by_reg[2])
        .sub(&imm8_b)
        .bind(rm_imm("adc", 16, 1, true, |c, d, s, w| add_semantics(c, d, s, w, true)));
    main.token(0x83)
        .sub(&rmlong.by_reg[2])
        .sub(&imm8_b)
        .bind(rm_imm("adc", 32, 1, true, |c, d, s, w| add_semantics(c, d, s, w, true)));
    main.sub(&rexw_prefix)
        .token(0x83)
        .sub(&rmquad.by_reg[2])
        .sub(&imm8_b)
        .bind(rm_imm("adc", 64, 1, true, |c, d, s, w| add_semantics(c, d, s, w, true)));

    main.token(0x10).sub(&rmbyte.any).bind(rm_reg("adc", 8, false, |c, d, s, w| {
        add_semantics(c, d, s, w, true)
    }));
    main.sub(&opsize_prefix)
        .token(0x11)
        .sub(&rmword.any)
        .bind(rm_reg("adc", 16, false, |c, d, s, w| add_semantics(c, d, s, w, true)));
    main.token(0x11).sub(&rmlong.any).bind(rm_reg("adc", 32, false, |c, d, s, w| {
        add_semantics(c, d, s, w, true)
    }));
    main.sub(&rexw_prefix)
        .token(0x11)
        .sub(&rmquad.any)
        .bind(rm_reg("adc", 64, false, |c, d, s, w| add_semantics(c, d, s, w, true)));
    main.token(0x12).sub(&rmbyte.any).bind(rm_reg("adc", 8, true, |c, d, s, w| {
        add_semantics(c, d, s, w, true)
    }));
    main.sub(&opsize_prefix)
        .token(0x13)
        .sub(&rmword.any)
        .bind(rm_reg("adc", 16, true, |c, d, s, w| add_semantics(c, d, s, w, true)));
    main.token(0x13).sub(&rmlong.any).bind(rm_reg("adc", 32, true, |c, d, s, w| {
        add_semantics(c, d, s, w, true)
    }));
    main.sub(&rexw_prefix)
        .token(0x13)
        .sub(&rmquad.any)
        .bind(rm_reg("adc", 64, true, |c, d, s, w| add_semantics(c, d, s, w, true)));

    // ADD
    main.token(0x04).sub(&imm8_a).bind(acc_imm("add", 8, 1, |c, d, s, w| {
        add_semantics(c, d, s, w, false)
    }));
    main.sub(&opsize_prefix)
        .token(0x05)
        .sub(&imm16_a)
        .bind(acc_imm("add", 16, 2, |c, d, s, w| add_semantics(c, d, s, w, false)));
    main.token(0x05).sub(&imm32_a).bind(acc_imm("add", 32, 4, |c, d, s, w| {
        add_semantics(c, d, s, w, false)
    }));
    main.token(0x80)
        .sub(&rmbyte.by_reg[0])
        .sub(&imm8_b)
        .bind(rm_imm("add", 8, 1, false, |c, d, s, w| add_semantics(c, d, s, w, false)));
    main.token(0x81)
        .sub(&rmlong.by_reg[0])
        .sub(&imm32_b)
        .bind(rm_imm("add", 32, 4, false, |c, d, s, w| add_semantics(c, d, s, w, false)));
    main.token(0x83)
        .sub(&rmlong.by_reg[0])
        .sub(&imm8_b)
        .bind(rm_imm("add", 32, 1, true, |c, d, s, w| add_semantics(c, d, s, w, false)));
    main.token(0x00).sub(&rmbyte.any).bind(rm_reg("add", 8, false, |c, d, s, w| {
        add_semantics(c, d, s, w, false)
    }));
    main.token(0x01).sub(&rmlong.any).bind(rm_reg("add", 32, false, |c, d, s, w| {
        add_semantics(c, d, s, w, false)
    }));
    main.token(0x02).sub(&rmbyte.any).bind(rm_reg("add", 8, true, |c, d, s, w| {
        add_semantics(c, d, s, w, false)
    }));
    main.token(0x03).sub(&rmlong.any).bind(rm_reg("add", 32, true, |c, d, s, w| {
        add_semantics(c, d, s, w, false)
    }));

    // SUB
    main.token(0x2c).sub(&imm8_a).bind(acc_imm("sub", 8, 1, sub_semantics));
    main.token(0x2d).sub(&imm32_a).bind(acc_imm("sub", 32, 4, sub_semantics));
    main.token(0x80)
        .sub(&rmbyte.by_reg[5])
        .sub(&imm8_b)
        .bind(rm_imm("sub", 8, 1, false, sub_semantics));
    main.token(0x81)
        .sub(&rmlong.by_reg[5])
        .sub(&imm32_b)
        .bind(rm_imm("sub", 32, 4, false, sub_semantics));
    main.token(0x83)
        .sub(&rmlong.by_reg[5])
        .sub(&imm8_b)
        .bind(rm_imm("sub", 32, 1, true, sub_semantics));
    main.token(0x28).sub(&rmbyte.any).bind(rm_reg("sub", 8, false, sub_semantics));
    main.token(0x29).sub(&rmlong.any).bind(rm_reg("sub", 32, false, sub_semantics));
    main.token(0x2a).sub(&rmbyte.any).bind(rm_reg("sub", 8, true, sub_semantics));
    main.token(0x2b).sub(&rmlong.any).bind(rm_reg("sub", 32, true, sub_semantics));

    // CMP (flags only)
    main.token(0x3c).sub(&imm8_a).bind(acc_imm("cmp", 8, 1, |c, d, s, _| {
        c.less_i(flag("CF"), d.clone(), s.clone())?;
        let diff = c.sub_i(Temp, d, s)?;

        c.equal_i(flag("ZF"), diff, 0u64)?;
        Ok(())
    }));
    main.token(0x3d).sub(&imm32_a).bind(acc_imm("cmp", 32, 4, |c, d, s, _| {
        c.less_i(flag("CF"), d.clone(), s.clone())?;
        let diff = c.sub_i(Temp, d, s)?;

        c.equal_i(flag("ZF"), diff, 0u64)?;
        Ok(())
    }));

    // MOV
    main.token(0x88).sub(&rmbyte.any).bind(rm_reg("mov", 8, false, |c, d, s, _| {
        c.emit(panopticon_il::Lvalue::try_from(d)?, panopticon_il::Operation::UnivNop(s))?;
        Ok(())
    }));
    main.token(0x89).sub(&rmlong.any).bind(rm_reg("mov", 32, false, |c, d, s, _| {
        c.emit(panopticon_il::Lvalue::try_from(d)?, panopticon_il::Operation::UnivNop(s))?;
        Ok(())
    }));
    main.token(0x8a).sub(&rmbyte.any).bind(rm_reg("mov", 8, true, |c, d, s, _| {
        c.emit(panopticon_il::Lvalue::try_from(d)?, panopticon_il::Operation::UnivNop(s))?;
        Ok(())
    }));
    main.token(0x8b).sub(&rmlong.any).bind(rm_reg("mov", 32, true, |c, d, s, _| {
        c.emit(panopticon_il::Lvalue::try_from(d)?, panopticon_il::Operation::UnivNop(s))?;
        Ok(())
    }));

    // mov reg, imm
    for r in 0..8u8 {
        main.token(0xb0 + r).sub(&imm8_a).bind(move |st: &mut Sm| {
            let imm = immediate(st, "a", 1);
            let reg = decode_gpr(u64::from(r), 8, false);

            st.mnemonic(
                2,
                "mov",
                "{8}, {8}",
                vec![reg.clone().into(), Rvalue::Constant(imm)],
                |c| {
                    c.assign(reg.clone(), imm)?;
                    Ok(())
                },
            )?;
            skip(st);
            Ok(())
        });
        main.token(0xb8 + r).sub(&imm32_a).bind(move |st: &mut Sm| {
            let imm = immediate(st, "a", 4);
            let reg = decode_gpr(u64::from(r), 32, false);
            let len = st.tokens.len() as u64;

            st.mnemonic(
                len,
                "mov",
                "{32}, {32}",
                vec![reg.clone().into(), Rvalue::Constant(imm)],
                |c| {
                    c.assign(reg.clone(), imm)?;
                    Ok(())
                },
            )?;
            skip(st);
            Ok(())
        });
    }

    // push/pop reg
    for r in 0..8u8 {
        main.token(0x50 + r).bind(move |st: &mut Sm| {
            let reg = decode_gpr(u64::from(r), st.state.operand_size.max(32), false);

            st.mnemonic(1, "push", "{64}", vec![reg.clone().into()], |c| {
                let sp = Variable::new("rsp", 64);
                let dec = c.sub_i(Temp, sp.clone(), 8u64)?;

                c.assign(sp.clone(), dec)?;
                c.assign(
                    Memory::new(Rvalue::from(sp), 8, Endianness::Little, "ram"),
                    reg.clone(),
                )?;
                Ok(())
            })?;
            skip(st);
            Ok(())
        });
        main.token(0x58 + r).bind(move |st: &mut Sm| {
            let reg = decode_gpr(u64::from(r), st.state.operand_size.max(32), false);

            st.mnemonic(1, "pop", "{64}", vec![reg.clone().into()], |c| {
                let sp = Variable::new("rsp", 64);

                c.assign(
                    reg.clone(),
                    Memory::new(Rvalue::from(sp.clone()), 8, Endianness::Little, "ram"),
                )?;
                let inc = c.add_i(Temp, sp.clone(), 8u64)?;

                c.assign(sp, inc)?;
                Ok(())
            })?;
            skip(st);
            Ok(())
        });
    }

    // control transfers
    main.token(0x90).bind(|st: &mut Sm| {
        st.mnemonic(1, "nop", "", vec![], |_| Ok(()))?;
        skip(st);
        Ok(())
    });
    main.token(0xc3).bind(|st: &mut Sm| st.mnemonic(1, "ret", "", vec![], |_| Ok(())));

    main.token(0xe8).sub(&imm32_a).bind(|st: &mut Sm| {
        let disp = sign_extend(immediate(st, "a", 4), 32);
        let len = st.tokens.len() as u64;
        let target = (st.address + len).wrapping_add(disp);

        st.mnemonic(len, "call", "{64}", vec![Rvalue::Constant(target)], |c| {
            c.call_i(Temp, target)?;
            Ok(())
        })?;
        skip(st);
        Ok(())
    });
    main.token(0xe9).sub(&imm32_a).bind(|st: &mut Sm| {
        let disp = sign_extend(immediate(st, "a", 4), 32);
        let len = st.tokens.len() as u64;
        let target = (st.address + len).wrapping_add(disp);

        st.mnemonic(len, "jmp", "{64}", vec![Rvalue::Constant(target)], |_| Ok(()))?;
        st.jump(target);
        Ok(())
    });
    main.token(0xeb).sub(&imm8_a).bind(|st: &mut Sm| {
        let disp = sign_extend(immediate(st, "a", 1), 8);
        let target = (st.address + 2).wrapping_add(disp);

        st.mnemonic(2, "jmp", "{8:-}", vec![Rvalue::Constant(disp & 0xff)], |_| Ok(()))?;
        st.jump(target);
        Ok(())
    });
    main.token(0xff).sub(&rmlong.by_reg[4]).bind(|st: &mut Sm| {
        let pointer = Amd64::temporary(&st.state);
        let operand = rm_operand(st, 64, &pointer);
        let len = st.tokens.len() as u64;
        let state = snapshot_groups(st);

        st.mnemonic(len, "jmp", "{64}", vec![operand.clone()], |c| {
            emit_address_from(&state, c, &pointer)
        })?;
        st.jump(operand);
        Ok(())
    });

    main.token(0x74).sub(&imm8_a).bind(jcc("je", |c, cond| {
        c.lift_b(cond.clone(), flag("ZF"))?;
        Ok(())
    }));
    main.token(0x75).sub(&imm8_a).bind(jcc("jne", |c, cond| {
        c.not_b(cond.clone(), flag("ZF"))?;
        Ok(())
    }));
    main.token(0x72).sub(&imm8_a).bind(jcc("jb", |c, cond| {
        c.lift_b(cond.clone(), flag("CF"))?;
        Ok(())
    }));
    main.token(0x73).sub(&imm8_a).bind(jcc("jae", |c, cond| {
        c.not_b(cond.clone(), flag("CF"))?;
        Ok(())
    }));
    main.token(0x76).sub(&imm8_a).bind(jcc("jbe", |c, cond| {
        c.or_b(cond.clone(), flag("CF"), flag("ZF"))?;
        Ok(())
    }));
    main.token(0x77).sub(&imm8_a).bind(jcc("ja", |c, cond| {
        let below_or_equal = c.or_b(Temp, flag("CF"), flag("ZF"))?;

        c.not_b(cond.clone(), below_or_equal)?;
        Ok(())
    }));
    main.token(0x78).sub(&imm8_a).bind(jcc("js", |c, cond| {
        c.lift_b(cond.clone(), flag("SF"))?;
        Ok(())
    }));
    main.token(0x79).sub(&imm8_a).bind(jcc("jns", |c, cond| {
        c.not_b(cond.clone(), flag("SF"))?;
        Ok(())
    }));
    main.token(0x70).sub(&imm8_a).bind(jcc("jo", |c, cond| {
        c.lift_b(cond.clone(), flag("OF"))?;
        Ok(())
    }));
    main.token(0x71).sub(&imm8_a).bind(jcc("jno", |c, cond| {
        c.not_b(cond.clone(), flag("OF"))?;
        Ok(())
    }));

    // catch all
    main.bind(|st: &mut Sm| {
        st.mnemonic(1, "unk", "", vec![], |_| Ok(()))?;
        skip(st);
        Ok(())
    });

    Ok(main)
}

/// Disassemble `data` starting at `reference`, creating or extending a
/// program.
pub fn disassemble(
    state: &Amd64State,
    program: Option<Program>,
    data: &Slab,
    reference: &Ref,
) -> Result<Option<Program>, AnalysisError> {
    let main = disassembler()?;

    program::disassemble(program, &main, state, data, reference)
}
