//! AVR frontend.
//!
//! Covers the ATmega instruction set: data movement, byte and word
//! arithmetic, the SREG bit instructions, conditional branches, skips,
//! calls and the X/Y/Z indirect loads and stores. Program-counter
//! arithmetic wraps at the flash size of the selected MCU.

use panopticon_analysis::{program, AnalysisError, Program};
use panopticon_disasm::{
    Architecture, CodeGenerator, Disassembler, DisassemblyError, SemState, Temp,
    TemporaryAllocator,
};
use panopticon_il::{Endianness, Guard, Memory, RelCode, Rvalue, Variable};
use panopticon_region::Slab;
use panopticon_types::Ref;

/// The AVR architecture tag.
pub struct Avr;

/// Per-MCU machine state.
#[derive(Clone, Debug)]
pub struct AvrState {
    /// Size of the flash region in bytes; jump targets wrap at it.
    pub flash_size: u64,
    temps: TemporaryAllocator,
}

impl AvrState {
    /// State for a flash of `flash_size` bytes.
    pub fn new(flash_size: u64) -> Self {
        Self {
            flash_size,
            temps: TemporaryAllocator::new(),
        }
    }

    /// ATmega88: 8 KiB flash.
    pub fn mega88() -> Self {
        Self::new(0x2000)
    }

    /// ATmega103: 128 KiB flash.
    pub fn mega103() -> Self {
        Self::new(0x20000)
    }

    /// ATmega128: 128 KiB flash.
    pub fn mega128() -> Self {
        Self::new(0x20000)
    }
}

impl Architecture for Avr {
    type Token = u16;
    type State = AvrState;

    fn registers(_: &AvrState) -> Vec<(&'static str, u16)> {
        let mut regs: Vec<(&'static str, u16)> = vec![
            ("r0", 8),
            ("r1", 8),
            ("r2", 8),
            ("r3", 8),
            ("r4", 8),
            ("r5", 8),
            ("r6", 8),
            ("r7", 8),
            ("r8", 8),
            ("r9", 8),
            ("r10", 8),
            ("r11", 8),
            ("r12", 8),
            ("r13", 8),
            ("r14", 8),
            ("r15", 8),
            ("r16", 8),
            ("r17", 8),
            ("r18", 8),
            ("r19", 8),
            ("r20", 8),
            ("r21", 8),
            ("r22", 8),
            ("r23", 8),
            ("r24", 8),
            ("r25", 8),
            ("r26", 8),
            ("r27", 8),
            ("r28", 8),
            ("r29", 8),
            ("r30", 8),
            ("r31", 8),
        ];

        regs.extend([
            ("I", 1),
            ("T", 1),
            ("H", 1),
            ("S", 1),
            ("V", 1),
            ("N", 1),
            ("Z", 1),
            ("C", 1),
        ]);
        regs
    }

    fn temporary(state: &AvrState) -> Variable {
        state.temps.fresh(16)
    }
}

type Sm = SemState<Avr>;
type Cg<'a> = CodeGenerator<'a, Avr>;
type SemResult = Result<(), DisassemblyError>;

/// General-purpose register `r0` to `r31`.
pub fn decode_reg(r: u64) -> Variable {
    assert!(r <= 31, "no such register r{r}");
    Variable::new(format!("r{r}"), 8)
}

/// Named I/O register behind address `a`.
pub fn decode_ioreg(a: u64) -> Variable {
    let name = match a {
        0x00 => "ubrr1",
        0x01 => "ucsr1b",
        0x02 => "ucsr1a",
        0x03 => "udr1",
        0x05 => "pine",
        0x06 => "ddre",
        0x07 => "porte",
        0x08 => "acsr",
        0x09 => "ubrr0",
        0x0a => "ucsr0b",
        0x0b => "ucsr0a",
        0x0c => "udr0",
        0x0d => "spcr",
        0x0e => "spsr",
        0x0f => "spdr",
        0x10 => "pind",
        0x11 => "ddrd",
        0x12 => "portd",
        0x13 => "pinc",
        0x14 => "ddrc",
        0x15 => "portc",
        0x16 => "pinb",
        0x17 => "ddrb",
        0x18 => "portb",
        0x19 => "pina",
        0x1a => "ddra",
        0x1b => "porta",
        0x1c => "eecr",
        0x1d => "eedr",
        0x1e => "eearl",
        0x1f => "eearh",
        0x20 => "ubrrh",
        0x21 => "wdtcr",
        0x22 => "ocr2",
        0x23 => "tcnt2",
        0x24 => "icr1l",
        0x25 => "icr1h",
        0x26 => "assr",
        0x27 => "tccr2",
        0x28 => "ocr1bl",
        0x29 => "ocr1bh",
        0x2a => "ocr1al",
        0x2b => "ocr1ah",
        0x2c => "tcnt1l",
        0x2d => "tcnt1h",
        0x2e => "tccr1b",
        0x2f => "tccr1a",
        0x30 => "sfior",
        0x31 => "ocr0",
        0x32 => "tcnt0",
        0x33 => "tccr0",
        0x34 => "mcusr",
        0x35 => "mcucr",
        0x36 => "emcucr",
        0x37 => "spmcr",
        0x38 => "tifr",
        0x39 => "timsk",
        0x3a => "gifr",
        0x3b => "gimsk",
        0x3d => "spl",
        0x3e => "sph",
        0x3f => "sreg",
        _ => return Variable::new(format!("io{a}"), 8),
    };

    Variable::new(name, 8)
}

fn flag(name: &str) -> Variable {
    Variable::new(name, 1)
}

fn reg(name: &str) -> Variable {
    Variable::new(name, 8)
}

/// One byte of SRAM.
pub fn sram(offset: impl Into<Rvalue>) -> Memory {
    Memory::new(offset, 1, Endianness::Big, "sram")
}

/// One byte of flash.
pub fn flash(offset: impl Into<Rvalue>) -> Memory {
    Memory::new(offset, 1, Endianness::Big, "flash")
}

fn skip(st: &mut Sm) {
    let next = st.address + st.tokens.len() as u64 * 2;

    st.jump(next);
}

/// `S ← (¬N ∧ V) ∨ (N ∧ ¬V)`.
fn set_sign(c: &mut Cg<'_>) -> SemResult {
    let not_n = c.not_b(Temp, flag("N"))?;
    let not_v = c.not_b(Temp, flag("V"))?;
    let a = c.and_b(Temp, not_n, flag("V"))?;
    let b = c.and_b(Temp, flag("N"), not_v)?;

    c.or_b(flag("S"), a, b)?;
    Ok(())
}

/// Flags of an 8 bit subtraction `minuend - subtrahend`, result `r`.
///
/// `chain_zero` folds the previous Z in, as the carry-variants do.
fn subtraction_flags(
    c: &mut Cg<'_>,
    minuend: Rvalue,
    subtrahend: Rvalue,
    r: Rvalue,
    chain_zero: bool,
) -> SemResult {
    let m_low = c.mod_i(Temp, minuend.clone(), 0x10u64)?;
    let s_low = c.mod_i(Temp, subtrahend.clone(), 0x10u64)?;

    c.less_i(flag("H"), m_low, s_low)?;
    c.less_i(flag("C"), minuend, subtrahend)?;

    if chain_zero {
        let zero = c.equal_i(Temp, r.clone(), 0u64)?;

        c.and_b(flag("Z"), flag("Z"), zero)?;
    } else {
        c.equal_i(flag("Z"), r.clone(), 0u64)?;
    }

    c.less_i(flag("N"), 0x7fu64, r)?;
    c.not_b(flag("V"), flag("C"))?;
    set_sign(c)
}

/// Flags of an 8 bit addition with result `r` (before the mod 256 wrap).
fn addition_flags(c: &mut Cg<'_>, a: Rvalue, b: Rvalue, r: Rvalue) -> SemResult {
    let a_low = c.mod_i(Temp, a.clone(), 0x10u64)?;
    let b_low = c.mod_i(Temp, b.clone(), 0x10u64)?;
    let low_sum = c.add_i(Temp, a_low, b_low)?;

    c.less_i(flag("H"), 0xfu64, low_sum)?;

    // V: both operands on one side of 0x80, the result on the other
    let a_pos = c.less_i(Temp, a, 0x80u64)?;
    let b_pos = c.less_i(Temp, b, 0x80u64)?;
    let r_wrapped = c.mod_i(Temp, r.clone(), 0x100u64)?;
    let r_neg = c.less_i(Temp, 0x7fu64, r_wrapped.clone())?;
    let pos_pair = c.and_b(Temp, a_pos.clone(), b_pos.clone())?;
    let pos_overflow = c.and_b(Temp, pos_pair, r_neg.clone())?;
    let a_neg = c.not_b(Temp, a_pos)?;
    let b_neg = c.not_b(Temp, b_pos)?;
    let neg_pair = c.and_b(Temp, a_neg, b_neg)?;
    let r_pos = c.not_b(Temp, r_neg.clone())?;
    let neg_overflow = c.and_b(Temp, neg_pair, r_pos)?;

    c.or_b(flag("V"), pos_overflow, neg_overflow)?;
    c.assign(flag("N"), r_neg)?;
    c.equal_i(flag("Z"), r_wrapped, 0u64)?;
    c.less_i(flag("C"), 0xffu64, r)?;
    set_sign(c)
}

/// Flags of an 8 bit logic operation on `r`.
fn logic_flags(c: &mut Cg<'_>, r: Rvalue) -> SemResult {
    c.assign(flag("V"), 0u64)?;
    c.less_i(flag("N"), 0x7fu64, r.clone())?;
    set_sign(c)?;
    c.equal_i(flag("Z"), 0u64, r)?;
    Ok(())
}

fn unary_reg(
    opcode: &'static str,
    sem: Option<fn(&mut Cg<'_>, &Variable) -> SemResult>,
) -> impl Fn(&mut Sm) -> SemResult {
    move |st| {
        let op = if st.has_group("d") {
            decode_reg(st.group("d"))
        } else {
            decode_reg(st.group("r"))
        };
        let len = st.tokens.len() as u64 * 2;

        st.mnemonic(len, opcode, "{8}", vec![op.clone().into()], |c| {
            match sem {
                Some(f) => f(c, &op),
                None => Ok(()),
            }
        })?;
        skip(st);
        Ok(())
    }
}

fn binary_reg(
    opcode: &'static str,
    sem: fn(&mut Cg<'_>, &Variable, &Variable) -> SemResult,
) -> impl Fn(&mut Sm) -> SemResult {
    move |st| {
        let rd = decode_reg(st.group("d"));
        let rr = decode_reg(st.group("r"));
        let len = st.tokens.len() as u64 * 2;

        st.mnemonic(
            len,
            opcode,
            "{8}, {8}",
            vec![rd.clone().into(), rr.clone().into()],
            |c| sem(c, &rd, &rr),
        )?;
        skip(st);
        Ok(())
    }
}

fn binary_regconst(
    opcode: &'static str,
    sem: fn(&mut Cg<'_>, &Variable, u64) -> SemResult,
) -> impl Fn(&mut Sm) -> SemResult {
    move |st| {
        // the immediate forms only reach r16..r31
        let rd = decode_reg(st.group("d") + 16);
        let k = st.group("K");
        let len = st.tokens.len() as u64 * 2;

        st.mnemonic(
            len,
            opcode,
            "{8}, {8}",
            vec![rd.clone().into(), Rvalue::Constant(k)],
            |c| sem(c, &rd, k),
        )?;
        skip(st);
        Ok(())
    }
}

fn branch(opcode: &'static str, flag_name: &'static str, set: bool) -> impl Fn(&mut Sm) -> SemResult {
    move |st| {
        let field = st.group("k") as i64;
        let displacement = if field <= 63 { field } else { field - 128 } * 2;
        let guard = Guard::from_relation(
            flag(flag_name),
            RelCode::Eq,
            Rvalue::Constant(u64::from(set)),
        );
        let fallthrough = st.address + 2;
        let taken = (st.address as i64 + displacement + 2) as u64;

        st.mnemonic(
            2,
            opcode,
            "{8:-}",
            vec![Rvalue::Constant(displacement as u64 & 0xff)],
            |_| Ok(()),
        )?;
        st.jump_if(guard.negation(), fallthrough);
        st.jump_if(guard, taken);
        Ok(())
    }
}

fn skip_if_bit(opcode: &'static str, io: bool) -> impl Fn(&mut Sm) -> SemResult {
    move |st| {
        let target = if io {
            decode_ioreg(st.group("A"))
        } else {
            decode_reg(st.group("r"))
        };
        let bit = st.group("b");
        let len = st.tokens.len() as u64 * 2;

        st.mnemonic(
            len,
            opcode,
            "{8}, {8}",
            vec![target.into(), Rvalue::Constant(bit)],
            |_| Ok(()),
        )?;
        skip(st);
        Ok(())
    }
}

fn simple(opcode: &'static str, sem: Option<fn(&mut Cg<'_>) -> SemResult>) -> impl Fn(&mut Sm) -> SemResult {
    move |st| {
        let len = st.tokens.len() as u64 * 2;

        st.mnemonic(len, opcode, "", vec![], |c| match sem {
            Some(f) => f(c),
            None => Ok(()),
        })?;
        skip(st);
        Ok(())
    }
}

/// Indirect store through the register pair `(lo, lo+1)`.
fn store_indirect(lo: u64, pre_dec: bool, post_inc: bool) -> impl Fn(&mut Sm) -> SemResult {
    assert!(!(pre_dec && post_inc));

    move |st| {
        let pointer = Avr::temporary(&st.state);
        let rr = decode_reg(st.group("r"));
        let len = st.tokens.len() as u64 * 2;
        let format = pointer_format(lo, pre_dec, post_inc, None);

        st.mnemonic(
            len,
            "st",
            &format,
            vec![pointer.clone().into(), rr.clone().into()],
            |c| {
                let high = c.mul_i(Temp, decode_reg(lo + 1), 0x100u64)?;

                c.add_i(pointer.clone(), high, decode_reg(lo))?;
                if pre_dec {
                    let dec = c.sub_i(Temp, pointer.clone(), 1u64)?;

                    c.mod_i(pointer.clone(), dec, 0x10000u64)?;
                }
                c.assign(sram(pointer.clone()), rr.clone())?;
                if post_inc {
                    let inc = c.add_i(Temp, pointer.clone(), 1u64)?;

                    c.mod_i(pointer.clone(), inc, 0x10000u64)?;
                }
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    }
}

/// Indirect load through the register pair `(lo, lo+1)`.
fn load_indirect(lo: u64, pre_dec: bool, post_inc: bool) -> impl Fn(&mut Sm) -> SemResult {
    assert!(!(pre_dec && post_inc));

    move |st| {
        let pointer = Avr::temporary(&st.state);
        let rd = if st.has_group("d") {
            decode_reg(st.group("d"))
        } else {
            decode_reg(st.group("r"))
        };
        let len = st.tokens.len() as u64 * 2;
        let format = pointer_format(lo, pre_dec, post_inc, None);

        st.mnemonic(
            len,
            "ld",
            &format,
            vec![pointer.clone().into(), rd.clone().into()],
            |c| {
                let high = c.mul_i(Temp, decode_reg(lo + 1), 0x100u64)?;

                c.add_i(pointer.clone(), high, decode_reg(lo))?;
                if pre_dec {
                    let dec = c.sub_i(Temp, pointer.clone(), 1u64)?;

                    c.mod_i(pointer.clone(), dec, 0x10000u64)?;
                }
                c.assign(rd.clone(), sram(pointer.clone()))?;
                if post_inc {
                    let inc = c.add_i(Temp, pointer.clone(), 1u64)?;

                    c.mod_i(pointer.clone(), inc, 0x10000u64)?;
                }
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    }
}

/// Displacement store `st Y+q/Z+q`.
fn store_displaced(lo: u64) -> impl Fn(&mut Sm) -> SemResult {
    move |st| {
        let pointer = Avr::temporary(&st.state);
        let rr = decode_reg(st.group("r"));
        let q = st.group("q");
        let len = st.tokens.len() as u64 * 2;
        let format = pointer_format(lo, false, false, Some(q));

        st.mnemonic(
            len,
            "st",
            &format,
            vec![pointer.clone().into(), rr.clone().into()],
            |c| {
                let high = c.mul_i(Temp, decode_reg(lo + 1), 0x100u64)?;
                let base = c.add_i(Temp, high, decode_reg(lo))?;

                c.add_i(pointer.clone(), base, q)?;
                c.assign(sram(pointer.clone()), rr.clone())?;
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    }
}

/// Displacement load `ld Y+q/Z+q`.
fn load_displaced(lo: u64) -> impl Fn(&mut Sm) -> SemResult {
    move |st| {
        let pointer = Avr::temporary(&st.state);
        let rd = if st.has_group("d") {
            decode_reg(st.group("d"))
        } else {
            decode_reg(st.group("r"))
        };
        let q = st.group("q");
        let len = st.tokens.len() as u64 * 2;
        let format = pointer_format(lo, false, false, Some(q));

        st.mnemonic(
            len,
            "ld",
            &format,
            vec![pointer.clone().into(), rd.clone().into()],
            |c| {
                let high = c.mul_i(Temp, decode_reg(lo + 1), 0x100u64)?;
                let base = c.add_i(Temp, high, decode_reg(lo))?;

                c.add_i(pointer.clone(), base, q)?;
                c.assign(rd.clone(), sram(pointer.clone()))?;
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    }
}

fn pointer_format(lo: u64, pre_dec: bool, post_inc: bool, displacement: Option<u64>) -> String {
    let pair = match lo {
        26 => "X",
        28 => "Y",
        30 => "Z",
        _ => unreachable!("not a pointer pair"),
    };
    let mut alias = String::new();

    if pre_dec {
        alias.push('-');
    }
    alias.push_str(pair);
    if post_inc {
        alias.push('+');
    }
    if let Some(q) = displacement {
        alias.push_str(&format!("+{q}"));
    }

    format!("{{8::{alias}}}, {{8}}")
}

/// The AVR rule table.
pub fn disassembler() -> Result<Disassembler<Avr>, DisassemblyError> {
    let mut main = Disassembler::<Avr>::new();

    // memory operations
    main.pattern("001011 r@. d@..... r@....")?
        .bind(binary_reg("mov", |c, rd, rr| {
            c.assign(rd.clone(), rr.clone())?;
            Ok(())
        }));

    main.pattern("00000001 d@.... r@....")?.bind(|st: &mut Sm| {
        let rd1 = decode_reg(st.group("d") * 2);
        let rd2 = decode_reg(st.group("d") * 2 + 1);
        let rr1 = decode_reg(st.group("r") * 2);
        let rr2 = decode_reg(st.group("r") * 2 + 1);

        st.mnemonic(
            2,
            "movw",
            "{8}:{8}, {8}:{8}",
            vec![
                rd1.clone().into(),
                rd2.clone().into(),
                rr1.clone().into(),
                rr2.clone().into(),
            ],
            |c| {
                c.assign(rd1.clone(), rr1.clone())?;
                c.assign(rd2.clone(), rr2.clone())?;
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    });

    main.pattern("10110 A@.. d@..... A@....")?.bind(|st: &mut Sm| {
        let rd = decode_reg(st.group("d"));
        let io = decode_ioreg(st.group("A"));
        let off = st.group("A");

        st.mnemonic(
            2,
            "in",
            &format!("{{8}}, {{8::{}}}", io.name),
            vec![rd.clone().into(), Rvalue::Constant(off)],
            |c| {
                c.assign(rd.clone(), sram(off))?;
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    });

    main.pattern("10111 A@.. r@..... A@....")?.bind(|st: &mut Sm| {
        let rr = decode_reg(st.group("r"));
        let io = decode_ioreg(st.group("A"));
        let off = st.group("A");

        st.mnemonic(
            2,
            "out",
            &format!("{{8::{}}}, {{8}}", io.name),
            vec![Rvalue::Constant(off), rr.clone().into()],
            |c| {
                c.assign(sram(off), rr.clone())?;
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    });

    main.pattern("1001000 d@..... 1111")?
        .bind(unary_reg("pop", Some(|c, r| {
            let sp = Memory::new(Rvalue::Constant(0x3d), 2, Endianness::Big, "sram");
            let dec = c.sub_i(Temp, sp.clone(), 1u64)?;

            c.assign(sp.clone(), dec)?;
            c.assign(r.clone(), sram(sp))?;
            Ok(())
        })));
    main.pattern("1001001 d@..... 1111")?
        .bind(unary_reg("push", Some(|c, r| {
            let sp = Memory::new(Rvalue::Constant(0x3d), 2, Endianness::Big, "sram");
            let inc = c.add_i(Temp, sp.clone(), 1u64)?;

            c.assign(sram(sp.clone()), r.clone())?;
            c.assign(sp, inc)?;
            Ok(())
        })));
    main.pattern("1001010 d@..... 0010")?
        .bind(unary_reg("swap", Some(|c, r| {
            let high = c.div_i(Temp, r.clone(), 0x10u64)?;
            let shifted = c.mul_i(Temp, r.clone(), 0x10u64)?;
            let low = c.mod_i(Temp, shifted, 0x100u64)?;

            c.add_i(r.clone(), high, low)?;
            Ok(())
        })));
    main.pattern("1001001 r@..... 0100")?
        .bind(unary_reg("xch", Some(|c, r| {
            let high = c.mul_i(Temp, reg("r31"), 0x100u64)?;
            let z = c.add_i(Temp, high, reg("r30"))?;
            let tmp = c.assign(Temp, sram(z.clone()))?;

            c.assign(sram(z), r.clone())?;
            c.assign(r.clone(), tmp)?;
            Ok(())
        })));
    main.pattern("11101111 d@.... 1111")?
        .bind(unary_reg("ser", Some(|c, r| {
            c.assign(r.clone(), 0xffu64)?;
            Ok(())
        })));
    main.pattern("1110 K@.... d@.... K@....")?
        .bind(binary_regconst("ldi", |c, rd, k| {
            c.assign(rd.clone(), k)?;
            Ok(())
        }));

    main.pattern("1001001 r@..... 0110")?
        .bind(unary_reg("lac", Some(|c, r| {
            let high = c.mul_i(Temp, reg("r31"), 0x100u64)?;
            let z = c.add_i(Temp, high, reg("r30"))?;
            let masked = c.sub_i(Temp, 0xffu64, sram(z.clone()))?;
            let cleared = c.and_i(Temp, r.clone(), masked)?;

            c.assign(sram(z), cleared)?;
            Ok(())
        })));
    main.pattern("1001001 r@..... 0101")?
        .bind(unary_reg("las", Some(|c, r| {
            let high = c.mul_i(Temp, reg("r31"), 0x100u64)?;
            let z = c.add_i(Temp, high, reg("r30"))?;
            let tmp = c.assign(Temp, sram(z.clone()))?;
            let set = c.or_i(Temp, r.clone(), tmp.clone())?;

            c.assign(sram(z), set)?;
            c.assign(r.clone(), tmp)?;
            Ok(())
        })));
    main.pattern("1001001 r@..... 0111")?
        .bind(unary_reg("lat", Some(|c, r| {
            let high = c.mul_i(Temp, reg("r31"), 0x100u64)?;
            let z = c.add_i(Temp, high, reg("r30"))?;
            let tmp = c.assign(Temp, sram(z.clone()))?;
            let toggled = c.xor_i(Temp, r.clone(), tmp.clone())?;

            c.assign(sram(z), toggled)?;
            c.assign(r.clone(), tmp)?;
            Ok(())
        })));

    main.pattern("1001000 d@..... 0000")?
        .pattern("k@................")?
        .bind(|st: &mut Sm| {
            let rd = decode_reg(st.group("d"));
            let k = st.group("k");

            st.mnemonic(
                4,
                "lds",
                "{8}, {16}",
                vec![rd.clone().into(), Rvalue::Constant(k)],
                |c| {
                    c.assign(rd.clone(), sram(k))?;
                    Ok(())
                },
            )?;
            skip(st);
            Ok(())
        });

    main.pattern("10100 k@... d@.... k@....")?.bind(|st: &mut Sm| {
        let rd = decode_reg(st.group("d") + 16);
        let k = 0x10 | (st.group("k") & 0x6f);

        st.mnemonic(
            2,
            "lds",
            "{8}, {8}",
            vec![rd.clone().into(), Rvalue::Constant(k)],
            |c| {
                c.assign(rd.clone(), sram(k))?;
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    });

    main.token(0x95c8).bind(|st: &mut Sm| {
        st.mnemonic(2, "lpm", "", vec![], |c| {
            let high = c.mul_i(Temp, reg("r31"), 0x100u64)?;
            let z = c.add_i(Temp, high, reg("r30"))?;

            c.assign(reg("r0"), flash(z))?;
            Ok(())
        })?;
        skip(st);
        Ok(())
    });

    main.token(0x95e8).bind(simple("spm", None));
    main.token(0x95f8).bind(|st: &mut Sm| {
        st.mnemonic(2, "spm", "{8::Z+}", vec![Rvalue::from(Variable::new("Z+", 8))], |_| Ok(()))?;
        skip(st);
        Ok(())
    });

    main.pattern("1001001 d@..... 0000")?
        .pattern("k@................")?
        .bind(|st: &mut Sm| {
            let rr = decode_reg(st.group("d"));
            let k = st.group("k");

            st.mnemonic(
                4,
                "sts",
                "{16}, {8}",
                vec![Rvalue::Constant(k), rr.clone().into()],
                |c| {
                    c.assign(sram(k), rr.clone())?;
                    Ok(())
                },
            )?;
            skip(st);
            Ok(())
        });

    main.pattern("10101 k@... d@.... k@....")?.bind(|st: &mut Sm| {
        let rr = decode_reg(st.group("d") + 16);
        let k = 0x10 | (st.group("k") & 0x6f);

        st.mnemonic(
            2,
            "sts",
            "{8}, {8}",
            vec![Rvalue::Constant(k), rr.clone().into()],
            |c| {
                c.assign(sram(k), rr.clone())?;
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    });

    main.pattern("10011010 A@..... b@...")?.bind(|st: &mut Sm| {
        let k = st.group("A");
        let mask = 1u64 << st.group("b");

        st.mnemonic(
            2,
            "sbi",
            "{8}, {8}",
            vec![Rvalue::Constant(k), Rvalue::Constant(mask)],
            |c| {
                let set = c.or_i(Temp, sram(k), mask)?;

                c.assign(sram(k), set)?;
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    });

    main.pattern("10011000 A@..... b@...")?.bind(|st: &mut Sm| {
        let k = st.group("A");
        let mask = !(1u64 << st.group("b")) & 0xff;

        st.mnemonic(
            2,
            "cbi",
            "{8}, {8}",
            vec![Rvalue::Constant(k), Rvalue::Constant(mask)],
            |c| {
                let cleared = c.and_i(Temp, sram(k), mask)?;

                c.assign(sram(k), cleared)?;
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    });

    // SREG operations
    for (token, name, flag_name, value) in [
        (0x9408u16, "sec", "C", 1u64),
        (0x9458, "seh", "H", 1),
        (0x9478, "sei", "I", 1),
        (0x9428, "sen", "N", 1),
        (0x9448, "ses", "S", 1),
        (0x9468, "set", "T", 1),
        (0x9438, "sev", "V", 1),
        (0x9418, "sez", "Z", 1),
        (0x9488, "clc", "C", 0),
        (0x94d8, "clh", "H", 0),
        (0x94f8, "cli", "I", 0),
        (0x94a8, "cln", "N", 0),
        (0x94c8, "cls", "S", 0),
        (0x94e8, "clt", "T", 0),
        (0x94b8, "clv", "V", 0),
        (0x9498, "clz", "Z", 0),
    ] {
        main.token(token).bind(move |st: &mut Sm| {
            st.mnemonic(2, name, "", vec![], |c| {
                c.assign(flag(flag_name), value)?;
                Ok(())
            })?;
            skip(st);
            Ok(())
        });
    }

    main.pattern("000101 r@. d@..... r@....")?
        .bind(binary_reg("cp", |c, rd, rr| {
            let diff = c.sub_i(Temp, rd.clone(), rr.clone())?;
            let r = c.mod_i(Temp, diff, 0x100u64)?;

            subtraction_flags(c, rd.clone().into(), rr.clone().into(), r, false)
        }));
    main.pattern("000001 r@. d@..... r@....")?
        .bind(binary_reg("cpc", |c, rd, rr| {
            let carry = c.lift_b(Temp, flag("C"))?;
            let diff = c.sub_i(Temp, rd.clone(), rr.clone())?;
            let chained = c.sub_i(Temp, diff, carry)?;
            let r = c.mod_i(Temp, chained, 0x100u64)?;

            subtraction_flags(c, rd.clone().into(), rr.clone().into(), r, true)
        }));
    main.pattern("0011 K@.... d@.... K@....")?
        .bind(binary_regconst("cpi", |c, rd, k| {
            let diff = c.sub_i(Temp, rd.clone(), k)?;
            let r = c.mod_i(Temp, diff, 0x100u64)?;

            subtraction_flags(c, rd.clone().into(), Rvalue::Constant(k), r, false)
        }));

    // bit-level logic
    main.pattern("1001010 d@..... 0110")?
        .bind(unary_reg("lsr", Some(|c, r| {
            c.mod_i(flag("C"), r.clone(), 2u64)?;
            let shifted = c.div_i(Temp, r.clone(), 2u64)?;

            c.assign(r.clone(), shifted)?;
            c.equal_i(flag("Z"), r.clone(), 0u64)?;
            c.assign(flag("N"), 0u64)?;
            c.xor_i(flag("V"), flag("N"), flag("C"))?;
            c.xor_i(flag("S"), flag("N"), flag("V"))?;
            Ok(())
        })));

    // byte-level arithmetic and logic
    main.pattern("000111 r@. d@..... r@....")?
        .bind(binary_reg("adc", |c, rd, rr| {
            let carry = c.lift_b(Temp, flag("C"))?;
            let sum = c.add_i(Temp, rd.clone(), rr.clone())?;
            let r = c.add_i(Temp, sum, carry)?;

            addition_flags(c, rd.clone().into(), rr.clone().into(), r.clone())?;
            let wrapped = c.mod_i(Temp, r, 0x100u64)?;

            c.assign(rd.clone(), wrapped)?;
            Ok(())
        }));
    main.pattern("000011 r@. d@..... r@....")?
        .bind(binary_reg("add", |c, rd, rr| {
            let r = c.add_i(Temp, rd.clone(), rr.clone())?;

            addition_flags(c, rd.clone().into(), rr.clone().into(), r.clone())?;
            let wrapped = c.mod_i(Temp, r, 0x100u64)?;

            c.assign(rd.clone(), wrapped)?;
            Ok(())
        }));
    main.pattern("001000 r@. d@..... r@....")?
        .bind(binary_reg("and", |c, rd, rr| {
            c.and_i(rd.clone(), rd.clone(), rr.clone())?;
            logic_flags(c, rd.clone().into())
        }));
    main.pattern("0111 K@.... d@.... K@....")?
        .bind(binary_regconst("andi", |c, rd, k| {
            c.and_i(rd.clone(), rd.clone(), k)?;
            logic_flags(c, rd.clone().into())
        }));

    // eor clears the register when both operands coincide
    main.pattern("001001 r@. d@..... r@....")?.bind(|st: &mut Sm| {
        let rd = decode_reg(st.group("d"));
        let rr = decode_reg(st.group("r"));

        if rd == rr {
            st.mnemonic(2, "clr", "{8}", vec![rd.clone().into()], |c| {
                c.assign(rd.clone(), 0u64)?;
                c.assign(flag("V"), 0u64)?;
                c.assign(flag("N"), 0u64)?;
                c.assign(flag("S"), 0u64)?;
                c.assign(flag("Z"), 0u64)?;
                Ok(())
            })?;
        } else {
            st.mnemonic(
                2,
                "eor",
                "{8}, {8}",
                vec![rd.clone().into(), rr.clone().into()],
                |c| {
                    c.xor_i(rd.clone(), rd.clone(), rr.clone())?;
                    logic_flags(c, rd.clone().into())
                },
            )?;
        }
        skip(st);
        Ok(())
    });

    main.pattern("1001010 d@..... 0001")?
        .bind(unary_reg("neg", Some(|c, r| {
            let diff = c.sub_i(Temp, 0x100u64, r.clone())?;
            let wrapped = c.mod_i(Temp, diff, 0x100u64)?;

            c.assign(r.clone(), wrapped)?;
            logic_flags(c, r.clone().into())
        })));

    main.pattern("001010 r@. d@..... r@....")?
        .bind(binary_reg("or", |c, rd, rr| {
            c.or_i(rd.clone(), rd.clone(), rr.clone())?;
            logic_flags(c, rd.clone().into())
        }));
    main.pattern("0110 K@.... d@.... K@....")?
        .bind(binary_regconst("ori", |c, rd, k| {
            c.or_i(rd.clone(), rd.clone(), k)?;
            logic_flags(c, rd.clone().into())
        }));

    main.pattern("000110 r@. d@..... r@....")?
        .bind(binary_reg("sub", |c, rd, rr| {
            let diff = c.sub_i(Temp, rd.clone(), rr.clone())?;
            let r = c.mod_i(Temp, diff, 0x100u64)?;

            subtraction_flags(c, rd.clone().into(), rr.clone().into(), r.clone(), false)?;
            c.assign(rd.clone(), r)?;
            Ok(())
        }));
    main.pattern("0101 K@.... d@.... K@....")?
        .bind(binary_regconst("subi", |c, rd, k| {
            let diff = c.sub_i(Temp, rd.clone(), k)?;
            let r = c.mod_i(Temp, diff, 0x100u64)?;

            subtraction_flags(c, rd.clone().into(), Rvalue::Constant(k), r.clone(), false)?;
            c.assign(rd.clone(), r)?;
            Ok(())
        }));

    main.pattern("1001010 d@..... 0101")?.bind(unary_reg("asr", None));
    main.pattern("000111 d@..........")?.bind(unary_reg("rol", None));
    main.pattern("1001010 d@..... 0111")?.bind(unary_reg("ror", None));
    main.pattern("1001010 d@..... 1010")?
        .bind(unary_reg("dec", Some(|c, r| {
            let diff = c.sub_i(Temp, r.clone(), 1u64)?;
            let wrapped = c.mod_i(Temp, diff, 0x100u64)?;

            c.assign(r.clone(), wrapped)?;
            c.equal_i(flag("Z"), r.clone(), 0u64)?;
            c.less_i(flag("N"), 0x7fu64, r.clone())?;
            Ok(())
        })));
    main.pattern("1001010 d@..... 0011")?
        .bind(unary_reg("inc", Some(|c, r| {
            let sum = c.add_i(Temp, r.clone(), 1u64)?;
            let wrapped = c.mod_i(Temp, sum, 0x100u64)?;

            c.assign(r.clone(), wrapped)?;
            c.equal_i(flag("Z"), r.clone(), 0u64)?;
            c.less_i(flag("N"), 0x7fu64, r.clone())?;
            Ok(())
        })));

    main.pattern("000010 r@. d@..... r@....")?
        .bind(binary_reg("sbc", |c, rd, rr| {
            let carry = c.lift_b(Temp, flag("C"))?;
            let diff = c.sub_i(Temp, rd.clone(), rr.clone())?;
            let chained = c.sub_i(Temp, diff, carry)?;
            let r = c.mod_i(Temp, chained, 0x100u64)?;

            subtraction_flags(c, rd.clone().into(), rr.clone().into(), r.clone(), true)?;
            c.assign(rd.clone(), r)?;
            Ok(())
        }));
    main.pattern("0100 K@.... d@.... K@....")?
        .bind(binary_regconst("sbci", |c, rd, k| {
            let carry = c.lift_b(Temp, flag("C"))?;
            let diff = c.sub_i(Temp, rd.clone(), k)?;
            let chained = c.sub_i(Temp, diff, carry)?;
            let r = c.mod_i(Temp, chained, 0x100u64)?;

            subtraction_flags(c, rd.clone().into(), Rvalue::Constant(k), r.clone(), true)?;
            c.assign(rd.clone(), r)?;
            Ok(())
        }));

    main.pattern("1001010 d@..... 0000")?
        .bind(unary_reg("com", Some(|c, r| {
            let flipped = c.sub_i(Temp, 0xffu64, r.clone())?;

            c.assign(r.clone(), flipped)?;
            logic_flags(c, r.clone().into())?;
            c.assign(flag("C"), 1u64)?;
            Ok(())
        })));

    // word-level arithmetic
    main.pattern("10010110 K@.. d@.. K@....")?.bind(|st: &mut Sm| {
        let k = st.group("K");
        let d = st.group("d") * 2 + 24;
        let rd1 = decode_reg(d);
        let rd2 = decode_reg(d + 1);

        st.mnemonic(
            2,
            "adiw",
            "{8}:{8}, {16}",
            vec![rd2.clone().into(), rd1.clone().into(), Rvalue::Constant(k)],
            |c| {
                let high = c.mul_i(Temp, rd2.clone(), 0x100u64)?;
                let word = c.add_i(Temp, high, rd1.clone())?;
                let r = c.add_i(Temp, word, k)?;

                let rd2_pos = c.less_i(Temp, rd2.clone(), 0x80u64)?;
                let r_neg = c.less_i(Temp, 0x7fffu64, r.clone())?;

                c.and_b(flag("V"), rd2_pos, r_neg.clone())?;
                c.assign(flag("N"), r_neg)?;
                let wrapped = c.mod_i(Temp, r.clone(), 0x10000u64)?;

                c.equal_i(flag("Z"), wrapped.clone(), 0u64)?;
                c.less_i(flag("C"), 0xffffu64, r)?;
                set_sign(c)?;

                let new_high = c.div_i(Temp, wrapped.clone(), 0x100u64)?;
                let new_low = c.mod_i(Temp, wrapped, 0x100u64)?;

                c.assign(rd2.clone(), new_high)?;
                c.assign(rd1.clone(), new_low)?;
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    });

    main.pattern("10010111 K@.. d@.. K@....")?.bind(|st: &mut Sm| {
        let k = st.group("K");
        let d = st.group("d") * 2 + 24;
        let rd1 = decode_reg(d);
        let rd2 = decode_reg(d + 1);

        st.mnemonic(
            2,
            "sbiw",
            "{8}:{8}, {16}",
            vec![rd2.clone().into(), rd1.clone().into(), Rvalue::Constant(k)],
            |c| {
                let high = c.mul_i(Temp, rd2.clone(), 0x100u64)?;
                let word = c.add_i(Temp, high, rd1.clone())?;
                let diff = c.sub_i(Temp, word.clone(), k)?;
                let r = c.mod_i(Temp, diff, 0x10000u64)?;

                c.less_i(flag("C"), word, k)?;
                c.equal_i(flag("Z"), r.clone(), 0u64)?;
                c.less_i(flag("N"), 0x7fffu64, r.clone())?;

                let new_high = c.div_i(Temp, r.clone(), 0x100u64)?;
                let new_low = c.mod_i(Temp, r, 0x100u64)?;

                c.assign(rd2.clone(), new_high)?;
                c.assign(rd1.clone(), new_low)?;
                Ok(())
            },
        )?;
        skip(st);
        Ok(())
    });

    main.pattern("000000110 d@... 1 r@...")?.bind(binary_reg("fmul", |_, _, _| Ok(())));
    main.pattern("000000111 d@... 0 r@...")?.bind(binary_reg("fmuls", |_, _, _| Ok(())));
    main.pattern("000000111 d@... 1 r@...")?.bind(binary_reg("fmulsu", |_, _, _| Ok(())));
    main.pattern("100111 r@. d@..... r@....")?
        .bind(binary_reg("mul", |c, rd, rr| {
            let product = c.mul_i(Temp, rd.clone(), rr.clone())?;
            let low = c.mod_i(Temp, product.clone(), 0x100u64)?;
            let high = c.div_i(Temp, product, 0x100u64)?;

            c.assign(reg("r0"), low)?;
            c.assign(reg("r1"), high)?;
            Ok(())
        }));
    main.pattern("00000010 d@.... r@....")?.bind(binary_reg("muls", |_, _, _| Ok(())));
    main.pattern("000000110 d@... 0 r@...")?.bind(binary_reg("mulsu", |_, _, _| Ok(())));

    // conditional branches
    for (pattern, opcode, flag_name, set) in [
        ("111101 k@....... 000", "brcc", "C", false),
        ("111100 k@....... 000", "brcs", "C", true),
        ("111100 k@....... 001", "breq", "Z", true),
        ("111101 k@....... 001", "brne", "Z", false),
        ("111101 k@....... 100", "brge", "S", false),
        ("111100 k@....... 100", "brlt", "S", true),
        ("111101 k@....... 101", "brhc", "H", false),
        ("111100 k@....... 101", "brhs", "H", true),
        ("111101 k@....... 111", "brid", "I", false),
        ("111100 k@....... 111", "brie", "I", true),
        ("111100 k@....... 010", "brmi", "N", true),
        ("111101 k@....... 010", "brpl", "N", false),
        ("111101 k@....... 110", "brtc", "T", false),
        ("111100 k@....... 110", "brts", "T", true),
        ("111101 k@....... 011", "brvc", "V", false),
        ("111100 k@....... 011", "brvs", "V", true),
    ] {
        main.pattern(pattern)?.bind(branch(opcode, flag_name, set));
    }

    // skips
    main.pattern("1111110 r@..... 0 b@...")?.bind(skip_if_bit("sbrc", false));
    main.pattern("1111111 r@..... 0 b@...")?.bind(skip_if_bit("sbrs", false));
    main.pattern("10011001 A@..... b@...")?.bind(skip_if_bit("sbic", true));
    main.pattern("10011011 A@..... b@...")?.bind(skip_if_bit("sbis", true));
    main.pattern("000100 r@. d@..... r@....")?
        .bind(binary_reg("cpse", |_, _, _| Ok(())));

    // calls and jumps
    main.pattern("1001010 k@..... 111 k@.")?
        .pattern("k@................")?
        .bind(|st: &mut Sm| {
            let k = (st.group("k") * 2) % st.state.flash_size;

            st.mnemonic(4, "call", "{22}", vec![Rvalue::Constant(k)], |c| {
                c.call_i(Temp, k)?;
                Ok(())
            })?;
            skip(st);
            Ok(())
        });
    main.pattern("1001010 k@..... 110 k@.")?
        .pattern("k@................")?
        .bind(|st: &mut Sm| {
            let k = (st.group("k") * 2) % st.state.flash_size;

            st.mnemonic(4, "jmp", "{22}", vec![Rvalue::Constant(k)], |_| Ok(()))?;
            st.jump(k);
            Ok(())
        });

    main.pattern("1101 k@............")?.bind(|st: &mut Sm| {
        let field = st.group("k") as i64;
        let displacement = if field <= 2047 { field } else { field - 4096 };
        let k = (st.address as i64 + displacement * 2 + 2).rem_euclid(st.state.flash_size as i64)
            as u64;

        st.mnemonic(2, "rcall", "{16}", vec![Rvalue::Constant(k)], |c| {
            c.call_i(Temp, k)?;
            Ok(())
        })?;
        st.jump(st.address + 2);
        Ok(())
    });
    main.pattern("1100 k@............")?.bind(|st: &mut Sm| {
        let field = st.group("k") as i64;
        let displacement = if field <= 2047 { field } else { field - 4096 };
        let k = (st.address as i64 + displacement * 2 + 2).rem_euclid(st.state.flash_size as i64)
            as u64;

        st.mnemonic(2, "rjmp", "{16}", vec![Rvalue::Constant(k)], |_| Ok(()))?;
        st.jump(k);
        Ok(())
    });

    main.token(0x9508).bind(|st: &mut Sm| st.mnemonic(2, "ret", "", vec![], |_| Ok(())));
    main.token(0x9518).bind(|st: &mut Sm| st.mnemonic(2, "reti", "", vec![], |_| Ok(())));

    main.token(0x9409).bind(|st: &mut Sm| {
        let j = Variable::new("J", 16);
        let flash_size = st.state.flash_size;

        st.mnemonic(2, "ijmp", "", vec![], |c| {
            let high = c.mul_i(Temp, reg("r31"), 0x100u64)?;
            let z = c.add_i(Temp, high, reg("r30"))?;
            let doubled = c.mul_i(Temp, z, 2u64)?;

            c.mod_i(j.clone(), doubled, flash_size)?;
            Ok(())
        })?;
        st.jump(Variable::new("J", 16));
        Ok(())
    });
    main.token(0x9509).bind(|st: &mut Sm| {
        st.mnemonic(2, "icall", "", vec![], |_| Ok(()))?;
        skip(st);
        Ok(())
    });

    // stores and loads through X, Y and Z
    main.pattern("1001001 r@..... 1100")?.bind(store_indirect(26, false, false));
    main.pattern("1001001 r@..... 1101")?.bind(store_indirect(26, false, true));
    main.pattern("1001001 r@..... 1110")?.bind(store_indirect(26, true, false));

    main.pattern("1000001 r@..... 1000")?.bind(store_indirect(28, false, false));
    main.pattern("1001001 r@..... 1001")?.bind(store_indirect(28, false, true));
    main.pattern("1001001 r@..... 1010")?.bind(store_indirect(28, true, false));
    main.pattern("10q@.0 q@..1 r@..... 1q@...")?.bind(store_displaced(28));

    main.pattern("1000001 r@..... 0000")?.bind(store_indirect(30, false, false));
    main.pattern("1001001 r@..... 0001")?.bind(store_indirect(30, false, true));
    main.pattern("1001001 r@..... 0010")?.bind(store_indirect(30, true, false));
    main.pattern("10q@.0 q@..1 r@..... 0q@...")?.bind(store_displaced(30));

    main.pattern("1001000 d@..... 1100")?.bind(load_indirect(26, false, false));
    main.pattern("1001000 d@..... 1101")?.bind(load_indirect(26, false, true));
    main.pattern("1001000 d@..... 1110")?.bind(load_indirect(26, true, false));

    main.pattern("1000000 d@..... 1000")?.bind(load_indirect(28, false, false));
    main.pattern("1001000 d@..... 1001")?.bind(load_indirect(28, false, true));
    main.pattern("1001000 d@..... 1010")?.bind(load_indirect(28, true, false));
    main.pattern("10q@.0 q@..0 d@..... 1q@...")?.bind(load_displaced(28));

    main.pattern("1000000 d@..... 0000")?.bind(load_indirect(30, false, false));
    main.pattern("1001000 d@..... 0001")?.bind(load_indirect(30, false, true));
    main.pattern("1001000 d@..... 0010")?.bind(load_indirect(30, true, false));
    main.pattern("10q@.0 q@..0 d@..... 0q@...")?.bind(load_displaced(30));

    // misc
    main.token(0x9598).bind(simple("break", None));
    main.pattern("10010100 K@.... 1011")?.bind(|st: &mut Sm| {
        let k = st.group("K");

        st.mnemonic(2, "des", "{8}", vec![Rvalue::Constant(k)], |_| Ok(()))?;
        skip(st);
        Ok(())
    });

    main.token(0x0000).bind(simple("nop", None));
    main.token(0x9588).bind(simple("sleep", None));
    main.token(0x95a8).bind(simple("wdr", None));

    // catch all
    main.bind(|st: &mut Sm| {
        st.mnemonic(2, "unk", "", vec![], |_| Ok(()))?;
        skip(st);
        Ok(())
    });

    Ok(main)
}

/// Disassemble `data` starting at `reference`, creating or extending a
/// program.
pub fn disassemble(
    state: &AvrState,
    program: Option<Program>,
    data: &Slab,
    reference: &Ref,
) -> Result<Option<Program>, AnalysisError> {
    let main = disassembler()?;

    program::disassemble(program, &main, state, data, reference)
}
