use panopticon_arch::amd64::{self, Amd64State};
use panopticon_il::Rvalue;
use panopticon_region::Slab;
use panopticon_types::Ref;

fn decode(bytes: &[u8]) -> panopticon_analysis::Program {
    let slab = Slab::from_vec(bytes.to_vec());

    amd64::disassemble(&Amd64State::long(), None, &slab, &Ref::new("ram", 0))
        .unwrap()
        .unwrap()
}

fn first_mnemonic(prog: &panopticon_analysis::Program) -> panopticon_il::Mnemonic {
    let (_, proc) = prog.procedures().next().unwrap();
    let bb = proc.block(proc.entry.unwrap()).unwrap();

    bb.mnemonics()[0].clone()
}

#[test]
fn adc_accumulator_imm8() {
    let prog = decode(&[0x14, 0x42]);
    let m = first_mnemonic(&prog);

    assert_eq!(m.opcode, "adc");
    assert_eq!(m.area.upper(), 2);
    assert_eq!(m.operands[0].as_variable().unwrap().name, "al");
    assert_eq!(m.operands[1], Rvalue::Constant(0x42));
    assert!(!m.instructions.is_empty());
}

// the operand-size prefix shrinks the accumulator and the immediate
#[test]
fn operand_size_prefix() {
    let prog = decode(&[0x66, 0x15, 0x34, 0x12]);
    let m = first_mnemonic(&prog);

    assert_eq!(m.opcode, "adc");
    assert_eq!(m.area.upper(), 4);
    assert_eq!(m.operands[0].as_variable().unwrap().name, "ax");
    assert_eq!(m.operands[1], Rvalue::Constant(0x1234));
}

#[test]
fn rex_w_prefix_widens() {
    let prog = decode(&[0x48, 0x15, 0x78, 0x56, 0x34, 0x12]);
    let m = first_mnemonic(&prog);

    assert_eq!(m.opcode, "adc");
    assert_eq!(m.area.upper(), 6);
    assert_eq!(m.operands[0].as_variable().unwrap().name, "rax");
    assert_eq!(m.operands[1], Rvalue::Constant(0x1234_5678));
}

#[test]
fn modrm_register_form() {
    // adc bl, al: 0x10 /r, modrm = 11 000 011
    let prog = decode(&[0x10, 0xc3]);
    let m = first_mnemonic(&prog);

    assert_eq!(m.opcode, "adc");
    assert_eq!(m.operands[0].as_variable().unwrap().name, "bl");
    assert_eq!(m.operands[1].as_variable().unwrap().name, "al");
}

#[test]
fn modrm_memory_form() {
    // add [rbx], al: 0x00 /r, modrm = 00 000 011
    let prog = decode(&[0x00, 0x03]);
    let m = first_mnemonic(&prog);

    assert_eq!(m.opcode, "add");

    let mem = m.operands[0].as_memory().unwrap();

    assert_eq!(mem.name, "ram");
    assert_eq!(mem.bytes, 1);
    assert!(m.operands[1].is_variable());
}

#[test]
fn modrm_sib_with_displacement() {
    // add [rax + rcx*4 + 0x10], eax: 0x01, modrm = 01 000 100, sib = 10 001 000, disp8
    let prog = decode(&[0x01, 0x44, 0x88, 0x10]);
    let m = first_mnemonic(&prog);

    assert_eq!(m.opcode, "add");
    assert_eq!(m.area.upper(), 4);
    assert!(m.operands[0].is_memory());
}

#[test]
fn group_opcodes_dispatch_on_the_reg_field() {
    // 0x80 /2 is adc, /5 is sub, /0 is add
    let adc = first_mnemonic(&decode(&[0x80, 0xd3, 0x01]));
    let sub = first_mnemonic(&decode(&[0x80, 0xeb, 0x01]));
    let add = first_mnemonic(&decode(&[0x80, 0xc3, 0x01]));

    assert_eq!(adc.opcode, "adc");
    assert_eq!(sub.opcode, "sub");
    assert_eq!(add.opcode, "add");
}

#[test]
fn conditional_jumps_have_two_targets() {
    // cmp al, 0; je +2; nop; ret
    let prog = decode(&[0x3c, 0x00, 0x74, 0x01, 0x90, 0xc3]);
    let (_, proc) = prog.procedures().next().unwrap();
    let branch_block = proc
        .blocks()
        .find(|(_, bb)| bb.mnemonics().iter().any(|m| m.opcode == "je"))
        .unwrap()
        .0;

    assert_eq!(proc.cfg().out_degree(branch_block), 2);

    // both edges carry complementary guards on the computed condition
    let guards: Vec<_> = proc
        .cfg()
        .out_edges(branch_block)
        .map(|ed| proc.cfg().edge_label(ed).unwrap().clone())
        .collect();

    assert!(guards.iter().all(|g| g.relations.len() == 1));
}

#[test]
fn call_spawns_a_procedure() {
    // call +1; ret; ret
    let prog = decode(&[0xe8, 0x01, 0x00, 0x00, 0x00, 0xc3, 0xc3]);

    assert_eq!(prog.procedures().count(), 2);
    assert!(prog.find_procedure_at(6).is_some());
}

#[test]
fn mov_imm_forms() {
    // mov bl, 7; mov ecx, 0x11223344
    let bl = first_mnemonic(&decode(&[0xb3, 0x07]));
    let ecx = first_mnemonic(&decode(&[0xb9, 0x44, 0x33, 0x22, 0x11]));

    assert_eq!(bl.opcode, "mov");
    assert_eq!(bl.operands[0].as_variable().unwrap().name, "bl");
    assert_eq!(bl.operands[1], Rvalue::Constant(7));
    assert_eq!(ecx.operands[0].as_variable().unwrap().name, "ecx");
    assert_eq!(ecx.operands[1], Rvalue::Constant(0x1122_3344));
}

#[test]
fn undecodable_bytes_fall_through_to_unk() {
    let m = first_mnemonic(&decode(&[0x0f]));

    assert_eq!(m.opcode, "unk");
    assert_eq!(m.area.upper(), 1);
}
