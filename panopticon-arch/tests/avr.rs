use panopticon_analysis::{dominance_tree, liveness, ssa, CfgNode};
use panopticon_arch::avr::{self, AvrState};
use panopticon_il::{Operation, Rvalue, PHI_MNEMONIC};
use panopticon_region::{Region, Slab};
use panopticon_types::Ref;

fn decode(words: &[u16]) -> panopticon_analysis::Program {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let slab = Slab::from_vec(bytes);

    avr::disassemble(&AvrState::mega88(), None, &slab, &Ref::new("flash", 0))
        .unwrap()
        .unwrap()
}

#[test]
fn add_with_flags() {
    // add r16, r17
    let prog = decode(&[0x0f01]);
    let (_, proc) = prog.procedures().next().unwrap();
    let bb = proc.block(proc.entry.unwrap()).unwrap();

    assert_eq!(bb.area().lower(), 0);
    assert_eq!(bb.area().upper(), 2);
    assert_eq!(bb.mnemonics().len(), 1);

    let mnemonic = &bb.mnemonics()[0];

    assert_eq!(mnemonic.opcode, "add");
    assert_eq!(format!("{mnemonic}"), "add r16, r17");

    // the destination register wraps at 256 and every flag is written
    let mut assigned = Vec::new();
    let mut wraps = false;

    for stmt in &mnemonic.instructions {
        if let Some(var) = stmt.assignee.as_variable() {
            assigned.push(var.name.clone());
        }
        if let Operation::IntMod(_, Rvalue::Constant(0x100)) = stmt.op {
            wraps = true;
        }
    }

    for flag in ["H", "V", "N", "Z", "C", "S"] {
        assert!(assigned.contains(&flag.to_string()), "missing flag {flag}");
    }
    assert!(wraps);
    assert_eq!(assigned.last().map(String::as_str), Some("r16"));
}

#[test]
fn data_movement() {
    // ldi r17, 0x2a ; mov r0, r17
    let prog = decode(&[0xe21a, 0x2e01]);
    let (_, proc) = prog.procedures().next().unwrap();
    let bb = proc.block(proc.entry.unwrap()).unwrap();
    let printed: Vec<String> = bb.mnemonics().iter().map(|m| format!("{m}")).collect();

    assert_eq!(printed, vec!["ldi r17, 42", "mov r0, r17"]);
}

#[test]
fn branches_split_blocks_and_loop() {
    // 0: ldi r16, 0
    // 2: inc r16
    // 4: cpi r16, 10
    // 6: brne 2
    // 8: ret
    let prog = decode(&[0xe000, 0x9503, 0x300a, 0xf7e9, 0x9508]);
    let (_, proc) = prog.procedures().next().unwrap();

    let mut areas: Vec<(u64, u64)> = proc
        .blocks()
        .map(|(_, bb)| (bb.area().lower(), bb.area().upper()))
        .collect();

    areas.sort();
    assert_eq!(areas, vec![(0, 2), (2, 8), (8, 10)]);

    let head = proc.find_block_at(0).unwrap();
    let body = proc.find_block_at(2).unwrap();
    let tail = proc.find_block_at(8).unwrap();

    let targets = |vx| -> Vec<_> {
        proc.cfg().out_edges(vx).map(|ed| proc.cfg().target(ed)).collect()
    };

    assert_eq!(targets(head), vec![body]);
    assert!(targets(body).contains(&body));
    assert!(targets(body).contains(&tail));
    assert!(targets(tail).is_empty());
}

#[test]
fn loop_gets_a_phi_for_the_counter() {
    let prog = decode(&[0xe000, 0x9503, 0x300a, 0xf7e9, 0x9508]);
    let (vx, _) = prog.procedures().next().unwrap();
    let mut prog = prog;
    let proc = prog.procedure_mut(vx).unwrap();
    let dom = dominance_tree(proc).unwrap();
    let live = liveness(proc);

    ssa(proc, &dom, &live).unwrap();

    let body = proc.find_block_at(2).unwrap();
    let bb = proc.block(body).unwrap();

    assert_eq!(bb.mnemonics()[0].opcode, PHI_MNEMONIC);

    let mut phi_names = Vec::new();

    bb.execute(|stmt| {
        if let Operation::UnivPhi(ops) = &stmt.op {
            phi_names.push(stmt.assignee.as_variable().unwrap().name.clone());
            assert_eq!(ops.len(), proc.cfg().in_degree(body));
        }
    });

    assert!(phi_names.contains(&"r16".to_string()));
}

#[test]
fn calls_link_procedures() {
    // 0: rcall +2 (to 4) ; 2: ret ; 4: ret
    // rcall: 1101 k@............, k=1 → target 0 + 2 + 2 = 4
    let prog = decode(&[0xd001, 0x9508, 0x9508]);

    assert_eq!(prog.procedures().count(), 2);

    let caller = prog.find_procedure_at(0).unwrap();
    let callee = prog.find_procedure_at(4).unwrap();

    assert_eq!(
        prog.calls().out_edges(caller).map(|ed| prog.calls().target(ed)).collect::<Vec<_>>(),
        vec![callee]
    );
}

#[test]
fn indirect_jumps_stay_symbolic() {
    // ijmp
    let prog = decode(&[0x9409]);
    let (_, proc) = prog.procedures().next().unwrap();

    let symbolic: Vec<&Rvalue> = proc
        .cfg()
        .vertices()
        .filter_map(|vx| proc.cfg().vertex_label(vx).and_then(CfgNode::as_value))
        .collect();

    assert_eq!(symbolic.len(), 1);
    assert!(symbolic[0].is_variable());
}

#[test]
fn unknown_words_fall_through_to_unk() {
    let prog = decode(&[0xffff]);
    let (_, proc) = prog.procedures().next().unwrap();
    let bb = proc.block(proc.entry.unwrap()).unwrap();

    assert_eq!(bb.mnemonics()[0].opcode, "unk");
    assert_eq!(bb.area().upper(), 2);
}

#[test]
fn works_on_region_reads() {
    let words: Vec<u8> = [0x0f01u16, 0x9508]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect();
    let region = Region::wrap("flash", words);
    let slab = region.read();
    let prog = avr::disassemble(&AvrState::mega128(), None, &slab, &Ref::new("flash", 0))
        .unwrap()
        .unwrap();

    assert_eq!(prog.procedures().count(), 1);
}
