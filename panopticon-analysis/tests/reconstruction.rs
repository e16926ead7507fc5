use std::collections::BTreeSet;

use panopticon_analysis::{procedure, program, CfgNode};
use panopticon_disasm::{
    Architecture, Disassembler, SemState, Temp, TemporaryAllocator,
};
use panopticon_il::{Guard, RelCode, Rvalue, Variable};
use panopticon_region::Slab;
use panopticon_types::{Bound, Ref};

// toy byte machine: inc, conditional branch, jump, ret, call, indirect jump
struct Toy;

#[derive(Clone, Debug, Default)]
struct ToyState {
    temps: TemporaryAllocator,
}

impl Architecture for Toy {
    type Token = u8;
    type State = ToyState;

    fn registers(_: &ToyState) -> Vec<(&'static str, u16)> {
        vec![("a", 8), ("Z", 1), ("J", 8)]
    }

    fn temporary(state: &ToyState) -> Variable {
        state.temps.fresh(8)
    }
}

type Ss = SemState<Toy>;

fn ruleset() -> Disassembler<Toy> {
    let mut main = Disassembler::<Toy>::new();

    main.token(0x01).bind(|st: &mut Ss| {
        st.mnemonic(1, "inc", "", vec![], |cg| {
            let sum = cg.add_i(Temp, Variable::new("a", 8), 1u64)?;
            cg.assign(Variable::new("a", 8), sum)?;
            Ok(())
        })?;
        let next = st.address + 1;
        st.jump(next);
        Ok(())
    });

    main.token(0x02).pattern("k@........").unwrap().bind(|st: &mut Ss| {
        let k = st.group("k");

        st.mnemonic(2, "brz", "{8}", vec![Rvalue::Constant(k)], |_| Ok(()))?;

        let taken = Guard::from_relation(Variable::new("Z", 1), RelCode::Eq, Rvalue::Constant(1));
        let next = st.address + 2;

        st.jump_if(taken.negation(), next);
        st.jump_if(taken, k);
        Ok(())
    });

    main.token(0x03).pattern("k@........").unwrap().bind(|st: &mut Ss| {
        let k = st.group("k");

        st.mnemonic(2, "jmp", "{8}", vec![Rvalue::Constant(k)], |_| Ok(()))?;
        st.jump(k);
        Ok(())
    });

    main.token(0x04).bind(|st: &mut Ss| {
        st.mnemonic(1, "ret", "", vec![], |_| Ok(()))
    });

    main.token(0x05).pattern("k@........").unwrap().bind(|st: &mut Ss| {
        let k = st.group("k");

        st.mnemonic(2, "call", "{8}", vec![Rvalue::Constant(k)], |cg| {
            cg.call_i(Temp, Rvalue::Constant(k))?;
            Ok(())
        })?;
        let next = st.address + 2;
        st.jump(next);
        Ok(())
    });

    main.token(0x06).bind(|st: &mut Ss| {
        st.mnemonic(1, "ijmp", "", vec![], |_| Ok(()))?;
        st.jump(Variable::new("J", 8));
        Ok(())
    });

    main
}

fn areas(proc: &panopticon_analysis::Procedure) -> BTreeSet<(u64, u64)> {
    proc.blocks()
        .map(|(_, bb)| (bb.area().lower(), bb.area().upper()))
        .collect()
}

#[test]
fn branch_and_loop_form_blocks() {
    // 0: inc; 1: brz 5; 3: inc; 4: ret; 5: jmp 0
    let data = Slab::from_vec(vec![0x01, 0x02, 0x05, 0x01, 0x04, 0x03, 0x00]);
    let proc = procedure::disassemble::<Toy>(None, &ruleset(), &ToyState::default(), &data, 0)
        .unwrap()
        .unwrap();

    assert_eq!(proc.name, "proc_0");
    assert_eq!(
        areas(&proc),
        BTreeSet::from([(0, 3), (3, 5), (5, 7)])
    );

    // inc+brz fuse; every block is address-adjacent inside
    for (_, bb) in proc.blocks() {
        for pair in bb.mnemonics().windows(2) {
            assert_eq!(pair[0].area.upper(), pair[1].area.lower());
        }
        assert!(bb.area().lower() <= bb.area().upper());
    }

    let entry = proc.entry.unwrap();
    assert_eq!(proc.block(entry).unwrap().area().lower(), 0);

    let head = proc.find_block_at(0).unwrap();
    let tail = proc.find_block_at(3).unwrap();
    let back = proc.find_block_at(5).unwrap();

    let succs = |vx| -> BTreeSet<_> {
        proc.cfg().out_edges(vx).map(|ed| proc.cfg().target(ed)).collect()
    };

    assert_eq!(succs(head), BTreeSet::from([tail, back]));
    assert_eq!(succs(tail), BTreeSet::new());
    assert_eq!(succs(back), BTreeSet::from([head]));

    // the conditional edge keeps its guard
    let guarded = proc
        .cfg()
        .out_edges(head)
        .find(|ed| proc.cfg().target(*ed) == back)
        .unwrap();
    assert_eq!(proc.cfg().edge_label(guarded).unwrap().relations[0].code, RelCode::Eq);
}

#[test]
fn unresolved_targets_become_value_nodes() {
    // 0: inc; 1: <garbage>
    let data = Slab::from_vec(vec![0x01, 0xff]);
    let proc = procedure::disassemble::<Toy>(None, &ruleset(), &ToyState::default(), &data, 0)
        .unwrap()
        .unwrap();

    assert_eq!(areas(&proc), BTreeSet::from([(0, 1)]));

    let values: Vec<&Rvalue> = proc
        .cfg()
        .vertices()
        .filter_map(|vx| proc.cfg().vertex_label(vx).and_then(CfgNode::as_value))
        .collect();

    assert_eq!(values, vec![&Rvalue::Constant(1)]);
}

#[test]
fn computed_jumps_become_symbolic_nodes() {
    let data = Slab::from_vec(vec![0x06]);
    let proc = procedure::disassemble::<Toy>(None, &ruleset(), &ToyState::default(), &data, 0)
        .unwrap()
        .unwrap();

    let values: Vec<&Rvalue> = proc
        .cfg()
        .vertices()
        .filter_map(|vx| proc.cfg().vertex_label(vx).and_then(CfgNode::as_value))
        .collect();

    assert_eq!(values, vec![&Rvalue::from(Variable::new("J", 8))]);
}

#[test]
fn undecodable_input_yields_no_procedure() {
    let data = Slab::from_vec(vec![0xff, 0xfe]);

    assert!(procedure::disassemble::<Toy>(None, &ruleset(), &ToyState::default(), &data, 0)
        .unwrap()
        .is_none());
}

#[test]
fn seeds_outside_the_slab_are_dropped() {
    let data = Slab::from_vec(vec![0x01]);

    assert!(procedure::disassemble::<Toy>(None, &ruleset(), &ToyState::default(), &data, 99)
        .unwrap()
        .is_none());
}

#[test]
fn extending_keeps_existing_blocks() {
    // 0: ret | 2: ret
    let data = Slab::from_vec(vec![0x04, 0xff, 0x04]);
    let first = procedure::disassemble::<Toy>(None, &ruleset(), &ToyState::default(), &data, 0)
        .unwrap()
        .unwrap();
    let name = first.name.clone();
    let extended = procedure::disassemble::<Toy>(Some(first), &ruleset(), &ToyState::default(), &data, 2)
        .unwrap()
        .unwrap();

    assert_eq!(extended.name, name);
    assert_eq!(areas(&extended), BTreeSet::from([(0, 1), (2, 3)]));
    assert_eq!(
        extended.block(extended.entry.unwrap()).unwrap().area().lower(),
        0
    );
}

#[test]
fn call_targets_spawn_procedures() {
    // 0: call 4; 2: ret; 3: pad; 4: inc; 5: ret
    let data = Slab::from_vec(vec![0x05, 0x04, 0x04, 0xff, 0x01, 0x04]);
    let prog = program::disassemble::<Toy>(
        None,
        &ruleset(),
        &ToyState::default(),
        &data,
        &Ref::new("flash", 0),
    )
    .unwrap()
    .unwrap();

    assert_eq!(prog.procedures().count(), 2);

    let caller = prog.find_procedure_at(0).unwrap();
    let callee = prog.find_procedure_at(4).unwrap();
    let called: Vec<_> = prog
        .calls()
        .out_edges(caller)
        .map(|ed| prog.calls().target(ed))
        .collect();

    assert_eq!(called, vec![callee]);
    assert_eq!(prog.calls().out_degree(callee), 0);
}

#[test]
fn decoding_respects_existing_mnemonic_boundaries() {
    // jumping into the middle of a decoded mnemonic is skipped
    // 0: brz 1 (2 bytes; target 1 is inside the mnemonic)
    let data = Slab::from_vec(vec![0x02, 0x01]);
    let proc = procedure::disassemble::<Toy>(None, &ruleset(), &ToyState::default(), &data, 0)
        .unwrap()
        .unwrap();

    assert_eq!(areas(&proc), BTreeSet::from([(0, 2)]));
}

#[test]
fn split_and_merge_round_trip() {
    let data = Slab::from_vec(vec![0x01, 0x01, 0x01]);
    let mut proc = procedure::disassemble::<Toy>(None, &ruleset(), &ToyState::default(), &data, 0)
        .unwrap()
        .unwrap();

    let vx = proc.find_block_at(0).unwrap();
    let (up, down) = proc.split(vx, 1, false).unwrap();

    assert_eq!(proc.block(up).unwrap().area(), Bound::new(0, 1));
    assert_eq!(proc.block(down).unwrap().area(), Bound::new(1, 3));
    assert_eq!(proc.entry, Some(up));

    let merged = proc.merge(up, down).unwrap();
    assert_eq!(proc.block(merged).unwrap().area(), Bound::new(0, 3));
    assert_eq!(proc.entry, Some(merged));
}

#[test]
fn cancellation_stops_the_worklist() {
    let data = Slab::from_vec(vec![0x01, 0x01, 0x01]);
    let cancel = panopticon_analysis::Cancellation::new();

    cancel.cancel();

    let result = procedure::disassemble_cancellable::<Toy>(
        None,
        &ruleset(),
        &ToyState::default(),
        &data,
        0,
        &cancel,
    )
    .unwrap();

    assert!(result.is_none());
}

#[cfg(feature = "serde")]
#[test]
fn serde_round_trip() {
    let data = Slab::from_vec(vec![0x01, 0x02, 0x05, 0x01, 0x04, 0x03, 0x00]);
    let proc = procedure::disassemble::<Toy>(None, &ruleset(), &ToyState::default(), &data, 0)
        .unwrap()
        .unwrap();

    let bytes = bincode::serialize(&proc).unwrap();
    let back: panopticon_analysis::Procedure = bincode::deserialize(&bytes).unwrap();

    assert_eq!(back.uuid, proc.uuid);
    assert_eq!(back.name, proc.name);
    assert_eq!(back.entry, proc.entry);
    assert_eq!(areas(&back), areas(&proc));

    for (vx, bb) in proc.blocks() {
        assert_eq!(back.block(vx), Some(bb));
    }
}
