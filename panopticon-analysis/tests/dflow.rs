use std::collections::BTreeSet;

use panopticon_analysis::{
    dominance_tree, liveness, ssa, BasicBlock, Procedure,
};
use panopticon_graph::VertexDescriptor;
use panopticon_il::{
    Endianness, Lvalue, Memory, Mnemonic, Operation, Rvalue, Statement, Variable, PHI_MNEMONIC,
};
use panopticon_types::Bound;

fn var(name: &str) -> Rvalue {
    Rvalue::from(Variable::new(name, 8))
}

fn assign(dst: &str, value: Rvalue) -> Statement {
    Statement::new(Operation::UnivNop(value), Variable::new(dst, 8))
}

fn add(dst: &str, a: &str, b: Rvalue) -> Statement {
    Statement::new(Operation::IntAdd(var(a), b), Variable::new(dst, 8))
}

fn compare(a: &str, b: Rvalue) -> Statement {
    Statement::new(
        Operation::IntLess(var(a), b),
        Lvalue::Memory(Memory::new(Rvalue::Undefined, 1, Endianness::Little, "none")),
    )
}

fn mnemonic(lower: u64, statements: Vec<Statement>) -> Mnemonic {
    Mnemonic::new(
        Bound::new(lower, lower + 1),
        format!("mne{lower}"),
        "",
        vec![],
        statements,
    )
    .unwrap()
}

// the doubly nested loop from Cooper/Torczon's liveness chapter
fn fixture() -> (Procedure, [VertexDescriptor; 9]) {
    let mut proc = Procedure::new("proc");

    let b0 = proc.add_block(BasicBlock::new(vec![mnemonic(
        0,
        vec![assign("i", Rvalue::Constant(1))],
    )]));
    let b1 = proc.add_block(BasicBlock::new(vec![
        mnemonic(1, vec![assign("a", Rvalue::Undefined)]),
        mnemonic(2, vec![assign("c", Rvalue::Undefined)]),
        mnemonic(3, vec![compare("a", var("c"))]),
    ]));
    let b2 = proc.add_block(BasicBlock::new(vec![
        mnemonic(4, vec![assign("b", Rvalue::Undefined)]),
        mnemonic(5, vec![assign("c", Rvalue::Undefined)]),
        mnemonic(6, vec![assign("d", Rvalue::Undefined)]),
    ]));
    let b3 = proc.add_block(BasicBlock::new(vec![
        mnemonic(7, vec![add("y", "a", var("b"))]),
        mnemonic(8, vec![add("z", "c", var("d"))]),
        mnemonic(9, vec![add("i", "i", Rvalue::Constant(1))]),
        mnemonic(10, vec![compare("i", Rvalue::Constant(100))]),
    ]));
    let b4 = proc.add_block(BasicBlock::new(vec![mnemonic(11, vec![])]));
    let b5 = proc.add_block(BasicBlock::new(vec![
        mnemonic(12, vec![assign("a", Rvalue::Undefined)]),
        mnemonic(13, vec![assign("d", Rvalue::Undefined)]),
        mnemonic(14, vec![compare("a", var("d"))]),
    ]));
    let b6 = proc.add_block(BasicBlock::new(vec![mnemonic(
        15,
        vec![assign("d", Rvalue::Undefined)],
    )]));
    let b7 = proc.add_block(BasicBlock::new(vec![mnemonic(
        16,
        vec![assign("b", Rvalue::Undefined)],
    )]));
    let b8 = proc.add_block(BasicBlock::new(vec![mnemonic(
        17,
        vec![assign("c", Rvalue::Undefined)],
    )]));

    proc.unconditional_jump(b0, b1);
    proc.unconditional_jump(b1, b2);
    proc.unconditional_jump(b1, b5);
    proc.unconditional_jump(b5, b6);
    proc.unconditional_jump(b5, b8);
    proc.unconditional_jump(b6, b7);
    proc.unconditional_jump(b8, b7);
    proc.unconditional_jump(b2, b3);
    proc.unconditional_jump(b7, b3);
    proc.unconditional_jump(b3, b4);
    proc.unconditional_jump(b3, b1);

    proc.entry = Some(b0);

    (proc, [b0, b1, b2, b3, b4, b5, b6, b7, b8])
}

#[test]
fn dominance() {
    let (proc, [b0, b1, b2, b3, b4, b5, b6, b7, b8]) = fixture();
    let dom = dominance_tree(&proc).unwrap();

    assert_eq!(dom.root, b0);
    assert_eq!(dom.idom[&b0], b0);
    assert_eq!(dom.idom[&b1], b0);
    assert_eq!(dom.idom[&b2], b1);
    assert_eq!(dom.idom[&b3], b1);
    assert_eq!(dom.idom[&b4], b3);
    assert_eq!(dom.idom[&b5], b1);
    assert_eq!(dom.idom[&b6], b5);
    assert_eq!(dom.idom[&b7], b5);
    assert_eq!(dom.idom[&b8], b5);

    assert_eq!(dom.children(b0), vec![b1]);
    assert_eq!(dom.children(b1), vec![b2, b3, b5]);
    assert_eq!(dom.children(b2), vec![]);
    assert_eq!(dom.children(b3), vec![b4]);
    assert_eq!(dom.children(b5), vec![b6, b7, b8]);

    assert_eq!(dom.frontiers.len(), 7);
    assert!(!dom.frontiers.contains_key(&b0));
    assert!(!dom.frontiers.contains_key(&b4));
    assert_eq!(dom.frontiers[&b1], BTreeSet::from([b1]));
    assert_eq!(dom.frontiers[&b2], BTreeSet::from([b3]));
    assert_eq!(dom.frontiers[&b3], BTreeSet::from([b1]));
    assert_eq!(dom.frontiers[&b5], BTreeSet::from([b3]));
    assert_eq!(dom.frontiers[&b6], BTreeSet::from([b7]));
    assert_eq!(dom.frontiers[&b7], BTreeSet::from([b3]));
    assert_eq!(dom.frontiers[&b8], BTreeSet::from([b7]));
}

#[test]
fn liveness_sets() {
    let (proc, [b0, b1, b2, b3, b4, b5, b6, b7, b8]) = fixture();
    let live = liveness(&proc);

    assert_eq!(live.names.len(), 7);

    assert_eq!(live.usage["a"], BTreeSet::from([b1, b5]));
    assert_eq!(live.usage["b"], BTreeSet::from([b2, b7]));
    assert_eq!(live.usage["c"], BTreeSet::from([b1, b2, b8]));
    assert_eq!(live.usage["d"], BTreeSet::from([b2, b5, b6]));
    assert_eq!(live.usage["i"], BTreeSet::from([b0, b3]));
    assert_eq!(live.usage["y"], BTreeSet::from([b3]));
    assert_eq!(live.usage["z"], BTreeSet::from([b3]));

    for (vx, expected) in [(b0, 0), (b1, 0), (b2, 0), (b3, 5), (b4, 0), (b5, 0), (b6, 0), (b7, 0), (b8, 0)] {
        assert_eq!(live.of(vx).uevar.len(), expected, "uevar of {vx:?}");
    }

    for (vx, expected) in [(b0, 1), (b1, 2), (b2, 3), (b3, 3), (b4, 0), (b5, 2), (b6, 1), (b7, 1), (b8, 1)] {
        assert_eq!(live.of(vx).varkill.len(), expected, "varkill of {vx:?}");
    }

    for (vx, expected) in [(b0, 1), (b1, 3), (b2, 5), (b3, 1), (b4, 0), (b5, 4), (b6, 4), (b7, 5), (b8, 4)] {
        assert_eq!(live.of(vx).liveout.len(), expected, "liveout of {vx:?}");
    }

    let names = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>();
    assert_eq!(names(&live.of(b2).liveout), vec!["a", "b", "c", "d", "i"]);
    assert_eq!(names(&live.of(b3).liveout), vec!["i"]);
}

#[test]
fn phi_placement() {
    let (mut proc, [b0, b1, b2, b3, b4, b5, b6, b7, b8]) = fixture();
    let dom = dominance_tree(&proc).unwrap();
    let live = liveness(&proc);

    ssa(&mut proc, &dom, &live).unwrap();

    let has_phis = |vx| {
        proc.block(vx).unwrap().mnemonics()[0].opcode == PHI_MNEMONIC
    };

    assert!(!has_phis(b0));
    assert!(has_phis(b1));
    assert!(!has_phis(b2));
    assert!(has_phis(b3));
    assert!(!has_phis(b4));
    assert!(!has_phis(b5));
    assert!(!has_phis(b6));
    assert!(has_phis(b7));
    assert!(!has_phis(b8));
}

#[test]
fn ssa_definitions_are_unique() {
    let (mut proc, blocks) = fixture();
    let dom = dominance_tree(&proc).unwrap();
    let live = liveness(&proc);

    ssa(&mut proc, &dom, &live).unwrap();

    let mut definitions = Vec::new();

    proc.execute(|stmt| {
        if let Some(v) = stmt.assignee.as_variable() {
            assert!(v.subscript.is_some(), "unrenamed assignee {}", v.name);
            definitions.push((v.name.clone(), v.subscript));
        }
    });

    let unique: BTreeSet<_> = definitions.iter().cloned().collect();
    assert_eq!(unique.len(), definitions.len(), "duplicate SSA definition");

    // every use carries a subscript as well
    proc.execute(|stmt| {
        if !stmt.op.is_phi() {
            for operand in stmt.op.operands() {
                if let Rvalue::Variable(v) = operand {
                    assert!(v.subscript.is_some(), "unrenamed use of {}", v.name);
                }
            }
        }
    });

    // φ-operand arity equals the in-degree of the containing block
    for vx in blocks {
        let in_degree = proc.cfg().in_degree(vx);
        let bb = proc.block(vx).unwrap();

        bb.execute(|stmt| {
            if let Operation::UnivPhi(ops) = &stmt.op {
                assert_eq!(ops.len(), in_degree, "phi arity in {vx:?}");
            }
        });
    }
}

#[test]
fn ssa_phi_blocks_stay_zero_width() {
    let (mut proc, [_, b1, ..]) = fixture();
    let dom = dominance_tree(&proc).unwrap();
    let live = liveness(&proc);
    let area_before = proc.block(b1).unwrap().area();

    ssa(&mut proc, &dom, &live).unwrap();

    let bb = proc.block(b1).unwrap();
    assert_eq!(bb.area(), area_before);
    assert!(bb.mnemonics()[0].area.is_empty());
    assert_eq!(bb.mnemonics()[0].area.lower(), area_before.lower());
}
