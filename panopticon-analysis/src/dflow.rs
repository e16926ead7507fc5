//! Dominance and liveness analyses.

use std::collections::{BTreeMap, BTreeSet};

use panopticon_graph::VertexDescriptor;
use panopticon_il::Rvalue;

use crate::{CfgNode, Procedure};

/// Dominator tree and dominance frontiers of a procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DominanceTree {
    /// The tree root, equal to the procedure entry.
    pub root: VertexDescriptor,
    /// Immediate dominator of every reachable vertex; the root maps to
    /// itself.
    pub idom: BTreeMap<VertexDescriptor, VertexDescriptor>,
    /// Dominance frontier of every basic block that has one.
    pub frontiers: BTreeMap<VertexDescriptor, BTreeSet<VertexDescriptor>>,
}

impl DominanceTree {
    /// Children of `vx` in the dominator tree.
    pub fn children(&self, vx: VertexDescriptor) -> Vec<VertexDescriptor> {
        self.idom
            .iter()
            .filter(|(child, parent)| **parent == vx && **child != vx)
            .map(|(child, _)| *child)
            .collect()
    }
}

/// Compute the dominator tree of `proc` with Lengauer-Tarjan, plus the
/// dominance frontiers of its basic blocks.
///
/// Returns `None` when the procedure has no entry.
pub fn dominance_tree(proc: &Procedure) -> Option<DominanceTree> {
    let entry = proc.entry?;
    let cfg = proc.cfg();

    // DFS numbering from the entry; the parent is taken from the edge the
    // search actually descended, so the spanning tree is a true DFS tree
    let mut order: Vec<VertexDescriptor> = Vec::new();
    let mut dfnum: BTreeMap<VertexDescriptor, usize> = BTreeMap::new();
    let mut parent: BTreeMap<VertexDescriptor, VertexDescriptor> = BTreeMap::new();
    let mut stack: Vec<(VertexDescriptor, Option<VertexDescriptor>)> = vec![(entry, None)];

    while let Some((vx, via)) = stack.pop() {
        if dfnum.contains_key(&vx) {
            continue;
        }

        dfnum.insert(vx, order.len());
        order.push(vx);
        if let Some(via) = via {
            parent.insert(vx, via);
        }

        for ed in cfg.out_edges(vx) {
            let next = cfg.target(ed);

            if !dfnum.contains_key(&next) {
                stack.push((next, Some(vx)));
            }
        }
    }

    let n = order.len();
    let num = |vx: VertexDescriptor| dfnum[&vx];

    // semidominators with path-compressing eval
    let mut semi: Vec<usize> = (0..n).collect();
    let mut ancestor: Vec<Option<usize>> = vec![None; n];
    let mut label: Vec<usize> = (0..n).collect();
    let mut bucket: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut idom_num: Vec<usize> = vec![0; n];

    fn eval(v: usize, semi: &[usize], ancestor: &mut [Option<usize>], label: &mut [usize]) -> usize {
        if ancestor[v].is_none() {
            return label[v];
        }

        // compress the ancestor path down to the root of the forest
        let mut path = vec![v];
        let mut cur = v;

        while let Some(a) = ancestor[cur] {
            if ancestor[a].is_some() {
                path.push(a);
            }
            cur = a;
        }

        for &u in path.iter().rev().skip(1) {
            let a = ancestor[u].expect("on a path");

            if semi[label[a]] < semi[label[u]] {
                label[u] = label[a];
            }
            ancestor[u] = ancestor[a];
        }

        label[v]
    }

    for w_num in (1..n).rev() {
        let w = order[w_num];
        let p = num(parent[&w]);

        for ed in cfg.in_edges(w) {
            let v = cfg.source(ed);

            if let Some(&v_num) = dfnum.get(&v) {
                let u = eval(v_num, &semi, &mut ancestor, &mut label);

                if semi[u] < semi[w_num] {
                    semi[w_num] = semi[u];
                }
            }
        }

        bucket[semi[w_num]].push(w_num);
        ancestor[w_num] = Some(p);

        for v in std::mem::take(&mut bucket[p]) {
            let u = eval(v, &semi, &mut ancestor, &mut label);

            idom_num[v] = if semi[u] < semi[v] { u } else { p };
        }
    }

    for w_num in 1..n {
        if idom_num[w_num] != semi[w_num] {
            idom_num[w_num] = idom_num[idom_num[w_num]];
        }
    }

    let mut idom: BTreeMap<VertexDescriptor, VertexDescriptor> = BTreeMap::new();

    idom.insert(entry, entry);
    for w_num in 1..n {
        idom.insert(order[w_num], order[idom_num[w_num]]);
    }

    // dominance frontiers of the basic blocks
    let mut frontiers: BTreeMap<VertexDescriptor, BTreeSet<VertexDescriptor>> = BTreeMap::new();

    for &vx in &order {
        if !matches!(cfg.vertex_label(vx), Some(CfgNode::Block(_))) {
            continue;
        }

        let preds: Vec<VertexDescriptor> = cfg
            .in_edges(vx)
            .map(|ed| cfg.source(ed))
            .filter(|pred| dfnum.contains_key(pred))
            .collect();

        if preds.len() < 2 {
            continue;
        }

        for pred in preds {
            let mut runner = pred;

            while runner != idom[&vx] {
                frontiers.entry(runner).or_default().insert(vx);
                runner = idom[&runner];
            }
        }
    }

    Some(DominanceTree {
        root: entry,
        idom,
        frontiers,
    })
}

/// Liveness facts of one basic block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockLiveness {
    /// Names read before any write in the block.
    pub uevar: BTreeSet<String>,
    /// Names written by the block.
    pub varkill: BTreeSet<String>,
    /// Names live on exit from the block.
    pub liveout: BTreeSet<String>,
}

/// Result of the liveness analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Liveness {
    /// Every variable name of the procedure.
    pub names: BTreeSet<String>,
    /// Blocks defining each name.
    pub usage: BTreeMap<String, BTreeSet<VertexDescriptor>>,
    /// Per-block facts.
    pub blocks: BTreeMap<VertexDescriptor, BlockLiveness>,
}

impl Liveness {
    /// Facts of the block at `vx`; empty facts for unknown vertices.
    pub fn of(&self, vx: VertexDescriptor) -> BlockLiveness {
        self.blocks.get(&vx).cloned().unwrap_or_default()
    }
}

/// Compute upward-exposed uses, kills and live-out sets for every reachable
/// basic block.
///
/// Uses in outgoing-edge guards and in symbolic jump targets count towards
/// the block they leave.
pub fn liveness(proc: &Procedure) -> Liveness {
    let mut live = Liveness::default();
    let cfg = proc.cfg();
    let order: Vec<VertexDescriptor> = proc
        .rev_postorder()
        .into_iter()
        .filter(|vx| matches!(cfg.vertex_label(*vx), Some(CfgNode::Block(_))))
        .collect();

    fn collect(rv: &Rvalue, facts: &mut BlockLiveness, names: &mut BTreeSet<String>) {
        if let Rvalue::Variable(var) = rv {
            names.insert(var.name.clone());
            if !facts.varkill.contains(&var.name) {
                facts.uevar.insert(var.name.clone());
            }
        }
    }

    for &vx in &order {
        let bb = proc.block(vx).expect("filtered to blocks");
        let mut facts = BlockLiveness::default();

        bb.execute(|stmt| {
            for operand in stmt.op.operands() {
                collect(operand, &mut facts, &mut live.names);
            }

            if let Some(var) = stmt.assignee.as_variable() {
                facts.varkill.insert(var.name.clone());
                live.names.insert(var.name.clone());
                live.usage.entry(var.name.clone()).or_default().insert(vx);
            }
        });

        for ed in cfg.out_edges(vx) {
            if let Some(CfgNode::Value(rv)) = cfg.vertex_label(cfg.target(ed)) {
                collect(rv, &mut facts, &mut live.names);
            }

            if let Some(guard) = cfg.edge_label(ed) {
                for rel in &guard.relations {
                    collect(&rel.left, &mut facts, &mut live.names);
                    collect(&rel.right, &mut facts, &mut live.names);
                }
            }
        }

        live.blocks.insert(vx, facts);
    }

    // LiveOut(b) = ∪ over successors s of UEVar(s) ∪ (LiveOut(s) ∖ VarKill(s))
    loop {
        let mut changed = false;

        for &vx in &order {
            let mut liveout = BTreeSet::new();

            for ed in cfg.out_edges(vx) {
                let succ = cfg.target(ed);

                if let Some(facts) = live.blocks.get(&succ) {
                    liveout.extend(facts.uevar.iter().cloned());
                    liveout.extend(facts.liveout.difference(&facts.varkill).cloned());
                }
            }

            let facts = live.blocks.get_mut(&vx).expect("collected above");

            if facts.liveout != liveout {
                facts.liveout = liveout;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    live
}
