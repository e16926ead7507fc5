//! SSA construction.

use std::collections::{BTreeMap, BTreeSet};

use panopticon_graph::VertexDescriptor;
use panopticon_il::{Mnemonic, Operation, Rvalue, Statement, Variable, PHI_MNEMONIC};

use crate::{AnalysisError, CfgNode, DominanceTree, Liveness, Procedure};

/// Width of freshly inserted φ-assignees, the widest the value model has.
const PHI_WIDTH: u16 = 64;

/// Transform `proc` into SSA form.
///
/// φ-functions for every name that is live across a block boundary are
/// placed at the dominance frontiers of its defining blocks, collected in a
/// synthetic `internal-phis` mnemonic at the block head. The rename pass
/// then walks the dominator tree, assigning one subscript per definition
/// and pointing every use at the nearest dominating definition.
pub fn ssa(
    proc: &mut Procedure,
    dom: &DominanceTree,
    live: &Liveness,
) -> Result<(), AnalysisError> {
    insert_phis(proc, dom, live);

    let mut renamer = Renamer::new(live, dom);

    renamer.rename(proc, dom.root)
}

fn has_phi_for(bb: &crate::BasicBlock, name: &str) -> bool {
    let mut found = false;

    bb.execute(|stmt| {
        if stmt.op.is_phi() {
            if let Some(var) = stmt.assignee.as_variable() {
                found |= var.name == name;
            }
        }
    });

    found
}

fn insert_phis(proc: &mut Procedure, dom: &DominanceTree, live: &Liveness) {
    let globals: BTreeSet<&String> = live.blocks.values().flat_map(|f| f.uevar.iter()).collect();

    for &name in &globals {
        let mut worklist: BTreeSet<VertexDescriptor> =
            live.usage.get(name).cloned().unwrap_or_default();

        while let Some(vx) = worklist.pop_first() {
            let frontiers = dom.frontiers.get(&vx).cloned().unwrap_or_default();

            for frontier in frontiers {
                let Some(CfgNode::Block(bb)) = proc.cfg_mut().vertex_label_mut(frontier) else {
                    continue;
                };

                if has_phi_for(bb, name) {
                    continue;
                }

                let phi = Statement::new(
                    Operation::UnivPhi(Vec::new()),
                    Variable::new(name.clone(), PHI_WIDTH),
                );

                bb.mutate_mnemonics(|mnemonics| {
                    match mnemonics.first_mut() {
                        Some(head) if head.opcode == PHI_MNEMONIC => {
                            head.instructions.push(phi);
                        }
                        _ => {
                            let at = mnemonics.first().map(|m| m.area.lower()).unwrap_or(0);

                            mnemonics.insert(0, Mnemonic::internal_phis(at, vec![phi]));
                        }
                    }
                });

                worklist.insert(frontier);
            }
        }
    }
}

struct Renamer {
    counters: BTreeMap<String, u32>,
    stacks: BTreeMap<String, Vec<u32>>,
    children: BTreeMap<VertexDescriptor, Vec<VertexDescriptor>>,
}

impl Renamer {
    fn new(live: &Liveness, dom: &DominanceTree) -> Self {
        let mut children: BTreeMap<VertexDescriptor, Vec<VertexDescriptor>> = BTreeMap::new();

        for (child, parent) in &dom.idom {
            if child != parent {
                children.entry(*parent).or_default().push(*child);
            }
        }

        Self {
            counters: live.names.iter().map(|n| (n.clone(), 1)).collect(),
            stacks: live.names.iter().map(|n| (n.clone(), vec![0])).collect(),
            children,
        }
    }

    fn top(&self, name: &str) -> u32 {
        self.stacks
            .get(name)
            .and_then(|stack| stack.last())
            .copied()
            .unwrap_or(0)
    }

    fn push_new(&mut self, name: &str) -> u32 {
        let counter = self.counters.entry(name.to_string()).or_insert(1);
        let subscript = *counter;

        *counter += 1;
        self.stacks
            .entry(name.to_string())
            .or_insert_with(|| vec![0])
            .push(subscript);

        subscript
    }

    fn rename(&mut self, proc: &mut Procedure, vx: VertexDescriptor) -> Result<(), AnalysisError> {
        let mut pushed: Vec<String> = Vec::new();

        // definitions and uses inside the block, in program order; φ-operands
        // are filled from the predecessors instead
        if let Some(CfgNode::Block(bb)) = proc.cfg_mut().vertex_label_mut(vx) {
            bb.rewrite(|stmt| {
                if stmt.op.is_phi() {
                    if let Some(var) = stmt.assignee.as_variable_mut() {
                        let name = var.name.clone();

                        var.subscript = Some(self.push_new(&name));
                        pushed.push(name);
                    }
                } else {
                    for operand in stmt.op.operands_mut() {
                        if let Rvalue::Variable(var) = operand {
                            var.subscript = Some(self.top(&var.name));
                        }
                    }

                    if let Some(var) = stmt.assignee.as_variable_mut() {
                        let name = var.name.clone();

                        var.subscript = Some(self.push_new(&name));
                        pushed.push(name);
                    }
                }
            });
        }

        let out_edges: Vec<_> = proc.cfg().out_edges(vx).collect();

        // uses on the outgoing transfers read the current definitions
        for &ed in &out_edges {
            if let Some(guard) = proc.cfg_mut().edge_label_mut(ed) {
                for rel in &mut guard.relations {
                    for rv in [&mut rel.left, &mut rel.right] {
                        if let Rvalue::Variable(var) = rv {
                            var.subscript = Some(self.top(&var.name));
                        }
                    }
                }
            }

            let target = proc.cfg().target(ed);

            if let Some(CfgNode::Value(Rvalue::Variable(var))) =
                proc.cfg_mut().vertex_label_mut(target)
            {
                var.subscript = Some(self.top(&var.name));
            }
        }

        // fill this edge's slot in the successors' φ-functions
        for &ed in &out_edges {
            let succ = proc.cfg().target(ed);
            let ordinal = proc
                .cfg()
                .in_edges(succ)
                .position(|e| e == ed)
                .expect("edge is incident");

            let Some(CfgNode::Block(bb)) = proc.cfg_mut().vertex_label_mut(succ) else {
                continue;
            };

            if bb.mnemonics().first().map(|m| m.opcode.as_str()) != Some(PHI_MNEMONIC) {
                continue;
            }

            bb.mutate_mnemonics(|mnemonics| {
                for stmt in &mut mnemonics[0].instructions {
                    let Some(var) = stmt.assignee.as_variable() else {
                        continue;
                    };
                    let arg = Variable::versioned(var.name.clone(), var.width, self.top(&var.name));

                    if let Operation::UnivPhi(ops) = &mut stmt.op {
                        while ops.len() <= ordinal {
                            ops.push(Rvalue::Undefined);
                        }
                        ops[ordinal] = Rvalue::Variable(arg);
                    }
                }
            });
        }

        for child in self.children.get(&vx).cloned().unwrap_or_default() {
            if matches!(proc.cfg().vertex_label(child), Some(CfgNode::Block(_))) {
                self.rename(proc, child)?;
            }
        }

        for name in pushed.iter().rev() {
            if let Some(stack) = self.stacks.get_mut(name) {
                stack.pop();
            }
        }

        Ok(())
    }
}
