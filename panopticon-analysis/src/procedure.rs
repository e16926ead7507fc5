//! Procedures and control-flow reconstruction.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use panopticon_disasm::{Architecture, Disassembler, SemState, TokenView};
use panopticon_graph::{Digraph, VertexDescriptor};
use panopticon_il::{Guard, Mnemonic, Rvalue};
use panopticon_region::Slab;
use panopticon_types::Offset;
use tracing::warn;
use uuid::Uuid;

use crate::{AnalysisError, BasicBlock, Cancellation, CfgNode};

/// Control-transfer graph of a procedure.
pub type Cfg = Digraph<CfgNode, Guard>;

/// A function: basic blocks and unresolved targets connected by guarded
/// control transfers.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Procedure {
    /// Stable identity, used by the session command surface.
    pub uuid: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Entry basic block, if known.
    pub entry: Option<VertexDescriptor>,
    cfg: Cfg,
    #[cfg_attr(feature = "serde", serde(skip))]
    postorder: RefCell<Option<Vec<VertexDescriptor>>>,
}

impl Procedure {
    /// Empty procedure called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            entry: None,
            cfg: Cfg::new(),
            postorder: RefCell::new(None),
        }
    }

    /// The control-transfer graph.
    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    /// Mutable control-transfer graph. Cached traversal orders are dropped.
    pub fn cfg_mut(&mut self) -> &mut Cfg {
        self.postorder.replace(None);
        &mut self.cfg
    }

    /// Basic block stored at `vx`.
    pub fn block(&self, vx: VertexDescriptor) -> Option<&BasicBlock> {
        self.cfg.vertex_label(vx)?.as_block()
    }

    /// Add a basic block node.
    pub fn add_block(&mut self, block: BasicBlock) -> VertexDescriptor {
        self.cfg_mut().insert_vertex(CfgNode::Block(block))
    }

    /// Block vertices with their blocks, in insertion order.
    pub fn blocks(&self) -> impl Iterator<Item = (VertexDescriptor, &BasicBlock)> {
        self.cfg.vertices().filter_map(|vx| {
            self.cfg
                .vertex_label(vx)
                .and_then(CfgNode::as_block)
                .map(|bb| (vx, bb))
        })
    }

    /// Vertex of the basic block starting at `offset`.
    pub fn find_block_at(&self, offset: Offset) -> Option<VertexDescriptor> {
        self.blocks()
            .find(|(_, bb)| bb.area().lower() == offset)
            .map(|(vx, _)| vx)
    }

    /// Add a control transfer between two blocks.
    pub fn conditional_jump(&mut self, from: VertexDescriptor, to: VertexDescriptor, guard: Guard) {
        self.cfg_mut().insert_edge(guard, from, to);
    }

    /// Add a control transfer from a block to an unresolved target value.
    ///
    /// Equal constant targets share one node; other targets stay separate
    /// because SSA renames them per control transfer.
    pub fn conditional_jump_to_value(&mut self, from: VertexDescriptor, to: Rvalue, guard: Guard) {
        let node = to
            .is_constant()
            .then(|| self.cfg.find_vertex(|label| label.as_value() == Some(&to)))
            .flatten()
            .unwrap_or_else(|| self.cfg_mut().insert_vertex(CfgNode::Value(to)));

        self.cfg_mut().insert_edge(guard, from, node);
    }

    /// Add an unconditional control transfer between two blocks.
    pub fn unconditional_jump(&mut self, from: VertexDescriptor, to: VertexDescriptor) {
        self.conditional_jump(from, to, Guard::always());
    }

    /// Point every edge ending in the unresolved value `value` at the block
    /// `to` instead, dropping the value node.
    pub fn resolve(&mut self, value: &Rvalue, to: VertexDescriptor) {
        let Some(node) = self.cfg.find_vertex(|label| label.as_value() == Some(value)) else {
            return;
        };
        let incoming: Vec<_> = self.cfg.in_edges(node).collect();

        for ed in incoming {
            let from = self.cfg.source(ed);
            let guard = self.cfg.edge_label(ed).cloned().unwrap_or_default();

            self.cfg_mut().insert_edge(guard, from, to);
        }

        self.cfg_mut().remove_vertex(node);
    }

    /// Run `f` over every IL statement of the procedure. Blocks are visited
    /// in vertex order.
    pub fn execute(&self, mut f: impl FnMut(&panopticon_il::Statement)) {
        for (_, bb) in self.blocks() {
            bb.execute(&mut f);
        }
    }

    /// Vertices reachable from the entry, in reverse postorder.
    pub fn rev_postorder(&self) -> Vec<VertexDescriptor> {
        if let Some(order) = self.postorder.borrow().as_ref() {
            return order.clone();
        }

        let mut order = Vec::new();

        if let Some(entry) = self.entry {
            let mut seen = BTreeSet::new();
            let mut stack = vec![(entry, self.cfg.out_edges(entry).collect::<Vec<_>>())];

            seen.insert(entry);

            while let Some((vx, edges)) = stack.last_mut() {
                match edges.pop() {
                    Some(ed) => {
                        let next = self.cfg.target(ed);

                        if seen.insert(next) {
                            let out = self.cfg.out_edges(next).collect();
                            stack.push((next, out));
                        }
                    }
                    None => {
                        order.push(*vx);
                        stack.pop();
                    }
                }
            }

            order.reverse();
        }

        *self.postorder.borrow_mut() = Some(order.clone());
        order
    }

    /// Split the block at `vx` in two at offset `pos`.
    ///
    /// With `keep` true the mnemonic covering `pos` ends the first half,
    /// otherwise it starts the second half. Incoming edges stay on the
    /// first half, outgoing edges move to the second, and the halves are
    /// linked by an unconditional transfer.
    pub fn split(
        &mut self,
        vx: VertexDescriptor,
        pos: Offset,
        keep: bool,
    ) -> Result<(VertexDescriptor, VertexDescriptor), AnalysisError> {
        let block = self.block(vx).ok_or(AnalysisError::NotABlock)?.clone();
        let (first, second): (Vec<Mnemonic>, Vec<Mnemonic>) =
            block.mnemonics().iter().cloned().partition(|m| {
                if keep {
                    m.area.lower() <= pos
                } else {
                    m.area.lower() < pos
                }
            });

        if first.is_empty() || second.is_empty() {
            return Err(AnalysisError::NotABlock);
        }

        let outgoing: Vec<_> = self
            .cfg
            .out_edges(vx)
            .map(|ed| (self.cfg.target(ed), self.cfg.edge_label(ed).cloned().unwrap_or_default()))
            .collect();

        let up = self.add_block(BasicBlock::new(first));
        let down = self.add_block(BasicBlock::new(second));
        let incoming: Vec<_> = self
            .cfg
            .in_edges(vx)
            .map(|ed| (self.cfg.source(ed), self.cfg.edge_label(ed).cloned().unwrap_or_default()))
            .collect();

        for (src, guard) in incoming {
            let src = if src == vx { down } else { src };
            self.cfg_mut().insert_edge(guard, src, up);
        }

        for (tgt, guard) in outgoing {
            let tgt = if tgt == vx { up } else { tgt };
            self.cfg_mut().insert_edge(guard, down, tgt);
        }

        self.unconditional_jump(up, down);

        if self.entry == Some(vx) {
            self.entry = Some(up);
        }
        self.cfg_mut().remove_vertex(vx);

        Ok((up, down))
    }

    /// Merge two blocks linked by a single unconditional fall-through into
    /// one.
    pub fn merge(
        &mut self,
        up: VertexDescriptor,
        down: VertexDescriptor,
    ) -> Result<VertexDescriptor, AnalysisError> {
        let first = self.block(up).ok_or(AnalysisError::NotABlock)?.clone();
        let second = self.block(down).ok_or(AnalysisError::NotABlock)?.clone();

        if first.area().upper() != second.area().lower() {
            return Err(AnalysisError::NotABlock);
        }

        let mut mnemonics = first.mnemonics().to_vec();
        mnemonics.extend(second.mnemonics().iter().cloned());

        let incoming: Vec<_> = self
            .cfg
            .in_edges(up)
            .map(|ed| (self.cfg.source(ed), self.cfg.edge_label(ed).cloned().unwrap_or_default()))
            .collect();
        let outgoing: Vec<_> = self
            .cfg
            .out_edges(down)
            .map(|ed| (self.cfg.target(ed), self.cfg.edge_label(ed).cloned().unwrap_or_default()))
            .collect();

        let merged = self.add_block(BasicBlock::new(mnemonics));

        for (src, guard) in incoming {
            let src = if src == down { merged } else { src };
            self.cfg_mut().insert_edge(guard, src, merged);
        }

        for (tgt, guard) in outgoing {
            let tgt = if tgt == up { merged } else { tgt };
            self.cfg_mut().insert_edge(guard, merged, tgt);
        }

        if self.entry == Some(up) || self.entry == Some(down) {
            self.entry = Some(merged);
        }
        self.cfg_mut().remove_vertex(up);
        self.cfg_mut().remove_vertex(down);

        Ok(merged)
    }
}

enum JumpTarget {
    Constant(Offset),
    Symbolic(Rvalue),
}

/// Create or extend a procedure by disassembling `data` from `start`.
///
/// Decoding runs a worklist over constant jump targets; adjacent mnemonics
/// are fused into basic blocks afterwards. Bad seeds, match failures and
/// overlapping decodes are logged and skipped, so a partial but consistent
/// procedure survives bad bytes. Returns `None` when nothing could be
/// decoded at all.
pub fn disassemble<A: Architecture>(
    existing: Option<Procedure>,
    main: &Disassembler<A>,
    init: &A::State,
    data: &Slab,
    start: Offset,
) -> Result<Option<Procedure>, AnalysisError> {
    disassemble_cancellable(existing, main, init, data, start, &Cancellation::new())
}

/// [`disassemble`] with a cancellation flag polled between worklist
/// iterations. Raising the flag yields a partial but consistent procedure
/// from whatever was decoded up to that point.
pub fn disassemble_cancellable<A: Architecture>(
    existing: Option<Procedure>,
    main: &Disassembler<A>,
    init: &A::State,
    data: &Slab,
    start: Offset,
    cancel: &Cancellation,
) -> Result<Option<Procedure>, AnalysisError> {
    let mut todo: BTreeSet<Offset> = BTreeSet::new();
    let mut mnemonics: BTreeMap<Offset, Vec<Mnemonic>> = BTreeMap::new();
    let mut sources: BTreeMap<Offset, Vec<(JumpTarget, Guard)>> = BTreeMap::new();
    let mut destinations: BTreeMap<Offset, Vec<(Offset, Guard)>> = BTreeMap::new();
    let mut entry_offset = start;
    let mut previous_identity = None;

    // carry over what an earlier pass decoded
    if let Some(proc) = &existing {
        if let Some(bb) = proc.entry.and_then(|vx| proc.block(vx)) {
            entry_offset = bb.area().lower();
        }
        previous_identity = Some((proc.uuid, proc.name.clone()));

        for vx in proc.cfg().vertices() {
            match proc.cfg().vertex_label(vx) {
                Some(CfgNode::Block(bb)) => {
                    for m in bb.mnemonics() {
                        if !m.is_synthetic() {
                            mnemonics.entry(m.area.lower()).or_default().push(m.clone());
                        }
                    }
                }
                Some(CfgNode::Value(Rvalue::Constant(c))) => {
                    todo.insert(*c);
                }
                _ => {}
            }
        }

        for ed in proc.cfg().edges() {
            let guard = proc.cfg().edge_label(ed).cloned().unwrap_or_default();
            let src = proc.cfg().vertex_label(proc.cfg().source(ed));
            let tgt = proc.cfg().vertex_label(proc.cfg().target(ed));
            let src_last = match src {
                Some(CfgNode::Block(bb)) => Some(bb.area().last()),
                Some(CfgNode::Value(Rvalue::Constant(c))) => Some(*c),
                _ => None,
            };
            let tgt_lower = match tgt {
                Some(CfgNode::Block(bb)) => Some(bb.area().lower()),
                Some(CfgNode::Value(Rvalue::Constant(c))) => Some(*c),
                _ => None,
            };

            if let (Some(last), Some(lower)) = (src_last, tgt_lower) {
                sources
                    .entry(last)
                    .or_default()
                    .push((JumpTarget::Constant(lower), guard.clone()));
                destinations.entry(lower).or_default().push((last, guard));
            }
        }
    }

    todo.insert(start);

    while let Some(cur) = todo.pop_first() {
        if cancel.is_cancelled() {
            break;
        }

        if cur >= data.size() {
            warn!(offset = cur, size = data.size(), "seed outside the slab, dropped");
            continue;
        }

        // the closest decoded mnemonic at or before the seed
        if let Some((_, decoded)) = mnemonics.range(..=cur).next_back() {
            let area = decoded
                .iter()
                .map(|m| m.area)
                .reduce(|a, b| a.hull(&b))
                .expect("never stored empty");

            if area.contains(cur) {
                if area.lower() != cur {
                    warn!(offset = cur, area = %area, "decoding into an existing mnemonic, skipped");
                }
                continue;
            }
        }

        let window_end = mnemonics
            .range(cur + 1..)
            .next()
            .map(|(lower, _)| *lower)
            .unwrap_or_else(|| data.size());
        let view = TokenView::<A>::new(data, cur, window_end);
        let state = SemState::<A>::new(cur, init.clone());

        match main.try_match(&view, state)? {
            Some((_, state)) => {
                let mut last = 0;

                for m in state.mnemonics {
                    last = last.max(m.area.last());
                    mnemonics.entry(m.area.lower()).or_default().push(m);
                }

                for (target, guard) in state.jumps {
                    match target {
                        Rvalue::Constant(c) => {
                            sources
                                .entry(last)
                                .or_default()
                                .push((JumpTarget::Constant(c), guard.clone()));
                            destinations.entry(c).or_default().push((last, guard));
                            todo.insert(c);
                        }
                        rv => {
                            sources
                                .entry(last)
                                .or_default()
                                .push((JumpTarget::Symbolic(rv), guard));
                        }
                    }
                }
            }
            None => {
                warn!(offset = cur, "no rule matched, offset dropped");
            }
        }
    }

    if mnemonics.is_empty() {
        return Ok(None);
    }

    // fuse address-adjacent mnemonics into basic blocks
    let mut proc = Procedure::new("(unnamed)");

    if let Some((uuid, ref name)) = previous_identity {
        proc.uuid = uuid;
        proc.name = name.clone();
    }

    let keys: Vec<Offset> = mnemonics.keys().copied().collect();
    let mut blocks: BTreeMap<Offset, VertexDescriptor> = BTreeMap::new();
    let mut group: Vec<Mnemonic> = Vec::new();

    for (idx, key) in keys.iter().enumerate() {
        let batch = &mnemonics[key];
        let area = batch
            .iter()
            .map(|m| m.area)
            .reduce(|a, b| a.hull(&b))
            .expect("never stored empty");
        let next_key = keys.get(idx + 1).copied();

        group.extend(batch.iter().cloned());

        let Some(next) = next_key else {
            break;
        };

        if area.is_empty() {
            continue;
        }

        // a block ends when the next mnemonic is not adjacent, when a jump
        // leaves here to somewhere else, or when a jump enters the next
        // mnemonic from somewhere else
        let jump_away = sources.get(&area.last()).is_some_and(|jumps| {
            jumps.iter().any(|(target, _)| match target {
                JumpTarget::Constant(c) => *c != area.upper(),
                JumpTarget::Symbolic(_) => true,
            })
        });
        let jump_into_next = destinations
            .get(&area.upper())
            .is_some_and(|froms| froms.iter().any(|(from, _)| *from != area.last()));

        if next != area.upper() || jump_away || jump_into_next {
            let bb = BasicBlock::new(std::mem::take(&mut group));

            blocks.insert(bb.area().last(), proc.add_block(bb));
        } else {
            // plain fall-through; the jump entries must not become edges
            sources.remove(&area.last());
            destinations.remove(&area.upper());
        }
    }

    if !group.is_empty() {
        let bb = BasicBlock::new(group);

        blocks.insert(bb.area().last(), proc.add_block(bb));
    }

    // wire the control transfers
    for (src_last, jumps) in sources {
        let Some(from) = blocks.get(&src_last).copied() else {
            warn!(offset = src_last, "jump source is not part of any block");
            continue;
        };

        for (target, guard) in jumps {
            match target {
                JumpTarget::Constant(c) => {
                    let to = blocks
                        .range(c..)
                        .next()
                        .map(|(_, vx)| *vx)
                        .filter(|vx| proc.block(*vx).is_some_and(|bb| bb.area().lower() == c));

                    match to {
                        Some(to) => proc.conditional_jump(from, to, guard),
                        None => {
                            proc.conditional_jump_to_value(from, Rvalue::Constant(c), guard)
                        }
                    }
                }
                JumpTarget::Symbolic(rv) => proc.conditional_jump_to_value(from, rv, guard),
            }
        }
    }

    // the requested entry may have been split into a later block
    proc.entry = proc.find_block_at(entry_offset).or_else(|| {
        blocks
            .range(start..)
            .next()
            .map(|(_, vx)| *vx)
            .or_else(|| blocks.values().next().copied())
    });

    if previous_identity.is_none() {
        if let Some(bb) = proc.entry.and_then(|vx| proc.block(vx)) {
            proc.name = format!("proc_{}", bb.area().lower());
        }
    }

    Ok(Some(proc))
}
