//! Call graphs.

use std::collections::BTreeSet;

use itertools::Itertools;
use panopticon_disasm::{Architecture, Disassembler};
use panopticon_graph::{Digraph, VertexDescriptor};
use panopticon_il::{Operation, Rvalue};
use panopticon_region::Slab;
use panopticon_types::{Offset, Ref};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{procedure, AnalysisError, Cancellation, Procedure};

/// A set of procedures over one region, linked by call edges.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Program {
    /// Stable identity.
    pub uuid: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Name of the region the procedures decode from.
    pub region: String,
    calls: Digraph<Procedure, ()>,
}

impl Program {
    /// Empty program over the named region.
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            region: region.into(),
            calls: Digraph::new(),
        }
    }

    /// The call graph.
    pub fn calls(&self) -> &Digraph<Procedure, ()> {
        &self.calls
    }

    /// All procedures with their call-graph vertices.
    pub fn procedures(&self) -> impl Iterator<Item = (VertexDescriptor, &Procedure)> {
        self.calls
            .vertices()
            .filter_map(|vx| self.calls.vertex_label(vx).map(|proc| (vx, proc)))
    }

    /// The procedure whose entry block starts at `offset`.
    pub fn find_procedure_at(&self, offset: Offset) -> Option<VertexDescriptor> {
        self.procedures()
            .find(|(_, proc)| {
                proc.entry
                    .and_then(|vx| proc.block(vx))
                    .is_some_and(|bb| bb.area().lower() == offset)
            })
            .map(|(vx, _)| vx)
    }

    /// The procedure with the given identity.
    pub fn find_procedure(&self, uuid: &Uuid) -> Option<VertexDescriptor> {
        self.procedures()
            .find(|(_, proc)| proc.uuid == *uuid)
            .map(|(vx, _)| vx)
    }

    /// Mutable access to one procedure.
    pub fn procedure_mut(&mut self, vx: VertexDescriptor) -> Option<&mut Procedure> {
        self.calls.vertex_label_mut(vx)
    }

    /// Insert a procedure without connecting it.
    pub fn insert_procedure(&mut self, proc: Procedure) -> VertexDescriptor {
        self.calls.insert_vertex(proc)
    }

    /// Add a call edge between two procedures.
    pub fn call(&mut self, from: VertexDescriptor, to: VertexDescriptor) {
        let duplicate = self
            .calls
            .out_edges(from)
            .any(|ed| self.calls.target(ed) == to);

        if !duplicate {
            self.calls.insert_edge((), from, to);
        }
    }
}

/// Constant call targets referenced by a procedure's IL.
fn call_targets(proc: &Procedure) -> Vec<Offset> {
    let mut targets = Vec::new();

    proc.execute(|stmt| {
        if let Operation::IntCall(Rvalue::Constant(c)) = &stmt.op {
            targets.push(*c);
        }
    });

    targets.into_iter().unique().collect()
}

/// Disassemble `data` starting at `reference`, creating or extending a
/// program.
///
/// Every constant call target discovered while decoding spawns another
/// procedure; caller and callee are linked in the call graph. Returns
/// `None` when not a single byte could be decoded.
pub fn disassemble<A: Architecture>(
    program: Option<Program>,
    main: &Disassembler<A>,
    init: &A::State,
    data: &Slab,
    reference: &Ref,
) -> Result<Option<Program>, AnalysisError> {
    disassemble_cancellable(program, main, init, data, reference, &Cancellation::new())
}

/// [`disassemble`] with a cancellation flag polled between procedures.
pub fn disassemble_cancellable<A: Architecture>(
    program: Option<Program>,
    main: &Disassembler<A>,
    init: &A::State,
    data: &Slab,
    reference: &Ref,
    cancel: &Cancellation,
) -> Result<Option<Program>, AnalysisError> {
    let had_program = program.is_some();
    let mut prog = program
        .unwrap_or_else(|| Program::new(format!("prog_{}", reference.region), &reference.region));
    let mut worklist: BTreeSet<Offset> = BTreeSet::from([reference.offset]);

    while let Some(entry) = worklist.pop_first() {
        if cancel.is_cancelled() {
            break;
        }

        if prog.find_procedure_at(entry).is_some() {
            continue;
        }

        debug!(offset = entry, "disassembling procedure");

        let Some(proc) =
            procedure::disassemble_cancellable(None, main, init, data, entry, cancel)?
        else {
            warn!(offset = entry, "nothing decoded, procedure dropped");
            continue;
        };

        let targets = call_targets(&proc);
        let vx = prog.insert_procedure(proc);

        for target in targets {
            if let Some(callee) = prog.find_procedure_at(target) {
                prog.call(vx, callee);
            } else {
                worklist.insert(target);
            }
        }
    }

    // connect calls whose callee was decoded after the caller
    let pending: Vec<(VertexDescriptor, Offset)> = prog
        .procedures()
        .flat_map(|(vx, proc)| call_targets(proc).into_iter().map(move |t| (vx, t)))
        .collect();

    for (caller, target) in pending {
        if let Some(callee) = prog.find_procedure_at(target) {
            prog.call(caller, callee);
        }
    }

    if !had_program && prog.calls.num_vertices() == 0 {
        return Ok(None);
    }

    Ok(Some(prog))
}
