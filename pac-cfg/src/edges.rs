//! Edge-category queries over a finished graph.
//!
//! Downstream consumers (renderers, subroutine discovery) ask for edges by
//! their role rather than by raw flags; the role depends on both the
//! transition descriptor and the classification of the exit instruction.

use std::collections::BTreeSet;

use pac_asm::PacFile;

use crate::graph::{CodeGraph, Edge, EdgeId, Transition};
use crate::tables::FlowTables;

/// Classified edge access over one graph.
pub struct EdgeQuery<'a> {
    graph: &'a CodeGraph,
    file: &'a PacFile,
    tables: &'a FlowTables,
}

impl<'a> EdgeQuery<'a> {
    /// A query view binding the graph to its file and tables.
    pub fn new(graph: &'a CodeGraph, file: &'a PacFile, tables: &'a FlowTables) -> EdgeQuery<'a> {
        EdgeQuery { graph, file, tables }
    }

    /// Signature of the instruction an edge leaves from.
    fn exit_signature(&self, edge: &Edge) -> Option<u32> {
        let position = self.graph.block(edge.from).exit.position;
        self.file.instruction_at(position).map(|instruction| instruction.signature)
    }

    fn edges_where(
        &self,
        mut keep: impl FnMut(&Edge, Option<u32>) -> bool,
    ) -> Vec<EdgeId> {
        self.graph
            .edges()
            .filter(|(_, edge)| keep(edge, self.exit_signature(edge)))
            .map(|(id, _)| id)
            .collect()
    }

    /// Edges that register callbacks.
    pub fn callback_edges(&self) -> Vec<EdgeId> {
        self.edges_where(|edge, _| edge.flags.contains(Transition::CALLBACK))
    }

    /// Taken unconditional jumps (no return address, no step-over).
    pub fn unconditional_jumps(&self) -> Vec<EdgeId> {
        self.edges_where(|edge, signature| {
            signature.is_some_and(|s| self.tables.uncond_jumps.contains_key(&s))
                && !edge.flags.contains(Transition::SAVE_ADDRESS)
                && !edge.flags.contains(Transition::POTENTIAL)
        })
    }

    /// Taken conditional jumps.
    pub fn conditional_jumps(&self) -> Vec<EdgeId> {
        self.edges_where(|edge, signature| {
            signature.is_some_and(|s| self.tables.cond_jumps.contains_key(&s))
                && !edge.flags.contains(Transition::SAVE_ADDRESS)
        })
    }

    /// Calls through unconditional jump instructions.
    pub fn unconditional_calls(&self) -> Vec<EdgeId> {
        self.edges_where(|edge, signature| {
            signature.is_some_and(|s| self.tables.uncond_jumps.contains_key(&s))
                && edge.flags.contains(Transition::SAVE_ADDRESS)
        })
    }

    /// Calls through conditional jump instructions.
    pub fn conditional_calls(&self) -> Vec<EdgeId> {
        self.edges_where(|edge, signature| {
            signature.is_some_and(|s| self.tables.cond_jumps.contains_key(&s))
                && edge.flags.contains(Transition::SAVE_ADDRESS)
        })
    }

    /// All edges leaving `cmd_inxJmp` blocks.
    pub fn switch_case_edges(&self) -> Vec<EdgeId> {
        let mut edges = Vec::new();
        for (table_offset, _) in self.file.switch_tables() {
            let owner = table_offset
                .checked_sub(1)
                .and_then(|before| self.file.entity_at(before))
                .map(|entity| entity.offset);
            let Some(location) = owner else {
                tracing::warn!("switch-case table at 0x{table_offset:X} has no owner");
                continue;
            };
            let Some((_, id)) = self.graph.block_by_offset(location) else { continue };
            edges.extend(self.graph.outgoing(id).map(|(eid, _)| eid));
        }
        edges
    }

    /// Fallthrough edges inside split chains.
    pub fn unconditional_fallthrough(&self) -> Vec<EdgeId> {
        self.edges_where(|edge, _| {
            edge.flags.contains(Transition::FALLTHROUGH) && self.graph.block(edge.from).is_split
        })
    }

    /// Fallthrough edges of untaken conditional branches.
    pub fn conditional_fallthrough(&self) -> Vec<EdgeId> {
        self.edges_where(|edge, _| {
            edge.flags.contains(Transition::FALLTHROUGH) && !self.graph.block(edge.from).is_split
        })
    }

    /// Special (`doSelect`-style) references.
    pub fn special_edges(&self) -> Vec<EdgeId> {
        self.edges_where(|edge, _| edge.flags.contains(Transition::SPECIAL))
    }

    /// Potential flow after instructions that can force the reader to
    /// return.
    pub fn potential_edges(&self) -> Vec<EdgeId> {
        self.edges_where(|edge, signature| {
            edge.flags.contains(Transition::POTENTIAL)
                && !signature.is_some_and(|s| self.tables.saves_ra(s))
        })
    }

    /// Potential flow past call-like instructions (where a debugger lands
    /// after stepping over).
    pub fn step_over_edges(&self) -> Vec<EdgeId> {
        self.edges_where(|edge, signature| {
            edge.flags.contains(Transition::POTENTIAL)
                && signature.is_some_and(|s| self.tables.saves_ra(s))
        })
    }

    /// Every jump that does not save a return address.
    pub fn all_jumps(&self) -> Vec<EdgeId> {
        let mut edges = self.unconditional_jumps();
        edges.extend(self.conditional_jumps());
        edges.extend(self.switch_case_edges());
        edges
    }

    /// Every transfer that saves a return address.
    pub fn all_calls(&self) -> Vec<EdgeId> {
        self.edges_where(|edge, _| edge.flags.contains(Transition::SAVE_ADDRESS))
    }

    /// Offsets of the bare flow truncators (`cmd_end`, `cmd_stkDec`,
    /// `cmd_stkClr`); each is 4 bytes long.
    pub fn flow_truncator_offsets(&self) -> Vec<u32> {
        let important = &self.tables.important;
        let mut offsets = Vec::new();
        for signature in [important.cmd_end, important.cmd_stk_dec, important.cmd_stk_clr] {
            offsets.extend(self.file.offsets_with(signature));
        }
        offsets
    }

    /// Offsets right after the returning instructions; the last one may
    /// equal the file size.
    pub fn offsets_after_returning(&self) -> Vec<u32> {
        let mut offsets = Vec::new();
        for &signature in &self.tables.returning {
            offsets.extend(
                self.file
                    .instructions_with(signature)
                    .map(|instruction| instruction.end()),
            );
        }
        offsets
    }

    /// Candidate subroutine start offsets: edge destinations (minus
    /// step-over landings), plus everything right after a non-call jump, a
    /// returning instruction or a flow truncator.
    pub fn subroutine_starts(&self) -> BTreeSet<u32> {
        let mut starts = BTreeSet::new();

        let step_over: BTreeSet<u32> = self
            .step_over_edges()
            .into_iter()
            .map(|id| self.graph.edge(id).to_pos)
            .collect();
        for (_, edge) in self.graph.edges() {
            if !step_over.contains(&edge.to_pos) {
                starts.insert(edge.to_pos);
            }
        }

        for id in self.all_jumps() {
            let exit = self.graph.block(self.graph.edge(id).from).exit.position;
            if let Some(instruction) = self.file.instruction_at(exit) {
                starts.insert(instruction.end());
            }
        }

        starts.extend(self.offsets_after_returning());
        starts.extend(self.flow_truncator_offsets().into_iter().map(|offset| offset + 4));
        starts.remove(&self.file.len());
        starts
    }
}
