//! The control-flow graph: an arena of basic blocks joined by typed edges.
//!
//! Blocks and edges are stored in flat arenas and reference each other by
//! index, so the cyclic block/edge structure needs no shared ownership and
//! the graph clones freely for analysis.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use pac_asm::{PacFile, SlotClass, Value};

use crate::error::GraphError;

bitflags! {
    /// The transition descriptor carried by every edge.
    pub struct Transition: u8 {
        /// The transfer saves a return address (call-like).
        const SAVE_ADDRESS = 0b0000_0001;
        /// Plain fallthrough to the next block.
        const FALLTHROUGH = 0b0000_0010;
        /// Flow that may or may not happen (after returning instructions).
        const POTENTIAL = 0b0000_0100;
        /// Distinguished `doSelect`-style reference.
        const SPECIAL = 0b0000_1000;
        /// Callback registration.
        const CALLBACK = 0b0001_0000;
    }
}

/// Index of a block in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

/// Index of an edge in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub u32);

/// Where control enters a block, and who jumps there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Instruction offset the entry sits at.
    pub position: u32,
    /// Incoming edges.
    pub incoming: Vec<EdgeId>,
}

/// Where control leaves a block, and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPoint {
    /// Offset of the last instruction.
    pub position: u32,
    /// Outgoing edges.
    pub outgoing: Vec<EdgeId>,
}

/// A contiguous run of instructions with one exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Start offset.
    pub start: u32,
    /// Byte length of the block span.
    pub size: u32,
    /// Ascending offsets of the block's instructions.
    pub instr_offsets: Vec<u32>,
    /// Entry points; exactly one after normalization.
    pub entry_points: Vec<EntryPoint>,
    /// The single exit point.
    pub exit: ExitPoint,
    /// Synthetic block with no instructions.
    pub is_dummy: bool,
    /// Non-terminal member of a fallthrough chain.
    pub is_split: bool,
    /// No incoming control flow has been recorded.
    pub is_source: bool,
}

impl CodeBlock {
    pub(crate) fn new(start: u32) -> CodeBlock {
        CodeBlock {
            start,
            size: 0,
            instr_offsets: Vec::new(),
            entry_points: Vec::new(),
            exit: ExitPoint { position: start, outgoing: Vec::new() },
            is_dummy: false,
            is_split: false,
            is_source: true,
        }
    }

    /// Offset one past the block span.
    pub fn end(&self) -> u32 {
        self.start + self.size
    }

    /// Number of instructions.
    pub fn instruction_count(&self) -> usize {
        self.instr_offsets.len()
    }

    /// The canonical entry point (the only one after normalization).
    pub fn entry(&self) -> &EntryPoint {
        &self.entry_points[0]
    }

    /// The entry point at `position`, if one exists.
    pub fn entry_at(&self, position: u32) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|entry| entry.position == position)
    }

    fn entry_at_mut(&mut self, position: u32) -> Option<&mut EntryPoint> {
        self.entry_points.iter_mut().find(|entry| entry.position == position)
    }

    fn last_instruction_offset(&self) -> Option<u32> {
        self.instr_offsets.last().copied()
    }
}

/// A typed edge between an exit point and an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Source block.
    pub from: BlockId,
    /// Destination block.
    pub to: BlockId,
    /// Position of the destination entry point.
    pub to_pos: u32,
    /// Transition descriptor.
    pub flags: Transition,
}

/// A runtime jump whose destination could not be recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct UnrecoveredJump {
    /// Class of the argument carrying the destination.
    pub class: SlotClass,
    /// The argument's value.
    pub value: Value,
}

/// Why an edge could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// No block contains or follows the target offset.
    NoBlock,
    /// The target is not a valid instruction start inside the block.
    NotInstructionStart,
}

/// The block arena plus everything the resolver passes learn about it.
#[derive(Debug, Clone, Default)]
pub struct CodeGraph {
    blocks: Vec<CodeBlock>,
    edges: Vec<Edge>,
    /// Block ids sorted by start offset.
    order: Vec<BlockId>,
    /// Block starts, parallel to `order`.
    starts: Vec<u32>,
    /// Order index per block id.
    order_index: Vec<usize>,
    /// Fallthrough chains produced by callbacks and normalization,
    /// keyed by the chain head's start offset.
    pub split_chains: BTreeMap<u32, Vec<u32>>,
    /// `label id -> offsets` gathered from `cmd_setLabelId`.
    pub label_offsets: BTreeMap<u32, BTreeSet<u32>>,
    /// Runtime jumps whose destination stayed unknown, by jump offset.
    pub unrecovered_jumps: BTreeMap<u32, UnrecoveredJump>,
    /// Starts of blocks whose unrecovered jump follows `getGateInfo`.
    pub gate_info_blocks: BTreeSet<u32>,
    /// `callback site -> destination` for immediate callback arguments.
    pub callback_destinations: BTreeMap<u32, u32>,
    /// Gate dataflow results: block start -> `(info, destination)` pairs.
    pub dataflow_inputs: BTreeMap<u32, BTreeSet<(u32, u32)>>,
}

impl CodeGraph {
    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the graph has no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The block behind `id`.
    pub fn block(&self, id: BlockId) -> &CodeBlock {
        &self.blocks[id.0 as usize]
    }

    /// Mutable access to the block behind `id`.
    pub fn block_mut(&mut self, id: BlockId) -> &mut CodeBlock {
        &mut self.blocks[id.0 as usize]
    }

    /// The edge behind `id`.
    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0 as usize]
    }

    pub(crate) fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.edges[id.0 as usize]
    }

    /// All edges with their ids.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> + '_ {
        self.edges.iter().enumerate().map(|(index, edge)| (EdgeId(index as u32), edge))
    }

    /// Blocks in ascending start order.
    pub fn blocks_in_order(&self) -> impl Iterator<Item = (BlockId, &CodeBlock)> + '_ {
        self.order.iter().map(|&id| (id, self.block(id)))
    }

    /// Block starts in ascending order.
    pub fn starts(&self) -> &[u32] {
        &self.starts
    }

    /// Block ids in ascending start order.
    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    /// Position of `id` in the ascending start order.
    pub fn order_index(&self, id: BlockId) -> usize {
        self.order_index[id.0 as usize]
    }

    /// The block starting exactly at `offset`.
    pub fn block_at_start(&self, offset: u32) -> Option<BlockId> {
        let index = self.starts.binary_search(&offset).ok()?;
        Some(self.order[index])
    }

    /// The block containing `offset`, or the nearest following block.
    ///
    /// Offsets before the first block resolve to the first block (the file
    /// may begin with raw data); offsets past the last block resolve to
    /// nothing.
    pub fn block_by_offset(&self, offset: u32) -> Option<(u32, BlockId)> {
        let first = *self.starts.first()?;
        if offset < first {
            return Some((first, self.order[0]));
        }
        let index = self.starts.partition_point(|&start| start <= offset) - 1;
        let id = self.order[index];
        let block = self.block(id);
        if offset < block.end() {
            return Some((block.start, id));
        }
        // The offset falls in the gap after this block; take the next one.
        let next = self.order.get(index + 1)?;
        Some((self.block(*next).start, *next))
    }

    pub(crate) fn push_block(&mut self, block: CodeBlock) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    /// Rebuild the ascending start order after blocks were added.
    pub(crate) fn rebuild_order(&mut self) {
        let mut order: Vec<BlockId> =
            (0..self.blocks.len() as u32).map(BlockId).collect();
        order.sort_by_key(|&id| self.block(id).start);
        self.starts = order.iter().map(|&id| self.block(id).start).collect();
        self.order_index = vec![0; self.blocks.len()];
        for (position, &id) in order.iter().enumerate() {
            self.order_index[id.0 as usize] = position;
        }
        self.order = order;
    }

    /// Record an edge between two already-resolved endpoints. The
    /// destination stops being a source.
    pub(crate) fn add_edge(
        &mut self,
        from: BlockId,
        to: BlockId,
        to_pos: u32,
        flags: Transition,
    ) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge { from, to, to_pos, flags });
        self.block_mut(from).exit.outgoing.push(id);
        let dest = self.block_mut(to);
        if let Some(entry) = dest.entry_at_mut(to_pos) {
            entry.incoming.push(id);
        }
        dest.is_source = false;
        id
    }

    pub(crate) fn add_entry_point(&mut self, id: BlockId, position: u32) {
        let block = self.block_mut(id);
        if block.entry_at(position).is_none() {
            block.entry_points.push(EntryPoint { position, incoming: Vec::new() });
        }
    }

    /// Route a jump from the instruction at `location` to `target`.
    ///
    /// Targets inside a block materialize an entry point there; targets
    /// between instruction starts advance to the next start; targets in
    /// inter-block gaps redirect to the following block's entry.
    pub fn connect(
        &mut self,
        file: &PacFile,
        location: u32,
        target: u32,
        flags: Transition,
    ) -> Result<(), ConnectError> {
        let (dest_start, dest) = self.block_by_offset(target).ok_or(ConnectError::NoBlock)?;
        if dest_start > target {
            tracing::trace!(target, dest_start, "jump target redirected to the next block");
        }
        let (_, from) = self.block_by_offset(location).ok_or(ConnectError::NoBlock)?;
        self.accept_jump(file, dest, target, from, flags)
    }

    fn accept_jump(
        &mut self,
        file: &PacFile,
        dest: BlockId,
        target: u32,
        from: BlockId,
        flags: Transition,
    ) -> Result<(), ConnectError> {
        let block = self.block(dest);
        let last = block.last_instruction_offset().ok_or(ConnectError::NotInstructionStart)?;
        if last < target {
            // Pointing past the block's instructions.
            return Err(ConnectError::NotInstructionStart);
        }

        let mut position = target;
        if target < block.instr_offsets[0] {
            // Before the block's first instruction (gap redirection).
            position = block.start;
        } else if block.instr_offsets.binary_search(&target).is_err() {
            // Between two instruction starts: either inside an instruction
            // (invalid) or at in-block data (advance to the next start).
            let index = block.instr_offsets.partition_point(|&o| o < target) - 1;
            let offset = block.instr_offsets[index];
            let size = file.instruction_at(offset).map(|i| i.size).unwrap_or(0);
            if target < offset + size {
                return Err(ConnectError::NotInstructionStart);
            }
            position = block.instr_offsets[index + 1];
        }

        self.add_entry_point(dest, position);
        self.add_edge(from, dest, position, flags);
        Ok(())
    }

    /// Outgoing edges of `id`.
    pub fn outgoing(&self, id: BlockId) -> impl Iterator<Item = (EdgeId, &Edge)> + '_ {
        self.block(id).exit.outgoing.iter().map(|&eid| (eid, self.edge(eid)))
    }

    /// Incoming edges of the canonical entry point of `id`.
    pub fn incoming(&self, id: BlockId) -> impl Iterator<Item = (EdgeId, &Edge)> + '_ {
        self.block(id).entry().incoming.iter().map(|&eid| (eid, self.edge(eid)))
    }

    /// Keep every entry point's incoming list sorted by origin position.
    pub fn sort_incoming(&mut self) {
        let keys: Vec<u32> = self
            .edges
            .iter()
            .map(|edge| self.block(edge.from).exit.position)
            .collect();
        for block in &mut self.blocks {
            for entry in &mut block.entry_points {
                entry.incoming.sort_by_key(|eid| keys[eid.0 as usize]);
            }
        }
    }

    /// Assert the structural invariants: at least one entry point per
    /// block and the edge mirror law.
    pub fn verify(&self) -> Result<(), GraphError> {
        for block in &self.blocks {
            if block.entry_points.is_empty() {
                return Err(GraphError::MissingEntryPoint { start: block.start });
            }
        }
        for (id, edge) in self.edges() {
            let mirrored = self.block(edge.from).exit.outgoing.contains(&id)
                && self
                    .block(edge.to)
                    .entry_at(edge.to_pos)
                    .is_some_and(|entry| entry.incoming.contains(&id));
            if !mirrored {
                return Err(GraphError::UnmirroredEdge {
                    edge: id.0,
                    from: self.block(edge.from).start,
                    to: self.block(edge.to).start,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(start: u32, size: u32, instrs: &[u32]) -> CodeBlock {
        let mut block = CodeBlock::new(start);
        block.size = size;
        block.instr_offsets = instrs.to_vec();
        block.entry_points.push(EntryPoint { position: start, incoming: Vec::new() });
        block.exit.position = *instrs.last().unwrap_or(&start);
        block
    }

    fn graph() -> CodeGraph {
        let mut graph = CodeGraph::default();
        graph.push_block(block(8, 8, &[8, 12]));
        graph.push_block(block(24, 4, &[24]));
        graph.rebuild_order();
        graph
    }

    #[test]
    fn lookup_inside_a_block() {
        let graph = graph();
        let (start, id) = graph.block_by_offset(12).unwrap();
        assert_eq!(start, 8);
        assert_eq!(graph.block(id).start, 8);
    }

    #[test]
    fn lookup_before_the_first_block() {
        // Files can start with raw data; early offsets go to block one.
        let graph = graph();
        assert_eq!(graph.block_by_offset(3).map(|(s, _)| s), Some(8));
    }

    #[test]
    fn lookup_in_a_gap_takes_the_next_block() {
        let graph = graph();
        assert_eq!(graph.block_by_offset(18).map(|(s, _)| s), Some(24));
    }

    #[test]
    fn lookup_past_the_last_block_fails() {
        let graph = graph();
        assert_eq!(graph.block_by_offset(28), None);
        assert_eq!(graph.block_by_offset(1000), None);
    }

    #[test]
    fn edges_are_mirrored() {
        let mut graph = graph();
        let (a, b) = (graph.order()[0], graph.order()[1]);
        graph.add_edge(a, b, 24, Transition::FALLTHROUGH);
        graph.verify().unwrap();
        assert!(!graph.block(b).is_source);
        assert!(graph.block(a).is_source);
        assert_eq!(graph.incoming(b).count(), 1);
        assert_eq!(graph.outgoing(a).count(), 1);
    }
}
