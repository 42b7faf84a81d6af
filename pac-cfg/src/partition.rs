//! Splitting the instruction stream into basic blocks.
//!
//! A block ends at every flow-truncating instruction: anything that jumps,
//! returns, terminates the script or clears the stack, plus (optionally)
//! anything that receives a callback.

use std::collections::HashSet;

use pac_asm::PacFile;

use crate::error::GraphError;
use crate::graph::{BlockId, CodeBlock, CodeGraph, EntryPoint};
use crate::tables::FlowTables;

/// Signatures that end the block they appear in.
pub fn flow_truncators(tables: &FlowTables, include_callbacks: bool) -> HashSet<u32> {
    let mut set: HashSet<u32> = tables.returning.iter().copied().collect();
    set.extend(tables.jumps.keys().copied());
    set.extend([
        tables.important.cmd_end,
        tables.important.cmd_stk_dec,
        tables.important.cmd_stk_clr,
    ]);
    if include_callbacks {
        set.extend(tables.callbacks.keys().copied());
    }
    set
}

/// Cut the ordered instruction stream into blocks; the truncating
/// instruction is the last one of its block.
pub fn partition_blocks(
    file: &PacFile,
    tables: &FlowTables,
    include_callbacks: bool,
) -> Result<CodeGraph, GraphError> {
    if file.instruction_count() == 0 {
        return Err(GraphError::NoInstructions);
    }
    let truncators = flow_truncators(tables, include_callbacks);

    let mut graph = CodeGraph::default();
    let mut current: Option<CodeBlock> = None;

    for instruction in file.instructions() {
        let mut block = current.take().unwrap_or_else(|| CodeBlock::new(instruction.offset));
        block.instr_offsets.push(instruction.offset);
        block.size = instruction.end() - block.start;
        block.exit.position = instruction.offset;
        if truncators.contains(&instruction.signature) {
            graph.push_block(block);
        } else {
            current = Some(block);
        }
    }
    if let Some(block) = current.take() {
        graph.push_block(block);
    }

    for index in 0..graph.len() {
        let id = BlockId(index as u32);
        let start = graph.block(id).start;
        graph.block_mut(id).entry_points.push(EntryPoint { position: start, incoming: Vec::new() });
    }
    graph.rebuild_order();
    Ok(graph)
}
