//! Entry-point normalization: blocks that acquired mid-block entry points
//! are split into chains of single-entry blocks linked by synthetic
//! fallthrough edges.

use std::mem;

use crate::graph::{BlockId, CodeBlock, CodeGraph, EdgeId, EntryPoint, Transition};

/// Split every multi-entry block. Afterwards each block has exactly one
/// entry point and every chain is recorded in `split_chains`.
pub fn normalize_entry_points(graph: &mut CodeGraph) {
    tracing::debug!("step 8: normalizing entry points");
    let ids: Vec<BlockId> = graph.order().to_vec();
    for id in ids {
        if graph.block(id).entry_points.len() > 1 {
            split_block(graph, id);
        }
    }
    graph.rebuild_order();
    graph.sort_incoming();
}

/// Peel suffix blocks off `prefix_id`, highest entry offset first.
fn split_block(graph: &mut CodeGraph, prefix_id: BlockId) {
    let mut offsets: Vec<u32> =
        graph.block(prefix_id).entry_points.iter().map(|entry| entry.position).collect();
    offsets.sort_unstable();
    graph.split_chains.insert(offsets[0], offsets.clone());

    let mut end = graph.block(prefix_id).end();
    let mut terminal = true;
    for &offset in offsets.iter().skip(1).rev() {
        // Everything in [offset, end) becomes a new block.
        let (suffix_instrs, old_incoming) = {
            let prefix = graph.block_mut(prefix_id);
            let cut = prefix.instr_offsets.partition_point(|&o| o < offset);
            let suffix_instrs = prefix.instr_offsets.split_off(cut);
            let removed = prefix
                .entry_points
                .iter()
                .position(|entry| entry.position == offset)
                .map(|index| prefix.entry_points.remove(index).incoming)
                .unwrap_or_default();
            (suffix_instrs, removed)
        };

        let mut block = CodeBlock::new(offset);
        block.size = end - offset;
        block.exit.position = suffix_instrs.last().copied().unwrap_or(offset);
        block.instr_offsets = suffix_instrs;
        block.entry_points.push(EntryPoint { position: offset, incoming: Vec::new() });
        block.is_source = false;
        block.is_split = !terminal;
        terminal = false;
        let suffix_id = graph.push_block(block);

        // The old exit and its outgoing edges move to the suffix.
        let moved: Vec<EdgeId> = mem::take(&mut graph.block_mut(prefix_id).exit.outgoing);
        for &edge in &moved {
            graph.edge_mut(edge).from = suffix_id;
        }
        graph.block_mut(suffix_id).exit.outgoing = moved;

        // Shorten the prefix and give it a synthetic fallthrough exit.
        {
            let prefix = graph.block_mut(prefix_id);
            prefix.size -= end - offset;
            prefix.exit.position = prefix.instr_offsets.last().copied().unwrap_or(prefix.start);
        }
        graph.add_edge(prefix_id, suffix_id, offset, Transition::FALLTHROUGH);

        // Jumps that targeted the mid-block entry now land on the suffix.
        for &edge in &old_incoming {
            graph.edge_mut(edge).to = suffix_id;
        }
        graph
            .block_mut(suffix_id)
            .entry_points[0]
            .incoming
            .extend(old_incoming);

        end = offset;
    }

    let prefix = graph.block_mut(prefix_id);
    prefix.is_split = true;
    // With its extra entries gone the prefix may be a source again.
    if prefix.entry_points.first().is_some_and(|entry| entry.incoming.is_empty()) {
        prefix.is_source = true;
    }
}
