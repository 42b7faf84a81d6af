//! End-to-end pipeline tests: parse, partition, resolve, normalize,
//! analyze.

mod common;

use common::*;
use pac_asm::EntityKind;
use pac_cfg::{dot, Transition};

/// One instruction and a zero tail: one block, one entry, one exit, no
/// edges.
#[test]
fn single_nop_program() {
    let mut data = Vec::new();
    nop(&mut data);
    data.extend([0, 0, 0, 0]);
    let result = decompile(&data, "nop.pac");

    let graph = result.graph.as_ref().unwrap();
    assert_eq!(graph.len(), 1);
    let (id, block) = graph.blocks_in_order().next().unwrap();
    assert_eq!(block.entry_points.len(), 1);
    assert_eq!(graph.outgoing(id).count(), 0);

    let summary = result.summary.as_ref().unwrap();
    assert_eq!(summary.block_count, 1);
    assert_eq!(summary.edge_count, 0);
    assert_eq!(summary.isolated, vec![0]);
    assert!(summary.is_dag);
}

/// `cmd_inxJmp` captures its branch table; an out-of-range branch is
/// dropped, an in-range one becomes a plain edge.
#[test]
fn switch_table_edges() {
    let mut data = Vec::new();
    sig(&mut data, CMD_INX_JMP);
    data.extend([0xAA, 0xBB, 0xCC, 0xDD]);
    word(&mut data, 0);
    let result = decompile(&data, "switch.pac");

    let table = result
        .file
        .entities()
        .iter()
        .find_map(|entity| match &entity.kind {
            EntityKind::SwitchTable { branches } => Some((entity.offset, branches.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(table, (4, vec![0xDDCCBBAA, 0x00000000]));

    // The 0xDDCCBBAA branch is unresolvable and dropped; branch 0 points
    // back at the block's own entry.
    let graph = result.graph.as_ref().unwrap();
    assert_eq!(graph.len(), 1);
    let edges: Vec<_> = graph.edges().map(|(_, edge)| *edge).collect();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].to_pos, 0);
    assert_eq!(edges[0].flags, Transition::empty());
}

/// A conditional jump produces the taken edge plus a fallthrough, both
/// landing on the following block.
#[test]
fn conditional_jump_edges() {
    let mut data = Vec::new();
    cmd_if_jmp(&mut data, 1, 16); // [0, 16)
    cmd_end(&mut data); // [16, 20)
    let result = decompile(&data, "cond.pac");

    let graph = result.graph.as_ref().unwrap();
    assert_eq!(graph.len(), 2);
    let (first, _) = graph.blocks_in_order().next().unwrap();
    let outgoing: Vec<_> = graph.outgoing(first).map(|(_, edge)| *edge).collect();
    assert_eq!(outgoing.len(), 2);
    assert!(outgoing.iter().all(|edge| edge.to_pos == 16));
    assert!(outgoing.iter().any(|edge| edge.flags == Transition::empty()));
    assert!(outgoing.iter().any(|edge| edge.flags == Transition::FALLTHROUGH));

    let summary = result.summary.as_ref().unwrap();
    assert!(summary.is_dag);
    assert_eq!(summary.sources, vec![0]);
    assert_eq!(summary.sinks, vec![16]);
    assert_eq!(summary.cyclomatic, 2);
}

/// `cmd_call` gets the call edge plus a potential step-over edge.
#[test]
fn call_step_over() {
    let mut data = Vec::new();
    cmd_call(&mut data, 8); // [0, 8)
    nop(&mut data); // [8, 12)
    cmd_end(&mut data); // [12, 16)
    let result = decompile(&data, "call.pac");

    let graph = result.graph.as_ref().unwrap();
    let (first, _) = graph.blocks_in_order().next().unwrap();
    let flags: Vec<_> = graph.outgoing(first).map(|(_, edge)| edge.flags).collect();
    assert!(flags.contains(&Transition::SAVE_ADDRESS));
    assert!(flags.contains(&Transition::POTENTIAL));
}

/// A jump into the middle of a block forces a split: the prefix keeps the
/// original start and falls through into the new suffix block.
#[test]
fn mid_block_entry_is_normalized() {
    let mut data = Vec::new();
    cmd_jmp(&mut data, 12); // [0, 8)
    nop(&mut data); // 8
    nop(&mut data); // 12
    nop(&mut data); // 16
    cmd_end(&mut data); // 20, block [8, 24)
    let result = decompile(&data, "split.pac");

    let graph = result.graph.as_ref().unwrap();
    assert_eq!(graph.starts(), &[0, 8, 12]);
    for (_, block) in graph.blocks_in_order() {
        assert_eq!(block.entry_points.len(), 1);
    }

    let prefix = graph.block_at_start(8).unwrap();
    let suffix = graph.block_at_start(12).unwrap();
    assert!(graph.block(prefix).is_split);
    assert!(!graph.block(suffix).is_split);
    assert_eq!(graph.block(prefix).instr_offsets, vec![8]);
    assert_eq!(graph.block(suffix).instr_offsets, vec![12, 16, 20]);
    assert_eq!((graph.block(prefix).size, graph.block(suffix).size), (4, 12));

    // The synthetic fallthrough edge plus the redirected jump.
    let incoming: Vec<_> = graph.incoming(suffix).map(|(_, edge)| *edge).collect();
    assert_eq!(incoming.len(), 2);
    assert!(incoming
        .iter()
        .any(|edge| edge.from == prefix && edge.flags == Transition::FALLTHROUGH));
    assert!(incoming.iter().any(|edge| edge.from == graph.block_at_start(0).unwrap()));
    assert_eq!(graph.split_chains.get(&8), Some(&vec![8, 12]));

    // The prefix lost its jump target but kept no incoming edge, so it is
    // a source again.
    assert!(graph.block(prefix).is_source);
}

/// Label bindings connect every label jump to every bound offset.
#[test]
fn label_study() {
    let mut data = Vec::new();
    sig(&mut data, CMD_SET_LABEL_ID); // [0, 16)
    composite(&mut data, 0x2, 7);
    word(&mut data, 28);
    sig(&mut data, CMD_JMP_LABEL_ID); // [16, 28)
    composite(&mut data, 0x2, 7);
    cmd_end(&mut data); // [28, 32)
    let result = decompile(&data, "labels.pac");

    let graph = result.graph.as_ref().unwrap();
    assert_eq!(graph.label_offsets.get(&7).map(|s| s.iter().copied().collect::<Vec<_>>()),
        Some(vec![28]));

    let dest = graph.block_at_start(28).unwrap();
    let incoming: Vec<_> = graph.incoming(dest).map(|(_, edge)| *edge).collect();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].flags, Transition::empty());
}

/// A runtime jump through a local recovered from its single other use.
#[test]
fn runtime_jump_recovery() {
    let mut data = Vec::new();
    cmd_mov(&mut data, (0x4, 5), (0x1, 32)); // [0, 20): IntLocal[5] = 32
    sig(&mut data, CMD_JMP_LABEL); // [20, 32)
    composite(&mut data, 0x4, 5);
    cmd_end(&mut data); // [32, 36)
    let result = decompile(&data, "recover.pac");

    let graph = result.graph.as_ref().unwrap();
    assert!(graph.unrecovered_jumps.is_empty());
    let dest = graph.block_at_start(32).unwrap();
    let incoming: Vec<_> = graph.incoming(dest).map(|(_, edge)| *edge).collect();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].flags, Transition::empty());
}

/// An unrecoverable runtime jump preceded by `getGateInfo` is noted for
/// the dataflow study.
#[test]
fn unrecovered_jump_after_get_gate_info() {
    let mut data = Vec::new();
    sig(&mut data, GET_GATE_INFO); // [0, 12)
    composite(&mut data, 0x2, 0);
    sig(&mut data, CMD_JMP_LABEL); // [12, 24)
    composite(&mut data, 0x4, 9);
    cmd_end(&mut data); // [24, 28)
    let result = decompile(&data, "gate.pac");

    let graph = result.graph.as_ref().unwrap();
    assert_eq!(graph.unrecovered_jumps.len(), 1);
    assert!(graph.unrecovered_jumps.contains_key(&12));
    assert!(graph.gate_info_blocks.contains(&0));
}

/// The gate dataflow study propagates `setGateInfo` pairs to the
/// `getGateInfo` block they reach.
#[test]
fn gate_dataflow_inputs() {
    let mut data = Vec::new();
    sig(&mut data, SET_GATE_INFO); // [0, 28)
    composite(&mut data, 0x2, 1);
    composite(&mut data, 0x2, 42);
    composite(&mut data, 0x1, 36);
    cmd_jmp(&mut data, 36); // [28, 36), block [0, 36)
    sig(&mut data, GET_GATE_INFO); // [36, 48)
    composite(&mut data, 0x2, 0);
    sig(&mut data, CMD_JMP_LABEL); // [48, 60)
    composite(&mut data, 0x4, 9);
    cmd_end(&mut data); // [60, 64)
    let result = decompile(&data, "dataflow.pac");

    let graph = result.graph.as_ref().unwrap();
    assert!(graph.gate_info_blocks.contains(&36));
    let inputs: Vec<_> = graph.dataflow_inputs[&36].iter().copied().collect();
    assert_eq!(inputs, vec![(42, 36)]);
}

/// Callback receivers split the block and reference immediate
/// destinations with a callback edge.
#[test]
fn callback_edges() {
    let mut data = Vec::new();
    sig(&mut data, SET_CALLBACK); // [0, 8)
    word(&mut data, 16);
    nop(&mut data); // 8
    cmd_end(&mut data); // 12, block [8, 16)
    cmd_end(&mut data); // block [16, 20)
    let result = decompile(&data, "callback.pac");

    let graph = result.graph.as_ref().unwrap();
    let first = graph.block_at_start(0).unwrap();
    assert!(graph.block(first).is_split);
    assert_eq!(graph.callback_destinations.get(&0), Some(&16));
    assert_eq!(graph.split_chains.get(&0), Some(&vec![0, 8]));

    let flags: Vec<_> = graph.outgoing(first).map(|(_, edge)| edge.flags).collect();
    assert!(flags.contains(&Transition::FALLTHROUGH));
    assert!(flags.contains(&Transition::CALLBACK));
}

/// `doSelect` gets a special edge to a block start; plain returns get a
/// potential edge to the next instruction.
#[test]
fn returning_instructions() {
    let mut data = Vec::new();
    sig(&mut data, DO_SELECT); // [0, 8)
    word(&mut data, 12);
    sig(&mut data, CMD_RET); // block [8, 12)
    cmd_end(&mut data); // block [12, 16)
    let result = decompile(&data, "returns.pac");

    let graph = result.graph.as_ref().unwrap();
    let edges: Vec<_> = graph.edges().map(|(_, edge)| *edge).collect();
    assert!(edges
        .iter()
        .any(|edge| edge.flags == Transition::SPECIAL && edge.to_pos == 12));
    assert!(edges
        .iter()
        .any(|edge| edge.flags == Transition::POTENTIAL && edge.to_pos == 12));
}

/// A two-block cycle is found as one non-trivial component and still
/// yields a flow root.
#[test]
fn cycle_detection() {
    let mut data = Vec::new();
    cmd_jmp(&mut data, 8); // block [0, 8)
    cmd_jmp(&mut data, 0); // block [8, 16)
    cmd_end(&mut data); // block [16, 20), isolated
    let result = decompile(&data, "cycle.pac");

    let summary = result.summary.as_ref().unwrap();
    assert!(!summary.is_dag);
    assert_eq!(summary.cycles.len(), 1);
    assert_eq!(summary.cycles[0], vec![0, 8]);
    assert_eq!(summary.isolated, vec![16]);
    // One root out of the cycle's condensation plus the isolated block.
    assert_eq!(summary.roots.len(), 2);
    assert_eq!(summary.cyclomatic_with_roots, 2 - 3 + 1 + 2);
}

/// Topological order respects every non-back edge.
#[test]
fn topological_order_property() {
    let mut data = Vec::new();
    cmd_if_jmp(&mut data, 1, 24); // block [0, 16)
    cmd_jmp(&mut data, 24); // block [16, 24)
    cmd_end(&mut data); // block [24, 28)
    let result = decompile(&data, "topo.pac");

    let graph = result.graph.as_ref().unwrap();
    let settings = pac_cfg::DecompilerSettings::default();
    let visitor = result.visitor(&settings).unwrap();
    assert!(visitor.is_dag);

    let order: Vec<usize> = visitor.topsort.iter().rev().copied().collect();
    let position = |vertex: usize| order.iter().position(|&v| v == vertex).unwrap();
    for (_, edge) in graph.edges() {
        let from = graph.order_index(edge.from);
        let to = graph.order_index(edge.to);
        assert!(position(from) < position(to), "edge {from} -> {to} violates the order");
    }
}

/// Reachability coloring honors the depth cap.
#[test]
fn bounded_reachability() {
    let mut data = Vec::new();
    cmd_jmp(&mut data, 8); // A [0, 8)
    cmd_jmp(&mut data, 16); // B [8, 16)
    cmd_end(&mut data); // C [16, 20)
    let result = decompile(&data, "depth.pac");

    let settings = pac_cfg::DecompilerSettings::default();
    let mut visitor = result.visitor(&settings).unwrap();
    visitor.reset_color();
    visitor.find_reachable(0, 2, 2);
    // Depth 2 covers A and B but not C.
    let reached = visitor.color.iter().filter(|&&c| c == 2).count();
    assert_eq!(reached, 2);
}

/// The edge mirror law and single-entry invariant hold for a program
/// exercising every pass.
#[test]
fn structural_invariants() {
    let mut data = Vec::new();
    cmd_if_jmp(&mut data, 1, 24); // [0, 16)
    cmd_jmp(&mut data, 32); // [16, 24)
    cmd_call(&mut data, 0); // [24, 32)
    cmd_end(&mut data); // [32, 36)
    let result = decompile(&data, "invariants.pac");

    let graph = result.graph.as_ref().unwrap();
    graph.verify().unwrap();
    for (_, block) in graph.blocks_in_order() {
        assert_eq!(block.entry_points.len(), 1);
        assert!(!block.instr_offsets.is_empty());
    }

    // Outgoing and incoming edge counts agree.
    let outgoing: usize = graph.blocks_in_order().map(|(_, b)| b.exit.outgoing.len()).sum();
    let incoming: usize = graph.blocks_in_order().map(|(_, b)| b.entry().incoming.len()).sum();
    assert_eq!(outgoing, incoming);
}

/// A file with no instructions decompiles to data only.
#[test]
fn data_only_file() {
    let result = decompile(&[1, 2, 3, 4, 5, 6], "data.pac");
    assert!(result.graph.is_none());
    assert!(result.summary.is_none());
    assert_eq!(result.data.len(), 1);
}

/// Rendering produces dot source with the analysis colors.
#[test]
fn dot_rendering() {
    let mut data = Vec::new();
    cmd_if_jmp(&mut data, 1, 16); // [0, 16)
    cmd_end(&mut data); // [16, 20)
    let result = decompile(&data, "dot.pac");

    let settings = pac_cfg::DecompilerSettings::default();
    let visitor = result.visitor(&settings).unwrap();
    let source = dot::render(
        &result.file,
        &visitor,
        &dot::DotSettings::default(),
        dot::NodeFilter::All,
    );
    assert!(source.starts_with("digraph {"));
    assert!(source.contains("\"0\" [label=\"cmd_ifJmp (0x0)\""));
    assert!(source.contains("fillcolor=\"yellow\""));
    assert!(source.contains("\"0\" -> \"16\""));
    assert!(source.ends_with("}\n"));
}
