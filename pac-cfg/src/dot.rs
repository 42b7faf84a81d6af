//! Graphviz rendering of an analyzed graph.
//!
//! The output is plain dot source; turning it into SVG is the caller's
//! business. Colors encode the analysis: matched blocks green, sources and
//! flow roots yellow, isolated blocks red, sinks violet.

use std::fmt::{self, Write};

use itertools::Itertools;
use pac_asm::PacFile;

use crate::analyze::Visitor;
use crate::graph::{CodeBlock, CodeGraph, Edge, Transition};

/// Rendering knobs.
#[derive(Debug, Clone, Copy)]
pub struct DotSettings {
    /// Node font size.
    pub fontsize: u32,
    /// Graphviz `nslimit`, when bounded layout time matters.
    pub nslimit: Option<u32>,
}

impl Default for DotSettings {
    fn default() -> DotSettings {
        DotSettings { fontsize: 10, nslimit: Some(12) }
    }
}

/// Which vertices make it into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFilter {
    /// Everything.
    All,
    /// Only vertices colored by the last traversal.
    Reached,
}

impl NodeFilter {
    fn skips(self, color: i32) -> bool {
        match self {
            NodeFilter::All => false,
            NodeFilter::Reached => color == 0,
        }
    }
}

fn edge_style(graph: &CodeGraph, edge: &Edge) -> (&'static str, &'static str) {
    if edge.flags.contains(Transition::CALLBACK) {
        ("orange", "solid")
    } else if edge.flags.contains(Transition::SPECIAL) {
        ("violet", "solid")
    } else if edge.flags.contains(Transition::POTENTIAL) {
        ("black", "dotted")
    } else if graph.block(edge.from).is_split {
        ("blue", "solid")
    } else if edge.flags.contains(Transition::SAVE_ADDRESS) {
        ("green", "solid")
    } else if edge.flags.contains(Transition::FALLTHROUGH) {
        ("black", "dashed")
    } else {
        ("black", "solid")
    }
}

fn block_color(visitor: &Visitor<'_>, block: &CodeBlock, vertex: usize) -> &'static str {
    let graph = visitor.graph();
    if visitor.matched().contains(&block.start) {
        return "green";
    }
    let has_real_exit = block
        .exit
        .outgoing
        .iter()
        .any(|&eid| !graph.edge(eid).flags.contains(Transition::SPECIAL));
    if block.is_source {
        // Isolated blocks and ones that only leave through special edges
        // render red.
        return if has_real_exit { "yellow" } else { "red" };
    }
    if !has_real_exit {
        return "violet";
    }
    if visitor.is_root(vertex) {
        return "yellow";
    }
    "white"
}

fn node_label(file: &PacFile, block: &CodeBlock) -> String {
    block
        .instr_offsets
        .iter()
        .map(|&offset| {
            let name = file
                .instruction_at(offset)
                .map(|instruction| instruction.name.as_str())
                .unwrap_or("?");
            format!("{name} (0x{offset:X})")
        })
        .join("\\n")
}

fn node_defaults(out: &mut impl Write, indent: &str, fontsize: u32) -> fmt::Result {
    writeln!(
        out,
        "{indent}node [fontname=\"courier\", fontsize=\"{fontsize}\", shape=\"box\", \
         colorscheme=\"paired6\", style=\"filled\"]"
    )?;
    writeln!(out, "{indent}edge [fontname=\"courier\"]")
}

fn write_dot(
    out: &mut impl Write,
    file: &PacFile,
    visitor: &Visitor<'_>,
    settings: &DotSettings,
    filter: NodeFilter,
) -> fmt::Result {
    let graph = visitor.graph();
    writeln!(out, "digraph {{")?;
    node_defaults(out, "\t", settings.fontsize)?;
    if let Some(nslimit) = settings.nslimit {
        writeln!(out, "\tgraph [nslimit=\"{nslimit}\"]")?;
    }

    // Nodes.
    for (vertex, (_, block)) in graph.blocks_in_order().enumerate() {
        if filter.skips(visitor.color[vertex]) {
            continue;
        }
        writeln!(
            out,
            "\t\"{}\" [label=\"{}\", fillcolor=\"{}\"]",
            block.start,
            node_label(file, block),
            block_color(visitor, block, vertex)
        )?;
    }

    // Edges, grouped by destination the way the entry points store them.
    for (vertex, (_, block)) in graph.blocks_in_order().enumerate() {
        if filter.skips(visitor.color[vertex]) {
            continue;
        }
        for entry in &block.entry_points {
            for &eid in &entry.incoming {
                let edge = graph.edge(eid);
                let from_block = graph.block(edge.from);
                if filter.skips(visitor.color[visitor.vertex(edge.from)]) {
                    continue;
                }
                let (color, style) = edge_style(graph, edge);
                writeln!(
                    out,
                    "\t\"{}\" -> \"{}\" [color=\"{color}\", style=\"{style}\"]",
                    from_block.start, block.start
                )?;
            }
        }
    }

    // Cluster the non-trivial SCCs.
    for (&color_id, members) in &visitor.non_trivial_components {
        writeln!(out, "\tsubgraph cluster_color_{color_id} {{")?;
        node_defaults(out, "\t\t", settings.fontsize)?;
        writeln!(out, "\t\tgraph [bgcolor=\"grey\"]")?;
        for &vertex in members {
            if filter.skips(visitor.color[vertex]) {
                continue;
            }
            writeln!(out, "\t\t\"{}\"", visitor.offset_of(vertex))?;
        }
        writeln!(out, "\t}}")?;
    }

    // Cluster the fallthrough chains, minus any suffix swallowed by a cycle.
    for (&start_offset, offsets) in &graph.split_chains {
        let Some(start_id) = graph.block_at_start(start_offset) else { continue };
        let start = graph.order_index(start_id);

        let mut first_cycle_vertex = None;
        for &offset in offsets {
            let Some(id) = graph.block_at_start(offset) else { continue };
            let vertex = graph.order_index(id);
            if visitor.belongs_to_cycle.get(vertex).copied().unwrap_or(false) {
                first_cycle_vertex = Some(vertex);
                break;
            }
        }
        if first_cycle_vertex == Some(start) {
            // The whole chain sits inside one component.
            continue;
        }
        let stop = match first_cycle_vertex {
            Some(vertex) => vertex,
            None => {
                let Some(last) = offsets.last().and_then(|&o| graph.block_at_start(o)) else {
                    continue;
                };
                graph.order_index(last) + 1
            }
        };
        if start + 1 == stop {
            // Only one node would be left; not worth a cluster.
            continue;
        }

        writeln!(out, "\tsubgraph cluster_{start_offset:X} {{")?;
        node_defaults(out, "\t\t", settings.fontsize)?;
        writeln!(out, "\t\tgraph [style=\"dotted\"]")?;
        for vertex in start..stop {
            if filter.skips(visitor.color[vertex]) {
                continue;
            }
            writeln!(out, "\t\t\"{}\"", visitor.offset_of(vertex))?;
        }
        writeln!(out, "\t}}")?;
    }

    writeln!(out, "}}")
}

/// Render the analyzed graph as Graphviz source.
pub fn render(
    file: &PacFile,
    visitor: &Visitor<'_>,
    settings: &DotSettings,
    filter: NodeFilter,
) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    write_dot(&mut out, file, visitor, settings, filter).ok();
    out
}
